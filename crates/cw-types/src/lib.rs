//! Shared type definitions for Causeway.
//!
//! This crate contains lightweight type definitions that are shared across
//! the tunnel core and the client glue: endpoints, forward routes, and
//! terminal geometry. It stays dependency-light so config loaders and tests
//! can reuse it without pulling in protocol implementations.

pub mod net;
pub mod ssh;

pub use net::{Endpoint, EndpointParseError};
pub use ssh::{ForwardDirection, ForwardRoute, ForwardingConfig, SocksProxy, TerminalGeometry};
