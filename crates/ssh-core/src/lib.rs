//! Core SSH tunnel primitives for Causeway.
//!
//! This crate implements the transport-agnostic pieces of a tunneling
//! client: bidirectional stream relaying, local and remote TCP port
//! forwarding, a dynamic SOCKS5 gateway, and an interactive shell session
//! driven over an SSH channel. The SSH transport itself is abstracted
//! behind small capability traits so every run loop here is testable with
//! in-memory mocks; `client-core` provides the russh-backed wiring.

pub mod error;
pub mod forwarding;
pub mod logging;
pub mod relay;
pub mod session;
pub mod terminal;

pub use error::{SshCoreError, SshResult};
pub use forwarding::{
    register_remote_forward, ForwardingManager, LocalForwarder, ProxyGateway, RemoteBinding,
    RemoteForwardChannel, RemoteForwarder, RemoteRegistrar, TunnelSession, TunnelStream,
    TunnelStreamIo,
};
pub use relay::{relay, RelayTotals};
pub use session::{
    CommandOutput, InteractiveSession, SessionHandle, SharedSessionHandle, ShellChannel,
    ShellEvent, ShellSession, ShellState,
};
pub use terminal::{interactive_pty_modes, DEFAULT_TERM};
