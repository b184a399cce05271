//! Port forwarding and dynamic SOCKS proxying.
//!
//! Three forwarder shapes live here:
//! - [`LocalForwarder`]: listens on a local endpoint and tunnels each
//!   accepted connection through the session to a remote destination.
//! - [`RemoteForwarder`]: registers a remote listener with the server and
//!   bridges each server-opened channel to a local destination.
//! - [`ProxyGateway`]: a local SOCKS5 listener whose CONNECT targets are
//!   dialed through the session, with a periodic keepalive probe.
//!
//! [`ForwardingManager`] owns the spawned run loops for one session and
//! routes server-initiated channels to the right remote forwarder.

mod local;
mod manager;
mod remote;
mod socks;
mod traits;

pub use local::LocalForwarder;
pub use manager::ForwardingManager;
pub use remote::{register_remote_forward, RemoteBinding, RemoteForwarder};
pub use socks::{ProxyGateway, KEEPALIVE_INTERVAL};
pub use traits::{
    RemoteForwardChannel, RemoteRegistrar, TunnelSession, TunnelStream, TunnelStreamIo,
};
