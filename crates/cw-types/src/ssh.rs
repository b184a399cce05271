//! Tunnel route and terminal geometry types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::net::Endpoint;

/// Which side of the SSH connection accepts inbound TCP connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForwardDirection {
    /// Listen locally, dial out on the remote side (`ssh -L`).
    LocalToRemote,
    /// Listen remotely, dial out on the local side (`ssh -R`).
    RemoteToLocal,
}

impl fmt::Display for ForwardDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardDirection::LocalToRemote => write!(f, "local"),
            ForwardDirection::RemoteToLocal => write!(f, "remote"),
        }
    }
}

/// A single port-forwarding route.
///
/// `source` is the listening side, `destination` the side dialed for each
/// accepted connection. The direction decides which end of the SSH session
/// does what.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRoute {
    pub source: Endpoint,
    pub destination: Endpoint,
    pub direction: ForwardDirection,
}

impl ForwardRoute {
    /// Route that listens on a local endpoint and dials the destination
    /// through the remote host.
    pub fn local_to_remote(source: Endpoint, destination: Endpoint) -> Self {
        Self { source, destination, direction: ForwardDirection::LocalToRemote }
    }

    /// Route that listens on the remote host and dials the destination
    /// from the local side.
    pub fn remote_to_local(source: Endpoint, destination: Endpoint) -> Self {
        Self { source, destination, direction: ForwardDirection::RemoteToLocal }
    }
}

impl fmt::Display for ForwardRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.direction, self.source, self.destination)
    }
}

/// A dynamic SOCKS5 proxy listening on a local endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocksProxy {
    pub bind: Endpoint,
}

impl SocksProxy {
    pub fn new(bind: Endpoint) -> Self {
        Self { bind }
    }
}

impl fmt::Display for SocksProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socks {}", self.bind)
    }
}

/// The full set of forwarding requests for one client session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingConfig {
    #[serde(default)]
    pub local_tcp: Vec<ForwardRoute>,
    #[serde(default)]
    pub remote_tcp: Vec<ForwardRoute>,
    #[serde(default)]
    pub dynamic_socks: Vec<SocksProxy>,
}

impl ForwardingConfig {
    pub fn is_empty(&self) -> bool {
        self.local_tcp.is_empty() && self.remote_tcp.is_empty() && self.dynamic_socks.is_empty()
    }
}

/// Terminal dimensions sent with pty requests.
///
/// Pixel dimensions are derived from cell counts with a fixed 8px cell
/// estimate, which is what most servers expect when the real font metrics
/// are unknown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalGeometry {
    pub rows: u32,
    pub columns: u32,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

impl TerminalGeometry {
    /// Build geometry from a character-cell grid.
    pub fn from_cells(rows: u16, columns: u16) -> Self {
        Self {
            rows: u32::from(rows),
            columns: u32::from(columns),
            pixel_width: u32::from(columns) * 8,
            pixel_height: u32::from(rows) * 8,
        }
    }
}
