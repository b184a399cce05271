//! Error types shared across the tunnel core.

use thiserror::Error;

/// Errors produced by tunnel setup and run loops.
#[derive(Debug, Error)]
pub enum SshCoreError {
    #[error("ssh transport error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind listener on {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to accept connection on {address}: {source}")]
    AcceptFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to dial {address}: {source}")]
    DialFailed {
        address: String,
        #[source]
        source: Box<SshCoreError>,
    },

    #[error("failed to open channel: {0}")]
    ChannelOpenFailed(String),

    #[error("pty request rejected: {0}")]
    PtyRequestFailed(String),

    #[error("shell request rejected: {0}")]
    ShellStartFailed(String),

    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("session is closed")]
    SessionClosed,

    #[error("invalid forward route: {0}")]
    InvalidRoute(String),

    #[error("{0}")]
    Other(String),
}

pub type SshResult<T> = Result<T, SshCoreError>;
