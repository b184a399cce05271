use thiserror::Error;

/// Errors produced while establishing and running a client connection.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("key error: {0}")]
    Key(#[from] russh::keys::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("host key verification failed: {0}")]
    HostKeyFailed(String),

    #[error("tunnel error: {0}")]
    Core(#[from] ssh_core::SshCoreError),

    #[error("{0}")]
    Other(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
