//! Bidirectional stream relaying.
//!
//! [`relay`] is the shared pump under every forwarder: it copies both
//! directions until each side has signalled EOF, then shuts both streams
//! down. Abrupt peer disconnects are normal tunnel traffic and are
//! reported as a clean zero-total finish rather than an error.

use std::io::ErrorKind;

use tokio::io::{copy_bidirectional, AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::SshResult;

/// Byte counts moved by a finished relay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayTotals {
    /// Bytes copied from the near stream into the far stream.
    pub near_to_far: u64,
    /// Bytes copied from the far stream into the near stream.
    pub far_to_near: u64,
}

/// Pump bytes between two streams until both directions finish.
///
/// Both streams are shut down before returning, whatever the copy
/// outcome, so channel peers always observe EOF.
pub async fn relay<N, F>(mut near: N, mut far: F) -> SshResult<RelayTotals>
where
    N: AsyncRead + AsyncWrite + Unpin,
    F: AsyncRead + AsyncWrite + Unpin,
{
    let copied = copy_bidirectional(&mut near, &mut far).await;
    let _ = near.shutdown().await;
    let _ = far.shutdown().await;
    match copied {
        Ok((near_to_far, far_to_near)) => Ok(RelayTotals { near_to_far, far_to_near }),
        Err(err) if is_disconnect(&err) => Ok(RelayTotals::default()),
        Err(err) => Err(err.into()),
    }
}

fn is_disconnect(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::ConnectionReset
    )
}
