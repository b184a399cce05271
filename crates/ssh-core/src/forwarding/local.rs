use cw_types::{Endpoint, ForwardDirection, ForwardRoute};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::traits::TunnelSession;
use crate::{error::SshCoreError, relay::relay};

type Result<T> = crate::SshResult<T>;

/// Listens on a local endpoint and tunnels each accepted connection to the
/// route's destination through the session.
pub struct LocalForwarder<S> {
    route: ForwardRoute,
    session: S,
}

impl<S> LocalForwarder<S>
where
    S: TunnelSession,
{
    pub fn new(route: ForwardRoute, session: S) -> Result<Self> {
        if route.direction != ForwardDirection::LocalToRemote {
            return Err(SshCoreError::InvalidRoute(format!(
                "local forwarder requires a local-to-remote route, got {route}"
            )));
        }
        Ok(Self { route, session })
    }

    pub fn route(&self) -> &ForwardRoute {
        &self.route
    }

    /// Accept until cancelled. Per-connection failures are logged and do
    /// not stop the listener; only bind and accept failures are fatal.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let bind = &self.route.source;
        let listener = TcpListener::bind((bind.host.as_str(), bind.port)).await.map_err(|source| {
            SshCoreError::BindFailed { address: bind.to_string(), source }
        })?;
        info!(bind = %bind, target = %self.route.destination, "local forward listening");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(bind = %bind, "local forward stopping");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, origin)) => {
                            let session = self.session.clone();
                            let destination = self.route.destination.clone();
                            tokio::spawn(async move {
                                let origin_host = origin.ip().to_string();
                                let origin_port = origin.port();
                                if let Err(err) =
                                    handle_local_connection(stream, destination, origin_host, origin_port, session).await
                                {
                                    warn!(?err, "local forward connection failed");
                                }
                            });
                        }
                        Err(source) => {
                            return Err(SshCoreError::AcceptFailed { address: bind.to_string(), source });
                        }
                    }
                }
            }
        }
    }
}

async fn handle_local_connection<S>(
    stream: TcpStream,
    destination: Endpoint,
    origin_host: String,
    origin_port: u16,
    session: S,
) -> Result<()>
where
    S: TunnelSession,
{
    stream.set_nodelay(true).ok();
    let remote = session
        .open_direct_tcpip(destination.host.clone(), destination.port, origin_host, origin_port)
        .await
        .map_err(|err| SshCoreError::DialFailed {
            address: destination.to_string(),
            source: Box::new(err),
        })?;
    relay(stream, remote).await?;
    Ok(())
}
