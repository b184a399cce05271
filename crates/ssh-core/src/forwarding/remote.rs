use cw_types::{ForwardDirection, ForwardRoute};
use tokio::{
    net::TcpStream,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::traits::{RemoteRegistrar, TunnelStream};
use crate::{error::SshCoreError, relay::relay};

type Result<T> = crate::SshResult<T>;

/// Record of one remote listener the server has agreed to run for us.
///
/// Held by the dispatcher so server-opened channels can be matched back to
/// the forwarder that requested the listener.
pub struct RemoteBinding {
    pub bind_address: String,
    pub actual_port: u32,
    incoming: UnboundedSender<TunnelStream>,
}

impl RemoteBinding {
    /// Whether a `forwarded-tcpip` open for `address:port` belongs to this
    /// binding. An empty registered address matches any reported address.
    pub fn matches(&self, address: &str, port: u32) -> bool {
        self.actual_port == port && (self.bind_address.is_empty() || self.bind_address == address)
    }

    /// Hand a server-opened stream to the owning forwarder. Returns the
    /// stream back when the forwarder is gone.
    pub fn deliver(&self, stream: TunnelStream) -> std::result::Result<(), TunnelStream> {
        self.incoming.send(stream).map_err(|err| err.0)
    }
}

/// Bridges server-opened channels for one remote listener to the route's
/// local destination.
pub struct RemoteForwarder {
    route: ForwardRoute,
    incoming: UnboundedReceiver<TunnelStream>,
}

/// Register `route`'s source endpoint as a remote listener.
///
/// Returns the forwarder to run plus the binding the dispatcher needs to
/// route incoming channels. When the server assigns port 0 back, the
/// requested port is taken as bound.
pub async fn register_remote_forward<R>(
    route: ForwardRoute,
    registrar: &mut R,
) -> Result<(RemoteForwarder, RemoteBinding)>
where
    R: RemoteRegistrar + Send,
{
    if route.direction != ForwardDirection::RemoteToLocal {
        return Err(SshCoreError::InvalidRoute(format!(
            "remote forwarder requires a remote-to-local route, got {route}"
        )));
    }

    let bind_address = route.source.host.clone();
    let requested = route.source.port;
    let assigned = registrar.request_tcpip_forward(bind_address.clone(), requested).await?;
    let actual_port = if assigned != 0 { assigned } else { u32::from(requested) };
    info!(
        bind = %format!("{bind_address}:{actual_port}"),
        target = %route.destination,
        "remote forward registered"
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let forwarder = RemoteForwarder { route, incoming: rx };
    let binding = RemoteBinding { bind_address, actual_port, incoming: tx };
    Ok((forwarder, binding))
}

impl RemoteForwarder {
    pub fn route(&self) -> &ForwardRoute {
        &self.route
    }

    /// Serve incoming channels until cancelled or the binding is dropped.
    /// Each channel is bridged on its own task, so one unreachable
    /// destination never stalls the rest.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(route = %self.route, "remote forward stopping");
                    return Ok(());
                }
                stream = self.incoming.recv() => {
                    let Some(stream) = stream else {
                        debug!(route = %self.route, "remote forward binding dropped");
                        return Ok(());
                    };
                    let destination = self.route.destination.clone();
                    tokio::spawn(async move {
                        let local = match TcpStream::connect((destination.host.as_str(), destination.port)).await {
                            Ok(local) => local,
                            Err(err) => {
                                warn!(?err, target = %destination, "remote forward dial failed");
                                return;
                            }
                        };
                        local.set_nodelay(true).ok();
                        if let Err(err) = relay(stream, local).await {
                            warn!(?err, target = %destination, "remote forward connection failed");
                        }
                    });
                }
            }
        }
    }
}
