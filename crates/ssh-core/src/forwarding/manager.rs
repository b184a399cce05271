use std::sync::Arc;

use cw_types::ForwardingConfig;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{
    local::LocalForwarder,
    remote::{register_remote_forward, RemoteBinding},
    socks::ProxyGateway,
    traits::{RemoteForwardChannel, RemoteRegistrar, TunnelSession},
};

type Result<T> = crate::SshResult<T>;

#[derive(Default)]
struct ForwardingState {
    config: ForwardingConfig,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    remote_bindings: tokio::sync::Mutex<Vec<RemoteBinding>>,
    cancel: CancellationToken,
}

/// Coordinates every forwarder spawned for one session.
///
/// Cloning is cheap; all clones share the same task set, remote bindings
/// and cancellation token.
#[derive(Clone, Default)]
pub struct ForwardingManager {
    state: Arc<ForwardingState>,
}

impl ForwardingManager {
    pub fn new(config: ForwardingConfig) -> Self {
        Self {
            state: Arc::new(ForwardingState {
                config,
                tasks: tokio::sync::Mutex::new(Vec::new()),
                remote_bindings: tokio::sync::Mutex::new(Vec::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &ForwardingConfig {
        &self.state.config
    }

    pub fn has_requests(&self) -> bool {
        !self.state.config.is_empty()
    }

    /// Human-readable descriptors of all configured forwards.
    pub fn descriptors(&self) -> Vec<String> {
        let config = &self.state.config;
        config
            .local_tcp
            .iter()
            .chain(&config.remote_tcp)
            .map(ToString::to_string)
            .chain(config.dynamic_socks.iter().map(ToString::to_string))
            .collect()
    }

    /// Spawn one listener task per configured local route.
    pub async fn start_local_forwarders<S>(&self, session: S) -> Result<()>
    where
        S: TunnelSession,
    {
        for route in &self.state.config.local_tcp {
            let forwarder = LocalForwarder::new(route.clone(), session.clone())?;
            let cancel = self.state.cancel.child_token();
            let task = tokio::spawn(async move {
                if let Err(err) = forwarder.run(cancel).await {
                    warn!(?err, route = %forwarder.route(), "local forwarder exited");
                }
            });
            self.state.tasks.lock().await.push(task);
        }
        Ok(())
    }

    /// Register every configured remote route with the server and spawn
    /// its bridging task. Registration failures abort the whole batch so
    /// connect-time setup errors surface to the caller.
    pub async fn start_remote_forwarders<R>(&self, registrar: &mut R) -> Result<()>
    where
        R: RemoteRegistrar + Send,
    {
        for route in &self.state.config.remote_tcp {
            let (forwarder, binding) = register_remote_forward(route.clone(), registrar).await?;
            self.state.remote_bindings.lock().await.push(binding);
            let cancel = self.state.cancel.child_token();
            let task = tokio::spawn(async move {
                if let Err(err) = forwarder.run(cancel).await {
                    warn!(?err, "remote forwarder exited");
                }
            });
            self.state.tasks.lock().await.push(task);
        }
        Ok(())
    }

    /// Spawn one SOCKS gateway task per configured dynamic proxy.
    pub async fn start_socks<S>(&self, session: S) -> Result<()>
    where
        S: TunnelSession,
    {
        for proxy in &self.state.config.dynamic_socks {
            let gateway = ProxyGateway::new(proxy.clone(), session.clone());
            let cancel = self.state.cancel.child_token();
            let task = tokio::spawn(async move {
                if let Err(err) = gateway.run(cancel).await {
                    warn!(?err, bind = %gateway.bind(), "socks gateway exited");
                }
            });
            self.state.tasks.lock().await.push(task);
        }
        Ok(())
    }

    /// Route a server-opened `forwarded-tcpip` channel to the forwarder
    /// whose registration it matches. Unmatched channels are closed.
    pub async fn dispatch_remote_channel<C>(
        &self,
        channel: C,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
    ) -> Result<()>
    where
        C: RemoteForwardChannel,
    {
        let bindings = self.state.remote_bindings.lock().await;
        let Some(binding) = bindings.iter().find(|b| b.matches(connected_address, connected_port))
        else {
            drop(bindings);
            warn!(
                address = connected_address,
                port = connected_port,
                "forwarded-tcpip channel with no matching registration"
            );
            let _ = channel.close().await;
            return Ok(());
        };
        if binding.deliver(Box::new(channel.into_stream())).is_err() {
            warn!(
                address = connected_address,
                port = connected_port,
                origin = %format!("{originator_address}:{originator_port}"),
                "remote forwarder is gone, dropping channel"
            );
        }
        Ok(())
    }

    /// Stop every forwarder and, when a session is supplied, withdraw the
    /// remote listeners it registered.
    pub async fn shutdown<S>(&self, session: Option<S>) -> Result<()>
    where
        S: TunnelSession,
    {
        self.state.cancel.cancel();
        let mut tasks = self.state.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        drop(tasks);

        if let Some(session) = session {
            let mut bindings = self.state.remote_bindings.lock().await;
            for binding in bindings.drain(..) {
                if let Err(err) = session
                    .cancel_tcpip_forwarding(binding.bind_address.clone(), binding.actual_port)
                    .await
                {
                    warn!(
                        ?err,
                        bind = binding.bind_address,
                        port = binding.actual_port,
                        "failed to cancel remote forward"
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
