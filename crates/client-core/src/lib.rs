//! russh-backed client wiring for Causeway.
//!
//! [`connect`] dials the server, authenticates, and starts every
//! configured forwarder, returning an [`EstablishedClient`] that hands
//! out interactive sessions and one-shot commands over the shared
//! connection.

mod auth;
pub mod error;
mod handler;

use std::{sync::Arc, time::Duration};

use cw_types::ForwardingConfig;
use russh::client;
use ssh_core::{
    session::{self, CommandOutput},
    ForwardingManager, InteractiveSession, SharedSessionHandle,
};
use tracing::{info, warn};

pub use auth::{authenticate, Credentials};
pub use error::{ClientError, ClientResult};
pub use handler::{ClientHandler, HostKeyPolicy};

/// Everything needed to establish one client connection.
#[derive(Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credentials: Vec<Credentials>,
    pub host_key_policy: HostKeyPolicy,
    /// Transport-level keepalive; defaults to 30s when unset.
    pub keepalive_interval: Option<Duration>,
    pub forwarding: ForwardingConfig,
}

/// A connected, authenticated session with its forwarders running.
pub struct EstablishedClient {
    session: SharedSessionHandle<ClientHandler>,
    forwarding: ForwardingManager,
}

/// Connect, authenticate, and start all configured forwarders.
///
/// Remote listeners are registered before the handle is shared because
/// registration needs exclusive access to the session.
pub async fn connect(config: ClientConfig) -> ClientResult<EstablishedClient> {
    let forwarding = ForwardingManager::new(config.forwarding.clone());
    if forwarding.has_requests() {
        info!(targets = %forwarding.descriptors().join(", "), "forwarding directives requested");
    }
    let handler = ClientHandler::new(config.host_key_policy.clone(), forwarding.clone());

    let russh_config = Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: config.keepalive_interval.or(Some(Duration::from_secs(30))),
        keepalive_max: 3,
        ..Default::default()
    });

    info!("connecting to {}:{}", config.host, config.port);
    let mut session =
        client::connect(russh_config, (config.host.as_str(), config.port), handler).await?;

    authenticate(&mut session, &config.username, &config.credentials).await?;

    forwarding.start_remote_forwarders(&mut session).await?;
    let session = Arc::new(session);
    forwarding.start_local_forwarders(session.clone()).await?;
    forwarding.start_socks(session.clone()).await?;

    Ok(EstablishedClient { session, forwarding })
}

impl EstablishedClient {
    pub fn session(&self) -> SharedSessionHandle<ClientHandler> {
        self.session.clone()
    }

    pub fn forwarding(&self) -> &ForwardingManager {
        &self.forwarding
    }

    /// Run a one-shot command and capture its output.
    pub async fn run_command(&self, command: &str) -> ClientResult<CommandOutput> {
        Ok(session::run_command(self.session.as_ref(), command).await?)
    }

    /// Build an interactive shell session over this connection.
    pub fn interactive_session(&self) -> InteractiveSession<SharedSessionHandle<ClientHandler>> {
        InteractiveSession::new(self.session.clone())
    }

    /// Stop forwarders, withdraw remote listeners, and disconnect.
    pub async fn shutdown(self) -> ClientResult<()> {
        self.forwarding.shutdown(Some(self.session.clone())).await?;
        session::disconnect(self.session.as_ref()).await;
        match Arc::try_unwrap(self.session) {
            Ok(handle) => {
                if let Err(err) = handle.await {
                    warn!(?err, "session shutdown error");
                }
            }
            Err(_) => warn!("session handle still in use; skipping shutdown wait"),
        }
        Ok(())
    }
}
