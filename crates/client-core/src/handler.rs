use russh::{
    client::{Handler, Msg, Session},
    keys::{HashAlg, PublicKey},
    Channel,
};
use ssh_core::ForwardingManager;
use tracing::{info, warn};

/// How to treat the server's host key.
#[derive(Clone)]
pub enum HostKeyPolicy {
    /// Accept whatever the server presents. Logged loudly.
    AcceptAll,
    /// Accept only a key whose SHA256 fingerprint matches.
    Pinned(String),
}

/// Client-side protocol handler: verifies the host key and routes
/// server-initiated `forwarded-tcpip` channels into the forwarding
/// manager.
#[derive(Clone)]
pub struct ClientHandler {
    policy: HostKeyPolicy,
    forwarding: ForwardingManager,
}

impl ClientHandler {
    pub fn new(policy: HostKeyPolicy, forwarding: ForwardingManager) -> Self {
        Self { policy, forwarding }
    }
}

impl Handler for ClientHandler {
    type Error = crate::ClientError;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl std::future::Future<Output = Result<bool, Self::Error>> + Send {
        let policy = self.policy.clone();
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        async move {
            match policy {
                HostKeyPolicy::AcceptAll => {
                    warn!(%fingerprint, "accepting unverified host key");
                    Ok(true)
                }
                HostKeyPolicy::Pinned(expected) => {
                    if fingerprint == expected {
                        info!(%fingerprint, "host key matches pinned fingerprint");
                        Ok(true)
                    } else {
                        Err(crate::ClientError::HostKeyFailed(format!(
                            "pinned SHA256 {expected} but server presented {fingerprint}"
                        )))
                    }
                }
            }
        }
    }

    fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send {
        let forwarding = self.forwarding.clone();
        let connected_address = connected_address.to_string();
        let originator_address = originator_address.to_string();
        async move {
            if let Err(err) = forwarding
                .dispatch_remote_channel(
                    channel,
                    &connected_address,
                    connected_port,
                    &originator_address,
                    originator_port,
                )
                .await
            {
                warn!(?err, "remote forwarded connection failed");
            }
            Ok(())
        }
    }
}
