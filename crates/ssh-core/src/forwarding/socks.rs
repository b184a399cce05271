use std::time::Duration;

use cw_types::SocksProxy;
use tokio::{
    io::{AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::traits::TunnelSession;
use crate::{error::SshCoreError, relay::relay};

type Result<T> = crate::SshResult<T>;

/// How often the gateway probes transport liveness while serving.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// A local SOCKS5 listener whose CONNECT targets are dialed through the
/// session. Runs a periodic keepalive probe alongside the accept loop so
/// a dead transport is noticed even when the proxy is idle.
pub struct ProxyGateway<S> {
    bind: cw_types::Endpoint,
    session: S,
    keepalive_interval: Duration,
}

impl<S> ProxyGateway<S>
where
    S: TunnelSession,
{
    pub fn new(proxy: SocksProxy, session: S) -> Self {
        Self { bind: proxy.bind, session, keepalive_interval: KEEPALIVE_INTERVAL }
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn bind(&self) -> &cw_types::Endpoint {
        &self.bind
    }

    /// Accept SOCKS5 clients until cancelled. Keepalive failures are
    /// logged but never stop the proxy; only bind and accept failures are
    /// fatal.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind((self.bind.host.as_str(), self.bind.port))
            .await
            .map_err(|source| SshCoreError::BindFailed { address: self.bind.to_string(), source })?;
        info!(bind = %self.bind, "socks proxy listening");

        let keepalive_cancel = cancel.child_token();
        let keepalive = tokio::spawn(run_keepalive(
            self.session.clone(),
            self.keepalive_interval,
            keepalive_cancel.clone(),
        ));

        let outcome = self.accept_loop(&listener, &cancel).await;

        keepalive_cancel.cancel();
        let _ = keepalive.await;
        outcome
    }

    async fn accept_loop(&self, listener: &TcpListener, cancel: &CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(bind = %self.bind, "socks proxy stopping");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let session = self.session.clone();
                            tokio::spawn(async move {
                                if let Err(err) = handle_socks_client(stream, session).await {
                                    warn!(?err, "socks client failed");
                                }
                            });
                        }
                        Err(source) => {
                            return Err(SshCoreError::AcceptFailed {
                                address: self.bind.to_string(),
                                source,
                            });
                        }
                    }
                }
            }
        }
    }
}

async fn run_keepalive<S>(session: S, interval: Duration, cancel: CancellationToken)
where
    S: TunnelSession,
{
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; the probe should wait a full
    // interval after startup.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                match session.send_keepalive().await {
                    Ok(()) => debug!("keepalive probe ok"),
                    Err(err) => warn!(?err, "keepalive probe failed"),
                }
            }
        }
    }
}

async fn handle_socks_client<S>(mut stream: TcpStream, session: S) -> Result<()>
where
    S: TunnelSession,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    if header[0] != 0x05 {
        return Ok(()); // only SOCKS5 supported
    }
    let method_count = header[1] as usize;
    let mut methods = vec![0u8; method_count];
    stream.read_exact(&mut methods).await?;
    if !methods.contains(&0x00) {
        stream.write_all(&[0x05, 0xFF]).await?;
        return Ok(());
    }
    stream.write_all(&[0x05, 0x00]).await?;

    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    if request[0] != 0x05 || request[1] != 0x01 {
        send_socks_reply(&mut stream, 0x07).await?;
        return Ok(());
    }
    let target_host = match request[3] {
        0x01 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            std::net::Ipv4Addr::from(addr).to_string()
        }
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).to_string()
        }
        0x04 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            std::net::Ipv6Addr::from(addr).to_string()
        }
        _ => {
            send_socks_reply(&mut stream, 0x08).await?;
            return Ok(());
        }
    };
    let mut port_buf = [0u8; 2];
    stream.read_exact(&mut port_buf).await?;
    let target_port = u16::from_be_bytes(port_buf);

    let origin = stream.peer_addr().ok();
    let origin_host = origin.map(|addr| addr.ip().to_string()).unwrap_or_else(|| "0.0.0.0".to_string());
    let origin_port = origin.map(|addr| addr.port()).unwrap_or(0);

    let remote = match session
        .open_direct_tcpip(target_host.clone(), target_port, origin_host, origin_port)
        .await
    {
        Ok(stream) => stream,
        Err(err) => {
            warn!(?err, target = %format!("{target_host}:{target_port}"), "failed to open socks target");
            send_socks_reply(&mut stream, 0x05).await?;
            return Ok(());
        }
    };
    send_socks_reply(&mut stream, 0x00).await?;
    relay(stream, remote).await?;
    Ok(())
}

async fn send_socks_reply<W>(stream: &mut W, status: u8) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut response = [0u8; 10];
    response[0] = 0x05;
    response[1] = status;
    response[3] = 0x01;
    stream.write_all(&response).await?;
    Ok(())
}
