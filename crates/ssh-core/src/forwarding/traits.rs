use async_trait::async_trait;
use russh::{client, Channel, ChannelStream};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::session::{SessionHandle, SharedSessionHandle};

type Result<T> = crate::SshResult<T>;

/// Marker for streams usable as tunnel endpoints.
pub trait TunnelStreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> TunnelStreamIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Boxed tunnel stream.
pub type TunnelStream = Box<dyn TunnelStreamIo>;

/// Capabilities a forwarder needs from an established session.
#[async_trait]
pub trait TunnelSession: Clone + Send + Sync + 'static {
    /// Open a channel to `target` on behalf of `origin`.
    async fn open_direct_tcpip(
        &self,
        target_host: String,
        target_port: u16,
        origin_host: String,
        origin_port: u16,
    ) -> Result<TunnelStream>;

    /// Probe transport liveness. An error means the connection is gone.
    async fn send_keepalive(&self) -> Result<()>;

    /// Withdraw a previously registered remote listener.
    async fn cancel_tcpip_forwarding(&self, bind_address: String, port: u32) -> Result<()>;
}

/// Registration side of remote forwarding.
#[async_trait]
pub trait RemoteRegistrar {
    /// Ask the server to listen on `bind_address:bind_port`. Returns the
    /// port the server actually bound, or 0 when it echoes the request.
    async fn request_tcpip_forward(&mut self, bind_address: String, bind_port: u16) -> Result<u32>;
}

/// A server-initiated channel carrying one remote-forwarded connection.
#[async_trait]
pub trait RemoteForwardChannel: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn into_stream(self) -> Self::Stream;

    async fn close(self) -> Result<()>;
}

// russh-backed implementations.

#[async_trait]
impl<H> TunnelSession for SharedSessionHandle<H>
where
    H: client::Handler + Send + Sync + 'static,
{
    async fn open_direct_tcpip(
        &self,
        target_host: String,
        target_port: u16,
        origin_host: String,
        origin_port: u16,
    ) -> Result<TunnelStream> {
        let channel = self
            .as_ref()
            .channel_open_direct_tcpip(target_host, target_port.into(), origin_host, origin_port.into())
            .await?;
        Ok(Box::new(channel.into_stream()))
    }

    // russh exposes no client-side global keepalive request, so liveness
    // is probed by round-tripping a throwaway session channel.
    async fn send_keepalive(&self) -> Result<()> {
        let channel = self.as_ref().channel_open_session().await?;
        channel.close().await?;
        Ok(())
    }

    async fn cancel_tcpip_forwarding(&self, bind_address: String, port: u32) -> Result<()> {
        self.as_ref().cancel_tcpip_forward(bind_address, port).await?;
        Ok(())
    }
}

#[async_trait]
impl<H> RemoteRegistrar for SessionHandle<H>
where
    H: client::Handler + Send,
{
    async fn request_tcpip_forward(&mut self, bind_address: String, bind_port: u16) -> Result<u32> {
        let assigned = self.tcpip_forward(bind_address, bind_port.into()).await?;
        Ok(assigned)
    }
}

#[async_trait]
impl RemoteForwardChannel for Channel<client::Msg> {
    type Stream = ChannelStream<client::Msg>;

    fn into_stream(self) -> Self::Stream {
        Channel::into_stream(self)
    }

    async fn close(self) -> Result<()> {
        Channel::close(&self).await?;
        Ok(())
    }
}
