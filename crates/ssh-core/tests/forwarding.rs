//! Integration tests for port forwarding and the SOCKS gateway, driven by
//! an in-memory tunnel session. Binds loopback sockets.

use anyhow::Result;
use async_trait::async_trait;
use cw_types::{Endpoint, ForwardRoute, ForwardingConfig, SocksProxy};
use ssh_core::{
    ForwardingManager, ProxyGateway, RemoteForwardChannel, RemoteRegistrar, SshResult,
    TunnelSession, TunnelStream,
};
use std::{
    net::TcpListener,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tokio::{
    io::{self, AsyncReadExt, AsyncWriteExt},
    net::{TcpListener as TokioTcpListener, TcpStream},
    sync::mpsc,
    time::{sleep, Duration},
};
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_forward_round_trip_moves_bytes() -> Result<()> {
    let tcp_port = pick_free_port();
    let mut config = ForwardingConfig::default();
    config.local_tcp.push(ForwardRoute::local_to_remote(
        Endpoint::new("127.0.0.1", tcp_port),
        Endpoint::new("backend.local", 9000),
    ));
    let manager = ForwardingManager::new(config);
    let (session, mut rx) = MockTunnelSession::new();
    manager.start_local_forwarders(session.clone()).await?;
    sleep(Duration::from_millis(25)).await;

    let mut local = TcpStream::connect(("127.0.0.1", tcp_port)).await?;
    let mut remote = rx.recv().await.expect("tunneled stream");
    local.write_all(b"abc").await?;
    let mut buf = [0u8; 3];
    remote.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"abc");
    remote.write_all(b"123").await?;
    local.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"123");

    assert!(
        session.ops.lock().unwrap().iter().any(|entry| entry.contains("backend.local:9000")),
        "missing direct-tcpip open"
    );
    manager.shutdown(Some(session)).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_forward_survives_dial_failures() -> Result<()> {
    let tcp_port = pick_free_port();
    let mut config = ForwardingConfig::default();
    config.local_tcp.push(ForwardRoute::local_to_remote(
        Endpoint::new("127.0.0.1", tcp_port),
        Endpoint::new("backend.local", 9000),
    ));
    let manager = ForwardingManager::new(config);
    let (session, mut rx) = MockTunnelSession::new();
    session.fail_dials.store(1, Ordering::SeqCst);
    manager.start_local_forwarders(session.clone()).await?;
    sleep(Duration::from_millis(25)).await;

    // First connection hits the forced dial failure and is dropped.
    let mut failed = TcpStream::connect(("127.0.0.1", tcp_port)).await?;
    let mut probe = [0u8; 1];
    assert_eq!(failed.read(&mut probe).await?, 0, "failed dial should close the client");

    // The listener must keep serving afterwards.
    let mut ok = TcpStream::connect(("127.0.0.1", tcp_port)).await?;
    let mut remote = rx.recv().await.expect("second connection stream");
    ok.write_all(b"hi").await?;
    let mut buf = [0u8; 2];
    remote.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"hi");

    manager.shutdown(Some(session)).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_stops_local_listeners() -> Result<()> {
    let tcp_port = pick_free_port();
    let mut config = ForwardingConfig::default();
    config.local_tcp.push(ForwardRoute::local_to_remote(
        Endpoint::new("127.0.0.1", tcp_port),
        Endpoint::new("backend.local", 9000),
    ));
    let manager = ForwardingManager::new(config);
    let (session, _rx) = MockTunnelSession::new();
    manager.start_local_forwarders(session.clone()).await?;
    sleep(Duration::from_millis(25)).await;

    manager.shutdown(Some(session)).await?;
    assert!(
        TcpStream::connect(("127.0.0.1", tcp_port)).await.is_err(),
        "listener should be gone after shutdown"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn established_relays_drain_after_shutdown() -> Result<()> {
    let tcp_port = pick_free_port();
    let mut config = ForwardingConfig::default();
    config.local_tcp.push(ForwardRoute::local_to_remote(
        Endpoint::new("127.0.0.1", tcp_port),
        Endpoint::new("backend.local", 9000),
    ));
    let manager = ForwardingManager::new(config);
    let (session, mut rx) = MockTunnelSession::new();
    manager.start_local_forwarders(session.clone()).await?;
    sleep(Duration::from_millis(25)).await;

    let mut local = TcpStream::connect(("127.0.0.1", tcp_port)).await?;
    let mut remote = rx.recv().await.expect("tunneled stream");
    local.write_all(b"pre").await?;
    let mut buf = [0u8; 3];
    remote.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"pre");

    // Stopping the forwarders tears down the listener only; the pair
    // already in flight keeps relaying until its streams finish.
    manager.shutdown(Some(session)).await?;
    assert!(TcpStream::connect(("127.0.0.1", tcp_port)).await.is_err());

    let mut late = [0u8; 4];
    local.write_all(b"late").await?;
    remote.read_exact(&mut late).await?;
    assert_eq!(&late, b"late");
    remote.write_all(b"back").await?;
    local.read_exact(&mut late).await?;
    assert_eq!(&late, b"back");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_forward_bridges_dispatched_channels() -> Result<()> {
    let listener = TokioTcpListener::bind(("127.0.0.1", 0)).await?;
    let target_port = listener.local_addr()?.port();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4];
        socket.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        socket.write_all(b"pong").await.unwrap();
    });

    let mut config = ForwardingConfig::default();
    config.remote_tcp.push(ForwardRoute::remote_to_local(
        Endpoint::new("0.0.0.0", 7000),
        Endpoint::new("127.0.0.1", target_port),
    ));
    let manager = ForwardingManager::new(config);
    let mut registrar = MockRegistrar::new();
    manager.start_remote_forwarders(&mut registrar).await?;
    let assigned = registrar.ports.lock().unwrap()[0];
    assert_eq!(assigned, 7200, "registrar reassigns requested port");

    let (mut remote_client, remote_stream) = io::duplex(64);
    let channel = MockRemoteChannel::new(remote_stream, Arc::new(AtomicBool::new(false)));
    manager
        .dispatch_remote_channel(channel, "0.0.0.0", assigned, "origin", 1234)
        .await?;

    remote_client.write_all(b"ping").await?;
    let mut buf = [0u8; 4];
    remote_client.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"pong");
    drop(remote_client);
    server.await?;

    manager.shutdown::<MockTunnelSession>(None).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispatch_closes_unmatched_channels() -> Result<()> {
    let manager = ForwardingManager::new(ForwardingConfig::default());
    let closed = Arc::new(AtomicBool::new(false));
    let (_client, stream) = io::duplex(16);
    let channel = MockRemoteChannel::new(stream, closed.clone());
    manager.dispatch_remote_channel(channel, "127.0.0.1", 5000, "origin", 0).await?;
    assert!(closed.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn socks_proxy_handles_ipv4_and_hostnames() -> Result<()> {
    let socks_port = pick_free_port();
    let mut config = ForwardingConfig::default();
    config.dynamic_socks.push(SocksProxy::new(Endpoint::new("127.0.0.1", socks_port)));
    let manager = ForwardingManager::new(config);
    let (session, mut rx) = MockTunnelSession::new();
    manager.start_socks(session.clone()).await?;
    sleep(Duration::from_millis(25)).await;

    handshake_ipv4(socks_port, &mut rx).await?;
    handshake_hostname(socks_port, &mut rx).await?;

    let ops = session.ops.lock().unwrap().clone();
    assert!(ops.iter().any(|op| op.contains("198.51.100.1:443")), "expected IPv4 request in {ops:?}");
    assert!(ops.iter().any(|op| op.contains("example.com:2222")), "expected hostname request in {ops:?}");

    manager.shutdown(Some(session)).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn socks_rejects_clients_without_noauth() -> Result<()> {
    let socks_port = pick_free_port();
    let mut config = ForwardingConfig::default();
    config.dynamic_socks.push(SocksProxy::new(Endpoint::new("127.0.0.1", socks_port)));
    let manager = ForwardingManager::new(config);
    let (session, _rx) = MockTunnelSession::new();
    manager.start_socks(session.clone()).await?;
    sleep(Duration::from_millis(25)).await;

    let mut client = TcpStream::connect(("127.0.0.1", socks_port)).await?;
    client.write_all(&[0x05, 0x01, 0x02]).await?;
    let mut resp = [0u8; 2];
    client.read_exact(&mut resp).await?;
    assert_eq!(resp, [0x05, 0xFF], "expected NO AUTH method rejection");
    assert!(session.ops.lock().unwrap().is_empty(), "session should not open channels");

    manager.shutdown(Some(session)).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn socks_gateway_probes_keepalive_while_idle() -> Result<()> {
    let socks_port = pick_free_port();
    let (session, _rx) = MockTunnelSession::new();
    let gateway = ProxyGateway::new(
        SocksProxy::new(Endpoint::new("127.0.0.1", socks_port)),
        session.clone(),
    )
    .with_keepalive_interval(Duration::from_millis(40));

    let cancel = CancellationToken::new();
    let run = {
        let cancel = cancel.clone();
        tokio::spawn(async move { gateway.run(cancel).await })
    };
    sleep(Duration::from_millis(150)).await;
    assert!(
        session.keepalives.load(Ordering::SeqCst) >= 2,
        "expected repeated keepalive probes"
    );

    // A failing probe must not take the proxy down.
    session.keepalive_fail.store(true, Ordering::SeqCst);
    sleep(Duration::from_millis(100)).await;
    let mut client = TcpStream::connect(("127.0.0.1", socks_port)).await?;
    client.write_all(&[0x05, 0x01, 0x00]).await?;
    let mut resp = [0u8; 2];
    client.read_exact(&mut resp).await?;
    assert_eq!(resp, [0x05, 0x00]);

    cancel.cancel();
    run.await??;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_cancels_remote_registrations() -> Result<()> {
    let mut config = ForwardingConfig::default();
    config.remote_tcp.push(ForwardRoute::remote_to_local(
        Endpoint::new("0.0.0.0", 7000),
        Endpoint::new("127.0.0.1", 7000),
    ));
    let manager = ForwardingManager::new(config);
    let mut registrar = MockRegistrar::new();
    manager.start_remote_forwarders(&mut registrar).await?;

    let (session, _rx) = MockTunnelSession::new();
    manager.shutdown(Some(session.clone())).await?;
    let calls = session.cancel_calls.lock().unwrap().clone();
    assert_eq!(calls, vec![("0.0.0.0".to_string(), 7200)]);
    Ok(())
}

async fn handshake_ipv4(port: u16, rx: &mut mpsc::UnboundedReceiver<io::DuplexStream>) -> Result<()> {
    let mut client = TcpStream::connect(("127.0.0.1", port)).await?;
    client.write_all(&[0x05, 0x02, 0x01, 0x00]).await?;
    let mut resp = [0u8; 2];
    client.read_exact(&mut resp).await?;
    assert_eq!(resp, [0x05, 0x00]);
    client.write_all(&[0x05, 0x01, 0x00, 0x01, 198, 51, 100, 1, 0x01, 0xBB]).await?;
    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await?;
    assert_eq!(reply[1], 0x00);
    let mut remote = rx.recv().await.expect("socks stream");
    remote.write_all(b"hi").await?;
    let mut buf = [0u8; 2];
    client.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"hi");
    Ok(())
}

async fn handshake_hostname(port: u16, rx: &mut mpsc::UnboundedReceiver<io::DuplexStream>) -> Result<()> {
    let mut client = TcpStream::connect(("127.0.0.1", port)).await?;
    client.write_all(&[0x05, 0x01, 0x00]).await?;
    let mut resp = [0u8; 2];
    client.read_exact(&mut resp).await?;
    assert_eq!(resp, [0x05, 0x00]);
    let mut payload = vec![0x05, 0x01, 0x00, 0x03, 0x0B];
    payload.extend_from_slice(b"example.com");
    payload.extend_from_slice(&[0x08, 0xAE]);
    client.write_all(&payload).await?;
    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await?;
    assert_eq!(reply[1], 0x00);
    let mut remote = rx.recv().await.expect("hostname stream");
    remote.write_all(b"zz").await?;
    let mut buf = [0u8; 2];
    client.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"zz");
    Ok(())
}

fn pick_free_port() -> u16 {
    TcpListener::bind(("127.0.0.1", 0))
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .unwrap()
}

#[derive(Clone)]
struct MockTunnelSession {
    ops: Arc<Mutex<Vec<String>>>,
    keepalives: Arc<AtomicUsize>,
    keepalive_fail: Arc<AtomicBool>,
    fail_dials: Arc<AtomicUsize>,
    cancel_calls: Arc<Mutex<Vec<(String, u32)>>>,
    streams: mpsc::UnboundedSender<io::DuplexStream>,
}

impl MockTunnelSession {
    fn new() -> (Self, mpsc::UnboundedReceiver<io::DuplexStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            ops: Arc::new(Mutex::new(Vec::new())),
            keepalives: Arc::new(AtomicUsize::new(0)),
            keepalive_fail: Arc::new(AtomicBool::new(false)),
            fail_dials: Arc::new(AtomicUsize::new(0)),
            cancel_calls: Arc::new(Mutex::new(Vec::new())),
            streams: tx,
        };
        (session, rx)
    }
}

#[async_trait]
impl TunnelSession for MockTunnelSession {
    async fn open_direct_tcpip(
        &self,
        target_host: String,
        target_port: u16,
        origin_host: String,
        origin_port: u16,
    ) -> SshResult<TunnelStream> {
        if self.fail_dials.load(Ordering::SeqCst) > 0 {
            self.fail_dials.fetch_sub(1, Ordering::SeqCst);
            return Err(ssh_core::SshCoreError::Other("dial refused".into()));
        }
        self.ops
            .lock()
            .unwrap()
            .push(format!("tcpip {target_host}:{target_port} <- {origin_host}:{origin_port}"));
        let (client, server) = io::duplex(1024);
        self.streams.send(server).unwrap();
        Ok(Box::new(client))
    }

    async fn send_keepalive(&self) -> SshResult<()> {
        self.keepalives.fetch_add(1, Ordering::SeqCst);
        if self.keepalive_fail.load(Ordering::SeqCst) {
            return Err(ssh_core::SshCoreError::Other("transport gone".into()));
        }
        Ok(())
    }

    async fn cancel_tcpip_forwarding(&self, bind_address: String, port: u32) -> SshResult<()> {
        self.cancel_calls.lock().unwrap().push((bind_address, port));
        Ok(())
    }
}

struct MockRegistrar {
    ports: Arc<Mutex<Vec<u32>>>,
}

impl MockRegistrar {
    fn new() -> Self {
        Self { ports: Arc::new(Mutex::new(Vec::new())) }
    }
}

#[async_trait]
impl RemoteRegistrar for MockRegistrar {
    async fn request_tcpip_forward(&mut self, _bind_address: String, bind_port: u16) -> SshResult<u32> {
        let assigned = u32::from(bind_port) + 200;
        self.ports.lock().unwrap().push(assigned);
        Ok(assigned)
    }
}

struct MockRemoteChannel {
    stream: io::DuplexStream,
    closed: Arc<AtomicBool>,
}

impl MockRemoteChannel {
    fn new(stream: io::DuplexStream, closed: Arc<AtomicBool>) -> Self {
        Self { stream, closed }
    }
}

#[async_trait]
impl RemoteForwardChannel for MockRemoteChannel {
    type Stream = io::DuplexStream;

    fn into_stream(self) -> Self::Stream {
        self.stream
    }

    async fn close(self) -> SshResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
