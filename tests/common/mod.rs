//! Test utilities and mock backends for Linebal
//!
//! This module provides common test utilities used across integration tests.

#![allow(dead_code)]

use linebal::config::{BalancerConfig, Mode, Protocol};
use linebal::{Balancer, BalancerState, ShutdownHandle};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;

/// Upper bound for any single step of an integration test
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// TCP backend that sends its tag byte on accept, then echoes until EOF
pub async fn spawn_tagged_tcp_backend(tag: u8) -> SocketAddr {
    let (listener, addr) = create_test_listener().await;

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                if stream.write_all(&[tag]).await.is_err() {
                    return;
                }
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
                let _ = writer.shutdown().await;
            });
        }
    });

    addr
}

/// UDP backend that replies with its tag byte followed by the datagram
pub async fn spawn_tagged_udp_backend(tag: u8) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = vec![0u8; 65535];
        loop {
            let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
                break;
            };
            let mut reply = Vec::with_capacity(n + 1);
            reply.push(tag);
            reply.extend_from_slice(&buf[..n]);
            let _ = socket.send_to(&reply, peer).await;
        }
    });

    addr
}

/// Send `payload` over a fresh connection, half-close, and return the tag
/// and the echoed bytes
pub async fn tcp_exchange(addr: SocketAddr, payload: &[u8]) -> (u8, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(payload).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut received = Vec::new();
    tokio::time::timeout(STEP_TIMEOUT, stream.read_to_end(&mut received))
        .await
        .expect("relay timed out")
        .unwrap();

    assert!(!received.is_empty(), "no tag byte received");
    let tag = received.remove(0);
    (tag, received)
}

/// Send one datagram from `socket` and return the tag and the echoed bytes
pub async fn udp_exchange(socket: &UdpSocket, addr: SocketAddr, payload: &[u8]) -> (u8, Vec<u8>) {
    socket.send_to(payload, addr).await.unwrap();

    let mut buf = vec![0u8; 65535];
    let (n, _) = tokio::time::timeout(STEP_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .expect("no UDP reply")
        .unwrap();

    assert!(n > 0, "empty UDP reply");
    (buf[0], buf[1..n].to_vec())
}

/// Test configuration builder
pub struct TestConfigBuilder {
    targets: Vec<SocketAddr>,
    protocols: Vec<Protocol>,
    mode: Mode,
    small_packet_size: usize,
    primary: usize,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        TestConfigBuilder {
            targets: Vec::new(),
            protocols: vec![Protocol::Tcp, Protocol::Udp],
            mode: Mode::Auto,
            small_packet_size: 1024,
            primary: 1,
        }
    }
}

impl TestConfigBuilder {
    /// Create a new test config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend lines
    pub fn targets(mut self, targets: &[SocketAddr]) -> Self {
        self.targets = targets.to_vec();
        self
    }

    /// Set enabled protocols
    pub fn protocols(mut self, protocols: &[Protocol]) -> Self {
        self.protocols = protocols.to_vec();
        self
    }

    /// Set dispatch mode
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Set small-packet threshold
    pub fn small_packet_size(mut self, size: usize) -> Self {
        self.small_packet_size = size;
        self
    }

    /// Set 1-based primary line
    pub fn primary(mut self, primary: usize) -> Self {
        self.primary = primary;
        self
    }

    /// Build the configuration
    pub fn build(self) -> BalancerConfig {
        let mut config =
            BalancerConfig::new(0, self.targets.iter().map(|t| t.to_string()).collect());
        config.listen_host = "127.0.0.1".to_string();
        config.protocols = self.protocols;
        config.mode = self.mode;
        config.small_packet_size = self.small_packet_size;
        config.primary = self.primary;
        config.timeouts.first_segment_secs = 2;
        config.timeouts.udp_reply_secs = 2;
        config.timeouts.poll_interval_ms = 100;
        config
    }
}

/// A balancer running on a background task
pub struct RunningBalancer {
    pub tcp_addr: Option<SocketAddr>,
    pub udp_addr: Option<SocketAddr>,
    pub state: BalancerState,
    pub shutdown: ShutdownHandle,
    pub handle: JoinHandle<anyhow::Result<()>>,
}

impl RunningBalancer {
    /// TCP listen address
    pub fn tcp(&self) -> SocketAddr {
        self.tcp_addr.expect("TCP listener not enabled")
    }

    /// UDP listen address
    pub fn udp(&self) -> SocketAddr {
        self.udp_addr.expect("UDP listener not enabled")
    }

    /// Stop and wait for `start` to return
    pub async fn stop(self) {
        self.shutdown.stop();
        tokio::time::timeout(STEP_TIMEOUT, self.handle)
            .await
            .expect("balancer did not stop")
            .unwrap()
            .unwrap();
    }
}

/// Bind and start a balancer
pub async fn start_balancer(config: BalancerConfig) -> RunningBalancer {
    let balancer = Balancer::bind(config).await.unwrap();
    let tcp_addr = balancer.local_addr(Protocol::Tcp);
    let udp_addr = balancer.local_addr(Protocol::Udp);
    let state = balancer.state().clone();
    let shutdown = balancer.shutdown_handle();
    let handle = tokio::spawn(balancer.start());

    RunningBalancer {
        tcp_addr,
        udp_addr,
        state,
        shutdown,
        handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_test_listener() {
        let (listener, addr) = create_test_listener().await;
        assert!(addr.port() > 0);
        drop(listener);
    }

    #[tokio::test]
    async fn test_tagged_tcp_backend() {
        let addr = spawn_tagged_tcp_backend(7).await;
        let (tag, echoed) = tcp_exchange(addr, b"ping").await;
        assert_eq!(tag, 7);
        assert_eq!(echoed, b"ping");
    }

    #[tokio::test]
    async fn test_tagged_udp_backend() {
        let addr = spawn_tagged_udp_backend(9).await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (tag, echoed) = udp_exchange(&socket, addr, b"ping").await;
        assert_eq!(tag, 9);
        assert_eq!(echoed, b"ping");
    }

    #[test]
    fn test_config_builder() {
        let a: SocketAddr = "127.0.0.1:40002".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:40003".parse().unwrap();
        let config = TestConfigBuilder::new()
            .targets(&[a, b])
            .protocols(&[Protocol::Tcp])
            .mode(Mode::Size)
            .small_packet_size(64)
            .primary(2)
            .build();

        assert_eq!(config.targets, vec!["127.0.0.1:40002", "127.0.0.1:40003"]);
        assert_eq!(config.protocols, vec![Protocol::Tcp]);
        assert_eq!(config.mode, Mode::Size);
        assert_eq!(config.small_packet_size, 64);
        assert_eq!(config.primary, 2);
        assert!(config.validate().is_ok());
    }
}
