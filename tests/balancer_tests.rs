//! End-to-end tests against real sockets

mod common;

use common::*;
use linebal::config::{parse_config, Mode, Protocol};
use linebal::server::report;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

async fn tcp_backends(count: u8) -> Vec<std::net::SocketAddr> {
    let mut addrs = Vec::new();
    for tag in 1..=count {
        addrs.push(spawn_tagged_tcp_backend(tag).await);
    }
    addrs
}

async fn udp_backends(count: u8) -> Vec<std::net::SocketAddr> {
    let mut addrs = Vec::new();
    for tag in 1..=count {
        addrs.push(spawn_tagged_udp_backend(tag).await);
    }
    addrs
}

#[tokio::test]
async fn test_tcp_round_robin_starts_after_primary() {
    let targets = tcp_backends(3).await;
    let config = TestConfigBuilder::new()
        .targets(&targets)
        .protocols(&[Protocol::Tcp])
        .build();
    let balancer = start_balancer(config).await;

    let mut tags = Vec::new();
    for _ in 0..6 {
        let (tag, echoed) = tcp_exchange(balancer.tcp(), b"hello").await;
        assert_eq!(echoed, b"hello");
        tags.push(tag);
    }
    assert_eq!(tags, vec![2, 3, 1, 2, 3, 1]);

    let stats = balancer.state.stats.snapshot(Protocol::Tcp);
    assert_eq!(stats.total, 6);
    assert_eq!(stats.per_target, vec![2, 2, 2]);

    balancer.stop().await;
}

#[tokio::test]
async fn test_tcp_size_mode_routes_small_to_primary() {
    let targets = tcp_backends(3).await;
    let config = TestConfigBuilder::new()
        .targets(&targets)
        .protocols(&[Protocol::Tcp])
        .mode(Mode::Size)
        .small_packet_size(100)
        .primary(2)
        .build();
    let balancer = start_balancer(config).await;

    let small = vec![b's'; 10];
    let large = vec![b'L'; 500];

    assert_eq!(tcp_exchange(balancer.tcp(), &small).await.0, 2);
    assert_eq!(tcp_exchange(balancer.tcp(), &large).await.0, 3);
    assert_eq!(tcp_exchange(balancer.tcp(), &large).await.0, 1);
    assert_eq!(tcp_exchange(balancer.tcp(), &small).await.0, 2);

    let stats = balancer.state.stats.snapshot(Protocol::Tcp);
    assert_eq!(stats.small, 2);
    assert_eq!(stats.large, 2);
    assert_eq!(stats.per_target, vec![1, 2, 1]);

    balancer.stop().await;
}

#[tokio::test]
async fn test_udp_clients_stick_to_first_line() {
    let targets = udp_backends(3).await;
    let config = TestConfigBuilder::new()
        .targets(&targets)
        .protocols(&[Protocol::Udp])
        .build();
    let balancer = start_balancer(config).await;

    let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let c = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    for i in 0..3u8 {
        let (tag, echoed) = udp_exchange(&a, balancer.udp(), &[i; 4]).await;
        assert_eq!(tag, 2);
        assert_eq!(echoed, vec![i; 4]);
    }
    assert_eq!(udp_exchange(&b, balancer.udp(), b"b").await.0, 3);
    assert_eq!(udp_exchange(&c, balancer.udp(), b"c").await.0, 1);
    assert_eq!(udp_exchange(&a, balancer.udp(), b"a").await.0, 2);

    assert_eq!(balancer.state.sessions.len(), 3);
    let stats = balancer.state.stats.snapshot(Protocol::Udp);
    assert_eq!(stats.total, 6);
    assert_eq!(stats.per_target, vec![1, 4, 1]);
    assert_eq!(stats.per_target.iter().sum::<u64>(), stats.total);

    balancer.stop().await;
}

#[tokio::test]
async fn test_udp_size_mode_classifies_first_datagram() {
    let targets = udp_backends(2).await;
    let config = TestConfigBuilder::new()
        .targets(&targets)
        .protocols(&[Protocol::Udp])
        .mode(Mode::Size)
        .small_packet_size(100)
        .build();
    let balancer = start_balancer(config).await;

    let small_client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let large_client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    assert_eq!(udp_exchange(&small_client, balancer.udp(), &[0; 10]).await.0, 1);
    assert_eq!(udp_exchange(&large_client, balancer.udp(), &[0; 500]).await.0, 2);
    // Affinity wins over the size of later datagrams
    assert_eq!(udp_exchange(&small_client, balancer.udp(), &[0; 500]).await.0, 1);

    let stats = balancer.state.stats.snapshot(Protocol::Udp);
    assert_eq!(stats.small, 1);
    assert_eq!(stats.large, 1);
    assert_eq!(stats.total, 3);

    balancer.stop().await;
}

#[tokio::test]
async fn test_tcp_and_udp_share_one_port() {
    let tcp_targets = tcp_backends(2).await;
    let config = TestConfigBuilder::new().targets(&tcp_targets).build();
    let balancer = start_balancer(config).await;

    assert_eq!(balancer.tcp().port(), balancer.udp().port());
    assert_eq!(tcp_exchange(balancer.tcp(), b"x").await.0, 2);

    balancer.stop().await;
}

#[tokio::test]
async fn test_in_flight_connection_survives_shutdown() {
    let targets = tcp_backends(2).await;
    let config = TestConfigBuilder::new()
        .targets(&targets)
        .protocols(&[Protocol::Tcp])
        .build();
    let balancer = start_balancer(config).await;

    let mut stream = TcpStream::connect(balancer.tcp()).await.unwrap();
    stream.write_all(b"before").await.unwrap();
    let mut buf = [0u8; 7];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"\x02before");

    balancer.shutdown.stop();
    // Let the accept loop observe the flag
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!balancer.handle.is_finished());

    // New connections are no longer accepted
    assert!(TcpStream::connect(balancer.tcp()).await.is_err());

    stream.write_all(b"after").await.unwrap();
    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"after");

    stream.shutdown().await.unwrap();
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    tokio::time::timeout(STEP_TIMEOUT, balancer.handle)
        .await
        .expect("start did not return after the last relay closed")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_unreachable_line_does_not_stop_listener() {
    let live = spawn_tagged_tcp_backend(2).await;
    // Bind and drop to get a port nothing listens on
    let dead = {
        let (listener, addr) = create_test_listener().await;
        drop(listener);
        addr
    };
    let config = TestConfigBuilder::new()
        .targets(&[dead, live])
        .protocols(&[Protocol::Tcp])
        .primary(2)
        .build();
    let balancer = start_balancer(config).await;

    // Counter starts at the primary, so the first pick is line 1
    let mut stream = TcpStream::connect(balancer.tcp()).await.unwrap();
    stream.write_all(b"lost").await.unwrap();
    let mut received = Vec::new();
    let read = tokio::time::timeout(STEP_TIMEOUT, stream.read_to_end(&mut received))
        .await
        .unwrap();
    assert!(read.is_err() || received.is_empty());

    assert_eq!(tcp_exchange(balancer.tcp(), b"ok").await, (2, b"ok".to_vec()));

    let stats = balancer.state.stats.snapshot(Protocol::Tcp);
    assert_eq!(stats.per_target, vec![1, 1]);

    balancer.stop().await;
}

#[tokio::test]
async fn test_report_after_traffic() {
    let targets = tcp_backends(2).await;
    let config = TestConfigBuilder::new()
        .targets(&targets)
        .protocols(&[Protocol::Tcp])
        .build();
    let balancer = start_balancer(config).await;

    for _ in 0..4 {
        tcp_exchange(balancer.tcp(), b"r").await;
    }

    let text = report(&balancer.state, &[Protocol::Tcp]);
    assert!(text.contains("TCP:"));
    assert!(text.contains("total: 4"));
    assert!(text.contains("(50.0%) [primary]"));

    balancer.stop().await;
}

#[tokio::test]
async fn test_balancer_from_toml_config() {
    let targets = tcp_backends(2).await;
    let content = format!(
        r#"
[balancer]
listen_host = "127.0.0.1"
listen_port = 0
targets = ["{}", "{}"]
protocols = ["tcp"]
mode = "size"
small_packet_size = 16
primary = 2

[balancer.timeouts]
poll_interval_ms = 100
"#,
        targets[0], targets[1]
    );
    let config = parse_config(&content).unwrap();
    let balancer = start_balancer(config.balancer).await;

    assert!(balancer.udp_addr.is_none());
    assert_eq!(tcp_exchange(balancer.tcp(), b"tiny").await.0, 2);

    balancer.stop().await;
}
