//! Listening sockets and their loops
//!
//! Both loops poll the running flag between bounded waits on `accept` /
//! `recv_from`, spawn one worker per unit of work into a [`JoinSet`], and
//! after the flag clears wait for every worker still in flight.

use super::ShutdownHandle;
use crate::balancer::BalancerState;
use crate::config::Protocol;
use crate::helper::MAX_UDP_PACKET;
use crate::relay::{self, log_worker_error, RelayOutcome};
use anyhow::{Context, Result};
use bytes::Bytes;
use socket2::{Domain, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Accept backlog of the TCP listener
const TCP_BACKLOG: i32 = 100;

/// Pause after a failed accept or receive before polling again
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Bind the TCP listener with `SO_REUSEADDR`
pub fn bind_tcp(addr: SocketAddr) -> Result<TcpListener> {
    let socket = Socket::new(
        Domain::for_address(addr),
        Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .context("Failed to create TCP socket")?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("Failed to bind TCP listener on {}", addr))?;
    socket.listen(TCP_BACKLOG)?;

    let listener = TcpListener::from_std(socket.into())?;
    Ok(listener)
}

/// Bind the UDP listening socket
pub fn bind_udp(addr: SocketAddr) -> Result<UdpSocket> {
    let socket = Socket::new(
        Domain::for_address(addr),
        Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )
    .context("Failed to create UDP socket")?;
    socket.set_nonblocking(true)?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("Failed to bind UDP listener on {}", addr))?;

    let socket = UdpSocket::from_std(socket.into())?;
    Ok(socket)
}

/// Reap finished workers without waiting
fn reap<T: 'static>(workers: &mut JoinSet<T>) {
    while workers.try_join_next().is_some() {}
}

/// Wait for every worker still in flight
async fn drain<T: 'static>(workers: &mut JoinSet<T>, protocol: Protocol) {
    if !workers.is_empty() {
        info!(
            "[{}] waiting for {} active workers to finish",
            protocol,
            workers.len()
        );
    }
    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            error!("[{}] worker panicked: {}", protocol, e);
        }
    }
}

/// Run the TCP accept loop until shutdown
pub async fn run_tcp_listener(
    listener: TcpListener,
    state: BalancerState,
    shutdown: ShutdownHandle,
    poll: Duration,
) {
    let mut workers = JoinSet::new();

    while shutdown.is_running() {
        reap(&mut workers);

        let (stream, peer) = match tokio::time::timeout(poll, listener.accept()).await {
            Err(_) => continue,
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                if shutdown.is_running() {
                    error!("[TCP] accept failed: {}", e);
                }
                tokio::time::sleep(ERROR_BACKOFF).await;
                continue;
            }
        };

        let state = state.clone();
        workers.spawn(async move {
            match relay::handle_connection(stream, peer, &state).await {
                Ok(RelayOutcome::ClosedBeforeData) => {}
                Ok(RelayOutcome::Completed { .. }) => debug!("[TCP] {} relay finished", peer),
                Err(e) => log_worker_error(Protocol::Tcp, peer, &e),
            }
        });
    }

    drop(listener);
    info!("[TCP] listener stopped");
    drain(&mut workers, Protocol::Tcp).await;
}

/// Run the UDP receive loop until shutdown
pub async fn run_udp_listener(
    socket: Arc<UdpSocket>,
    state: BalancerState,
    shutdown: ShutdownHandle,
    poll: Duration,
) {
    let mut workers = JoinSet::new();
    let mut buf = vec![0u8; MAX_UDP_PACKET];

    while shutdown.is_running() {
        reap(&mut workers);

        let (n, client) = match tokio::time::timeout(poll, socket.recv_from(&mut buf)).await {
            Err(_) => continue,
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                if shutdown.is_running() {
                    error!("[UDP] receive failed: {}", e);
                }
                tokio::time::sleep(ERROR_BACKOFF).await;
                continue;
            }
        };

        let data = Bytes::copy_from_slice(&buf[..n]);
        let state = state.clone();
        let inbound = socket.clone();
        workers.spawn(async move {
            if let Err(e) = relay::handle_datagram(data, client, &inbound, &state).await {
                log_worker_error(Protocol::Udp, client, &e);
            }
        });
    }

    info!("[UDP] listener stopped");
    drain(&mut workers, Protocol::Udp).await;
}
