//! UDP datagram relay
//!
//! One worker per inbound datagram. The worker resolves the client's line
//! through the session table, forwards the datagram unchanged from a fresh
//! ephemeral socket and waits (bounded) for a single reply, which goes back
//! to the client through the shared listening socket. Timeouts and socket
//! errors drop the datagram; there is no retry.

use super::dispatch_label;
use crate::balancer::BalancerState;
use crate::config::Protocol;
use crate::error::{BalancerError, BalancerResult};
use crate::helper::MAX_UDP_PACKET;
use bytes::Bytes;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Instant;
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// Wildcard bind address in the family of `target`
fn ephemeral_bind_addr(target: &SocketAddr) -> SocketAddr {
    match target {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}

/// Relay one datagram and its reply
///
/// # Arguments
///
/// * `data` - The datagram payload as received
/// * `client` - Source address of the datagram
/// * `inbound` - The listening socket, used to send the reply
/// * `state` - Shared dispatch state
///
/// Returns the size of the reply sent back to the client.
pub async fn handle_datagram(
    data: Bytes,
    client: SocketAddr,
    inbound: &UdpSocket,
    state: &BalancerState,
) -> BalancerResult<usize> {
    let resolution = state.sessions.resolve(client, data.len(), Instant::now());
    let target = resolution.target;

    if resolution.is_new {
        info!(
            "[{}] {} -> {}:{} ({}B)",
            dispatch_label(Protocol::Udp, state.mode, resolution.class),
            client,
            target.label(),
            target,
            data.len()
        );
        state
            .stats
            .record(Protocol::Udp, resolution.index, Some(resolution.class));
    } else {
        state.stats.record(Protocol::Udp, resolution.index, None);
    }

    let target_addr = target.resolve().await?;
    let socket = UdpSocket::bind(ephemeral_bind_addr(&target_addr)).await?;
    socket
        .connect(target_addr)
        .await
        .map_err(|e| BalancerError::connect(target.to_string(), e))?;
    socket.send(&data).await?;

    debug!(
        "[UDP] {} -> {}: sent {} bytes",
        client,
        target_addr,
        data.len()
    );

    let wait = state.timeouts.udp_reply();
    let mut buf = vec![0u8; MAX_UDP_PACKET];
    let len = match tokio::time::timeout(wait, socket.recv(&mut buf)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(BalancerError::Timeout(format!(
                "no reply from {} within {:?}",
                target, wait
            )))
        }
    };

    inbound.send_to(&buf[..len], client).await?;
    debug!("[UDP] {} <- {}: {} bytes", client, target_addr, len);

    Ok(len)
}
