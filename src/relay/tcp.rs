//! TCP connection relay
//!
//! Each accepted connection goes through
//! `AwaitFirstSegment -> Dispatched -> Piping -> Closed`:
//!
//! 1. Wait (bounded) for the first segment; EOF or timeout closes the
//!    connection without contacting any line
//! 2. Classify the segment length, select a line, count the dispatch and
//!    dial the line
//! 3. Forward the first segment, then copy both directions concurrently,
//!    half-closing each destination when its source reaches EOF
//! 4. Both sockets are dropped on every exit path

use super::dispatch_label;
use crate::balancer::BalancerState;
use crate::config::Protocol;
use crate::error::{BalancerError, BalancerResult};
use crate::helper::{pipe, DEFAULT_BUFFER_SIZE};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// How a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Client closed before sending anything
    ClosedBeforeData,
    /// Relay ran to completion
    Completed {
        /// Line the connection was sent to
        index: usize,
        /// Bytes relayed client to line, first segment included
        to_target: u64,
        /// Bytes relayed line to client
        to_client: u64,
    },
}

/// Relay one accepted client connection
///
/// # Arguments
///
/// * `client` - The accepted client stream
/// * `peer` - Client address, for logging
/// * `state` - Shared dispatch state
pub async fn handle_connection<S>(
    mut client: S,
    peer: SocketAddr,
    state: &BalancerState,
) -> BalancerResult<RelayOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut first = vec![0u8; DEFAULT_BUFFER_SIZE];
    let wait = state.timeouts.first_segment();

    let n = match tokio::time::timeout(wait, client.read(&mut first)).await {
        Ok(Ok(0)) => {
            debug!("[TCP] {} closed before sending data", peer);
            return Ok(RelayOutcome::ClosedBeforeData);
        }
        Ok(Ok(n)) => n,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(BalancerError::Timeout(format!(
                "no data from client within {:?}",
                wait
            )))
        }
    };

    let selection = state.selector.select(Protocol::Tcp, state.mode, n);
    let target = selection.target;
    info!(
        "[{}] {} -> {}:{} ({}B)",
        dispatch_label(Protocol::Tcp, state.mode, selection.class),
        peer,
        target.label(),
        target,
        n
    );
    state
        .stats
        .record(Protocol::Tcp, selection.index, Some(selection.class));

    let addr = target.resolve().await?;
    let mut upstream = TcpStream::connect(addr)
        .await
        .map_err(|e| BalancerError::connect(target.to_string(), e))?;

    upstream.write_all(&first[..n]).await?;
    drop(first);

    let (to_target, to_client) = relay_tcp(client, upstream).await?;
    debug!(
        "[TCP] {} closed: {}B up, {}B down",
        peer,
        to_target + n as u64,
        to_client
    );

    Ok(RelayOutcome::Completed {
        index: selection.index,
        to_target: to_target + n as u64,
        to_client,
    })
}

/// Relay data bidirectionally between two streams
///
/// Each direction half-closes its destination on EOF and the function
/// returns once both directions have finished. An error in either direction
/// tears the whole relay down. Returns the byte counts `(a_to_b, b_to_a)`.
pub async fn relay_tcp<A, B>(a: A, b: B) -> BalancerResult<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let a_to_b = pipe(&mut a_read, &mut b_write);
    let b_to_a = pipe(&mut b_read, &mut a_write);
    tokio::pin!(a_to_b, b_to_a);

    let counts = tokio::select! {
        result = &mut a_to_b => {
            let up = result?;
            debug!("A->B finished: {} bytes", up);
            (up, b_to_a.await?)
        }
        result = &mut b_to_a => {
            let down = result?;
            debug!("B->A finished: {} bytes", down);
            (a_to_b.await?, down)
        }
    };

    Ok(counts)
}
