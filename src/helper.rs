//! Helper utilities for Linebal
//!
//! This module provides shared constants and the one-direction copy loop
//! used by the TCP relay.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Chunk size for TCP reads and the first-segment read
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Largest datagram the UDP listener accepts
pub const MAX_UDP_PACKET: usize = 65535;

/// Default small-packet threshold in bytes
pub const DEFAULT_SMALL_PACKET_SIZE: usize = 1024;

/// Minimum number of lines
pub const MIN_TARGETS: usize = 2;

/// Maximum number of lines
pub const MAX_TARGETS: usize = 6;

/// Copy bytes from `src` to `dst` until EOF, then half-close `dst`.
///
/// Reads at most [`DEFAULT_BUFFER_SIZE`] bytes at a time. Returns the number
/// of bytes copied. The write side of `dst` is shut down once `src` reports
/// end-of-stream so the peer sees EOF while the opposite direction keeps
/// draining.
pub async fn pipe<R, W>(src: &mut R, dst: &mut W) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n]).await?;
        total += n as u64;
    }

    dst.shutdown().await?;
    Ok(total)
}
