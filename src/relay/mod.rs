//! Relay engines
//!
//! [`tcp`] runs one worker per accepted connection and [`udp`] one worker per
//! inbound datagram. Workers never propagate failures beyond themselves;
//! the listener logs whatever they return through [`log_worker_error`].

pub mod tcp;
pub mod udp;

pub use tcp::{handle_connection, RelayOutcome};
pub use udp::handle_datagram;

use crate::balancer::PacketClass;
use crate::config::{Mode, Protocol};
use crate::error::BalancerError;
use std::net::SocketAddr;
use tracing::{debug, error, warn};

/// Tag for dispatch log lines, e.g. `TCP round-robin` or `UDP small`
pub fn dispatch_label(protocol: Protocol, mode: Mode, class: PacketClass) -> String {
    match (mode, class) {
        (Mode::Auto, _) => format!("{} round-robin", protocol.label()),
        (Mode::Size, PacketClass::Small) => format!("{} small", protocol.label()),
        (Mode::Size, PacketClass::Large) => format!("{} large", protocol.label()),
    }
}

/// Log a worker failure at a level matching its kind
pub fn log_worker_error(protocol: Protocol, peer: SocketAddr, err: &BalancerError) {
    match err {
        BalancerError::Timeout(_) => debug!("[{}] {}: {}", protocol, peer, err),
        BalancerError::Io(_) => warn!("[{}] {}: {}", protocol, peer, err),
        BalancerError::Connect { .. } | BalancerError::Config(_) => {
            error!("[{}] {}: {}", protocol, peer, err)
        }
    }
}
