//! Line selection
//!
//! [`TargetSelector`] keeps one round-robin counter per protocol. The counter
//! starts at the primary index and every round-robin pick increments it
//! before reducing modulo the line count, so the first pick after startup is
//! the line right after the primary.
//!
//! In `size` mode small packets always go to the primary line without
//! touching the counter, while large packets take the same round-robin path
//! as `auto` mode on the same counter.

use super::target::{Target, TargetSet};
use crate::config::{Mode, Protocol};
use crate::error::{BalancerError, BalancerResult};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Size class of the first payload of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketClass {
    /// Shorter than the threshold
    Small,
    /// At or above the threshold
    Large,
}

impl PacketClass {
    /// Classify `size` against `threshold`
    pub fn classify(size: usize, threshold: usize) -> Self {
        if size < threshold {
            PacketClass::Small
        } else {
            PacketClass::Large
        }
    }

    /// Whether this is a small packet
    pub fn is_small(&self) -> bool {
        matches!(self, PacketClass::Small)
    }
}

/// Result of a selection
#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    /// Chosen line
    pub target: &'a Target,
    /// Index of the chosen line
    pub index: usize,
    /// Size class of the packet that triggered the selection
    pub class: PacketClass,
}

/// Round-robin and size-based line selector
#[derive(Debug)]
pub struct TargetSelector {
    targets: TargetSet,
    primary: usize,
    small_packet_size: usize,
    tcp_counter: AtomicUsize,
    udp_counter: AtomicUsize,
}

impl TargetSelector {
    /// Create a selector
    ///
    /// `primary` is zero-based and must be a valid index into `targets`.
    pub fn new(
        targets: TargetSet,
        primary: usize,
        small_packet_size: usize,
    ) -> BalancerResult<Self> {
        if primary >= targets.len() {
            return Err(BalancerError::Config(format!(
                "primary index {} out of range for {} targets",
                primary,
                targets.len()
            )));
        }

        Ok(TargetSelector {
            targets,
            primary,
            small_packet_size,
            tcp_counter: AtomicUsize::new(primary),
            udp_counter: AtomicUsize::new(primary),
        })
    }

    /// The line set
    pub fn targets(&self) -> &TargetSet {
        &self.targets
    }

    /// Zero-based primary index
    pub fn primary(&self) -> usize {
        self.primary
    }

    /// Small-packet threshold
    pub fn small_packet_size(&self) -> usize {
        self.small_packet_size
    }

    /// Choose a line for a new flow
    pub fn select(&self, protocol: Protocol, mode: Mode, packet_size: usize) -> Selection<'_> {
        let class = PacketClass::classify(packet_size, self.small_packet_size);

        let index = match (mode, class) {
            (Mode::Size, PacketClass::Small) => self.primary,
            _ => self.next_round_robin(protocol),
        };

        Selection {
            target: &self.targets[index],
            index,
            class,
        }
    }

    /// Consume one counter slot and return the resulting index
    fn next_round_robin(&self, protocol: Protocol) -> usize {
        let counter = match protocol {
            Protocol::Tcp => &self.tcp_counter,
            Protocol::Udp => &self.udp_counter,
        };
        // fetch_add wraps on overflow; the modulo keeps the result in range
        let slot = counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        slot % self.targets.len()
    }
}
