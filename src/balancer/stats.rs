//! Dispatch counters
//!
//! Per-protocol totals, small/large counts and per-line counts, guarded by a
//! single lock. Counters only ever grow.

use super::selector::PacketClass;
use super::target::TargetSet;
use crate::config::{Mode, Protocol};
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard};

/// Counters for one protocol
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolStats {
    /// Connections or datagrams dispatched
    pub total: u64,
    /// Flows whose first payload was small
    pub small: u64,
    /// Flows whose first payload was large
    pub large: u64,
    /// Dispatch count per line
    pub per_target: Vec<u64>,
}

impl ProtocolStats {
    fn new(target_count: usize) -> Self {
        ProtocolStats {
            per_target: vec![0; target_count],
            ..Default::default()
        }
    }

    /// Share of `total` sent to the line at `index`, in percent
    pub fn percentage(&self, index: usize) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.per_target.get(index).copied().unwrap_or(0) as f64 * 100.0 / self.total as f64
    }
}

#[derive(Debug)]
struct Counters {
    tcp: ProtocolStats,
    udp: ProtocolStats,
}

/// Lock-protected counters shared by both relays
#[derive(Debug)]
pub struct StatsAggregator {
    counters: Mutex<Counters>,
}

impl StatsAggregator {
    /// Create zeroed counters for `target_count` lines
    pub fn new(target_count: usize) -> Self {
        StatsAggregator {
            counters: Mutex::new(Counters {
                tcp: ProtocolStats::new(target_count),
                udp: ProtocolStats::new(target_count),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count one dispatch to the line at `index`
    ///
    /// `class` is `Some` only for the event that opened a flow; follow-up UDP
    /// datagrams pass `None` and leave the small/large counts alone.
    pub fn record(&self, protocol: Protocol, index: usize, class: Option<PacketClass>) {
        let mut counters = self.lock();
        let stats = match protocol {
            Protocol::Tcp => &mut counters.tcp,
            Protocol::Udp => &mut counters.udp,
        };

        stats.total += 1;
        if let Some(slot) = stats.per_target.get_mut(index) {
            *slot += 1;
        }
        match class {
            Some(PacketClass::Small) => stats.small += 1,
            Some(PacketClass::Large) => stats.large += 1,
            None => {}
        }
    }

    /// Copy of the counters for `protocol`
    pub fn snapshot(&self, protocol: Protocol) -> ProtocolStats {
        let counters = self.lock();
        match protocol {
            Protocol::Tcp => counters.tcp.clone(),
            Protocol::Udp => counters.udp.clone(),
        }
    }
}

/// Inputs for a human-readable stats report
#[derive(Debug)]
pub struct ReportContext<'a> {
    /// Dispatch mode
    pub mode: Mode,
    /// Line set
    pub targets: &'a TargetSet,
    /// Zero-based primary index
    pub primary: usize,
    /// Protocols to include
    pub protocols: &'a [Protocol],
    /// Live UDP sessions, if UDP is enabled
    pub active_sessions: Option<usize>,
}

/// Render the periodic stats report
pub fn render_report(stats: &StatsAggregator, ctx: &ReportContext<'_>) -> String {
    let rule = "=".repeat(60);
    let mut msg = String::new();

    let _ = writeln!(msg, "{}", rule);
    let _ = writeln!(msg, "Load balancer stats [mode: {}]", ctx.mode);
    let _ = writeln!(msg, "{}", rule);

    for protocol in ctx.protocols {
        let snapshot = stats.snapshot(*protocol);
        if snapshot.total == 0 {
            continue;
        }

        let _ = writeln!(msg, "{}:", protocol.label());
        let _ = writeln!(msg, "  total: {}", snapshot.total);
        for target in ctx.targets.iter() {
            let i = target.index();
            let mark = if i == ctx.primary { " [primary]" } else { "" };
            let _ = writeln!(
                msg,
                "  {} {}: {} ({:.1}%){}",
                target.label(),
                target,
                snapshot.per_target.get(i).copied().unwrap_or(0),
                snapshot.percentage(i),
                mark
            );
        }
        if ctx.mode == Mode::Size {
            let _ = writeln!(msg, "  small: {}", snapshot.small);
            let _ = writeln!(msg, "  large: {}", snapshot.large);
        }
    }

    if let Some(active) = ctx.active_sessions {
        let _ = writeln!(msg, "UDP active sessions: {}", active);
    }
    let _ = write!(msg, "{}", rule);

    msg
}
