//! Dispatch core for Linebal
//!
//! This module holds the line set, the selector, the UDP session table and
//! the counters. [`BalancerState`] bundles them for the relay workers; each
//! structure guards only its own state.

mod selector;
mod session;
mod stats;
mod target;

pub use selector::{PacketClass, Selection, TargetSelector};
pub use session::{Resolution, Session, SessionTable};
pub use stats::{render_report, ProtocolStats, ReportContext, StatsAggregator};
pub use target::{Target, TargetSet};

use crate::config::{BalancerConfig, Mode, TimeoutConfig};
use crate::error::{BalancerError, BalancerResult};
use std::sync::Arc;

/// Shared state handed to every relay worker
#[derive(Debug, Clone)]
pub struct BalancerState {
    /// Line selector, owns the line set
    pub selector: Arc<TargetSelector>,
    /// UDP affinity table
    pub sessions: Arc<SessionTable>,
    /// Dispatch counters
    pub stats: Arc<StatsAggregator>,
    /// Dispatch mode
    pub mode: Mode,
    /// Bounded waits
    pub timeouts: TimeoutConfig,
}

impl BalancerState {
    /// Build the core from a configuration
    ///
    /// Fails with [`BalancerError::Config`] for a bad line count, primary
    /// ordinal or target string.
    pub fn from_config(config: &BalancerConfig) -> BalancerResult<Self> {
        let endpoints = config.parsed_targets().map_err(BalancerError::Config)?;
        let targets = TargetSet::new(endpoints)?;

        if config.primary == 0 {
            return Err(BalancerError::Config(
                "primary ordinal is 1-based, got 0".to_string(),
            ));
        }

        let stats = Arc::new(StatsAggregator::new(targets.len()));
        let selector = Arc::new(TargetSelector::new(
            targets,
            config.primary_index(),
            config.small_packet_size,
        )?);
        let sessions = Arc::new(SessionTable::new(
            selector.clone(),
            config.mode,
            config.timeouts.session_idle(),
        ));

        Ok(BalancerState {
            selector,
            sessions,
            stats,
            mode: config.mode,
            timeouts: config.timeouts.clone(),
        })
    }

    /// The line set
    pub fn targets(&self) -> &TargetSet {
        self.selector.targets()
    }
}
