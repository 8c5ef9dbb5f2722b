//! Timeout configuration
//!
//! Defines the bounded waits and periodic intervals used by the balancer.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default first-segment wait in seconds
fn default_first_segment_secs() -> u64 {
    5
}

/// Default UDP reply wait in seconds
fn default_udp_reply_secs() -> u64 {
    5
}

/// Default UDP session idle timeout in seconds
fn default_session_idle_secs() -> u64 {
    60
}

/// Default sweeper interval in seconds
fn default_sweep_interval_secs() -> u64 {
    30
}

/// Default stats report interval in seconds
fn default_stats_interval_secs() -> u64 {
    60
}

/// Default accept/receive poll interval in milliseconds
fn default_poll_interval_ms() -> u64 {
    1000
}

/// Timeout configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Maximum wait for the first TCP segment
    #[serde(default = "default_first_segment_secs")]
    pub first_segment_secs: u64,

    /// Maximum wait for a UDP reply from a target
    #[serde(default = "default_udp_reply_secs")]
    pub udp_reply_secs: u64,

    /// Idle time after which a UDP session is swept
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,

    /// Interval between session sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Interval between stats reports
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,

    /// Poll interval of the accept and receive loops
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            first_segment_secs: default_first_segment_secs(),
            udp_reply_secs: default_udp_reply_secs(),
            session_idle_secs: default_session_idle_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            stats_interval_secs: default_stats_interval_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl TimeoutConfig {
    /// First-segment wait
    pub fn first_segment(&self) -> Duration {
        Duration::from_secs(self.first_segment_secs)
    }

    /// UDP reply wait
    pub fn udp_reply(&self) -> Duration {
        Duration::from_secs(self.udp_reply_secs)
    }

    /// UDP session idle timeout
    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    /// Sweeper interval
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Stats report interval
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Listener poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate the timeout configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.first_segment_secs == 0 {
            return Err("first_segment_secs must be greater than 0".to_string());
        }
        if self.udp_reply_secs == 0 {
            return Err("udp_reply_secs must be greater than 0".to_string());
        }
        if self.sweep_interval_secs == 0 || self.stats_interval_secs == 0 {
            return Err("sweep and stats intervals must be greater than 0".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}
