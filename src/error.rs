//! Error types for Linebal
//!
//! This module defines the error taxonomy used by the balancer core.

use std::io;
use thiserror::Error;

/// Main error type for balancer operations
#[derive(Error, Debug)]
pub enum BalancerError {
    /// Invalid target count, primary index or other startup setting
    #[error("Configuration error: {0}")]
    Config(String),

    /// Outbound dial to a target failed
    #[error("Failed to connect to {target}: {source}")]
    Connect {
        /// Target the dial was aimed at
        target: String,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// Read or write failure while relaying
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A bounded wait expired
    #[error("Timeout: {0}")]
    Timeout(String),
}

impl BalancerError {
    /// Build a connect error for the given target
    pub fn connect(target: impl Into<String>, source: io::Error) -> Self {
        BalancerError::Connect {
            target: target.into(),
            source,
        }
    }

    /// Whether this error is fatal at startup
    pub fn is_config(&self) -> bool {
        matches!(self, BalancerError::Config(_))
    }
}

/// Result alias for the balancer core
pub type BalancerResult<T> = std::result::Result<T, BalancerError>;
