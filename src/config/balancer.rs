//! Balancer configuration types
//!
//! Defines the listening endpoint, the line list and the dispatch settings.

use super::TimeoutConfig;
use crate::helper::{DEFAULT_SMALL_PACKET_SIZE, MAX_TARGETS, MIN_TARGETS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Balancer configuration
    pub balancer: BalancerConfig,
}

/// Transport protocol handled by a listener
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP connections
    Tcp,
    /// UDP datagrams
    Udp,
}

impl Protocol {
    /// Upper-case label used in log lines
    pub fn label(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Dispatch mode
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Strict round robin over all lines
    #[default]
    Auto,
    /// Small packets to the primary line, large ones round robin
    Size,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Mode::Auto),
            "size" => Ok(Mode::Size),
            other => Err(format!("unknown mode '{}', expected auto or size", other)),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Auto => f.write_str("auto"),
            Mode::Size => f.write_str("size"),
        }
    }
}

/// Default listen host
fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

/// Default protocol set
fn default_protocols() -> Vec<Protocol> {
    vec![Protocol::Tcp, Protocol::Udp]
}

/// Default small-packet threshold
fn default_small_packet_size() -> usize {
    DEFAULT_SMALL_PACKET_SIZE
}

/// Default primary ordinal (1-based)
fn default_primary() -> usize {
    1
}

/// Balancer configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BalancerConfig {
    /// Listen address
    #[serde(default = "default_listen_host")]
    pub listen_host: String,

    /// Listen port shared by the TCP and UDP listeners
    pub listen_port: u16,

    /// Line endpoints as `host:port`
    pub targets: Vec<String>,

    /// Enabled listeners
    #[serde(default = "default_protocols")]
    pub protocols: Vec<Protocol>,

    /// Dispatch mode
    #[serde(default)]
    pub mode: Mode,

    /// Packets shorter than this many bytes are small
    #[serde(default = "default_small_packet_size")]
    pub small_packet_size: usize,

    /// Primary line ordinal, 1-based
    #[serde(default = "default_primary")]
    pub primary: usize,

    /// Run detached from the terminal
    #[serde(default)]
    pub daemon: bool,

    /// Log file path
    #[serde(default)]
    pub log_file: Option<String>,

    /// Bounded waits and periodic intervals
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl BalancerConfig {
    /// Create a configuration with defaults for everything but the endpoints
    pub fn new(listen_port: u16, targets: Vec<String>) -> Self {
        BalancerConfig {
            listen_host: default_listen_host(),
            listen_port,
            targets,
            protocols: default_protocols(),
            mode: Mode::default(),
            small_packet_size: default_small_packet_size(),
            primary: default_primary(),
            daemon: false,
            log_file: None,
            timeouts: TimeoutConfig::default(),
        }
    }

    /// Listen address as `host:port`
    pub fn listen_addr(&self) -> String {
        if self.listen_host.contains(':') && !self.listen_host.starts_with('[') {
            format!("[{}]:{}", self.listen_host, self.listen_port)
        } else {
            format!("{}:{}", self.listen_host, self.listen_port)
        }
    }

    /// Zero-based primary index
    pub fn primary_index(&self) -> usize {
        self.primary.saturating_sub(1)
    }

    /// Whether the given protocol is enabled
    pub fn has_protocol(&self, protocol: Protocol) -> bool {
        self.protocols.contains(&protocol)
    }

    /// Parse every target into a `(host, port)` pair
    pub fn parsed_targets(&self) -> Result<Vec<(String, u16)>, String> {
        self.targets.iter().map(|t| split_host_port(t)).collect()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        let count = self.targets.len();
        if !(MIN_TARGETS..=MAX_TARGETS).contains(&count) {
            return Err(format!(
                "target count must be between {} and {}, got {}",
                MIN_TARGETS, MAX_TARGETS, count
            ));
        }
        if self.primary < 1 || self.primary > count {
            return Err(format!(
                "primary must be between 1 and {}, got {}",
                count, self.primary
            ));
        }
        if self.protocols.is_empty() {
            return Err("at least one protocol must be enabled".to_string());
        }
        for (i, protocol) in self.protocols.iter().enumerate() {
            if self.protocols[..i].contains(protocol) {
                return Err(format!("protocol {} listed more than once", protocol));
            }
        }
        self.parsed_targets()?;
        self.timeouts.validate()
    }
}

/// Split `host:port` into its parts
///
/// Bracketed IPv6 literals (`[::1]:80`) lose their brackets.
pub fn split_host_port(s: &str) -> Result<(String, u16), String> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("target '{}' is not host:port", s))?;
    let port: u16 = port
        .parse()
        .map_err(|_| format!("invalid port in target '{}'", s))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(format!("missing host in target '{}'", s));
    }
    Ok((host.to_string(), port))
}

/// Expand a command-line target into `host:port`
///
/// A bare port number is paired with `default_host`.
pub fn expand_target(s: &str, default_host: &str) -> Result<String, String> {
    if s.contains(':') {
        split_host_port(s)?;
        Ok(s.to_string())
    } else {
        let port: u16 = s
            .parse()
            .map_err(|_| format!("invalid target port '{}'", s))?;
        Ok(format!("{}:{}", default_host, port))
    }
}
