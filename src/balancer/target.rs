//! Lines and the immutable line set
//!
//! A [`Target`] is one backend endpoint. Its resolved socket address is
//! cached after the first successful lookup so that per-flow dials do not
//! hit DNS again.

use crate::error::{BalancerError, BalancerResult};
use crate::helper::{MAX_TARGETS, MIN_TARGETS};
use std::fmt;
use std::net::SocketAddr;
use std::sync::RwLock;

/// One backend endpoint
#[derive(Debug)]
pub struct Target {
    host: String,
    port: u16,
    index: usize,
    /// Cached resolved address
    cached: RwLock<Option<SocketAddr>>,
}

impl Target {
    /// Create a target at the given position
    pub fn new(host: impl Into<String>, port: u16, index: usize) -> Self {
        Target {
            host: host.into(),
            port,
            index,
            cached: RwLock::new(None),
        }
    }

    /// Host name or address literal
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Zero-based position in the set
    pub fn index(&self) -> usize {
        self.index
    }

    /// Log label, `T1` for the first line
    pub fn label(&self) -> String {
        format!("T{}", self.index + 1)
    }

    /// Get the cached address if available
    pub fn cached_addr(&self) -> Option<SocketAddr> {
        self.cached.read().ok().and_then(|guard| *guard)
    }

    /// Resolve the endpoint, using the cache if available
    ///
    /// A failed lookup is a failed dial and comes back as
    /// [`BalancerError::Connect`].
    pub async fn resolve(&self) -> BalancerResult<SocketAddr> {
        if let Some(addr) = self.cached_addr() {
            return Ok(addr);
        }

        let resolved = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| BalancerError::connect(self.to_string(), e))?
            .next()
            .ok_or_else(|| {
                BalancerError::connect(
                    self.to_string(),
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses found"),
                )
            })?;

        if let Ok(mut guard) = self.cached.write() {
            *guard = Some(resolved);
        }
        Ok(resolved)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Ordered, immutable list of 2 to 6 lines
#[derive(Debug)]
pub struct TargetSet {
    targets: Vec<Target>,
}

impl TargetSet {
    /// Build a set from `(host, port)` pairs
    ///
    /// Fails with [`BalancerError::Config`] unless there are between
    /// [`MIN_TARGETS`] and [`MAX_TARGETS`] entries.
    pub fn new<I, H>(endpoints: I) -> BalancerResult<Self>
    where
        I: IntoIterator<Item = (H, u16)>,
        H: Into<String>,
    {
        let targets: Vec<Target> = endpoints
            .into_iter()
            .enumerate()
            .map(|(index, (host, port))| Target::new(host, port, index))
            .collect();

        if !(MIN_TARGETS..=MAX_TARGETS).contains(&targets.len()) {
            return Err(BalancerError::Config(format!(
                "target count must be between {} and {}, got {}",
                MIN_TARGETS,
                MAX_TARGETS,
                targets.len()
            )));
        }

        Ok(TargetSet { targets })
    }

    /// Number of lines
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Always false, a valid set holds at least two lines
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Line at `index`
    pub fn get(&self, index: usize) -> Option<&Target> {
        self.targets.get(index)
    }

    /// Iterate in order
    pub fn iter(&self) -> std::slice::Iter<'_, Target> {
        self.targets.iter()
    }
}

impl std::ops::Index<usize> for TargetSet {
    type Output = Target;

    fn index(&self, index: usize) -> &Self::Output {
        &self.targets[index]
    }
}
