//! UDP session affinity
//!
//! Maps each UDP client address to the line chosen for its first datagram.
//! Entries are refreshed on every datagram and removed by the sweeper once
//! idle for longer than the configured timeout. The table has no count
//! bound, it only shrinks through idle expiry.

use super::selector::{PacketClass, TargetSelector};
use super::target::Target;
use crate::config::{Mode, Protocol};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// A sticky client to line mapping
#[derive(Debug, Clone, Copy)]
pub struct Session {
    /// Line index chosen at creation
    pub target_index: usize,
    /// Size class of the datagram that created the session
    pub class: PacketClass,
    /// Time of the last datagram from the client
    pub last_seen: Instant,
}

impl Session {
    /// Check if the session has been idle for longer than `timeout` at `now`
    pub fn is_expired_at(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

/// Result of resolving a datagram
#[derive(Debug, Clone, Copy)]
pub struct Resolution<'a> {
    /// Line for this client
    pub target: &'a Target,
    /// Index of the line
    pub index: usize,
    /// Size class of this datagram
    pub class: PacketClass,
    /// Whether this datagram created the session
    pub is_new: bool,
}

/// Client address to line table
#[derive(Debug)]
pub struct SessionTable {
    selector: Arc<TargetSelector>,
    mode: Mode,
    idle_timeout: Duration,
    sessions: Mutex<HashMap<SocketAddr, Session>>,
}

impl SessionTable {
    /// Create an empty table
    pub fn new(selector: Arc<TargetSelector>, mode: Mode, idle_timeout: Duration) -> Self {
        SessionTable {
            selector,
            mode,
            idle_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Idle timeout
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Lock the map, recovering from a poisoned lock
    fn lock(&self) -> MutexGuard<'_, HashMap<SocketAddr, Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Find or create the session for `client`
    ///
    /// An existing session keeps its line regardless of `packet_size`; only
    /// its `last_seen` is refreshed.
    pub fn resolve(
        &self,
        client: SocketAddr,
        packet_size: usize,
        now: Instant,
    ) -> Resolution<'_> {
        let class = PacketClass::classify(packet_size, self.selector.small_packet_size());
        let mut sessions = self.lock();

        if let Some(session) = sessions.get_mut(&client) {
            session.last_seen = now;
            let index = session.target_index;
            return Resolution {
                target: &self.selector.targets()[index],
                index,
                class,
                is_new: false,
            };
        }

        let selection = self.selector.select(Protocol::Udp, self.mode, packet_size);
        sessions.insert(
            client,
            Session {
                target_index: selection.index,
                class: selection.class,
                last_seen: now,
            },
        );

        Resolution {
            target: selection.target,
            index: selection.index,
            class: selection.class,
            is_new: true,
        }
    }

    /// Look up a session without refreshing it
    pub fn get(&self, client: &SocketAddr) -> Option<Session> {
        self.lock().get(client).copied()
    }

    /// Remove every session idle for longer than the timeout at `now`
    ///
    /// Returns the number of sessions removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        let timeout = self.idle_timeout;

        sessions.retain(|addr, session| {
            let expired = session.is_expired_at(now, timeout);
            if expired {
                debug!("Removing idle UDP session for {}", addr);
            }
            !expired
        });

        before - sessions.len()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
