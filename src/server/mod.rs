//! Balancer server
//!
//! [`Balancer`] binds the listening sockets, runs the TCP accept loop, the
//! UDP receive loop, the session sweeper and the stats reporter, and returns
//! from [`Balancer::start`] once every listener and every in-flight worker
//! has finished. Shutdown is cooperative: [`ShutdownHandle::stop`] clears the
//! running flag and the loops notice it within one poll interval.

mod listener;
mod tasks;

pub use listener::{bind_tcp, bind_udp};
pub use tasks::report;

use crate::balancer::BalancerState;
use crate::config::{BalancerConfig, Protocol};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{error, info};

/// Shared running flag
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Create a handle in the running state
    pub fn new() -> Self {
        ShutdownHandle {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Request shutdown
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether shutdown has not been requested yet
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound, ready-to-run balancer
#[derive(Debug)]
pub struct Balancer {
    config: BalancerConfig,
    state: BalancerState,
    shutdown: ShutdownHandle,
    tcp: Option<TcpListener>,
    udp: Option<Arc<UdpSocket>>,
}

impl Balancer {
    /// Validate the configuration and bind the enabled listeners
    ///
    /// When both protocols are enabled and the configured port is 0, the
    /// UDP socket binds to the port the TCP listener was given so both share
    /// one port.
    pub async fn bind(config: BalancerConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
        let state = BalancerState::from_config(&config)?;

        let listen_addr = config.listen_addr();
        let mut addr: SocketAddr = tokio::net::lookup_host(&listen_addr)
            .await
            .with_context(|| format!("Failed to resolve listen address: {}", listen_addr))?
            .next()
            .with_context(|| format!("No addresses found for: {}", listen_addr))?;

        let tcp = if config.has_protocol(Protocol::Tcp) {
            let listener = bind_tcp(addr)?;
            addr.set_port(listener.local_addr()?.port());
            Some(listener)
        } else {
            None
        };

        let udp = if config.has_protocol(Protocol::Udp) {
            Some(Arc::new(bind_udp(addr)?))
        } else {
            None
        };

        Ok(Balancer {
            config,
            state,
            shutdown: ShutdownHandle::new(),
            tcp,
            udp,
        })
    }

    /// Shared dispatch state
    pub fn state(&self) -> &BalancerState {
        &self.state
    }

    /// Handle that stops this balancer
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Bound address of the listener for `protocol`
    pub fn local_addr(&self, protocol: Protocol) -> Option<SocketAddr> {
        match protocol {
            Protocol::Tcp => self.tcp.as_ref().and_then(|l| l.local_addr().ok()),
            Protocol::Udp => self.udp.as_ref().and_then(|s| s.local_addr().ok()),
        }
    }

    /// Request shutdown
    pub fn stop(&self) {
        self.shutdown.stop();
    }

    /// Run until shutdown and until every in-flight worker has finished
    pub async fn start(self) -> Result<()> {
        self.log_banner();

        let timeouts = self.state.timeouts.clone();
        let poll = timeouts.poll_interval();
        let mut listeners = Vec::new();
        let mut background = Vec::new();

        if let Some(tcp) = self.tcp {
            if let Ok(addr) = tcp.local_addr() {
                info!("[TCP] listening on {}", addr);
            }
            listeners.push(tokio::spawn(listener::run_tcp_listener(
                tcp,
                self.state.clone(),
                self.shutdown.clone(),
                poll,
            )));
        }

        if let Some(udp) = self.udp {
            if let Ok(addr) = udp.local_addr() {
                info!("[UDP] listening on {}", addr);
            }
            background.push(tokio::spawn(tasks::run_sweeper(
                self.state.clone(),
                self.shutdown.clone(),
                timeouts.sweep_interval(),
            )));
            listeners.push(tokio::spawn(listener::run_udp_listener(
                udp,
                self.state.clone(),
                self.shutdown.clone(),
                poll,
            )));
        }

        background.push(tokio::spawn(tasks::run_reporter(
            self.state.clone(),
            self.config.protocols.clone(),
            self.shutdown.clone(),
            timeouts.stats_interval(),
        )));

        for handle in listeners {
            if let Err(e) = handle.await {
                error!("Listener task failed: {}", e);
            }
        }
        for handle in background {
            handle.abort();
        }

        info!("Load balancer stopped");
        Ok(())
    }

    fn log_banner(&self) {
        let config = &self.config;
        let protocols: Vec<&str> = config.protocols.iter().map(|p| p.label()).collect();

        info!("Linebal v{} - multi-line load balancer", crate::VERSION);
        info!("Protocols: {}", protocols.join(" + "));
        info!("Listen: {}", config.listen_addr());
        match config.mode {
            crate::config::Mode::Auto => {
                info!("Mode: auto (round robin starting after the primary line)")
            }
            crate::config::Mode::Size => info!(
                "Mode: size (< {}B -> primary line, >= {}B -> round robin)",
                config.small_packet_size, config.small_packet_size
            ),
        }
        info!("Lines: {}", self.state.targets().len());
        for target in self.state.targets().iter() {
            let mark = if target.index() == self.state.selector.primary() {
                " [primary]"
            } else {
                ""
            };
            info!("  {}: {}{}", target.label(), target, mark);
        }
    }
}
