//! # Linebal - Multi-Line TCP/UDP Load Balancer
//!
//! Linebal accepts TCP and UDP traffic on one listening endpoint and spreads
//! it over 2 to 6 backend lines, either in strict round robin or by the size
//! of the first payload of each flow. UDP clients stick to the line chosen
//! for their first datagram until their session idles out.
//!
//! ## Features
//!
//! - **Round Robin**: `auto` mode cycles through every line starting after the primary
//! - **Size Dispatch**: `size` mode sends small first payloads to the primary line
//! - **UDP Affinity**: per-client sessions with idle expiry
//! - **Half-Close Relay**: TCP streams are piped byte-for-byte in both directions
//! - **Soft Shutdown**: in-flight sessions run to completion after stop
//!
//! ## Usage
//!
//! ```rust,ignore
//! use linebal::config::BalancerConfig;
//! use linebal::server::Balancer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BalancerConfig::new(
//!         40001,
//!         vec!["127.0.0.1:40002".into(), "127.0.0.1:40003".into()],
//!     );
//!     let balancer = Balancer::bind(config).await?;
//!     let shutdown = balancer.shutdown_handle();
//!
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.stop();
//!     });
//!
//!     balancer.start().await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> ConnectionRelay / PacketRelay -> Line
//!                        |                |
//!                  TargetSelector    SessionTable -> TargetSelector
//!                        \________________/
//!                          StatsAggregator
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod balancer;
pub mod config;
pub mod daemon;
pub mod error;
pub mod helper;
pub mod relay;
pub mod server;

// Re-export commonly used items
pub use balancer::{BalancerState, SessionTable, StatsAggregator, TargetSelector, TargetSet};
pub use config::{load_config, BalancerConfig, Config, Mode, Protocol};
pub use error::{BalancerError, BalancerResult};
pub use server::{Balancer, ShutdownHandle};

/// Version of the Linebal library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
