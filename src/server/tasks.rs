//! Background tasks: session sweeper and stats reporter

use super::ShutdownHandle;
use crate::balancer::{render_report, BalancerState, ReportContext};
use crate::config::Protocol;
use std::time::Duration;
use tracing::{debug, info};

/// Remove idle UDP sessions every `interval` until shutdown
pub async fn run_sweeper(state: BalancerState, shutdown: ShutdownHandle, interval: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    while shutdown.is_running() {
        ticker.tick().await;
        let removed = state.sessions.sweep(std::time::Instant::now());
        if removed > 0 {
            debug!(
                "Swept {} idle UDP sessions, {} remaining",
                removed,
                state.sessions.len()
            );
        }
    }
}

/// Log a stats report every `interval` until shutdown
pub async fn run_reporter(
    state: BalancerState,
    protocols: Vec<Protocol>,
    shutdown: ShutdownHandle,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    while shutdown.is_running() {
        ticker.tick().await;
        info!("\n{}", report(&state, &protocols));
    }
}

/// Render the current report
pub fn report(state: &BalancerState, protocols: &[Protocol]) -> String {
    let active_sessions = protocols
        .contains(&Protocol::Udp)
        .then(|| state.sessions.len());

    render_report(
        &state.stats,
        &ReportContext {
            mode: state.mode,
            targets: state.targets(),
            primary: state.selector.primary(),
            protocols,
            active_sessions,
        },
    )
}
