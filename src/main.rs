//! Linebal - Multi-Line TCP/UDP Load Balancer
//!
//! This is the main entry point for the Linebal application.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use linebal::config::{expand_target, load_config, BalancerConfig, Mode, Protocol};
use linebal::daemon::{self, PidFile, Status, StopOutcome};
use linebal::server::Balancer;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Protocol selection on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProtocolArg {
    Tcp,
    Udp,
    Both,
}

impl ProtocolArg {
    fn protocols(self) -> Vec<Protocol> {
        match self {
            ProtocolArg::Tcp => vec![Protocol::Tcp],
            ProtocolArg::Udp => vec![Protocol::Udp],
            ProtocolArg::Both => vec![Protocol::Tcp, Protocol::Udp],
        }
    }
}

/// Linebal - spread TCP/UDP traffic over 2 to 6 lines
#[derive(Parser, Debug)]
#[command(name = "linebal")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "Examples:\n  \
    linebal -l 40001 -t 40002 40003\n  \
    linebal -l 40001 -t 40002 40003 40004 --primary 2 -d\n  \
    linebal -l 40001 -t 40002 40003 -p tcp\n  \
    linebal -l 40001 -t 40002 40003 -m size -s 1024\n  \
    linebal -l 40001 -t 192.168.1.10:40002 192.168.1.11:40003\n  \
    linebal --stop -l 40001\n  \
    linebal --status -l 40001")]
struct Args {
    /// Listen port
    #[arg(short = 'l', long)]
    listen_port: Option<u16>,

    /// Target ports or host:port entries (2-6)
    #[arg(short = 't', long, num_args = 1..)]
    targets: Vec<String>,

    /// Protocols to balance
    #[arg(short = 'p', long, value_enum, default_value = "both")]
    protocol: ProtocolArg,

    /// Dispatch mode: auto (round robin) or size (by first packet size)
    #[arg(short = 'm', long, default_value = "auto")]
    mode: Mode,

    /// Small-packet threshold in bytes
    #[arg(short = 's', long, default_value_t = 1024)]
    size: usize,

    /// Listen address
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Host used for targets given as a bare port
    #[arg(long, default_value = "127.0.0.1")]
    target_host: String,

    /// Primary line number (1-6)
    #[arg(long, default_value_t = 1)]
    primary: usize,

    /// Run in the background
    #[arg(short = 'd', long)]
    daemon: bool,

    /// Log file path
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Path to a TOML configuration file, used instead of the flags above
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,

    /// Stop the background instance listening on --listen-port
    #[arg(long)]
    stop: bool,

    /// Show the status of the instance listening on --listen-port
    #[arg(long)]
    status: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.stop || args.status {
        let port = args
            .listen_port
            .context("--listen-port is required with --stop and --status")?;
        if args.stop {
            report_stop(port)?;
        } else {
            report_status(port);
        }
        return Ok(());
    }

    let config = build_config(&args)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    // Open before detaching, stdio points at /dev/null afterwards
    let log_file = match (&config.log_file, config.daemon) {
        (Some(path), _) => Some(daemon::open_log_file(Path::new(path), config.listen_port)?),
        (None, true) => Some(daemon::open_log_file(
            &daemon::default_log_file(config.listen_port),
            config.listen_port,
        )?),
        (None, false) => None,
    };

    if config.daemon {
        let pid_path = daemon::pid_file_path(config.listen_port);
        println!("Starting linebal in the background...");
        println!("Port: {}", config.listen_port);
        println!("Lines: {}", config.targets.len());
        println!("Primary: T{}", config.primary);
        if let Some(log) = &log_file {
            println!("Log file: {}", log.path.display());
        }
        println!("PID file: {}", pid_path.display());
        println!("  status: linebal --status -l {}", config.listen_port);
        println!("  stop:   linebal --stop -l {}", config.listen_port);
        daemon::daemonize()?;
    }

    let fallback = log_file
        .as_ref()
        .filter(|log| log.fell_back())
        .map(|log| (log.requested.clone(), log.path.clone()));
    let log_path = log_file.as_ref().map(|log| log.path.clone());
    setup_logging(&args.log_level, args.json_log, log_file.map(|log| log.file))?;
    if let Some((requested, used)) = fallback {
        warn!(
            "Log file {} not writable, using {}",
            requested.display(),
            used.display()
        );
    }
    if let Some(path) = &log_path {
        info!("Log file: {}", path.display());
    }

    let _pid_file = match PidFile::create(daemon::pid_file_path(config.listen_port)) {
        Ok(pid_file) => Some(pid_file),
        Err(e) => {
            error!("{:#}", e);
            None
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    runtime.block_on(run(config))
}

/// Bind the listeners, wire the signal handlers and run until shutdown
async fn run(config: BalancerConfig) -> Result<()> {
    let balancer = Balancer::bind(config).await?;
    let shutdown = balancer.shutdown_handle();

    // Handle Ctrl+C and termination signals (cross-platform)
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            info!("Received Ctrl+C, shutting down...");
                        }
                        _ = sigterm.recv() => {
                            info!("Received SIGTERM, shutting down...");
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to setup SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Received Ctrl+C, shutting down...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            // On Windows, only handle Ctrl+C
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down...");
        }

        shutdown.stop();
    });

    balancer.start().await
}

/// Build the configuration from a file or from the flags
fn build_config(args: &Args) -> Result<BalancerConfig> {
    if let Some(path) = &args.config {
        return Ok(load_config(path)?.balancer);
    }

    let port = args
        .listen_port
        .context("--listen-port is required without --config")?;
    let targets = args
        .targets
        .iter()
        .map(|t| expand_target(t, &args.target_host))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!(e))?;

    let mut config = BalancerConfig::new(port, targets);
    config.listen_host = args.host.clone();
    config.protocols = args.protocol.protocols();
    config.mode = args.mode;
    config.small_packet_size = args.size;
    config.primary = args.primary;
    config.daemon = args.daemon;
    config.log_file = args
        .log_file
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned());
    Ok(config)
}

fn report_stop(port: u16) -> Result<()> {
    match daemon::stop(port)? {
        StopOutcome::NotRunning => println!("No running linebal found for port {}", port),
        StopOutcome::Stopped(pid) => println!("linebal (PID {}) stopped", pid),
        StopOutcome::Killed(pid) => println!("linebal (PID {}) did not exit, killed", pid),
    }
    Ok(())
}

fn report_status(port: u16) {
    match daemon::status(port) {
        Status::Running(pid) => {
            println!("linebal is running");
            println!("  PID: {}", pid);
            println!("  PID file: {}", daemon::pid_file_path(port).display());
            if let Some(log) = daemon::existing_log_file(port) {
                println!("  Log file: {}", log.display());
            }
        }
        Status::NotRunning => println!("linebal (port {}) is not running", port),
        Status::Stale(pid) => println!(
            "linebal (port {}) is not running (removed stale PID file for {})",
            port, pid
        ),
    }
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool, log_file: Option<File>) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    match (log_file, json) {
        (Some(file), json) => {
            let writer = std::sync::Mutex::new(file);
            if json {
                let subscriber = builder.json().with_writer(writer).finish();
                tracing::subscriber::set_global_default(subscriber)?;
            } else {
                let subscriber = builder.with_ansi(false).with_writer(writer).finish();
                tracing::subscriber::set_global_default(subscriber)?;
            }
        }
        (None, true) => {
            let subscriber = builder.json().finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        (None, false) => {
            let subscriber = builder.finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}
