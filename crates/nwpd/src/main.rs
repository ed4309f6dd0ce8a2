//! XIA NWP Daemon
//!
//! Main entry point for nwpd.
//! Discovers XIA neighbors on one Ethernet interface, keeps their routes in
//! the kernel XIA routing table and removes them when they stop answering.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-3: Content of Audit Records - Structured logging
//! - AU-12: Audit Record Generation - Log daemon lifecycle
//! - CM-6: Configuration Settings - File and command line configuration
//! - SI-4: System Monitoring - Real-time link monitoring

use anyhow::{Context as _, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use xia_nwpd::{
    Context, DEFAULT_CONFIG_FILE, LocalLink, MetricsCollector, NetlinkRouteTable, Nwpd,
    NwpdConfig, PacketSocket, PrincipalMap, PrincipalTypes, TimerService, metrics_server,
};

#[derive(Parser, Debug)]
#[command(name = "nwpd")]
#[command(about = "XIA neighbor discovery and liveness monitoring daemon", long_about = None)]
struct Args {
    /// Interface to run NWP on
    interface: Option<String>,

    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Principal name map file
    #[arg(long)]
    principals: Option<String>,

    /// Seconds between announce attempts
    #[arg(long)]
    try_announce_period: Option<u64>,

    /// Seconds between liveness pings
    #[arg(long)]
    ping_period: Option<u64>,

    /// Seconds to wait for an ack before investigating
    #[arg(long)]
    ack_timeout: Option<u64>,

    /// Seconds to wait for an investigative ack before removing a neighbor
    #[arg(long)]
    investigative_ack_timeout: Option<u64>,

    /// Neighbors asked to investigate a silent neighbor
    #[arg(long)]
    investigative_neigh_count: Option<usize>,

    /// Address for the Prometheus endpoint
    #[arg(long)]
    metrics_listen: Option<SocketAddr>,
}

impl Args {
    /// Command line values take precedence over the file
    fn apply(self, mut config: NwpdConfig) -> NwpdConfig {
        if let Some(interface) = self.interface {
            config.interface = interface;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(path) = self.principals {
            config.principals_file = path;
        }
        if let Some(secs) = self.try_announce_period {
            config.try_announce_period_secs = secs;
        }
        if let Some(secs) = self.ping_period {
            config.monitor_ping_period_secs = secs;
        }
        if let Some(secs) = self.ack_timeout {
            config.monitor_ack_timeout_secs = secs;
        }
        if let Some(secs) = self.investigative_ack_timeout {
            config.monitor_investigative_ack_timeout_secs = secs;
        }
        if let Some(count) = self.investigative_neigh_count {
            config.monitor_investigative_neigh_count = count;
        }
        if self.metrics_listen.is_some() {
            config.metrics_listen = self.metrics_listen;
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match NwpdConfig::load_or_default(&args.config) {
        Ok(config) => args.apply(config),
        Err(e) => {
            eprintln!("nwpd: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // NIST: AU-3, AU-12 - Audit logging setup
    if let Err(e) = init_logging(&config.log_level) {
        eprintln!("nwpd: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run_daemon(config).await {
        Ok(()) => {
            info!("nwpd: Daemon exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "nwpd: Daemon exiting with error");
            ExitCode::FAILURE
        }
    }
}

/// Initialize structured logging
///
/// `RUST_LOG` wins over the configured level when set.
///
/// # NIST Controls
/// - AU-3: Content of Audit Records - Structured format
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level {:?}", level))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logger: {}", e))
}

/// Main daemon body
///
/// # NIST Controls
/// - AC-3: Access Enforcement - Sockets require CAP_NET_ADMIN
/// - SI-4: System Monitoring - Event loop for monitoring
async fn run_daemon(config: NwpdConfig) -> Result<()> {
    config.validate()?;

    let principals = PrincipalMap::load(&config.principals_file)
        .with_context(|| format!("loading principals from {}", config.principals_file))?;
    let types = PrincipalTypes::resolve(&principals)?;

    let socket = Arc::new(
        PacketSocket::open(&config.interface)
            .with_context(|| format!("opening interface {}", config.interface))?,
    );
    let routes = Arc::new(NetlinkRouteTable::new().context("opening XIA route socket")?);
    let metrics = MetricsCollector::new().context("registering metrics")?;

    if let Some(addr) = config.metrics_listen {
        let collector = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics_server::serve(addr, collector).await {
                warn!(error = %e, %addr, "nwpd: Metrics endpoint stopped");
            }
        });
    }

    let link = LocalLink {
        ifindex: socket.ifindex(),
        hwaddr: socket.hwaddr(),
    };
    let ctx = Arc::new(Context::new(
        config,
        link,
        types,
        routes,
        socket.clone(),
        TimerService::current()?,
        metrics,
    ));

    let nwpd = Nwpd::new(ctx);
    nwpd.start();
    nwpd.run(&socket, shutdown_signal()).await?;

    info!("nwpd: Graceful shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
///
/// # NIST Controls
/// - AU-12: Audit Record Generation - Log shutdown signals
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "nwpd: Cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "nwpd: Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("nwpd: Received SIGINT"),
        _ = terminate => info!("nwpd: Received SIGTERM"),
    }
}
