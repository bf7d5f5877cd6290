//! distcache - replicated in-memory cache node and load balancer
//!
//! One binary, three roles:
//! - `distcache master` replays the append-only log, accepts replicas and
//!   serves the read/write HTTP API
//! - `distcache replica` follows a master and serves reads
//! - `distcache balancer` splits HTTP traffic between them

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use distcache::api::{create_master_router, create_replica_router, AppState};
use distcache::balancer::{create_balancer_router, LoadBalancer};
use distcache::cache::Cache;
use distcache::config::Config;
use distcache::persistence::AofLog;
use distcache::replication::{wait_until_ready, ReplicaClient, ReplicaRegistry, ReplicationServer};
use distcache::tasks::{spawn_aof_sync_task, spawn_expiry_task};

#[derive(Parser)]
#[command(name = "distcache")]
#[command(version, about = "Replicated in-memory cache with an append-only log", long_about = None)]
struct Cli {
    /// Path to a TOML config file; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "distcache=trace" (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the master node
    Master,
    /// Run a read replica that follows the master
    Replica {
        /// HTTP port for this replica (overrides config)
        #[arg(long)]
        http_port: Option<u16>,
    },
    /// Run the read/write splitting load balancer
    Balancer,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Master => run_master(config).await,
        Command::Replica { http_port } => {
            run_replica(config.clone(), http_port.unwrap_or(config.replica.http_port)).await
        }
        Command::Balancer => run_balancer(config).await,
    }
}

/// Defaults to "distcache=info,tower_http=info"; RUST_LOG or --log-level
/// override it.
fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "distcache=info,tower_http=info".into()),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_master(config: Config) -> anyhow::Result<()> {
    info!("Starting master node");

    let aof = AofLog::open(&config.aof.path)
        .with_context(|| format!("Failed to open AOF at {}", config.aof.path.display()))?;
    let cache = Arc::new(Cache::with_aof(config.cache.max_entries, aof));

    supervise_master(cache, &config).await?;
    info!("Master shutdown complete");
    Ok(())
}

/// Runs the master until shutdown or failure, closing the log on every path.
async fn supervise_master(cache: Arc<Cache>, config: &Config) -> anyhow::Result<()> {
    let served = serve_master(Arc::clone(&cache), config).await;
    let closed = cache.close_log().context("Failed to close AOF");
    if let Err(e) = &served {
        error!(error = %e, "Master stopped with an error");
    }
    served.and(closed)
}

async fn serve_master(cache: Arc<Cache>, config: &Config) -> anyhow::Result<()> {
    let replayed = cache.replay_log().context("Failed to replay AOF")?;
    info!(
        applied = replayed.applied,
        skipped = replayed.skipped,
        entries = cache.len(),
        "AOF replayed"
    );

    let registry = Arc::new(ReplicaRegistry::new());
    let replication = ReplicationServer::bind(
        SocketAddr::from(([0, 0, 0, 0], config.master.port)),
        Arc::clone(&cache),
        Arc::clone(&registry),
    )
    .await
    .context("Failed to bind replication listener")?;

    let tasks = vec![
        spawn_expiry_task(Arc::clone(&cache)),
        spawn_aof_sync_task(Arc::clone(&cache), config.aof.sync_interval_secs),
        tokio::spawn(replication.run()),
    ];

    let app = create_master_router(AppState::master(cache, registry));
    let served = serve(app, config.master.http_port).await;

    stop_tasks(tasks);
    served
}

async fn run_replica(config: Config, http_port: u16) -> anyhow::Result<()> {
    info!(master = %config.replication_addr(), "Starting replica node");

    let cache = Arc::new(Cache::new(config.cache.max_entries));
    let client = ReplicaClient::new(config.replication_addr(), http_port, Arc::clone(&cache))
        .with_retry_delay(config.retry_delay());
    info!(node_id = client.node_id(), "Replica identity generated");

    let mut state = client.subscribe();
    let mut tasks = vec![tokio::spawn(client.run())];

    tokio::select! {
        ready = wait_until_ready(&mut state) => ready.context("Replication never became ready")?,
        _ = shutdown_signal() => {
            stop_tasks(tasks);
            return Ok(());
        }
    }
    tasks.push(spawn_expiry_task(Arc::clone(&cache)));

    let app = create_replica_router(AppState::replica(cache, state));
    let served = serve(app, http_port).await;

    stop_tasks(tasks);
    served?;
    info!("Replica shutdown complete");
    Ok(())
}

async fn run_balancer(config: Config) -> anyhow::Result<()> {
    if config.balancer.replicas.is_empty() {
        warn!("No replicas configured, reads will go to the master");
    }

    let balancer = Arc::new(LoadBalancer::new(
        config.master_http_addr(),
        &config.balancer.replicas,
    ));
    info!(
        master = balancer.master(),
        replicas = ?balancer.replicas(),
        "Starting load balancer"
    );

    let app = create_balancer_router(balancer, config.request_timeout())?;
    serve(app, config.balancer.port).await?;

    info!("Balancer shutdown complete");
    Ok(())
}

async fn serve(app: axum::Router, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")
}

fn stop_tasks(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        task.abort();
    }
    warn!("Background tasks aborted");
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
