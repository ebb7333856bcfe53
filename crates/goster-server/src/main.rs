//! Goster IoT ingestion server
//!
//! TCP endpoint speaking the Goster-WY protocol: thousands of devices hold
//! persistent encrypted sessions, stream telemetry, and pick up downlink
//! commands queued by operators.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use goster_server::config::ServerConfig;
use goster_server::identity::IdentityManager;
use goster_server::runtime::DeviceRuntime;
use goster_server::server::{self, ServerState};
use goster_server::storage::{DataStore, Database};

#[derive(Parser, Debug)]
#[command(name = "goster-server")]
#[command(version, about = "Goster IoT device-ingestion server")]
struct Args {
    /// Address to listen on; defaults to 0.0.0.0 on the configured port.
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Path to the SQLite database file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Path to a JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ServerConfig::load(args.config.as_deref())?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_filter.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting goster-server"
    );

    let db_path = match args.db_path.or_else(|| config.database_path.clone()) {
        Some(path) => path,
        None => default_db_path()?,
    };
    let db = Database::open(&db_path).await?;
    let store: Arc<dyn DataStore> = Arc::new(db);

    let identity = Arc::new(IdentityManager::new(Arc::clone(&store)));
    let runtime = Arc::new(DeviceRuntime::with_settings(
        config.death_line(),
        config.downlink_queue_depth,
    ));

    let addr = args
        .addr
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], config.port)));
    let listener = TcpListener::bind(addr).await?;

    let state = Arc::new(ServerState {
        identity,
        runtime,
        store,
        config,
    });
    let cancel = CancellationToken::new();

    let accept_loop = tokio::spawn(server::serve(listener, state, cancel.clone()));

    shutdown_signal().await;
    info!("Received shutdown signal");
    cancel.cancel();
    accept_loop.await??;

    info!("Server stopped");
    Ok(())
}

/// Resolves on SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".goster").join("goster.db"))
}
