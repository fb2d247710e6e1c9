use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tickr_core::config::TickrConfig;
use tickr_executor::{ExecOptions, ProcessExecutor};
use tickr_scheduler::{JobStore, SystemClock};
use tracing::{info, warn};

mod app;
mod http;

/// HTTP front end for the tickr job scheduler.
///
/// Flags override the matching keys from the config file and `TICKR_*`
/// environment variables.
#[derive(Parser, Debug)]
#[command(name = "tickr-gateway", version)]
struct Args {
    /// Path to the TOML config file. Defaults to ~/.tickr/tickr.toml.
    #[arg(long, env = "TICKR_CONFIG")]
    config: Option<String>,

    /// Address to listen on (server.bind).
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on (server.port).
    #[arg(long, short)]
    port: Option<u16>,

    /// SQLite database file (database.path).
    #[arg(long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tickr_gateway=info,tickr_scheduler=info,tickr_executor=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    let args = Args::parse();
    let mut config = TickrConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        warn!(code = e.code(), "config load failed ({e}), using defaults");
        TickrConfig::default()
    });
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(db) = args.db {
        config.database.path = db;
    }

    let db_path = config.database.path.clone();
    tickr_core::ensure_parent_dir(&db_path)?;
    info!(path = %db_path, "opening SQLite database");

    let conn = rusqlite::Connection::open(&db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    let store = Arc::new(JobStore::new(conn, config.scheduler.history_limit)?);
    info!("database schema ready");

    let executor = Arc::new(ProcessExecutor::new(ExecOptions::from(&config.executor)));
    let (jobs, engine) =
        tickr_scheduler::build(&config.scheduler, store, executor, Arc::new(SystemClock));

    // settle runs a previous process left RUNNING before anything can claim
    engine.recover_interrupted().await?;

    // spawn scheduler engine loop in background
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx));

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let state = Arc::new(app::AppState::new(config, jobs));
    let router = app::build_router(state);

    info!("tickr gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // signal scheduler to stop
    let _ = shutdown_tx.send(true);
    let _ = engine_task.await;
    info!("tickr gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            warn!("cannot listen for ctrl-c ({e}); running until killed");
            std::future::pending::<()>().await;
        }
    }
}
