//! lexa-server binary.
//!
//! Reads `lexa.toml` (or the path given with `--config`) layered with
//! `LEXA_*` environment variables, opens the SQLite store, starts the job
//! workers and the nightly schedule, and serves the JSON API over HTTP.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::Parser;
use lexa_engine::{Engine, FactService, generator::TemplateGenerator};
use lexa_server::{HttpUpstream, ServerConfig, scheduler};
use lexa_store_sqlite::SqliteStore;
use tokio::{net::TcpListener, sync::watch};
use tower_http::trace::TraceLayer;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Lexa fact snapshot and explanation server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "lexa.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let server_cfg = ServerConfig::load(cli.config)?;

  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let upstream = HttpUpstream::new(&server_cfg.upstream_url, server_cfg.upstream_timeout())?;
  let engine = Engine::new(store, upstream, TemplateGenerator::new(), server_cfg.engine_config());
  let (service, pool) = FactService::start(engine);

  let (stop_scheduler, scheduler_rx) = watch::channel(false);
  let scheduler = tokio::spawn(scheduler::run(
    service.clone(),
    server_cfg.refresh_tenants.clone(),
    server_cfg.nightly_refresh_hour_utc,
    scheduler_rx,
  ));

  let app = lexa_api::api_router(service).layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

  let _ = stop_scheduler.send(true);
  if let Err(e) = scheduler.await {
    error!("scheduler task panicked: {e}");
  }
  pool.shutdown().await;
  Ok(())
}

async fn shutdown_signal() {
  match tokio::signal::ctrl_c().await {
    Ok(()) => info!("shutdown requested"),
    Err(e) => {
      error!("failed to listen for ctrl-c: {e}");
      std::future::pending::<()>().await;
    }
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
