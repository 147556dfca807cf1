//! labvm-server binary.
//!
//! Reads configuration from the environment (and optionally a TOML file given
//! with `--config`), wires the live backends, reconciles base images, restores
//! sessions, and serves the HTTP API.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use labvm_orchestrator::{Orchestrator, SessionManager, SystemClock};
use labvm_routeros::{ApiClient, RouterOs};
use labvm_server::{LiveBackends, ServerConfig, SmtpMailer};
use labvm_store_sqlite::SqliteCatalog;
use labvm_virsh::Virsh;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Lab VM control plane")]
struct Cli {
  /// Optional TOML file read before the environment.
  #[arg(short, long)]
  config: Option<PathBuf>,
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
  let cfg = ServerConfig::load(cli.config, config::Environment::default())
    .context("failed to load configuration")?;

  // Backends.
  let db_path = cfg.database_path();
  let catalog = SqliteCatalog::open(&db_path)
    .await
    .with_context(|| format!("failed to open catalog at {db_path:?}"))?;
  let catalog = Arc::new(catalog);
  let hypervisor = Arc::new(Virsh::new(cfg.virsh()));
  let router = Arc::new(RouterOs::new(ApiClient::new(cfg.router())));
  let mailer = SmtpMailer::new(
    &cfg.smtp_host,
    cfg.smtp_port,
    cfg.smtp_username.clone(),
    cfg.smtp_password.clone(),
    &cfg.smtp_from,
  )
  .context("failed to configure smtp")?;

  let sessions = Arc::new(SessionManager::<LiveBackends>::new(
    catalog.clone(),
    hypervisor.clone(),
    Arc::new(mailer),
    Arc::new(SystemClock),
    cfg.zone(),
    cfg.sessions(),
  ));
  let orchestrator = Arc::new(Orchestrator::new(
    catalog,
    hypervisor,
    router,
    sessions.clone(),
    cfg.network(),
  ));

  // Startup reconciliation. Router and hypervisor trouble is logged, not
  // fatal; the API reports it again on use.
  if let Err(e) = orchestrator.bootstrap_router().await {
    tracing::error!(error = %e, "router bootstrap failed");
  }
  match orchestrator.reconcile_base_images().await {
    Ok(outcome) => tracing::info!(removed = outcome.removed, added = ?outcome.added, "base images"),
    Err(e) => tracing::error!(error = %e, "base image reconciliation failed"),
  }
  sessions.restore().await.context("failed to restore sessions")?;
  let _timekeeper = sessions.spawn();

  let app = labvm_api::api_router(orchestrator).layer(TraceLayer::new_for_http());
  let address = cfg.listen_addr().to_owned();

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}
