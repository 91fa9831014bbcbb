#![forbid(unsafe_code)]

//! Fleet daemon: queues screened scripts for agents and records their results.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use fleet_core::dispatch::Dispatcher;
use fleet_core::store::{MemoryRepository, Repository};
use fleet_daemon::config::{DaemonArgs, StoreKind};
use fleet_daemon::db::{Db, SurrealRepository};
use fleet_daemon::http;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = DaemonArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&args.log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let classifier = args.load_classifier()?;
    tracing::info!(
        ruleset_version = classifier.ruleset_version(),
        rules = classifier.rules().len(),
        policy = classifier.policy().as_str(),
        "safety classifier ready"
    );

    let repo: Arc<dyn Repository> = match args.store {
        StoreKind::Memory => Arc::new(MemoryRepository::new()),
        StoreKind::Surreal => {
            tokio::fs::create_dir_all(&args.db_dir)
                .await
                .with_context(|| format!("create {}", args.db_dir.display()))?;
            let db = Db::connect(&args.db_dir).await?;
            db.apply_schema().await?;
            Arc::new(SurrealRepository::new(db))
        }
    };

    let operator_token = args.operator_token();
    if operator_token.is_none() && !args.listen.ip().is_loopback() {
        tracing::warn!(listen = %args.listen, "no operator token set; anyone who can reach the daemon can queue scripts");
    }
    let app = http::router(Dispatcher::new(repo, classifier), operator_token);

    tracing::info!(listen = %args.listen, store = ?args.store, "daemon starting");
    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("bind {}", args.listen))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C; running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}
