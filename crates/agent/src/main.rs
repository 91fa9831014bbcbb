#![forbid(unsafe_code)]

//! Fleet agent: runs screened scripts delivered by the daemon on this machine.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use fleet_agent::client::DaemonClient;
use fleet_agent::exec_runner::ShellExecutor;
use fleet_agent::identity::Identity;
use fleet_agent::runner::{Agent, AgentConfig};
use fleet_core::classifier::Classifier;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fleet-agent")]
struct Args {
    /// Daemon base URL, e.g. http://127.0.0.1:8000
    #[arg(long, env = "FLEET_DAEMON", default_value = "http://127.0.0.1:8000")]
    daemon: String,

    /// Machine name reported to the daemon. Defaults to the host name.
    #[arg(long, env = "FLEET_MACHINE_NAME")]
    name: Option<String>,

    /// File caching the machine id assigned by the daemon.
    #[arg(long, env = "FLEET_ID_FILE", default_value = ".fleet/agent_id")]
    id_file: PathBuf,

    /// Poll interval in seconds.
    #[arg(long, default_value_t = 300)]
    poll_secs: u64,

    /// Per-command execution timeout in seconds.
    #[arg(long, default_value_t = 120)]
    exec_timeout_secs: u64,

    /// Shell used as `<shell> -c <script>`.
    #[arg(long, default_value = "sh")]
    shell: String,

    /// Run a single poll cycle then exit.
    #[arg(long)]
    once: bool,

    /// Log level (env-filter syntax).
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&args.log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let name = match args.name {
        Some(name) => name,
        None => hostname::get()
            .context("read host name")?
            .to_string_lossy()
            .into_owned(),
    };

    let identity = Identity::load(&args.id_file).await?;
    if let Some(id) = identity.machine_id() {
        tracing::info!(machine_id = %id, id_file = %identity.path().display(), "cached machine id loaded");
    }

    let classifier = Classifier::builtin().context("built-in rule table")?;
    let mut agent = Agent::new(
        AgentConfig {
            name,
            poll_interval: Duration::from_secs(args.poll_secs.max(1)),
            exec_timeout: Duration::from_secs(args.exec_timeout_secs),
        },
        DaemonClient::new(&args.daemon),
        Arc::new(ShellExecutor::new(args.shell)),
        classifier,
        identity,
    );

    let shutdown = CancellationToken::new();

    if args.once {
        let report = agent.run_cycle(&shutdown).await?;
        tracing::info!(
            executed = report.executed,
            blocked = report.blocked,
            report_failures = report.report_failures,
            "single cycle finished"
        );
        return Ok(());
    }

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for Ctrl-C; running until killed");
                return;
            }
            tracing::info!("received shutdown signal");
            shutdown.cancel();
        });
    }

    agent.run(shutdown).await;
    Ok(())
}
