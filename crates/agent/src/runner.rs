use std::sync::Arc;
use std::time::Duration;

use fleet_core::classifier::{Classifier, Verdict};
use fleet_core::model::PendingCommand;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::client::DaemonClient;
use crate::exec_runner::{ExecError, Executor};
use crate::identity::Identity;

/// Loop timing and execution limits.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Name reported to the daemon.
    pub name: String,
    pub poll_interval: Duration,
    pub exec_timeout: Duration,
}

/// Counts from one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub executed: usize,
    pub blocked: usize,
    pub report_failures: usize,
}

/// Register, poll, execute, report. One instance per machine.
pub struct Agent {
    config: AgentConfig,
    client: DaemonClient,
    executor: Arc<dyn Executor>,
    classifier: Classifier,
    identity: Identity,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        client: DaemonClient,
        executor: Arc<dyn Executor>,
        classifier: Classifier,
        identity: Identity,
    ) -> Self {
        Self {
            config,
            client,
            executor,
            classifier,
            identity,
        }
    }

    pub fn machine_id(&self) -> Option<&str> {
        self.identity.machine_id()
    }

    /// Poll on the configured interval until `shutdown` is cancelled. The first
    /// cycle runs immediately. Transport failures are logged and retried on the
    /// next tick.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            name = %self.config.name,
            daemon = %self.client.base_url(),
            poll_secs = self.config.poll_interval.as_secs(),
            "agent started"
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = self.run_cycle(&shutdown).await {
                tracing::warn!(error = %e, "poll cycle failed");
            }
        }
        tracing::info!("agent stopped");
    }

    /// One register → fetch → execute → report pass. Stops between commands
    /// once `shutdown` is cancelled; a running command is allowed to finish.
    ///
    /// If registration fails but a machine id is cached, the cycle continues
    /// with the cached id.
    pub async fn run_cycle(&mut self, shutdown: &CancellationToken) -> anyhow::Result<CycleReport> {
        let machine_id = self.register().await?;

        let pending = self.client.pending(&machine_id).await?;
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "pending commands fetched");
        }

        let mut report = CycleReport::default();
        for cmd in pending {
            if shutdown.is_cancelled() {
                tracing::info!(command_id = cmd.id, "shutdown requested; leaving remaining commands pending");
                break;
            }
            let (output, blocked) = self.execute(&cmd).await;
            if blocked {
                report.blocked += 1;
            } else {
                report.executed += 1;
            }
            if let Err(e) = self.client.report(cmd.id, &output).await {
                report.report_failures += 1;
                tracing::warn!(command_id = cmd.id, error = %e, "failed to report result");
            }
        }
        Ok(report)
    }

    async fn register(&mut self) -> anyhow::Result<String> {
        match self.client.register(&self.config.name).await {
            Ok(reg) => {
                if reg.created {
                    tracing::info!(machine_id = %reg.machine_id, "registered as new machine");
                }
                self.identity.store(&reg.machine_id).await?;
                Ok(reg.machine_id)
            }
            Err(e) => match self.identity.machine_id() {
                Some(cached) => {
                    tracing::warn!(error = %e, machine_id = %cached, "registration failed; polling with cached machine id");
                    Ok(cached.to_string())
                }
                None => Err(e),
            },
        }
    }

    async fn execute(&self, cmd: &PendingCommand) -> (String, bool) {
        if let Verdict::Dangerous { rule_id, .. } = self.classifier.classify(&cmd.script_content) {
            tracing::warn!(command_id = cmd.id, script = %cmd.script_name, rule_id = %rule_id, "delivered script blocked locally");
            return (
                format!("ERROR: command blocked by safety classifier (rule {rule_id})"),
                true,
            );
        }

        match self
            .executor
            .execute(&cmd.script_content, self.config.exec_timeout)
            .await
        {
            Ok(out) => {
                tracing::info!(command_id = cmd.id, script = %cmd.script_name, exit_code = ?out.exit_code, "command executed");
                (out.output, false)
            }
            Err(ExecError::Timeout(limit)) => {
                tracing::warn!(command_id = cmd.id, limit_secs = limit.as_secs(), "command timed out");
                (
                    format!("ERROR: command timed out after {} seconds", limit.as_secs()),
                    false,
                )
            }
            Err(e) => {
                tracing::warn!(command_id = cmd.id, error = %e, "command failed to run");
                (format!("ERROR: {e}"), false)
            }
        }
    }
}
