//! Command queue and dispatch coordinator.
//!
//! Lifecycle: `pending --complete()--> completed`. Nothing else.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::classifier::{Classifier, Verdict};
use crate::error::{DispatchError, Entity};
use crate::model::{
    Command, CommandId, CommandStatus, Machine, MachineRegistration, NewCommand, PendingCommand,
    Script, ScriptRegistration,
};
use crate::store::{CasOutcome, Repository};
use crate::{new_ulid, now_ms};

/// Coordinates script registration, submission, delivery and completion over a
/// [`Repository`]. Clones share the same store and classifier.
#[derive(Clone)]
pub struct Dispatcher {
    repo: Arc<dyn Repository>,
    classifier: Classifier,
    registration: Arc<Mutex<()>>,
}

impl Dispatcher {
    /// Build a dispatcher over `repo`, screening scripts with `classifier`.
    pub fn new(repo: Arc<dyn Repository>, classifier: Classifier) -> Self {
        Self {
            repo,
            classifier,
            registration: Arc::default(),
        }
    }

    /// Classifier used to screen registrations.
    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// The backing store.
    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    /// Screen `content` and store it under `name`. Dangerous content is never
    /// written, whether the name is new or not.
    pub async fn register_script(
        &self,
        name: &str,
        content: &str,
    ) -> Result<ScriptRegistration, DispatchError> {
        if name.trim().is_empty() {
            return Err(DispatchError::InvalidInput("script name must not be empty".into()));
        }

        if let Verdict::Dangerous {
            rule_id,
            description,
        } = self.classifier.classify(content)
        {
            warn!(script = %name, rule_id = %rule_id, reason = %description, "script rejected by safety classifier");
            return Err(DispatchError::RejectedUnsafe {
                script: name.to_string(),
                rule_id,
            });
        }

        let created = self
            .repo
            .put_script(Script {
                name: name.to_string(),
                content: content.to_string(),
            })
            .await?;
        info!(script = %name, created, "script registered");
        Ok(ScriptRegistration {
            name: name.to_string(),
            created,
        })
    }

    /// Queue `script_name` for the machine called `machine_name`.
    pub async fn submit(
        &self,
        machine_name: &str,
        script_name: &str,
    ) -> Result<CommandId, DispatchError> {
        let machine = self
            .repo
            .find_machine_by_name(machine_name)
            .await?
            .ok_or_else(|| DispatchError::not_found(Entity::Machine, machine_name))?;
        if self.repo.get_script(script_name).await?.is_none() {
            return Err(DispatchError::not_found(Entity::Script, script_name));
        }

        let command = self
            .repo
            .insert_command(NewCommand {
                machine_id: machine.id.clone(),
                script_name: script_name.to_string(),
                created_at_ms: now_ms(),
            })
            .await?;
        info!(command_id = command.id, machine = %machine.name, machine_id = %machine.id, script = %script_name, "command queued");
        Ok(command.id)
    }

    /// Pending commands for a machine, oldest first, with current script content.
    /// An unknown machine simply has no work.
    pub async fn poll_pending(&self, machine_id: &str) -> Result<Vec<PendingCommand>, DispatchError> {
        let pending = self
            .repo
            .commands_for_machine(machine_id, Some(CommandStatus::Pending))
            .await?;

        let mut out = Vec::with_capacity(pending.len());
        for command in pending {
            match self.repo.get_script(&command.script_name).await? {
                Some(script) => out.push(PendingCommand {
                    id: command.id,
                    script_name: script.name,
                    script_content: script.content,
                }),
                None => warn!(command_id = command.id, script = %command.script_name, "pending command references a missing script; skipping"),
            }
        }
        debug!(machine_id = %machine_id, count = out.len(), "pending commands delivered");
        Ok(out)
    }

    /// Record the output of a pending command. Succeeds at most once per id.
    pub async fn complete(&self, command_id: CommandId, output: String) -> Result<Command, DispatchError> {
        let current = self
            .repo
            .get_command(command_id)
            .await?
            .ok_or_else(|| DispatchError::not_found(Entity::Command, command_id))?;
        if !current.is_pending() {
            return Err(DispatchError::AlreadyCompleted(command_id));
        }

        let replacement = current.into_completed(output, now_ms());
        match self
            .repo
            .compare_and_swap_command(command_id, CommandStatus::Pending, replacement)
            .await?
        {
            CasOutcome::Swapped(command) => {
                info!(command_id, machine_id = %command.machine_id, output_bytes = command.output.len(), "command completed");
                Ok(command)
            }
            CasOutcome::Conflict(_) => Err(DispatchError::AlreadyCompleted(command_id)),
            CasOutcome::Missing => Err(DispatchError::not_found(Entity::Command, command_id)),
        }
    }

    /// Highest-id completed command for the machine.
    pub async fn latest_result(&self, machine_id: &str) -> Result<Option<Command>, DispatchError> {
        let completed = self
            .repo
            .commands_for_machine(machine_id, Some(CommandStatus::Completed))
            .await?;
        Ok(completed.into_iter().max_by_key(|c| c.id))
    }

    /// [`Dispatcher::latest_result`] keyed by machine name.
    pub async fn latest_result_by_name(
        &self,
        machine_name: &str,
    ) -> Result<Option<Command>, DispatchError> {
        let machine = self
            .find_machine(machine_name)
            .await?
            .ok_or_else(|| DispatchError::not_found(Entity::Machine, machine_name))?;
        self.latest_result(&machine.id).await
    }

    /// Create the machine or refresh its last-seen time.
    pub async fn register_machine(&self, name: &str) -> Result<MachineRegistration, DispatchError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DispatchError::InvalidInput("machine name must not be empty".into()));
        }

        let _guard = self.registration.lock().await;
        let now = now_ms();
        match self.repo.find_machine_by_name(name).await? {
            Some(mut machine) => {
                machine.last_seen_ms = now;
                let machine_id = machine.id.clone();
                self.repo.put_machine(machine).await?;
                debug!(machine = %name, machine_id = %machine_id, "machine heartbeat");
                Ok(MachineRegistration {
                    machine_id,
                    created: false,
                })
            }
            None => {
                let machine = Machine {
                    id: new_ulid().to_string(),
                    name: name.to_string(),
                    last_seen_ms: now,
                };
                let machine_id = machine.id.clone();
                self.repo.put_machine(machine).await?;
                info!(machine = %name, machine_id = %machine_id, "machine registered");
                Ok(MachineRegistration {
                    machine_id,
                    created: true,
                })
            }
        }
    }

    /// Machines seen within the active window of `now_ms`, sorted by name.
    pub async fn active_machines(&self, now_ms: i64) -> Result<Vec<Machine>, DispatchError> {
        let mut machines: Vec<_> = self
            .repo
            .list_machines()
            .await?
            .into_iter()
            .filter(|m| m.is_active(now_ms))
            .collect();
        machines.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(machines)
    }

    /// Lookup by name. Prefers the most recently seen machine.
    pub async fn find_machine(&self, name: &str) -> Result<Option<Machine>, DispatchError> {
        Ok(self.repo.find_machine_by_name(name).await?)
    }
}
