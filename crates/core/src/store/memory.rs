use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{CasOutcome, Repository, StoreError};
use crate::model::{Command, CommandId, CommandStatus, Machine, MachineId, NewCommand, Script};

/// Process-local repository. State is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    machines: BTreeMap<MachineId, Machine>,
    scripts: BTreeMap<String, Script>,
    commands: BTreeMap<CommandId, Command>,
    last_command_id: CommandId,
}

impl MemoryRepository {
    /// Empty store; command ids start at 1.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_machine(&self, id: &str) -> Result<Option<Machine>, StoreError> {
        Ok(self.lock()?.machines.get(id).cloned())
    }

    async fn find_machine_by_name(&self, name: &str) -> Result<Option<Machine>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .machines
            .values()
            .filter(|m| m.name == name)
            .max_by_key(|m| m.last_seen_ms)
            .cloned())
    }

    async fn put_machine(&self, machine: Machine) -> Result<(), StoreError> {
        self.lock()?.machines.insert(machine.id.clone(), machine);
        Ok(())
    }

    async fn list_machines(&self) -> Result<Vec<Machine>, StoreError> {
        Ok(self.lock()?.machines.values().cloned().collect())
    }

    async fn get_script(&self, name: &str) -> Result<Option<Script>, StoreError> {
        Ok(self.lock()?.scripts.get(name).cloned())
    }

    async fn put_script(&self, script: Script) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        Ok(inner.scripts.insert(script.name.clone(), script).is_none())
    }

    async fn insert_command(&self, new: NewCommand) -> Result<Command, StoreError> {
        let mut inner = self.lock()?;
        inner.last_command_id += 1;
        let command = Command {
            id: inner.last_command_id,
            machine_id: new.machine_id,
            script_name: new.script_name,
            status: CommandStatus::Pending,
            output: String::new(),
            created_at_ms: new.created_at_ms,
            completed_at_ms: None,
        };
        inner.commands.insert(command.id, command.clone());
        Ok(command)
    }

    async fn get_command(&self, id: CommandId) -> Result<Option<Command>, StoreError> {
        Ok(self.lock()?.commands.get(&id).cloned())
    }

    async fn commands_for_machine(
        &self,
        machine_id: &str,
        status: Option<CommandStatus>,
    ) -> Result<Vec<Command>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .commands
            .values()
            .filter(|c| c.machine_id == machine_id)
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect())
    }

    async fn compare_and_swap_command(
        &self,
        id: CommandId,
        expected: CommandStatus,
        replacement: Command,
    ) -> Result<CasOutcome, StoreError> {
        let mut inner = self.lock()?;
        let Some(current) = inner.commands.get_mut(&id) else {
            return Ok(CasOutcome::Missing);
        };
        if current.status != expected {
            return Ok(CasOutcome::Conflict(current.clone()));
        }
        *current = Command { id, ..replacement };
        Ok(CasOutcome::Swapped(current.clone()))
    }
}
