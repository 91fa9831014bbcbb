//! Persistence seam for machines, scripts and commands.

mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Command, CommandId, CommandStatus, Machine, NewCommand, Script};

pub use memory::MemoryRepository;

/// Errors surfaced by repository backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend refused or failed the operation.
    #[error("store backend error: {0}")]
    Backend(String),
    /// Stored data could not be decoded into the domain model.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Result of [`Repository::compare_and_swap_command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The stored command had the expected status and was replaced.
    Swapped(Command),
    /// The stored command had a different status; it is returned unchanged.
    Conflict(Command),
    /// No command with that id.
    Missing,
}

/// Storage operations the dispatcher needs. Implementations must be safe to
/// share across tasks.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Machine by id.
    async fn get_machine(&self, id: &str) -> Result<Option<Machine>, StoreError>;

    /// Most recently seen machine with this name.
    async fn find_machine_by_name(&self, name: &str) -> Result<Option<Machine>, StoreError>;

    /// Insert or overwrite by machine id.
    async fn put_machine(&self, machine: Machine) -> Result<(), StoreError>;

    /// Every known machine, in no particular order.
    async fn list_machines(&self) -> Result<Vec<Machine>, StoreError>;

    /// Script by name.
    async fn get_script(&self, name: &str) -> Result<Option<Script>, StoreError>;

    /// Insert or overwrite by name. Returns true when the name was new.
    async fn put_script(&self, script: Script) -> Result<bool, StoreError>;

    /// Create a pending command with the next id. Allocation is atomic.
    async fn insert_command(&self, new: NewCommand) -> Result<Command, StoreError>;

    /// Command by id.
    async fn get_command(&self, id: CommandId) -> Result<Option<Command>, StoreError>;

    /// Commands for a machine in ascending id order, optionally filtered by status.
    async fn commands_for_machine(
        &self,
        machine_id: &str,
        status: Option<CommandStatus>,
    ) -> Result<Vec<Command>, StoreError>;

    /// Replace command `id` only if its stored status equals `expected`.
    async fn compare_and_swap_command(
        &self,
        id: CommandId,
        expected: CommandStatus,
        replacement: Command,
    ) -> Result<CasOutcome, StoreError>;
}
