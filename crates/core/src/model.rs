//! Domain model shared by the daemon, agents and the CLI.

use serde::{Deserialize, Serialize};

/// Numeric command identity. Assigned by the store in creation order, starting at 1.
pub type CommandId = u64;

/// Opaque machine identity (ULID string by convention).
pub type MachineId = String;

/// A machine counts as active if it registered within this window.
pub const ACTIVE_WINDOW_MS: i64 = 5 * 60 * 1000;

/// A managed machine running an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Machine {
    /// Daemon-assigned ULID.
    pub id: MachineId,
    /// Operator-facing lookup key. Not guaranteed unique across time.
    pub name: String,
    /// Last registration call (epoch ms).
    pub last_seen_ms: i64,
}

impl Machine {
    /// Whether the machine registered within [`ACTIVE_WINDOW_MS`] of `now_ms`.
    pub fn is_active(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.last_seen_ms) <= ACTIVE_WINDOW_MS
    }
}

/// Named script text. Re-registering a name overwrites the content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Script {
    /// Unique script name.
    pub name: String,
    /// Shell text, run with `sh -c`.
    pub content: String,
}

/// Lifecycle status for a command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Queued, waiting for the machine to report.
    Pending,
    /// Output recorded. Terminal.
    Completed,
}

impl CommandStatus {
    /// Wire/storage spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queued request to run a script on a machine.
///
/// `output` stays empty while pending and is written exactly once, when the
/// command transitions to completed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Command {
    /// Store-assigned id.
    pub id: CommandId,
    /// Target machine.
    pub machine_id: MachineId,
    /// Script to run, resolved when delivered.
    pub script_name: String,
    /// Lifecycle state.
    pub status: CommandStatus,
    /// Combined stdout and stderr reported by the agent.
    #[serde(default)]
    pub output: String,
    /// Submission time (epoch ms).
    pub created_at_ms: i64,
    /// Completion time (epoch ms), set with the output.
    #[serde(default)]
    pub completed_at_ms: Option<i64>,
}

impl Command {
    /// True while the command is waiting for its machine to report back.
    pub fn is_pending(&self) -> bool {
        self.status == CommandStatus::Pending
    }

    /// The completed form of this command, carrying `output` verbatim.
    pub fn into_completed(self, output: String, completed_at_ms: i64) -> Self {
        Self {
            status: CommandStatus::Completed,
            output,
            completed_at_ms: Some(completed_at_ms),
            ..self
        }
    }
}

/// Fields supplied by the caller when a command is created; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCommand {
    /// Target machine.
    pub machine_id: MachineId,
    /// Script to run.
    pub script_name: String,
    /// Submission time (epoch ms).
    pub created_at_ms: i64,
}

/// A pending command as delivered to an agent, with the script content
/// resolved at delivery time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingCommand {
    /// Command id to report the result under.
    pub id: CommandId,
    /// Script name, for logs.
    pub script_name: String,
    /// Current script text.
    pub script_content: String,
}

/// Outcome of a machine registration call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineRegistration {
    /// Id to poll with.
    pub machine_id: MachineId,
    /// False when an existing machine only had its last-seen time refreshed.
    pub created: bool,
}

/// Outcome of a script registration call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptRegistration {
    /// Script name as registered.
    pub name: String,
    /// False when an existing script was overwritten.
    pub created: bool,
}
