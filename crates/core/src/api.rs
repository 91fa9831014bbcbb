//! JSON bodies exchanged over the daemon's HTTP API.

use serde::{Deserialize, Serialize};

use crate::model::{Command, CommandId, CommandStatus, Machine, MachineId, PendingCommand};

/// Agent presence registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMachineRequest {
    /// Machine name, usually the host name.
    pub name: String,
}

/// Reply to [`RegisterMachineRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMachineResponse {
    /// Id the agent polls with.
    pub machine_id: MachineId,
    /// False on a heartbeat for a known machine.
    pub created: bool,
}

/// Machines seen within the active window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachinesResponse {
    /// Sorted by name.
    pub machines: Vec<Machine>,
}

/// Operator script registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterScriptRequest {
    /// Script name; an existing one is overwritten.
    pub name: String,
    /// Shell text, screened before it is stored.
    pub content: String,
}

/// Reply to [`RegisterScriptRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterScriptResponse {
    /// Script name as stored.
    pub name: String,
    /// False when an existing script was overwritten.
    pub created: bool,
}

/// Operator request to run a registered script on a machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Target machine, by name.
    pub machine_name: String,
    /// Registered script to run.
    pub script_name: String,
}

/// Reply to [`ExecuteRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    /// Id of the queued command.
    pub command_id: CommandId,
}

/// Pending work for an agent, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCommandsResponse {
    /// Commands with their current script text.
    pub commands: Vec<PendingCommand>,
}

/// Agent result report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResultRequest {
    /// Captured output, stored verbatim.
    pub output: String,
}

/// Reply to [`CommandResultRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResultResponse {
    /// The completed command.
    pub command_id: CommandId,
    /// Always `completed` on success.
    pub status: CommandStatus,
}

/// Most recent completed command for a machine, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestResultResponse {
    /// `null` when nothing has completed yet.
    pub command: Option<Command>,
}

/// Error body returned by the daemon for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable message.
    pub error: String,
    /// See `DispatchError::kind`; `unauthorized` for a missing operator token.
    pub kind: String,
}
