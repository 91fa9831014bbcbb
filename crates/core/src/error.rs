//! Errors returned by the dispatch coordinator.

use thiserror::Error;

use crate::model::CommandId;
use crate::store::StoreError;

/// Kind of entity a lookup failed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    /// Looked up by name or id.
    Machine,
    /// Looked up by name.
    Script,
    /// Looked up by id.
    Command,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Entity::Machine => "machine",
            Entity::Script => "script",
            Entity::Command => "command",
        })
    }
}

/// Errors returned by the dispatch coordinator.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The safety classifier vetoed a script registration.
    #[error("script '{script}' rejected as unsafe (matched rule {rule_id})")]
    RejectedUnsafe {
        /// Name the script was registered under.
        script: String,
        /// Id of the rule that fired.
        rule_id: String,
    },
    /// An unknown machine, script or command was referenced.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// What was looked up.
        entity: Entity,
        /// The name or id that did not resolve.
        key: String,
    },
    /// A result was reported for a command that already has one.
    #[error("command {0} is already completed")]
    AlreadyCompleted(CommandId),
    /// An empty or malformed argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DispatchError {
    pub(crate) fn not_found(entity: Entity, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Stable machine-readable tag, used in transport error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::RejectedUnsafe { .. } => "rejected_unsafe",
            DispatchError::NotFound { .. } => "not_found",
            DispatchError::AlreadyCompleted(_) => "already_completed",
            DispatchError::InvalidInput(_) => "invalid_input",
            DispatchError::Store(_) => "store",
        }
    }
}
