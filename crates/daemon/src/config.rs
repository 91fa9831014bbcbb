use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use fleet_core::classifier::{Classifier, NormalizationPolicy, RuleSet};

/// Backing store for machines, scripts and commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// Process-local; state is lost on restart.
    Memory,
    /// Embedded SurrealDB (SurrealKV engine) under `--db-dir`.
    Surreal,
}

/// Comment handling before classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CommentPolicy {
    Literal,
    Strip,
}

impl From<CommentPolicy> for NormalizationPolicy {
    fn from(value: CommentPolicy) -> Self {
        match value {
            CommentPolicy::Literal => NormalizationPolicy::Literal,
            CommentPolicy::Strip => NormalizationPolicy::StripComments,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "fleet-daemon")]
pub struct DaemonArgs {
    /// Listen address, e.g. 127.0.0.1:8000
    #[arg(long, env = "FLEET_LISTEN", default_value = "127.0.0.1:8000")]
    pub listen: SocketAddr,

    #[arg(long, env = "FLEET_STORE", value_enum, default_value_t = StoreKind::Surreal)]
    pub store: StoreKind,

    /// Directory for embedded SurrealDB storage.
    #[arg(long, env = "FLEET_DB_DIR", default_value = ".fleet/db")]
    pub db_dir: PathBuf,

    /// JSON file with additional classifier rules
    /// (`[{"id": ..., "kind": "contains"|"pattern", "value": ..., "description": ...}]`).
    #[arg(long, env = "FLEET_EXTRA_RULES")]
    pub extra_rules: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = CommentPolicy::Strip)]
    pub comments: CommentPolicy,

    /// Bearer token required for script registration and execution.
    /// Unset leaves those routes open.
    #[arg(long, env = "FLEET_OPERATOR_TOKEN", hide_env_values = true)]
    pub operator_token: Option<String>,

    /// Log level (env-filter syntax).
    #[arg(long, default_value = "info")]
    pub log: String,
}

impl DaemonArgs {
    /// The configured operator token, ignoring an empty value.
    pub fn operator_token(&self) -> Option<String> {
        self.operator_token.clone().filter(|t| !t.trim().is_empty())
    }

    /// Built-in rules, extended from `--extra-rules` when given.
    pub fn load_classifier(&self) -> anyhow::Result<Classifier> {
        let mut rules = RuleSet::builtin().context("built-in rule table")?;
        if let Some(path) = &self.extra_rules {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("read extra rules from {}", path.display()))?;
            let specs = RuleSet::specs_from_json(&json)
                .with_context(|| format!("parse extra rules in {}", path.display()))?;
            let extra = RuleSet::from_specs(rules.version(), specs)?;
            tracing::info!(path = %path.display(), count = extra.len(), "extra classifier rules loaded");
            rules.extend(extra.rules().iter().cloned());
        }
        Ok(Classifier::new(Arc::new(rules)).with_policy(self.comments.into()))
    }
}
