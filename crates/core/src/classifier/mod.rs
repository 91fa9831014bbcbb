//! Static command-safety classifier.
//!
//! Script text is normalized (see [`normalize`]) and checked against an
//! immutable [`RuleSet`]: containment rules first, then regular-expression
//! rules, first match wins. The verdict is binary and deterministic.
//!
//! This is a pattern screen, not a sandbox. Payloads assembled at shell time
//! (variable expansion, `$(...)`, base64 or other encodings) are not detected,
//! and allowed scripts run with whatever rights the agent has.

mod normalize;
mod rules;

use std::sync::Arc;

use serde::Serialize;

pub use normalize::{normalize, NormalizationPolicy};
pub use rules::{Matcher, Rule, RuleError, RuleKind, RuleSet, RuleSpec, BUILTIN_RULESET_VERSION};

/// Result of classifying a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// No rule fired.
    Safe,
    /// A rule fired; the script must not be stored or run.
    Dangerous {
        /// Id of the first rule that fired.
        rule_id: String,
        /// What the rule guards against.
        description: String,
    },
}

impl Verdict {
    /// True for [`Verdict::Dangerous`].
    pub fn is_dangerous(&self) -> bool {
        matches!(self, Verdict::Dangerous { .. })
    }

    /// Id of the rule that fired, if any.
    pub fn rule_id(&self) -> Option<&str> {
        match self {
            Verdict::Safe => None,
            Verdict::Dangerous { rule_id, .. } => Some(rule_id.as_str()),
        }
    }
}

/// Pure classifier over a shared rule table. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Arc<RuleSet>,
    policy: NormalizationPolicy,
}

impl Classifier {
    /// Classifier over `rules` with the default normalization policy.
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self {
            rules,
            policy: NormalizationPolicy::default(),
        }
    }

    /// Classifier over the built-in table with the default policy.
    pub fn builtin() -> Result<Self, RuleError> {
        Ok(Self::new(Arc::new(RuleSet::builtin()?)))
    }

    /// Same rules, different normalization.
    pub fn with_policy(mut self, policy: NormalizationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Normalize `script` and report the first rule that fires.
    pub fn classify(&self, script: &str) -> Verdict {
        let normalized = normalize(script, self.policy);
        match self.rules.first_match(&normalized) {
            Some(rule) => Verdict::Dangerous {
                rule_id: rule.id().to_string(),
                description: rule.description().to_string(),
            },
            None => Verdict::Safe,
        }
    }

    /// Shorthand for `classify(script).is_dangerous()`.
    pub fn is_dangerous(&self, script: &str) -> bool {
        self.classify(script).is_dangerous()
    }

    /// Active normalization policy.
    pub fn policy(&self) -> NormalizationPolicy {
        self.policy
    }

    /// Version of the rule table, for logs.
    pub fn ruleset_version(&self) -> u32 {
        self.rules.version()
    }

    /// The rule table in evaluation order.
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }
}
