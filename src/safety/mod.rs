//! Offline safety screening of configuration change sets.
//!
//! The validator runs before any session is opened. Rules are evaluated in
//! order and the first rejection wins. An `allowed` verdict only says the
//! change cannot lock the automation out of the device; the device may
//! still refuse the lines.

use log::{debug, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::registry::DeviceProfile;

pub mod context;
mod rules;

pub use context::{ChangeSet, ConfigContext, ConfigLine, InterfaceName};
pub use rules::{
    ACCESS_PATH_RULE, AccessPathRule, EMPTY_CHANGE_SET_RULE, EmptyChangeSetRule,
    MANAGEMENT_INTERFACE_RULE, ManagementInterfaceRule,
};

/// Result of screening one change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationVerdict {
    pub allowed: bool,
    pub reason: Option<String>,
    pub matched_rule: Option<String>,
}

impl ValidationVerdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            matched_rule: None,
        }
    }

    pub fn reject(rule: &str, reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            matched_rule: Some(rule.to_string()),
        }
    }
}

/// One screening rule. Implementations must be pure.
pub trait SafetyRule: Send + Sync {
    /// Stable identifier reported in `matched_rule`.
    fn id(&self) -> &'static str;

    /// Returns a human-readable reason when the change set must be rejected.
    fn evaluate(&self, change: &ChangeSet<'_>) -> Option<String>;
}

/// Ordered rule list applied to every configuration request.
pub struct SafetyValidator {
    rules: Vec<Box<dyn SafetyRule>>,
}

impl SafetyValidator {
    /// Validator with the built-in rules: management interface, access path,
    /// empty change set.
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(ManagementInterfaceRule),
                Box::new(AccessPathRule),
                Box::new(EmptyChangeSetRule),
            ],
        }
    }

    /// Validator with no rules at all. Every non-trivial caller wants [`new`](Self::new).
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Appends a rule evaluated after the existing ones.
    pub fn with_rule(mut self, rule: impl SafetyRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    pub fn validate(&self, profile: &DeviceProfile, lines: &[String]) -> ValidationVerdict {
        let change = ChangeSet::new(profile, lines);
        for rule in &self.rules {
            if let Some(reason) = rule.evaluate(&change) {
                warn!(
                    "Rejected change for {} by rule {}: {}",
                    profile.name(),
                    rule.id(),
                    reason
                );
                return ValidationVerdict::reject(rule.id(), reason);
            }
        }
        debug!(
            "Change of {} lines for {} passed {} rules",
            lines.len(),
            profile.name(),
            self.rules.len()
        );
        ValidationVerdict::allow()
    }
}

impl Default for SafetyValidator {
    fn default() -> Self {
        Self::new()
    }
}
