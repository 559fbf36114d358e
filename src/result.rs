//! Typed outcomes returned by the executor.
//!
//! Every public operation ends in an [`ExecutionResult`]; transport faults
//! never escape as errors. The status is machine-checkable, the `detail`
//! string is meant for the person (or model) that issued the request.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::request::CommandKind;
use crate::safety::ValidationVerdict;
use crate::session::{FailureKind, SessionFailure};

/// Closed set of outcome kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    DeviceNotFound,
    PolicyRejected,
    ConnectFailed,
    AuthFailed,
    PartialFailure,
    TransportError,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::DeviceNotFound => "device_not_found",
            ExecutionStatus::PolicyRejected => "policy_rejected",
            ExecutionStatus::ConnectFailed => "connect_failed",
            ExecutionStatus::AuthFailed => "auth_failed",
            ExecutionStatus::PartialFailure => "partial_failure",
            ExecutionStatus::TransportError => "transport_error",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one configuration line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LineOutcome {
    Applied,
    Failed { message: String },
    NotAttempted,
}

/// Per-line entry of a configuration result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LineReport {
    /// Zero-based position in the submitted change set.
    pub index: usize,
    pub line: String,
    #[serde(flatten)]
    pub outcome: LineOutcome,
}

/// Outcome of one `execute_read` / `execute_config` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub kind: CommandKind,
    /// Device output. Empty when the device was never reached.
    pub output: String,
    /// Human-readable explanation of the status.
    pub detail: Option<String>,
    /// Safety rule that rejected the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    /// Line-by-line report for configuration requests that reached the device.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<LineReport>,
}

impl ExecutionResult {
    pub fn success(kind: CommandKind, output: String) -> Self {
        Self {
            status: ExecutionStatus::Success,
            kind,
            output,
            detail: None,
            matched_rule: None,
            lines: Vec::new(),
        }
    }

    pub fn device_not_found(kind: CommandKind, device_name: &str) -> Self {
        Self {
            status: ExecutionStatus::DeviceNotFound,
            kind,
            output: String::new(),
            detail: Some(format!(
                "device '{device_name}' is not registered; check the device name"
            )),
            matched_rule: None,
            lines: Vec::new(),
        }
    }

    /// Built from a rejecting verdict. Nothing was sent to the device.
    pub fn policy_rejected(verdict: &ValidationVerdict) -> Self {
        let reason = verdict
            .reason
            .clone()
            .unwrap_or_else(|| "configuration rejected by safety policy".to_string());
        Self {
            status: ExecutionStatus::PolicyRejected,
            kind: CommandKind::Configuration,
            output: String::new(),
            detail: Some(format!("{reason}; nothing was sent to the device")),
            matched_rule: verdict.matched_rule.clone(),
            lines: Vec::new(),
        }
    }

    /// Translation of a session-layer failure.
    pub fn from_failure(kind: CommandKind, device_name: &str, failure: &SessionFailure) -> Self {
        let (status, detail) = match failure.kind {
            FailureKind::ConnectFailed => (
                ExecutionStatus::ConnectFailed,
                format!(
                    "could not reach '{device_name}': {}; check address, port and reachability",
                    failure.message
                ),
            ),
            FailureKind::AuthFailed => (
                ExecutionStatus::AuthFailed,
                format!(
                    "authentication to '{device_name}' failed: {}; check username and password",
                    failure.message
                ),
            ),
            FailureKind::Transport => (
                ExecutionStatus::TransportError,
                format!("session with '{device_name}' failed: {}", failure.message),
            ),
        };
        Self {
            status,
            kind,
            output: String::new(),
            detail: Some(detail),
            matched_rule: None,
            lines: Vec::new(),
        }
    }

    pub fn transport_error(kind: CommandKind, output: String, detail: String) -> Self {
        Self {
            status: ExecutionStatus::TransportError,
            kind,
            output,
            detail: Some(detail),
            matched_rule: None,
            lines: Vec::new(),
        }
    }

    /// Some configuration lines were applied before one failed.
    pub fn partial_failure(output: String, detail: String) -> Self {
        Self {
            status: ExecutionStatus::PartialFailure,
            kind: CommandKind::Configuration,
            output,
            detail: Some(detail),
            matched_rule: None,
            lines: Vec::new(),
        }
    }

    pub fn with_lines(mut self, lines: Vec<LineReport>) -> Self {
        self.lines = lines;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// Whether the caller may retry this request with backoff.
    ///
    /// Only read requests that failed to reach the device or lost the
    /// session qualify. Configuration is never retried blindly.
    pub fn is_retryable(&self) -> bool {
        self.kind == CommandKind::ReadOnly
            && matches!(
                self.status,
                ExecutionStatus::ConnectFailed | ExecutionStatus::TransportError
            )
    }

    /// Lines the device accepted.
    pub fn applied_lines(&self) -> impl Iterator<Item = &LineReport> {
        self.lines
            .iter()
            .filter(|l| l.outcome == LineOutcome::Applied)
    }

    /// One-paragraph summary suitable for showing to the requester.
    pub fn summary(&self) -> String {
        let mut text = format!("[{}]", self.status);
        if let Some(detail) = &self.detail {
            text.push(' ');
            text.push_str(detail);
        }
        for report in &self.lines {
            let state = match &report.outcome {
                LineOutcome::Applied => "applied".to_string(),
                LineOutcome::Failed { message } => format!("FAILED: {message}"),
                LineOutcome::NotAttempted => "not attempted".to_string(),
            };
            text.push_str(&format!("\n  {}. {} -> {state}", report.index + 1, report.line));
        }
        text
    }
}
