//! Guarded command execution.
//!
//! [`CommandExecutor`] is the single entry point callers use. It resolves the
//! device, runs the safety validator on configuration, borrows a session for
//! exactly one operation and folds every outcome into an [`ExecutionResult`].
//! Nothing is retried here; see [`ExecutionResult::is_retryable`].

use log::{debug, warn};
use std::sync::Arc;

use crate::error::ConnectError;
use crate::registry::DeviceRegistry;
use crate::request::{CommandKind, CommandRequest};
use crate::result::{ExecutionResult, LineOutcome, LineReport};
use crate::safety::{SafetyValidator, ValidationVerdict};
use crate::session::{ConfigSetReport, SessionFailure, SessionManager, SessionProvider};

/// What a read produced on the wire.
enum ReadOutcome {
    Output(String),
    /// The device answered with an error marker.
    Rejected(String),
}

/// What a configuration set produced once the session was up.
enum ConfigOutcome {
    Report(ConfigSetReport),
    /// The session broke while lines were being sent.
    Interrupted(SessionFailure),
}

pub struct CommandExecutor<P: SessionProvider> {
    registry: Arc<DeviceRegistry>,
    validator: SafetyValidator,
    sessions: SessionManager<P>,
}

impl<P: SessionProvider> CommandExecutor<P> {
    /// Executor with the built-in safety rules.
    pub fn new(registry: Arc<DeviceRegistry>, sessions: SessionManager<P>) -> Self {
        Self {
            registry,
            validator: SafetyValidator::default(),
            sessions,
        }
    }

    pub fn with_validator(mut self, validator: SafetyValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionManager<P> {
        &self.sessions
    }

    /// Runs one read-only command on `device_name`.
    pub async fn execute_read(&self, device_name: &str, command: &str) -> ExecutionResult {
        let kind = CommandKind::ReadOnly;
        let Some(profile) = self.registry.lookup(device_name) else {
            debug!("Read for unknown device '{device_name}'");
            return ExecutionResult::device_not_found(kind, device_name);
        };

        let command = command.to_string();
        let outcome = self
            .sessions
            .with_session(profile, move |session| {
                Box::pin(async move {
                    match session.run_command(&command).await {
                        Ok(output) => Ok(ReadOutcome::Output(output)),
                        Err(ConnectError::CommandRejected(output)) => {
                            Ok(ReadOutcome::Rejected(output))
                        }
                        Err(err) => Err(err),
                    }
                })
            })
            .await;

        match outcome {
            Ok(ReadOutcome::Output(output)) => ExecutionResult::success(kind, output),
            Ok(ReadOutcome::Rejected(output)) => {
                debug!("Device '{}' rejected read command", profile.name());
                ExecutionResult::transport_error(
                    kind,
                    output,
                    format!(
                        "'{}' rejected the command; check the command syntax",
                        profile.name()
                    ),
                )
            }
            Err(failure) => {
                debug!("Read on '{}' failed: {failure}", profile.name());
                ExecutionResult::from_failure(kind, profile.name(), &failure)
            }
        }
    }

    /// Validates and applies configuration `lines` on `device_name`, in order.
    ///
    /// A rejected change set never opens a session.
    pub async fn execute_config(&self, device_name: &str, lines: &[String]) -> ExecutionResult {
        let kind = CommandKind::Configuration;
        let Some(profile) = self.registry.lookup(device_name) else {
            debug!("Configuration for unknown device '{device_name}'");
            return ExecutionResult::device_not_found(kind, device_name);
        };

        let verdict = self.validator.validate(profile, lines);
        if !verdict.allowed {
            return ExecutionResult::policy_rejected(&verdict);
        }

        let owned = lines.to_vec();
        let outcome = self
            .sessions
            .with_session(profile, move |session| {
                Box::pin(async move {
                    let outcome = match session.run_config_set(&owned).await {
                        Ok(report) => ConfigOutcome::Report(report),
                        Err(err) => {
                            ConfigOutcome::Interrupted(SessionFailure::from_session_fault(&err))
                        }
                    };
                    Ok::<_, ConnectError>(outcome)
                })
            })
            .await;

        match outcome {
            Ok(ConfigOutcome::Report(report)) => classify_config(profile.name(), lines, report),
            Ok(ConfigOutcome::Interrupted(failure)) => {
                warn!(
                    "Configuration session with '{}' broke: {failure}",
                    profile.name()
                );
                let mut result = ExecutionResult::from_failure(kind, profile.name(), &failure);
                result.detail = result.detail.map(|d| {
                    format!(
                        "{d}; the configuration state of the device is unknown, verify it before retrying"
                    )
                });
                result
            }
            Err(failure) => {
                // No session reached configuration mode, so nothing was sent.
                debug!("Configuration on '{}' failed: {failure}", profile.name());
                ExecutionResult::from_failure(kind, profile.name(), &failure)
                    .with_lines(reports(lines, |_| LineOutcome::NotAttempted))
            }
        }
    }

    /// Dispatches a typed request.
    pub async fn execute(&self, request: &CommandRequest) -> ExecutionResult {
        match request.kind {
            CommandKind::ReadOnly => {
                self.execute_read(&request.device_name, &request.command())
                    .await
            }
            CommandKind::Configuration => {
                self.execute_config(&request.device_name, &request.lines())
                    .await
            }
        }
    }

    /// Dry run: the verdict `execute_config` would act on. `None` for unknown devices.
    pub fn validate(&self, device_name: &str, lines: &[String]) -> Option<ValidationVerdict> {
        self.registry
            .lookup(device_name)
            .map(|profile| self.validator.validate(profile, lines))
    }

    /// Closes pooled sessions.
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
    }
}

fn reports(lines: &[String], outcome: impl Fn(usize) -> LineOutcome) -> Vec<LineReport> {
    lines
        .iter()
        .enumerate()
        .map(|(index, line)| LineReport {
            index,
            line: line.clone(),
            outcome: outcome(index),
        })
        .collect()
}

/// Folds a provider report into a result.
fn classify_config(device: &str, lines: &[String], report: ConfigSetReport) -> ExecutionResult {
    let kind = CommandKind::Configuration;
    let output = report.joined_output();

    let Some(failure) = report.failure else {
        return ExecutionResult::success(kind, output)
            .with_lines(reports(lines, |_| LineOutcome::Applied));
    };

    let Some(failed_line) = lines.get(failure.index) else {
        return ExecutionResult::transport_error(
            kind,
            output,
            format!(
                "'{device}' reported a failure at line {} of a {}-line change set; device state unknown",
                failure.index + 1,
                lines.len()
            ),
        );
    };

    let line_reports = reports(lines, |i| {
        if i < failure.index {
            LineOutcome::Applied
        } else if i == failure.index {
            LineOutcome::Failed {
                message: failure.message.clone(),
            }
        } else {
            LineOutcome::NotAttempted
        }
    });

    if failure.index == 0 {
        return ExecutionResult::transport_error(
            kind,
            output,
            format!(
                "'{device}' rejected line 1 '{}': {}; nothing was applied",
                failed_line.trim(),
                failure.message
            ),
        )
        .with_lines(line_reports);
    }

    let not_attempted = lines.len() - failure.index - 1;
    let detail = format!(
        "{} of {} lines applied on '{device}' before line {} '{}' failed: {}; {not_attempted} lines not attempted. \
         The device is partially configured, review it before retrying",
        failure.index,
        lines.len(),
        failure.index + 1,
        failed_line.trim(),
        failure.message
    );
    warn!("{detail}");

    ExecutionResult::partial_failure(output, detail).with_lines(line_reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ExecutionStatus;
    use crate::session::LineFailure;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn clean_report_is_success_with_every_line_applied() {
        let set = lines(&["hostname R1", "ntp server 10.0.0.9"]);
        let report = ConfigSetReport {
            outputs: vec![String::new(), String::new()],
            failure: None,
        };
        let result = classify_config("r1", &set, report);
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.applied_lines().count(), 2);
    }

    #[test]
    fn failure_on_first_line_is_transport_error() {
        let set = lines(&["bogus", "hostname R1"]);
        let report = ConfigSetReport {
            outputs: Vec::new(),
            failure: Some(LineFailure {
                index: 0,
                message: "% Invalid input".to_string(),
            }),
        };
        let result = classify_config("r1", &set, report);
        assert_eq!(result.status, ExecutionStatus::TransportError);
        assert_eq!(result.applied_lines().count(), 0);
        assert_eq!(result.lines[1].outcome, LineOutcome::NotAttempted);
        assert!(result.detail.as_deref().unwrap_or("").contains("nothing was applied"));
    }

    #[test]
    fn failure_after_applied_lines_is_partial() {
        let set = lines(&["interface Loopback1", "ip address 1.1.1.1", "no shutdown"]);
        let report = ConfigSetReport {
            outputs: vec![String::new()],
            failure: Some(LineFailure {
                index: 1,
                message: "% Incomplete command.".to_string(),
            }),
        };
        let result = classify_config("r1", &set, report);
        assert_eq!(result.status, ExecutionStatus::PartialFailure);
        assert_eq!(result.lines[0].outcome, LineOutcome::Applied);
        assert!(matches!(result.lines[1].outcome, LineOutcome::Failed { .. }));
        assert_eq!(result.lines[2].outcome, LineOutcome::NotAttempted);
        let detail = result.detail.unwrap_or_default();
        assert!(detail.contains("1 of 3 lines applied"));
        assert!(detail.contains("line 2 'ip address 1.1.1.1'"));
    }

    #[test]
    fn failure_index_past_the_end_is_transport_error() {
        let set = lines(&["hostname R1"]);
        let report = ConfigSetReport {
            outputs: vec![String::new()],
            failure: Some(LineFailure {
                index: 4,
                message: "?".to_string(),
            }),
        };
        let result = classify_config("r1", &set, report);
        assert_eq!(result.status, ExecutionStatus::TransportError);
        assert!(result.lines.is_empty());
    }
}
