//! Device sessions: the provider capability, scoped sessions and their manager.
//!
//! A [`SessionProvider`] knows how to open an authenticated administrative
//! session and push text through it. The [`SessionManager`] owns the
//! lifecycle around that capability: connect deadline, per-operation
//! deadline, optional idle pooling, and a release on every exit path.
//!
//! # Main Components
//!
//! - [`SessionProvider`] - transport capability (SSH in [`SshSessionProvider`])
//! - [`Session`] - one exclusively owned live session with state tracking
//! - [`SessionManager`] - acquisition, release and `with_session` scoping
//! - [`SessionFailure`] - the closed set session faults are translated into
//! - [`ScriptedProvider`] - offline provider replaying per-device scripts

use async_trait::async_trait;
use log::{debug, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::ConnectError;
use crate::registry::DeviceProfile;

pub use manager::{SessionFuture, SessionManager, SessionTimeouts};
pub use scripted::{DeviceScript, OpenBehavior, ProviderStats, ScriptedHandle, ScriptedProvider};
pub use security::{ConnectionSecurityOptions, SecurityLevel};
pub use ssh::{SshHandle, SshSessionProvider};

mod manager;
mod pool;
mod prompt;
mod scripted;
mod security;
mod ssh;

/// Transport capability consumed by the session manager.
///
/// `close` must be idempotent and must not fail; `abort` is the forced path
/// used when a session misbehaved or a graceful close overran its deadline.
#[async_trait]
pub trait SessionProvider: Send + Sync + 'static {
    type Handle: Send + 'static;

    /// Connects and authenticates against `profile`.
    async fn open(&self, profile: &DeviceProfile) -> Result<Self::Handle, ConnectError>;

    /// Brings a freshly authenticated handle to a usable prompt.
    ///
    /// Runs under its own deadline after `open`. Faults here are transport
    /// faults, since authentication already succeeded.
    async fn prepare(
        &self,
        _handle: &mut Self::Handle,
        _profile: &DeviceProfile,
    ) -> Result<(), ConnectError> {
        Ok(())
    }

    /// Runs one exec-mode command and returns its output.
    async fn run_command(
        &self,
        handle: &mut Self::Handle,
        command: &str,
    ) -> Result<String, ConnectError>;

    /// Applies configuration lines in order, stopping at the first failing line.
    async fn run_config_set(
        &self,
        handle: &mut Self::Handle,
        lines: &[String],
    ) -> Result<ConfigSetReport, ConnectError>;

    /// Cheap liveness check used before reusing a pooled handle.
    async fn is_alive(&self, _handle: &mut Self::Handle) -> bool {
        true
    }

    /// Graceful close.
    async fn close(&self, handle: &mut Self::Handle);

    /// Forced close. Providers without a distinct hard-close leave this as is.
    async fn abort(&self, _handle: &mut Self::Handle) {}
}

/// Failure of one configuration line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LineFailure {
    /// Zero-based index into the submitted lines.
    pub index: usize,
    pub message: String,
}

/// What a provider reports back from `run_config_set`.
///
/// `outputs[i]` is the device output of line `i`; lines before
/// `failure.index` were applied, lines after it were not attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConfigSetReport {
    pub outputs: Vec<String>,
    pub failure: Option<LineFailure>,
}

impl ConfigSetReport {
    /// Number of lines the device accepted.
    pub fn applied(&self) -> usize {
        self.failure
            .as_ref()
            .map(|f| f.index)
            .unwrap_or(self.outputs.len())
    }

    /// Device output of the applied lines, one block per line.
    pub fn joined_output(&self) -> String {
        self.outputs
            .iter()
            .filter(|o| !o.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Authenticated, shell not yet usable. Sessions handed out by the manager are past this.
    Connecting,
    Ready,
    Busy,
    Closed,
    /// A deadline was missed or the transport broke; the session is not reusable.
    Failed,
}

/// Kind of session-level failure, as seen by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Unreachable, refused, or connect deadline exceeded.
    ConnectFailed,
    /// Credentials rejected.
    AuthFailed,
    /// Anything after authentication: lost channel, command deadline, device errors.
    Transport,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::ConnectFailed => "connect failed",
            FailureKind::AuthFailed => "auth failed",
            FailureKind::Transport => "transport error",
        })
    }
}

/// A provider fault translated at the session manager boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct SessionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl SessionFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Translation of a fault raised by `open`.
    pub fn from_open_fault(err: &ConnectError) -> Self {
        let kind = if err.is_auth_failure() {
            FailureKind::AuthFailed
        } else if err.is_post_auth() {
            FailureKind::Transport
        } else {
            FailureKind::ConnectFailed
        };
        Self::new(kind, err.to_string())
    }

    /// Translation of a fault raised while the session was in use.
    pub fn from_session_fault(err: &ConnectError) -> Self {
        Self::new(FailureKind::Transport, err.to_string())
    }
}

/// One live, exclusively owned session.
///
/// Every provider call goes through here so the command deadline and the
/// state transitions are applied uniformly.
pub struct Session<P: SessionProvider> {
    id: u64,
    device: String,
    fingerprint: String,
    state: SessionState,
    handle: Option<P::Handle>,
    provider: Arc<P>,
    command_timeout: Duration,
}

impl<P: SessionProvider> Session<P> {
    pub(crate) fn ready(
        id: u64,
        profile: &DeviceProfile,
        handle: P::Handle,
        provider: Arc<P>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            id,
            device: profile.name().to_string(),
            fingerprint: profile.fingerprint(),
            state: SessionState::Ready,
            handle: Some(handle),
            provider,
            command_timeout,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub(crate) fn take_handle(&mut self) -> Option<P::Handle> {
        self.handle.take()
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// Runs the provider's post-authentication setup under `deadline`.
    pub(crate) async fn prepare(
        &mut self,
        profile: &DeviceProfile,
        deadline: Duration,
    ) -> Result<(), ConnectError> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(ConnectError::ConnectClosedError);
        };
        self.state = SessionState::Connecting;

        match tokio::time::timeout(deadline, self.provider.prepare(handle, profile)).await {
            Ok(Ok(())) => {
                self.state = SessionState::Ready;
                Ok(())
            }
            Ok(Err(err)) => {
                self.state = SessionState::Failed;
                Err(err)
            }
            Err(_) => {
                self.state = SessionState::Failed;
                Err(ConnectError::InitTimeout(format!(
                    "no usable prompt from {} within {} ms of authenticating",
                    profile.endpoint(),
                    deadline.as_millis()
                )))
            }
        }
    }

    /// Runs one read command under the command deadline.
    pub async fn run_command(&mut self, command: &str) -> Result<String, ConnectError> {
        let handle = match (self.state, self.handle.as_mut()) {
            (SessionState::Ready, Some(handle)) => handle,
            _ => return Err(ConnectError::ConnectClosedError),
        };
        self.state = SessionState::Busy;
        debug!("Session {} [{}] run: {}", self.id, self.device, command);

        let result = tokio::time::timeout(
            self.command_timeout,
            self.provider.run_command(handle, command),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                self.state = SessionState::Ready;
                Ok(output)
            }
            Ok(Err(ConnectError::CommandRejected(output))) => {
                // The device answered; the session itself is fine.
                self.state = SessionState::Ready;
                Err(ConnectError::CommandRejected(output))
            }
            Ok(Err(err)) => {
                self.state = SessionState::Failed;
                Err(err)
            }
            Err(_) => {
                warn!(
                    "Session {} [{}] command '{}' exceeded {} ms",
                    self.id,
                    self.device,
                    command,
                    self.command_timeout.as_millis()
                );
                self.state = SessionState::Failed;
                Err(ConnectError::ExecTimeout(format!(
                    "'{command}' did not complete within {} ms",
                    self.command_timeout.as_millis()
                )))
            }
        }
    }

    /// Applies configuration lines in order under the command deadline.
    pub async fn run_config_set(
        &mut self,
        lines: &[String],
    ) -> Result<ConfigSetReport, ConnectError> {
        let handle = match (self.state, self.handle.as_mut()) {
            (SessionState::Ready, Some(handle)) => handle,
            _ => return Err(ConnectError::ConnectClosedError),
        };
        self.state = SessionState::Busy;
        debug!(
            "Session {} [{}] applying {} configuration lines",
            self.id,
            self.device,
            lines.len()
        );

        let result = tokio::time::timeout(
            self.command_timeout,
            self.provider.run_config_set(handle, lines),
        )
        .await;

        match result {
            Ok(Ok(report)) => {
                self.state = SessionState::Ready;
                Ok(report)
            }
            Ok(Err(err)) => {
                self.state = SessionState::Failed;
                Err(err)
            }
            Err(_) => {
                warn!(
                    "Session {} [{}] configuration exceeded {} ms",
                    self.id,
                    self.device,
                    self.command_timeout.as_millis()
                );
                self.state = SessionState::Failed;
                Err(ConnectError::ExecTimeout(format!(
                    "configuration did not complete within {} ms; device state unknown",
                    self.command_timeout.as_millis()
                )))
            }
        }
    }
}

impl<P: SessionProvider> Drop for Session<P> {
    fn drop(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        // Only reached when the owning future was cancelled before release.
        warn!(
            "Session {} [{}] dropped while {:?}; closing in background",
            self.id, self.device, self.state
        );
        let provider = Arc::clone(&self.provider);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    provider.abort(&mut handle).await;
                    provider.close(&mut handle).await;
                });
            }
            Err(_) => warn!("No runtime to close session {}; handle dropped", self.id),
        }
    }
}
