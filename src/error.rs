//! Error types for device sessions and registry construction.
//!
//! [`ConnectError`] is the fault vocabulary of the session provider layer. It
//! never crosses the executor boundary: the session manager translates it into
//! a [`SessionFailure`](crate::session::SessionFailure) and the executor turns
//! that into an [`ExecutionResult`](crate::result::ExecutionResult).
//!
//! [`RegistryError`] is raised while building the device registry at startup.

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Faults raised by a session provider while opening, using or closing a session.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The device could not be reached (refused, unroutable, DNS failure...).
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The device rejected the supplied credentials.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The connection did not complete within the connect deadline.
    #[error("connect timeout after {0} ms")]
    ConnectTimeout(u128),

    /// Authentication succeeded but the shell never presented a usable prompt.
    #[error("session init timeout: {0}")]
    InitTimeout(String),

    /// Privileged mode could not be entered with the configured enable secret.
    #[error("enable mode rejected: {0}")]
    EnableRejected(String),

    /// The SSH channel was disconnected while waiting for a prompt.
    #[error("channel disconnect on wait prompt")]
    ChannelDisconnectError,

    /// The session has already been closed.
    #[error("connect closed")]
    ConnectClosedError,

    /// Command execution timed out. Carries the partial output received so far.
    #[error("exec command timeout: {0}")]
    ExecTimeout(String),

    /// The device answered the command with an error marker.
    #[error("command rejected by device: {0}")]
    CommandRejected(String),

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// Failed to send data to the shell I/O task.
    #[error("Failed to send data: {0}")]
    SendDataError(#[from] SendError<String>),

    /// Any provider fault without a more specific variant.
    #[error("{0}")]
    Other(String),
}

impl ConnectError {
    /// True when the fault means the credentials were refused.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            ConnectError::AuthFailed(_) => true,
            ConnectError::Ssh2Error(err) => matches!(
                err,
                async_ssh2_tokio::Error::PasswordWrong | async_ssh2_tokio::Error::KeyAuthFailed
            ),
            _ => false,
        }
    }

    /// True when the fault happened after authentication completed.
    ///
    /// Used to tell a connect failure from a transport failure when `open`
    /// itself reports the fault.
    pub fn is_post_auth(&self) -> bool {
        matches!(
            self,
            ConnectError::InitTimeout(_)
                | ConnectError::EnableRejected(_)
                | ConnectError::ChannelDisconnectError
                | ConnectError::SendDataError(_)
        )
    }
}

/// Errors detected while building the device registry.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// A configured device lacks a required field.
    #[error("device '{device}' is missing required field '{field}'")]
    MissingField { device: String, field: &'static str },

    /// Two configured devices collide once names are lowercased.
    #[error("device name '{0}' is configured more than once")]
    DuplicateDevice(String),

    /// A device entry carries a value that cannot be used.
    #[error("device '{device}' has invalid {field}: {reason}")]
    InvalidField {
        device: String,
        field: &'static str,
        reason: String,
    },

    /// The registry source could not be read or decoded.
    #[error("registry source error: {0}")]
    Source(String),
}
