//! Offline session provider driven by per-device scripts.
//!
//! Devices are matched by address. A script says how `open` behaves, what
//! each command prints, which commands or configuration lines the device
//! refuses, and where the transport drops. Counters let callers check that
//! every opened session was closed again.

use async_trait::async_trait;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{ConfigSetReport, LineFailure, SessionProvider};
use crate::error::ConnectError;
use crate::registry::DeviceProfile;

/// Output printed by IOS for an unknown command.
const INVALID_INPUT: &str = "% Invalid input detected at '^' marker.";

/// How `open` behaves for a scripted device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "behavior", rename_all = "snake_case")]
pub enum OpenBehavior {
    #[default]
    Accept,
    /// Connection refused or unreachable.
    Refuse { message: String },
    /// Credentials refused.
    RejectAuth { message: String },
    /// Never completes; exercises the connect deadline.
    Hang,
    /// Authenticates, then never shows a usable prompt.
    HangAfterAuth,
    /// Authenticates, then refuses the enable secret.
    RejectEnable { message: String },
}

/// Scripted behaviour of one device.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DeviceScript {
    #[serde(default)]
    pub open: OpenBehavior,
    /// Command -> output.
    #[serde(default)]
    pub outputs: HashMap<String, String>,
    /// Command -> device error text.
    #[serde(default)]
    pub rejected: HashMap<String, String>,
    /// Configuration line -> device error text.
    #[serde(default)]
    pub failing_lines: HashMap<String, String>,
    /// Command or configuration line at which the transport drops.
    #[serde(default)]
    pub drop_on: Option<String>,
    /// Delay before every command or configuration set.
    #[serde(default)]
    pub command_delay_ms: u64,
    /// Time a graceful close takes.
    #[serde(default)]
    pub close_delay_ms: u64,
}

/// Counters and call log of a [`ScriptedProvider`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderStats {
    pub open_attempts: usize,
    /// Handles successfully returned by `open`.
    pub opened: usize,
    /// Graceful close calls, counted when the close starts.
    pub closed: usize,
    pub aborted: usize,
    /// `(address, command)` for every command run.
    pub commands: Vec<(String, String)>,
    /// `(address, lines)` for every configuration set submitted.
    pub config_sets: Vec<(String, Vec<String>)>,
}

#[derive(Debug)]
pub struct ScriptedHandle {
    id: u64,
    address: String,
    alive: bool,
    closed: bool,
}

impl ScriptedHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[derive(Debug, Default)]
pub struct ScriptedProvider {
    scripts: HashMap<String, DeviceScript>,
    stats: Mutex<ProviderStats>,
    next_id: AtomicU64,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, address: impl Into<String>, script: DeviceScript) -> Self {
        self.scripts.insert(address.into(), script);
        self
    }

    /// Loads a JSON object of `address -> script`.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let scripts: HashMap<String, DeviceScript> = serde_json::from_str(json)?;
        Ok(Self {
            scripts,
            ..Self::default()
        })
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> ProviderStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    fn record(&self, update: impl FnOnce(&mut ProviderStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }

    fn script(&self, address: &str) -> Result<&DeviceScript, ConnectError> {
        self.scripts
            .get(address)
            .ok_or_else(|| ConnectError::ConnectFailed(format!("no route to host {address}")))
    }

    async fn pace(script: &DeviceScript) {
        if script.command_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(script.command_delay_ms)).await;
        }
    }
}

#[async_trait]
impl SessionProvider for ScriptedProvider {
    type Handle = ScriptedHandle;

    async fn open(&self, profile: &DeviceProfile) -> Result<Self::Handle, ConnectError> {
        self.record(|s| s.open_attempts += 1);
        let script = self.script(profile.address())?;

        match &script.open {
            OpenBehavior::Accept
            | OpenBehavior::HangAfterAuth
            | OpenBehavior::RejectEnable { .. } => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
                self.record(|s| s.opened += 1);
                debug!("Scripted session {id} opened to {}", profile.address());
                Ok(ScriptedHandle {
                    id,
                    address: profile.address().to_string(),
                    alive: true,
                    closed: false,
                })
            }
            OpenBehavior::Refuse { message } => Err(ConnectError::ConnectFailed(message.clone())),
            OpenBehavior::RejectAuth { message } => Err(ConnectError::AuthFailed(message.clone())),
            OpenBehavior::Hang => {
                std::future::pending::<()>().await;
                Err(ConnectError::ConnectTimeout(0))
            }
        }
    }

    async fn prepare(
        &self,
        handle: &mut Self::Handle,
        _profile: &DeviceProfile,
    ) -> Result<(), ConnectError> {
        match &self.script(&handle.address)?.open {
            OpenBehavior::HangAfterAuth => {
                std::future::pending::<()>().await;
                Err(ConnectError::InitTimeout(handle.address.clone()))
            }
            OpenBehavior::RejectEnable { message } => {
                Err(ConnectError::EnableRejected(message.clone()))
            }
            _ => Ok(()),
        }
    }

    async fn run_command(
        &self,
        handle: &mut Self::Handle,
        command: &str,
    ) -> Result<String, ConnectError> {
        if handle.closed || !handle.alive {
            return Err(ConnectError::ConnectClosedError);
        }
        let script = self.script(&handle.address)?;
        self.record(|s| s.commands.push((handle.address.clone(), command.to_string())));
        Self::pace(script).await;

        if script.drop_on.as_deref() == Some(command) {
            handle.alive = false;
            return Err(ConnectError::ChannelDisconnectError);
        }
        if let Some(error) = script.rejected.get(command) {
            return Err(ConnectError::CommandRejected(error.clone()));
        }
        match script.outputs.get(command) {
            Some(output) => Ok(output.clone()),
            None => Err(ConnectError::CommandRejected(INVALID_INPUT.to_string())),
        }
    }

    async fn run_config_set(
        &self,
        handle: &mut Self::Handle,
        lines: &[String],
    ) -> Result<ConfigSetReport, ConnectError> {
        if handle.closed || !handle.alive {
            return Err(ConnectError::ConnectClosedError);
        }
        let script = self.script(&handle.address)?;
        self.record(|s| s.config_sets.push((handle.address.clone(), lines.to_vec())));
        Self::pace(script).await;

        let mut report = ConfigSetReport::default();
        for (index, line) in lines.iter().enumerate() {
            let trimmed = line.trim();
            if script.drop_on.as_deref() == Some(trimmed) {
                handle.alive = false;
                report.failure = Some(LineFailure {
                    index,
                    message: ConnectError::ChannelDisconnectError.to_string(),
                });
                break;
            }
            if let Some(error) = script.failing_lines.get(trimmed) {
                report.failure = Some(LineFailure {
                    index,
                    message: error.clone(),
                });
                break;
            }
            report.outputs.push(String::new());
        }
        Ok(report)
    }

    async fn is_alive(&self, handle: &mut Self::Handle) -> bool {
        handle.alive && !handle.closed
    }

    async fn close(&self, handle: &mut Self::Handle) {
        self.record(|s| s.closed += 1);
        if let Ok(script) = self.script(&handle.address)
            && script.close_delay_ms > 0
        {
            tokio::time::sleep(Duration::from_millis(script.close_delay_ms)).await;
        }
        handle.closed = true;
        debug!("Scripted session {} closed", handle.id);
    }

    async fn abort(&self, handle: &mut Self::Handle) {
        self.record(|s| s.aborted += 1);
        handle.alive = false;
    }
}
