//! Device registry: the immutable name → connection profile table.
//!
//! The registry is built once at startup (from JSON or from environment
//! variables) and then only read. Lookups are exact and case-insensitive;
//! there is deliberately no prefix or fuzzy matching.

use log::{debug, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::config::DEFAULT_SSH_PORT;
use crate::error::RegistryError;

/// A credential that never shows up in logs or debug output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw secret, for handing to the transport.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Connection profile for one managed device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    name: String,
    address: String,
    port: u16,
    username: String,
    password: Secret,
    enable_secret: Option<Secret>,
    management_interface: Option<String>,
}

impl DeviceProfile {
    /// Logical device name, lowercased.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host or IP address the management session is opened against.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &Secret {
        &self.password
    }

    pub fn enable_secret(&self) -> Option<&Secret> {
        self.enable_secret.as_ref()
    }

    /// Interface that carries [`address`](Self::address), when known.
    pub fn management_interface(&self) -> Option<&str> {
        self.management_interface.as_deref()
    }

    /// `user@address:port`, used in log lines.
    pub fn endpoint(&self) -> String {
        format!("{}@{}:{}", self.username, self.address, self.port)
    }

    /// Stable digest of everything that identifies a session to this device.
    ///
    /// Two profiles with the same fingerprint can share pooled sessions. The
    /// secrets go through SHA-256 so the key is safe to keep in memory maps.
    pub fn fingerprint(&self) -> String {
        let port = self.port.to_string();
        let mut hasher = Sha256::new();
        for part in [
            self.name.as_str(),
            self.address.as_str(),
            port.as_str(),
            self.username.as_str(),
            self.password.expose(),
            self.enable_secret.as_ref().map(Secret::expose).unwrap_or(""),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        let digest: [u8; 32] = hasher.finalize().into();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// One device entry as it appears in a registry source.
///
/// Every field is optional here so that missing values can be reported with
/// the device name instead of a generic decode error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DeviceEntry {
    #[serde(default, alias = "ip", alias = "host")]
    pub address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<Secret>,
    #[serde(default, alias = "secret")]
    pub enable_secret: Option<Secret>,
    #[serde(default)]
    pub management_interface: Option<String>,
}

impl DeviceEntry {
    fn into_profile(self, name: &str) -> Result<DeviceProfile, RegistryError> {
        let address = required(name, "address", self.address)?;
        let username = required(name, "username", self.username)?;
        let password = self
            .password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| RegistryError::MissingField {
                device: name.to_string(),
                field: "password",
            })?;
        if address.chars().any(char::is_whitespace) {
            return Err(RegistryError::InvalidField {
                device: name.to_string(),
                field: "address",
                reason: format!("'{address}' contains whitespace"),
            });
        }
        if self.port == Some(0) {
            return Err(RegistryError::InvalidField {
                device: name.to_string(),
                field: "port",
                reason: "port 0 is not connectable".to_string(),
            });
        }

        Ok(DeviceProfile {
            name: name.to_ascii_lowercase(),
            address,
            port: self.port.unwrap_or(DEFAULT_SSH_PORT),
            username,
            password,
            enable_secret: self.enable_secret.filter(|s| !s.is_empty()),
            management_interface: self
                .management_interface
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        })
    }
}

fn required(
    device: &str,
    field: &'static str,
    value: Option<String>,
) -> Result<String, RegistryError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| RegistryError::MissingField {
            device: device.to_string(),
            field,
        })
}

/// Immutable lookup table of managed devices.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceProfile>,
}

impl DeviceRegistry {
    /// Builds a registry from `(name, entry)` pairs.
    ///
    /// Fails on the first incomplete entry or on a case-insensitive name clash.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = (S, DeviceEntry)>,
        S: AsRef<str>,
    {
        let mut devices = HashMap::new();
        for (name, entry) in entries {
            let name = name.as_ref().trim();
            if name.is_empty() {
                return Err(RegistryError::InvalidField {
                    device: String::new(),
                    field: "name",
                    reason: "device name is empty".to_string(),
                });
            }
            let profile = entry.into_profile(name)?;
            let key = profile.name.clone();
            if devices.contains_key(&key) {
                return Err(RegistryError::DuplicateDevice(key));
            }
            if profile.management_interface.is_none() {
                warn!(
                    "Device {} has no management interface; disruptive interface changes will be refused",
                    key
                );
            }
            debug!("Registered device {} -> {}", key, profile.endpoint());
            devices.insert(key, profile);
        }
        Ok(Self { devices })
    }

    /// Parses a JSON object of `name -> entry`.
    ///
    /// ```json
    /// { "router": { "address": "172.16.1.189", "username": "admin", "password": "..." } }
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self, RegistryError> {
        let raw: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(json).map_err(|e| RegistryError::Source(e.to_string()))?;
        let mut entries = Vec::with_capacity(raw.len());
        for (name, value) in raw {
            let entry: DeviceEntry = serde_json::from_value(value).map_err(|e| {
                RegistryError::InvalidField {
                    device: name.clone(),
                    field: "entry",
                    reason: e.to_string(),
                }
            })?;
            entries.push((name, entry));
        }
        Self::from_entries(entries)
    }

    /// Reads and parses a JSON registry file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| RegistryError::Source(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    /// Builds a registry from process environment variables.
    ///
    /// For a device named `router` the variables are `ROUTER_IP` (or
    /// `ROUTER_ADDRESS`), `ROUTER_USERNAME`, `ROUTER_PASSWORD`, and the
    /// optional `ROUTER_SECRET`, `ROUTER_PORT` and `ROUTER_MGMT_INTERFACE`.
    pub fn from_env(names: &[&str]) -> Result<Self, RegistryError> {
        Self::from_lookup(names, |key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(names: &[&str], lookup: F) -> Result<Self, RegistryError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let prefix = name.trim().to_ascii_uppercase().replace('-', "_");
            let var = |suffix: &str| lookup(&format!("{prefix}_{suffix}"));
            let port = match var("PORT") {
                Some(raw) => Some(raw.trim().parse::<u16>().map_err(|e| {
                    RegistryError::InvalidField {
                        device: name.to_string(),
                        field: "port",
                        reason: format!("'{raw}': {e}"),
                    }
                })?),
                None => None,
            };
            entries.push((
                *name,
                DeviceEntry {
                    address: var("IP").or_else(|| var("ADDRESS")),
                    port,
                    username: var("USERNAME"),
                    password: var("PASSWORD").map(Secret::new),
                    enable_secret: var("SECRET").map(Secret::new),
                    management_interface: var("MGMT_INTERFACE"),
                },
            ));
        }
        Self::from_entries(entries)
    }

    /// Exact, case-insensitive lookup.
    pub fn lookup(&self, name: &str) -> Option<&DeviceProfile> {
        self.devices.get(&name.to_ascii_lowercase())
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.devices.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
