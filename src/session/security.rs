use async_ssh2_tokio::ServerCheckMethod;
use russh::Preferred;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::config;

/// Algorithm policy for SSH negotiation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Modern algorithms only.
    #[default]
    Secure,
    /// Adds CBC ciphers and SHA-1 MACs for mixed fleets.
    Balanced,
    /// Anything russh can negotiate. Old IOS images need this.
    LegacyCompatible,
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityLevel::Secure => "secure",
            SecurityLevel::Balanced => "balanced",
            SecurityLevel::LegacyCompatible => "legacy_compatible",
        }
    }

    fn preferred(&self) -> Preferred {
        let (kex, key, cipher, mac) = match self {
            SecurityLevel::Secure => (
                config::SECURE_KEX_ORDER,
                config::SECURE_KEY_TYPES,
                config::SECURE_CIPHERS,
                config::SECURE_MAC_ALGORITHMS,
            ),
            SecurityLevel::Balanced => (
                config::BALANCED_KEX_ORDER,
                config::BALANCED_KEY_TYPES,
                config::BALANCED_CIPHERS,
                config::BALANCED_MAC_ALGORITHMS,
            ),
            SecurityLevel::LegacyCompatible => (
                config::LEGACY_KEX_ORDER,
                config::LEGACY_KEY_TYPES,
                config::LEGACY_CIPHERS,
                config::LEGACY_MAC_ALGORITHMS,
            ),
        };
        Preferred {
            kex: Cow::Borrowed(kex),
            key: Cow::Borrowed(key),
            cipher: Cow::Borrowed(cipher),
            mac: Cow::Borrowed(mac),
            compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityLevel {
    type Err = String;

    /// Accepts the snake_case names plus `legacy` and `compat` shorthands.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "secure" => Ok(SecurityLevel::Secure),
            "balanced" => Ok(SecurityLevel::Balanced),
            "legacy_compatible" | "legacy" | "compat" => Ok(SecurityLevel::LegacyCompatible),
            other => Err(format!("unknown SSH security level '{other}'")),
        }
    }
}

/// How the SSH provider negotiates algorithms and checks host keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSecurityOptions {
    pub level: SecurityLevel,
    pub server_check: ServerCheckMethod,
}

impl Default for ConnectionSecurityOptions {
    fn default() -> Self {
        Self::for_level(SecurityLevel::Secure)
    }
}

impl ConnectionSecurityOptions {
    /// Host keys are checked against `~/.ssh/known_hosts` except at the
    /// legacy level, where lab gear rarely has stable keys.
    pub fn for_level(level: SecurityLevel) -> Self {
        let server_check = match level {
            SecurityLevel::LegacyCompatible => ServerCheckMethod::NoCheck,
            _ => ServerCheckMethod::DefaultKnownHostsFile,
        };
        Self {
            level,
            server_check,
        }
    }

    pub fn with_known_hosts_file(mut self, path: impl Into<String>) -> Self {
        self.server_check = ServerCheckMethod::KnownHostsFile(path.into());
        self
    }

    pub fn without_host_check(mut self) -> Self {
        self.server_check = ServerCheckMethod::NoCheck;
        self
    }

    pub(super) fn preferred(&self) -> Preferred {
        self.level.preferred()
    }
}
