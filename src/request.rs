//! Structured requests submitted by the caller.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Whether a request may change device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    ReadOnly,
    Configuration,
}

/// What is sent to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum CommandPayload {
    /// A single exec-mode command such as `show ip interface brief`.
    Command(String),
    /// Configuration lines applied in order, as typed after `configure terminal`.
    Lines(Vec<String>),
}

/// A single unit of work for the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommandRequest {
    /// Registered device name (case-insensitive).
    pub device_name: String,
    pub kind: CommandKind,
    pub payload: CommandPayload,
}

impl CommandRequest {
    pub fn read(device_name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            kind: CommandKind::ReadOnly,
            payload: CommandPayload::Command(command.into()),
        }
    }

    pub fn config<I, S>(device_name: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            device_name: device_name.into(),
            kind: CommandKind::Configuration,
            payload: CommandPayload::Lines(lines.into_iter().map(Into::into).collect()),
        }
    }

    /// Payload flattened to configuration lines.
    pub fn lines(&self) -> Vec<String> {
        match &self.payload {
            CommandPayload::Command(command) => command
                .lines()
                .map(str::to_string)
                .collect(),
            CommandPayload::Lines(lines) => lines.clone(),
        }
    }

    /// Payload flattened to one command string.
    pub fn command(&self) -> String {
        match &self.payload {
            CommandPayload::Command(command) => command.clone(),
            CommandPayload::Lines(lines) => lines.join("\n"),
        }
    }
}

/// JSON Schema of [`CommandRequest`], for callers that advertise the request
/// shape to a tool-calling model.
pub fn request_schema_json() -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&schemars::schema_for!(CommandRequest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_deserializes_from_string_or_list() {
        let read: CommandRequest = serde_json::from_str(
            r#"{"device_name":"router","kind":"read_only","payload":"show version"}"#,
        )
        .expect("read request");
        assert_eq!(read, CommandRequest::read("router", "show version"));

        let config: CommandRequest = serde_json::from_str(
            r#"{"device_name":"router","kind":"configuration","payload":["interface Loopback99","no shutdown"]}"#,
        )
        .expect("config request");
        assert_eq!(
            config.lines(),
            vec!["interface Loopback99".to_string(), "no shutdown".to_string()]
        );
    }

    #[test]
    fn multi_line_command_payload_splits_into_lines() {
        let request = CommandRequest {
            device_name: "switch1".to_string(),
            kind: CommandKind::Configuration,
            payload: CommandPayload::Command("vlan 20\n name users".to_string()),
        };
        assert_eq!(request.lines().len(), 2);
    }

    #[test]
    fn schema_names_request_fields() {
        let schema = request_schema_json().expect("schema");
        assert!(schema.contains("device_name"));
        assert!(schema.contains("configuration"));
    }
}
