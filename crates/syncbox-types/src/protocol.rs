//! Line-delimited JSON wire protocol spoken by connector containers.
//!
//! Every line a connector writes to stdout is one JSON object carrying a
//! `type` discriminator. The payload lives under a type-specific key
//! (`record`, `state`, `log`, `trace`, `catalog`, `connectionStatus`, `spec`).

use serde::{Deserialize, Serialize};

/// Protocol message discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Record,
    State,
    Log,
    Trace,
    Catalog,
    ConnectionStatus,
    Spec,
}

impl MessageType {
    /// Resolve a wire `type` tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "RECORD" => Some(Self::Record),
            "STATE" => Some(Self::State),
            "LOG" => Some(Self::Log),
            "TRACE" => Some(Self::Trace),
            "CATALOG" => Some(Self::Catalog),
            "CONNECTION_STATUS" => Some(Self::ConnectionStatus),
            "SPEC" => Some(Self::Spec),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Record => "RECORD",
            Self::State => "STATE",
            Self::Log => "LOG",
            Self::Trace => "TRACE",
            Self::Catalog => "CATALOG",
            Self::ConnectionStatus => "CONNECTION_STATUS",
            Self::Spec => "SPEC",
        }
    }

    /// Whether a filtered stream passes this type on to its output.
    #[must_use]
    pub fn is_forwarded(self) -> bool {
        matches!(self, Self::Record | Self::State | Self::Trace)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a line could not be classified as a protocol message.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("line is not a JSON object: {0}")]
    NotJson(#[from] serde_json::Error),

    #[error("JSON line has no string `type` field")]
    MissingType,

    #[error("unrecognized message type '{0}'")]
    UnknownType(String),
}

/// One parsed protocol line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolMessage {
    pub kind: MessageType,
    /// The whole JSON object, including the `type` field.
    pub body: serde_json::Value,
}

impl ProtocolMessage {
    /// Parse one protocol line (without its trailing newline).
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] when the line is not a JSON object or its
    /// `type` tag is missing or unknown.
    pub fn parse(line: &[u8]) -> Result<Self, ParseError> {
        let body: serde_json::Value = serde_json::from_slice(line)?;
        let tag = body
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(ParseError::MissingType)?;
        let kind = MessageType::from_tag(tag).ok_or_else(|| ParseError::UnknownType(tag.into()))?;
        Ok(Self { kind, body })
    }

    /// `STATE` payload (the `state` object).
    #[must_use]
    pub fn state_payload(&self) -> Option<&serde_json::Value> {
        if self.kind != MessageType::State {
            return None;
        }
        self.body.get("state")
    }

    /// `CONNECTION_STATUS` payload.
    #[must_use]
    pub fn connection_status(&self) -> Option<ConnectionStatus> {
        if self.kind != MessageType::ConnectionStatus {
            return None;
        }
        self.body
            .get("connectionStatus")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// `LOG` payload as `(level, message)`.
    #[must_use]
    pub fn log_entry(&self) -> Option<(&str, &str)> {
        if self.kind != MessageType::Log {
            return None;
        }
        let log = self.body.get("log")?;
        let level = log
            .get("level")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("INFO");
        let message = log.get("message").and_then(serde_json::Value::as_str)?;
        Some((level, message))
    }

    /// Prepend `prefix` to a `RECORD` message's stream name.
    ///
    /// Returns `false` when the message is not a record or has no stream.
    pub fn prefix_record_stream(&mut self, prefix: &str) -> bool {
        if self.kind != MessageType::Record {
            return false;
        }
        let Some(stream) = self
            .body
            .get_mut("record")
            .and_then(|r| r.get_mut("stream"))
        else {
            return false;
        };
        let Some(name) = stream.as_str() else {
            return false;
        };
        *stream = serde_json::Value::String(format!("{prefix}{name}"));
        true
    }

    /// Serialize back to a single compact JSON line (no newline).
    #[must_use]
    pub fn to_line(&self) -> Vec<u8> {
        // Serializing a `Value` cannot fail.
        serde_json::to_vec(&self.body).unwrap_or_default()
    }
}

/// Outcome reported by a connector's `check` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatusKind {
    Succeeded,
    Failed,
}

/// `connectionStatus` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub status: ConnectionStatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_record_line() {
        let msg = ProtocolMessage::parse(
            br#"{"type":"RECORD","record":{"stream":"users","data":{"id":1}}}"#,
        )
        .unwrap();
        assert_eq!(msg.kind, MessageType::Record);
        assert_eq!(msg.body["record"]["stream"], "users");
    }

    #[test]
    fn rejects_non_json_and_untyped_lines() {
        assert!(matches!(
            ProtocolMessage::parse(b"not-json"),
            Err(ParseError::NotJson(_))
        ));
        assert!(matches!(
            ProtocolMessage::parse(br#"{"record":{}}"#),
            Err(ParseError::MissingType)
        ));
        assert!(matches!(
            ProtocolMessage::parse(br#"{"type":"HEARTBEAT"}"#),
            Err(ParseError::UnknownType(t)) if t == "HEARTBEAT"
        ));
    }

    #[test]
    fn state_payload_only_for_state_messages() {
        let msg = ProtocolMessage::parse(br#"{"type":"STATE","state":{"cursor":1}}"#).unwrap();
        assert_eq!(msg.state_payload(), Some(&serde_json::json!({"cursor": 1})));

        let rec = ProtocolMessage::parse(br#"{"type":"RECORD","state":{"x":1}}"#).unwrap();
        assert!(rec.state_payload().is_none());
    }

    #[test]
    fn connection_status_payload() {
        let msg = ProtocolMessage::parse(
            br#"{"type":"CONNECTION_STATUS","connectionStatus":{"status":"FAILED","message":"bad token"}}"#,
        )
        .unwrap();
        let status = msg.connection_status().unwrap();
        assert_eq!(status.status, ConnectionStatusKind::Failed);
        assert_eq!(status.message.as_deref(), Some("bad token"));
    }

    #[test]
    fn log_entry_defaults_level() {
        let msg = ProtocolMessage::parse(br#"{"type":"LOG","log":{"message":"hi"}}"#).unwrap();
        assert_eq!(msg.log_entry(), Some(("INFO", "hi")));
    }

    #[test]
    fn prefix_rewrites_stream_and_keeps_key_order() {
        let mut msg = ProtocolMessage::parse(
            br#"{"type":"RECORD","record":{"stream":"users","data":{"b":2,"a":1}}}"#,
        )
        .unwrap();
        assert!(msg.prefix_record_stream("crm_"));
        assert_eq!(
            String::from_utf8(msg.to_line()).unwrap(),
            r#"{"type":"RECORD","record":{"stream":"crm_users","data":{"b":2,"a":1}}}"#
        );
    }

    #[test]
    fn prefix_ignores_non_records() {
        let mut msg = ProtocolMessage::parse(br#"{"type":"STATE","state":{}}"#).unwrap();
        assert!(!msg.prefix_record_stream("x_"));
    }

    #[test]
    fn forwarded_types() {
        assert!(MessageType::Record.is_forwarded());
        assert!(MessageType::State.is_forwarded());
        assert!(MessageType::Trace.is_forwarded());
        assert!(!MessageType::Log.is_forwarded());
        assert!(!MessageType::Catalog.is_forwarded());
        assert!(!MessageType::ConnectionStatus.is_forwarded());
        assert!(!MessageType::Spec.is_forwarded());
    }
}
