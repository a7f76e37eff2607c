//! Per-line classification, filtering, and state capture.

use serde_json::Value;
use syncbox_types::{MessageType, ProtocolMessage, Role};

/// Counters for one processed stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub lines_seen: u64,
    pub lines_forwarded: u64,
    pub records_forwarded: u64,
    pub states_captured: u64,
    pub lines_dropped: u64,
}

/// Decides, line by line, what a connector's output turns into.
#[derive(Debug)]
pub struct StreamProcessor {
    role: Role,
    raw: bool,
    forward_state: bool,
    stream_prefix: Option<String>,
    last_state: Option<Value>,
    stats: StreamStats,
}

impl StreamProcessor {
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            role,
            raw: false,
            forward_state: true,
            stream_prefix: None,
            last_state: None,
            stats: StreamStats::default(),
        }
    }

    /// Forward every line byte-for-byte instead of filtering by type.
    #[must_use]
    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    #[must_use]
    pub fn is_raw(&self) -> bool {
        self.raw
    }

    /// Whether `STATE` lines are forwarded as well as captured. Only a
    /// destination consumes them; source-only output omits them.
    #[must_use]
    pub fn forward_state(mut self, forward: bool) -> Self {
        self.forward_state = forward;
        self
    }

    /// Prefix prepended to `record.stream` of forwarded records.
    #[must_use]
    pub fn stream_prefix(mut self, prefix: Option<String>) -> Self {
        self.stream_prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    /// Handle one framed line; returns the bytes to forward, if any.
    pub fn process_line(&mut self, line: &[u8]) -> Option<Vec<u8>> {
        self.stats.lines_seen += 1;

        let parsed = ProtocolMessage::parse(line);
        if let Ok(msg) = &parsed {
            if let Some(state) = msg.state_payload() {
                self.last_state = Some(state.clone());
                self.stats.states_captured += 1;
            }
        }

        if self.raw {
            if matches!(&parsed, Ok(msg) if msg.kind == MessageType::Record) {
                self.stats.records_forwarded += 1;
            }
            self.stats.lines_forwarded += 1;
            return Some(line.to_vec());
        }

        let mut msg = match parsed {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(
                    connector = self.role.as_str(),
                    error = %e,
                    line = %String::from_utf8_lossy(line),
                    "Dropping non-protocol line"
                );
                self.stats.lines_dropped += 1;
                return None;
            }
        };

        match msg.kind {
            MessageType::Log => {
                self.emit_log(&msg);
                None
            }
            MessageType::State if !self.forward_state => None,
            kind if kind.is_forwarded() => {
                self.stats.lines_forwarded += 1;
                if kind != MessageType::Record {
                    return Some(line.to_vec());
                }
                self.stats.records_forwarded += 1;
                match &self.stream_prefix {
                    Some(prefix) if msg.prefix_record_stream(prefix) => Some(msg.to_line()),
                    _ => Some(line.to_vec()),
                }
            }
            kind => {
                tracing::debug!(
                    connector = self.role.as_str(),
                    kind = %kind,
                    "Consumed control message"
                );
                None
            }
        }
    }

    fn emit_log(&self, msg: &ProtocolMessage) {
        let Some((level, message)) = msg.log_entry() else {
            return;
        };
        let connector = self.role.as_str();
        match level.to_ascii_uppercase().as_str() {
            "FATAL" | "ERROR" => tracing::error!(connector, "{message}"),
            "WARN" | "WARNING" => tracing::warn!(connector, "{message}"),
            "DEBUG" => tracing::debug!(connector, "{message}"),
            "TRACE" => tracing::trace!(connector, "{message}"),
            _ => tracing::info!(connector, "{message}"),
        }
    }

    /// Last `STATE.state` payload seen, if any; clears it.
    pub fn take_captured_state(&mut self) -> Option<Value> {
        self.last_state.take()
    }

    #[must_use]
    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }
}
