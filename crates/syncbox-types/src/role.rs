//! Connector role within a sync.

use serde::{Deserialize, Serialize};

/// Which side of a sync a connector spec or session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Extracts data and emits protocol messages on stdout.
    Source,
    /// Consumes protocol messages on stdin and loads them.
    Destination,
}

impl Role {
    /// Human-readable role name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Destination => "destination",
        }
    }

    /// Short tag used in generated file names and option keys (`src` / `dst`).
    #[must_use]
    pub fn short(self) -> &'static str {
        match self {
            Self::Source => "src",
            Self::Destination => "dst",
        }
    }

    /// Resolve an option-key prefix (`src` / `dst`) back to a role.
    #[must_use]
    pub fn from_short(tag: &str) -> Option<Self> {
        match tag {
            "src" => Some(Self::Source),
            "dst" => Some(Self::Destination),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_tags_roundtrip() {
        for role in [Role::Source, Role::Destination] {
            assert_eq!(Role::from_short(role.short()), Some(role));
        }
        assert_eq!(Role::from_short("source"), None);
    }

    #[test]
    fn role_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&Role::Destination).unwrap(),
            "\"destination\""
        );
    }
}
