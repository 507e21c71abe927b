//! Inbound log event records, as produced by the external collector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse classification of a collected event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Connection,
    Auth,
    Error,
    #[serde(untagged)]
    Other(String),
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Connection => write!(f, "connection"),
            EventType::Auth => write!(f, "auth"),
            EventType::Error => write!(f, "error"),
            EventType::Other(s) => write!(f, "{}", s),
        }
    }
}

/// One timestamped event from the collector. Immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    /// MAC address or other stable source identity.
    pub identity: String,
    pub event_type: EventType,
    pub process: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_roundtrip() {
        let json = r#"{"timestamp":"2026-01-01T00:00:00Z","identity":"aa:bb:cc:dd:ee:ff","event_type":"connection","process":"sshd","message":"session opened"}"#;
        let ev: LogEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.event_type, EventType::Connection);

        let json = r#"{"timestamp":"2026-01-01T00:00:00Z","identity":"aa:bb:cc:dd:ee:ff","event_type":"dhcp","process":"dnsmasq","message":"lease"}"#;
        let ev: LogEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.event_type, EventType::Other("dhcp".to_string()));
        assert_eq!(ev.event_type.to_string(), "dhcp");
    }
}
