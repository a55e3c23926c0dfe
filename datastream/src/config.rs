//! Client configuration and JSON persistence.

use std::path::Path;
use std::time::Duration;
use std::{fs, io};

use datastream_proto::StreamType;
use serde::{Deserialize, Serialize};

use crate::retry::{DEFAULT_RECONNECT_INTERVAL, RetryPolicy};
use crate::{Error, Result};

/// Capacities of the four inbound queues filled by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueCapacity {
    /// Command results.
    pub results: usize,
    /// Header query replies.
    pub headers: usize,
    /// Streamed data entries. A full queue stalls socket reads.
    pub entries: usize,
    /// Entry and bookmark query replies.
    pub entry_responses: usize,
}

impl Default for QueueCapacity {
    fn default() -> Self {
        Self {
            results: 32,
            headers: 32,
            entries: 128,
            entry_responses: 32,
        }
    }
}

/// Settings for a [`StreamClient`](crate::StreamClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address (`host:port`).
    pub server: String,
    /// Stream namespace tag sent with every command.
    pub stream_type: u64,
    /// Delay between reconnect attempts, in milliseconds.
    pub reconnect_interval_ms: u64,
    /// Inbound queue capacities.
    pub queues: QueueCapacity,
}

impl Default for ClientConfig {
    #[allow(clippy::cast_possible_truncation)]
    fn default() -> Self {
        Self {
            server: "127.0.0.1:6900".to_owned(),
            stream_type: StreamType::SEQUENCER.0,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL.as_millis() as u64,
            queues: QueueCapacity::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a config for `server` with default settings otherwise.
    pub fn new(server: impl Into<String>, stream_type: StreamType) -> Self {
        Self {
            server: server.into(),
            stream_type: stream_type.0,
            ..Self::default()
        }
    }

    /// Loads a config from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let config: Self =
            serde_json::from_str(&data).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Persists the config as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)?;
        Ok(())
    }

    /// Rejects an empty server address and zero-capacity queues.
    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            return Err(Error::Config("server address is empty".into()));
        }
        let q = &self.queues;
        if q.results == 0 || q.headers == 0 || q.entries == 0 || q.entry_responses == 0 {
            return Err(Error::Config("queue capacities must be non-zero".into()));
        }
        Ok(())
    }

    /// Stream type as a protocol value.
    pub const fn stream_type(&self) -> StreamType {
        StreamType(self.stream_type)
    }

    /// Retry policy derived from `reconnect_interval_ms`.
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(self.reconnect_interval_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_baseline() {
        let c = ClientConfig::default();
        assert_eq!(c.stream_type(), StreamType::SEQUENCER);
        assert_eq!(c.retry_policy().interval, Duration::from_secs(5));
        assert_eq!(c.queues.entries, 128);
        assert_eq!(c.queues.results, 32);
    }

    #[test]
    fn load_fills_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        fs::write(
            &path,
            r#"{ "server": "10.0.0.2:7000", "queues": { "entries": 4 } }"#,
        )
        .unwrap();

        let c = ClientConfig::load(&path).unwrap();
        assert_eq!(c.server, "10.0.0.2:7000");
        assert_eq!(c.queues.entries, 4);
        assert_eq!(c.queues.headers, 32);
        assert_eq!(c.reconnect_interval_ms, 5000);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        let mut c = ClientConfig::new("stream.local:6900", StreamType(2));
        c.reconnect_interval_ms = 250;
        c.save(&path).unwrap();
        assert_eq!(ClientConfig::load(&path).unwrap(), c);
    }

    #[test]
    fn rejects_invalid_values() {
        let mut c = ClientConfig::new("  ", StreamType::SEQUENCER);
        assert!(matches!(c.validate(), Err(Error::Config(_))));

        c.server = "127.0.0.1:1".into();
        c.queues.entries = 0;
        assert!(matches!(c.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn malformed_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ClientConfig::load(&path), Err(Error::Config(_))));
    }
}
