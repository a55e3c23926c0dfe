//! Processing callbacks for streamed entries.

use std::sync::Arc;

use datastream_proto::FileEntry;
use tracing::debug;

use crate::StreamClient;

/// Error returned by an [`EntryHandler`]. Any error stops the streaming
/// consumer.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Downstream publisher handed through to the entry handler untouched.
///
/// A relay server implements this to re-expose consumed entries to its own
/// clients.
pub trait Relay: Send + Sync {
    /// Publishes one consumed entry.
    fn publish(&self, entry: &FileEntry) -> Result<(), HandlerError>;
}

/// Processes each entry delivered by an active stream.
///
/// Runs on the consumer task, one entry at a time, in entry order. The
/// client's resume cursor already points past `entry` when this is called.
pub trait EntryHandler: Send + Sync {
    /// Handles one entry. Returning an error terminates stream consumption.
    fn process(
        &self,
        entry: &FileEntry,
        client: &StreamClient,
        relay: Option<&dyn Relay>,
    ) -> Result<(), HandlerError>;
}

impl<F> EntryHandler for F
where
    F: Fn(&FileEntry, &StreamClient, Option<&dyn Relay>) -> Result<(), HandlerError> + Send + Sync,
{
    fn process(
        &self,
        entry: &FileEntry,
        client: &StreamClient,
        relay: Option<&dyn Relay>,
    ) -> Result<(), HandlerError> {
        self(entry, client, relay)
    }
}

/// Default handler: logs each entry and never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEntry;

impl EntryHandler for LogEntry {
    fn process(
        &self,
        entry: &FileEntry,
        client: &StreamClient,
        _relay: Option<&dyn Relay>,
    ) -> Result<(), HandlerError> {
        debug!(
            client = %client.id(),
            entry = entry.number,
            length = entry.length,
            entry_type = %entry.entry_type,
            size = entry.data.len(),
            "data entry"
        );
        Ok(())
    }
}

/// Handler currently installed on a client, with its relay.
#[derive(Clone)]
pub(crate) struct HandlerSlot {
    /// Callback invoked per entry.
    pub(crate) handler: Arc<dyn EntryHandler>,
    /// Optional relay passed through to the callback.
    pub(crate) relay: Option<Arc<dyn Relay>>,
}

impl Default for HandlerSlot {
    fn default() -> Self {
        Self {
            handler: Arc::new(LogEntry),
            relay: None,
        }
    }
}

impl std::fmt::Debug for HandlerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSlot")
            .field("relay", &self.relay.is_some())
            .finish_non_exhaustive()
    }
}
