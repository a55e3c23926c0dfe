//! Streaming consumer task.

use datastream_proto::FileEntry;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::StreamClient;

impl StreamClient {
    /// Feeds streamed entries to the installed handler, in order.
    ///
    /// The resume cursor moves past each entry before its handler runs. A
    /// handler error ends the task for good; the dispatcher keeps running
    /// and later entries are discarded.
    pub(crate) async fn consume(self, mut entries: mpsc::Receiver<FileEntry>) {
        let _consuming = Consuming(&self);
        let mut shutdown = self.inner.shutdown.subscribe();

        loop {
            let entry = tokio::select! {
                e = entries.recv() => match e {
                    Some(e) => e,
                    None => break,
                },
                _ = shutdown.wait_for(|stop| *stop) => break,
            };
            self.state().next_entry = entry.number.saturating_add(1);

            let slot = self.handler_slot();
            if let Err(e) = slot.handler.process(&entry, &self, slot.relay.as_deref()) {
                error!(
                    client = %self.id(),
                    entry = entry.number,
                    error = %e,
                    "error processing entry, streaming consumer stopped"
                );
                break;
            }
        }

        debug!(client = %self.id(), "streaming consumer stopped");
    }
}

/// Clears the consuming flag when the consumer ends, including by a
/// panicking handler.
struct Consuming<'a>(&'a StreamClient);

impl Drop for Consuming<'_> {
    fn drop(&mut self) {
        self.0.state().consuming = false;
    }
}
