//! Client facade: construction, activation, command wrappers and accessors.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use datastream_proto::{Command, FileEntry, HeaderEntry, StreamType};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tracing::debug;

use crate::config::ClientConfig;
use crate::dispatch::{Replies, Wiring};
use crate::handler::{EntryHandler, HandlerSlot, LogEntry, Relay};
use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// Flags and cursors shared by the facade, dispatcher and consumer.
#[derive(Debug, Default)]
pub(crate) struct State {
    /// Local socket address of the current connection.
    pub(crate) id: String,
    /// Set once [`StreamClient::start`] has succeeded.
    pub(crate) started: bool,
    /// A start command is in effect.
    pub(crate) streaming: bool,
    /// Consumer task is alive.
    pub(crate) consuming: bool,
    /// Entry requested by the latest start command.
    pub(crate) from_stream: u64,
    /// Total entries reported by the latest header query.
    pub(crate) total_entries: u64,
    /// Resume cursor: next entry expected from the live stream.
    pub(crate) next_entry: u64,
}

/// Shared client internals.
pub(crate) struct Inner {
    /// Server address (`host:port`).
    pub(crate) server: String,
    /// Stream namespace sent with every command.
    pub(crate) stream_type: StreamType,
    /// Reconnect pacing.
    pub(crate) retry: RetryPolicy,
    /// Flags and cursors.
    pub(crate) state: Mutex<State>,
    /// Whether a socket is open and any resume command has been sent.
    pub(crate) connected: watch::Sender<bool>,
    /// Write half of the current socket.
    pub(crate) writer: AsyncMutex<Option<OwnedWriteHalf>>,
    /// Receiving ends of the reply queues.
    pub(crate) replies: Replies,
    /// Dispatcher and consumer ends of the queues, taken by `start`.
    pub(crate) wiring: Mutex<Option<Wiring>>,
    /// Installed processing callback.
    pub(crate) handler: Mutex<HandlerSlot>,
    /// Set to `true` to stop all background work.
    pub(crate) shutdown: watch::Sender<bool>,
}

/// Client for a datastream server.
///
/// One client owns one TCP connection. After [`start`](Self::start) a
/// dispatcher task reads every inbound packet and a consumer task feeds
/// streamed entries to the installed [`EntryHandler`]. Both run until
/// [`shutdown`](Self::shutdown). If the connection drops while a stream is
/// active, the client reconnects and resumes from [`next_entry`](Self::next_entry).
///
/// Commands must not be issued concurrently: at most one command may be in
/// flight at a time, since replies are matched to commands by arrival order.
///
/// # Example
///
/// ```no_run
/// use datastream::{StreamClient, StreamType};
///
/// # async fn run() -> datastream::Result<()> {
/// let client = StreamClient::new("127.0.0.1:6900", StreamType::SEQUENCER);
/// client.start().await?;
/// let header = client.header().await?;
/// client.start_stream(header.total_entries.saturating_sub(10)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct StreamClient {
    /// Shared state.
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("server", &self.inner.server)
            .field("stream_type", &self.inner.stream_type)
            .field("state", &*self.state())
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Creates a client for `server` with default settings.
    pub fn new(server: impl Into<String>, stream_type: StreamType) -> Self {
        Self::build(ClientConfig::new(server, stream_type))
    }

    /// Creates a client from a validated config.
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: ClientConfig) -> Self {
        let (wiring, replies) = Wiring::new(&config.queues);
        let inner = Inner {
            stream_type: config.stream_type(),
            retry: config.retry_policy(),
            server: config.server,
            state: Mutex::new(State::default()),
            connected: watch::Sender::new(false),
            writer: AsyncMutex::new(None),
            replies,
            wiring: Mutex::new(Some(wiring)),
            handler: Mutex::new(HandlerSlot::default()),
            shutdown: watch::Sender::new(false),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Connects to the server and launches the dispatcher and consumer tasks.
    ///
    /// Blocks until the first connection succeeds, retrying at the
    /// configured interval. Calling it again after success is a no-op.
    pub async fn start(&self) -> Result<()> {
        let Some(wiring) = lock(&self.inner.wiring).take() else {
            return Ok(());
        };
        let reader = match self.connect().await {
            Ok((reader, _)) => reader,
            Err(e) => {
                *lock(&self.inner.wiring) = Some(wiring);
                return Err(e);
            }
        };
        {
            let mut st = self.state();
            st.started = true;
            st.consuming = true;
        }
        let Wiring { queues, entries } = wiring;
        tokio::spawn(self.clone().dispatch(reader, queues));
        tokio::spawn(self.clone().consume(entries));
        debug!(client = %self.id(), "client started");
        Ok(())
    }

    /// Stops the dispatcher, consumer and any pending reconnect, and closes
    /// the connection. Commands waiting for a reply fail with
    /// [`Error::Shutdown`].
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }

    /// Starts streaming from entry `from_entry`.
    pub async fn start_stream(&self, from_entry: u64) -> Result<()> {
        self.execute(Command::Start.into(), false, from_entry, &[]).await.map(drop)
    }

    /// Starts streaming from the entry a bookmark points to.
    pub async fn start_stream_at_bookmark(&self, bookmark: &[u8]) -> Result<()> {
        self.execute(Command::StartBookmark.into(), false, 0, bookmark)
            .await
            .map(drop)
    }

    /// Stops the active stream.
    pub async fn stop_stream(&self) -> Result<()> {
        self.execute(Command::Stop.into(), false, 0, &[]).await.map(drop)
    }

    /// Queries the stream header and records its total entry count.
    pub async fn header(&self) -> Result<HeaderEntry> {
        self.execute(Command::Header.into(), false, 0, &[])
            .await?
            .into_header()
    }

    /// Fetches a single entry by number.
    pub async fn entry(&self, number: u64) -> Result<FileEntry> {
        self.execute(Command::Entry.into(), false, number, &[])
            .await?
            .into_entry()
    }

    /// Fetches the entry a bookmark points to.
    pub async fn bookmark(&self, bookmark: &[u8]) -> Result<FileEntry> {
        self.execute(Command::Bookmark.into(), false, 0, bookmark)
            .await?
            .into_entry()
    }

    /// Installs a processing callback and clears the relay.
    pub fn set_handler(&self, handler: impl EntryHandler + 'static) {
        *lock(&self.inner.handler) = HandlerSlot {
            handler: Arc::new(handler),
            relay: None,
        };
    }

    /// Installs a processing callback together with the relay it receives.
    pub fn set_handler_with_relay(
        &self,
        handler: impl EntryHandler + 'static,
        relay: Arc<dyn Relay>,
    ) {
        *lock(&self.inner.handler) = HandlerSlot {
            handler: Arc::new(handler),
            relay: Some(relay),
        };
    }

    /// Restores the default logging handler, keeping the current relay.
    pub fn reset_handler(&self) {
        lock(&self.inner.handler).handler = Arc::new(LogEntry);
    }

    /// Client identity: the local socket address of the latest connection.
    pub fn id(&self) -> String {
        self.state().id.clone()
    }

    /// Server address.
    pub fn server(&self) -> &str {
        &self.inner.server
    }

    /// Stream namespace requested by this client.
    pub fn stream_type(&self) -> StreamType {
        self.inner.stream_type
    }

    /// Whether [`start`](Self::start) has succeeded.
    pub fn is_started(&self) -> bool {
        self.state().started
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// Whether a start command is in effect.
    pub fn is_streaming(&self) -> bool {
        self.state().streaming
    }

    /// Whether the consumer task is still delivering entries. Turns false
    /// after a handler error or shutdown.
    pub fn is_consuming(&self) -> bool {
        self.state().consuming
    }

    /// Entry number requested by the latest start command.
    pub fn from_stream(&self) -> u64 {
        self.state().from_stream
    }

    /// Total entries reported by the latest header query.
    pub fn total_entries(&self) -> u64 {
        self.state().total_entries
    }

    /// Resume cursor: the next entry expected from the live stream.
    pub fn next_entry(&self) -> u64 {
        self.state().next_entry
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.inner.state)
    }

    pub(crate) fn handler_slot(&self) -> HandlerSlot {
        lock(&self.inner.handler).clone()
    }
}

/// Locks a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commands_before_start_are_not_allowed() {
        let client = StreamClient::new("127.0.0.1:1", StreamType::SEQUENCER);
        assert!(!client.is_started());
        assert!(matches!(client.header().await, Err(Error::NotAllowed)));
        assert!(matches!(client.start_stream(0).await, Err(Error::NotAllowed)));
        assert!(matches!(client.execute(42, false, 0, &[]).await, Err(Error::NotAllowed)));
        assert!(!client.is_streaming());
        assert!(!client.is_connected());
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = ClientConfig::new("127.0.0.1:1", StreamType::SEQUENCER);
        config.queues.results = 0;
        assert!(matches!(StreamClient::with_config(config), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn start_gives_up_on_shutdown() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = ClientConfig::new(addr.to_string(), StreamType::SEQUENCER);
        config.reconnect_interval_ms = 3_600_000;
        let client = StreamClient::with_config(config).unwrap();

        let starter = client.clone();
        let task = tokio::spawn(async move { starter.start().await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        client.shutdown();

        let res = tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(res, Err(Error::Shutdown)));
        assert!(!client.is_started());
    }
}
