//! Resumable client for the datastream entry-log protocol.
//!
//! A [`StreamClient`] keeps one TCP connection to a datastream server. It
//! issues request/response commands (start, stop, header, entry, bookmark)
//! and, once a stream is started, hands every pushed entry to an
//! [`EntryHandler`] in order. When the connection drops mid-stream the
//! client reconnects at a fixed interval and asks the server to resume from
//! the entry after the last one delivered.
//!
//! # Quick start
//!
//! ```no_run
//! use datastream::{FileEntry, HandlerError, Relay, StreamClient, StreamType};
//!
//! # async fn run() -> datastream::Result<()> {
//! let client = StreamClient::new("127.0.0.1:6900", StreamType::SEQUENCER);
//! client.set_handler(
//!     |entry: &FileEntry, _: &StreamClient, _: Option<&dyn Relay>| -> Result<(), HandlerError> {
//!         println!("entry {} ({} bytes)", entry.number, entry.data.len());
//!         Ok(())
//!     },
//! );
//! client.start().await?;
//! client.start_stream(0).await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod command;
mod config;
mod connection;
mod consumer;
mod dispatch;
mod error;
mod handler;
mod retry;

pub use client::StreamClient;
pub use command::Reply;
pub use config::{ClientConfig, QueueCapacity};
pub use datastream_proto::{
    Command, EntryType, FileEntry, HeaderEntry, ResultCode, ResultEntry, StreamType,
};
pub use error::{Error, Result};
pub use handler::{EntryHandler, HandlerError, LogEntry, Relay};
pub use retry::{DEFAULT_RECONNECT_INTERVAL, RetryPolicy};
