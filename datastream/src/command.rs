//! Command/response engine.
//!
//! A command is written to the socket as one frame. Unless deferred, the
//! caller then waits for the next result on the result queue and, for
//! queries, for the matching header or entry on its reply queue. Replies
//! carry no correlation id, so they pair up with commands by order alone.

use std::io;

use datastream_proto::{Command, CommandFrame, CommandParam, FileEntry, HeaderEntry};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::{Error, Result, StreamClient};

/// What a successful command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Reply {
    /// Control command acknowledged (Start, StartBookmark, Stop), or a
    /// deferred command sent.
    Done,
    /// Stream header.
    Header(HeaderEntry),
    /// Requested entry.
    Entry(FileEntry),
}

impl Reply {
    /// Unwraps a header reply.
    pub fn into_header(self) -> Result<HeaderEntry> {
        match self {
            Self::Header(h) => Ok(h),
            _ => Err(unexpected("header")),
        }
    }

    /// Unwraps an entry reply, as returned by Entry and Bookmark.
    pub fn into_entry(self) -> Result<FileEntry> {
        match self {
            Self::Entry(e) => Ok(e),
            _ => Err(unexpected("entry")),
        }
    }
}

/// Error for a reply that does not match its command.
fn unexpected(expected: &str) -> Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("unexpected response, expected {expected}"),
    )
    .into()
}

impl StreamClient {
    /// Executes a raw command.
    ///
    /// `from_entry` is used by Start and Entry, `from_bookmark` by
    /// StartBookmark and Bookmark. With `deferred` set, the result is not
    /// awaited: the call returns once the frame is written and the
    /// streaming flags are updated optimistically; the dispatcher picks up
    /// the result when it arrives.
    pub async fn execute(
        &self,
        opcode: u64,
        deferred: bool,
        from_entry: u64,
        from_bookmark: &[u8],
    ) -> Result<Reply> {
        if !self.is_started() {
            error!("execute command not allowed, client is not started");
            return Err(Error::NotAllowed);
        }
        let Ok(cmd) = Command::try_from(opcode) else {
            error!(client = %self.id(), command = opcode, "invalid command");
            return Err(Error::InvalidCommand(opcode));
        };
        let id = self.id();
        debug!(client = %id, command = %cmd, deferred, "executing command");

        let frame = CommandFrame::new(cmd, self.inner.stream_type, from_entry, from_bookmark);
        match &frame.param {
            CommandParam::Entry(n) => debug!(client = %id, entry = n, "command parameter"),
            CommandParam::Bookmark(b) => debug!(client = %id, bookmark = ?b, "command parameter"),
            CommandParam::None => {}
        }

        // A resume command is written by the connection manager before the
        // connection is published; everything else waits for it.
        if !deferred {
            self.wait_connected().await?;
        }
        self.send(&frame).await?;

        if !deferred {
            let r = recv(&self.inner.replies.results).await?;
            debug!(client = %id, code = %r.code, message = %r.message, command = %cmd, "result received");
            if !r.is_ok() {
                return Err(Error::ResultCommand {
                    code: r.code,
                    message: r.message,
                });
            }
        }

        match cmd {
            Command::Start => {
                let mut st = self.state();
                st.streaming = true;
                st.from_stream = from_entry;
                Ok(Reply::Done)
            }
            Command::StartBookmark => {
                self.state().streaming = true;
                Ok(Reply::Done)
            }
            Command::Stop => {
                self.state().streaming = false;
                Ok(Reply::Done)
            }
            Command::Header => {
                let h = recv(&self.inner.replies.headers).await?;
                debug!(
                    client = %id,
                    total_entries = h.total_entries,
                    total_length = h.total_length,
                    version = h.version,
                    system_id = h.system_id,
                    "header received"
                );
                self.state().total_entries = h.total_entries;
                Ok(Reply::Header(h))
            }
            Command::Entry => {
                let e = recv(&self.inner.replies.entries).await?;
                debug!(client = %id, entry = e.number, "entry received");
                if e.is_not_found() {
                    return Err(Error::EntryNotFound(from_entry));
                }
                Ok(Reply::Entry(e))
            }
            Command::Bookmark => {
                let e = recv(&self.inner.replies.entries).await?;
                debug!(client = %id, entry = e.number, "entry received");
                if e.is_not_found() {
                    return Err(Error::BookmarkNotFound);
                }
                Ok(Reply::Entry(e))
            }
        }
    }

    /// Writes a frame to the current connection.
    async fn send(&self, frame: &CommandFrame) -> Result<()> {
        let mut writer = self.inner.writer.lock().await;
        let Some(w) = writer.as_mut() else {
            error!(client = %self.id(), server = %self.inner.server, "no connection to send on");
            return Err(io::Error::from(io::ErrorKind::NotConnected).into());
        };
        datastream_proto::write_command(w, frame).await.map_err(|e| {
            error!(client = %self.id(), server = %self.inner.server, error = %e, "error sending to server");
            e.into()
        })
    }

    /// Waits until the connection manager has published a connection.
    async fn wait_connected(&self) -> Result<()> {
        let mut connected = self.inner.connected.subscribe();
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::select! {
            res = connected.wait_for(|up| *up) => res.map(drop).map_err(|_| Error::Shutdown),
            _ = shutdown.wait_for(|stop| *stop) => Err(Error::Shutdown),
        }
    }
}

/// Pops the next reply; the queue only closes when the dispatcher exits.
async fn recv<T>(queue: &AsyncMutex<mpsc::Receiver<T>>) -> Result<T> {
    queue.lock().await.recv().await.ok_or(Error::Shutdown)
}

#[cfg(test)]
mod tests {
    use datastream_proto::EntryType;

    use super::*;

    #[test]
    fn reply_unwraps_matching_variant() {
        let h = HeaderEntry {
            total_entries: 3,
            ..HeaderEntry::default()
        };
        assert_eq!(Reply::Header(h).into_header().unwrap(), h);

        let e = FileEntry::new(4, EntryType(1), b"x".to_vec());
        assert_eq!(Reply::Entry(e.clone()).into_entry().unwrap(), e);
    }

    #[test]
    fn mismatched_reply_is_invalid_data() {
        for res in [
            Reply::Done.into_header().map(drop),
            Reply::Done.into_entry().map(drop),
            Reply::Header(HeaderEntry::default()).into_entry().map(drop),
        ] {
            assert!(matches!(res, Err(Error::Io(e)) if e.kind() == io::ErrorKind::InvalidData));
        }
    }
}
