//! Packet dispatcher: the single reader of the socket.
//!
//! Each inbound packet is classified by its type tag and pushed onto one of
//! four bounded queues. Pushing waits when a queue is full, which stops
//! further socket reads; a slow consumer therefore throttles the server
//! rather than losing entries.

use std::io;

use datastream_proto::{FileEntry, HeaderEntry, Packet, ResultEntry};
use tokio::io::AsyncRead;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::StreamClient;
use crate::config::QueueCapacity;

/// Producer ends of the inbound queues, owned by the dispatcher.
#[derive(Debug)]
pub(crate) struct Queues {
    /// Command results.
    results: mpsc::Sender<ResultEntry>,
    /// Header replies.
    headers: mpsc::Sender<HeaderEntry>,
    /// Streamed entries.
    data: mpsc::Sender<FileEntry>,
    /// Entry and bookmark replies.
    entries: mpsc::Sender<FileEntry>,
}

/// Consumer ends of the reply queues, read by the command engine.
#[derive(Debug)]
pub(crate) struct Replies {
    /// Command results.
    pub(crate) results: AsyncMutex<mpsc::Receiver<ResultEntry>>,
    /// Header replies.
    pub(crate) headers: AsyncMutex<mpsc::Receiver<HeaderEntry>>,
    /// Entry and bookmark replies.
    pub(crate) entries: AsyncMutex<mpsc::Receiver<FileEntry>>,
}

/// Queue ends handed to the background tasks when the client starts.
#[derive(Debug)]
pub(crate) struct Wiring {
    /// Dispatcher side.
    pub(crate) queues: Queues,
    /// Consumer side of the streamed-entry queue.
    pub(crate) entries: mpsc::Receiver<FileEntry>,
}

impl Wiring {
    /// Creates all four queues with the given capacities.
    pub(crate) fn new(cap: &QueueCapacity) -> (Self, Replies) {
        let (results_tx, results_rx) = mpsc::channel(cap.results);
        let (headers_tx, headers_rx) = mpsc::channel(cap.headers);
        let (data_tx, data_rx) = mpsc::channel(cap.entries);
        let (entries_tx, entries_rx) = mpsc::channel(cap.entry_responses);
        let wiring = Self {
            queues: Queues {
                results: results_tx,
                headers: headers_tx,
                data: data_tx,
                entries: entries_tx,
            },
            entries: data_rx,
        };
        let replies = Replies {
            results: AsyncMutex::new(results_rx),
            headers: AsyncMutex::new(headers_rx),
            entries: AsyncMutex::new(entries_rx),
        };
        (wiring, replies)
    }
}

/// Why the current connection must be dropped.
#[derive(Debug, thiserror::Error)]
pub(crate) enum DispatchError {
    /// Read failure, EOF or malformed packet.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The server refused the stream resume sent after reconnecting.
    #[error("resume rejected with result {}: {}", .0.code, .0.message)]
    ResumeRejected(ResultEntry),

    /// A reply queue lost its reader; the client is gone.
    #[error("reply queue closed")]
    Closed,
}

impl Queues {
    /// Routes one packet to its queue.
    ///
    /// While `pending_resume` is set, the next result answers the resume
    /// command sent by the connection manager: it is consumed here instead
    /// of reaching a foreground caller.
    pub(crate) async fn route(
        &self,
        packet: Packet,
        pending_resume: &mut bool,
        client: &str,
    ) -> Result<(), DispatchError> {
        match packet {
            Packet::Result(r) => {
                if std::mem::take(pending_resume) {
                    debug!(client, code = %r.code, "deferred resume result received");
                    if !r.is_ok() {
                        return Err(DispatchError::ResumeRejected(r));
                    }
                    return Ok(());
                }
                self.results
                    .send(r)
                    .await
                    .map_err(|_| DispatchError::Closed)
            }
            Packet::DataResponse(e) => self
                .entries
                .send(e)
                .await
                .map_err(|_| DispatchError::Closed),
            Packet::Header(h) => self
                .headers
                .send(h)
                .await
                .map_err(|_| DispatchError::Closed),
            Packet::Data(e) => {
                if let Err(mpsc::error::SendError(e)) = self.data.send(e).await {
                    warn!(client, entry = e.number, "streaming consumer stopped, entry discarded");
                }
                Ok(())
            }
            Packet::Unknown(tag) => {
                warn!(client, tag, "unknown packet type");
                Ok(())
            }
        }
    }
}

/// Reads one packet from `reader` and routes it.
pub(crate) async fn pump<R: AsyncRead + Unpin>(
    reader: &mut R,
    queues: &Queues,
    pending_resume: &mut bool,
    client: &str,
) -> Result<(), DispatchError> {
    let packet = datastream_proto::read_packet(reader).await?;
    queues.route(packet, pending_resume, client).await
}

impl StreamClient {
    /// Dispatcher task. Runs until shutdown, reconnecting whenever the
    /// connection fails.
    pub(crate) async fn dispatch(self, reader: OwnedReadHalf, queues: Queues) {
        let mut shutdown = self.inner.shutdown.subscribe();
        let mut current = Some(reader);
        let mut pending_resume = false;

        loop {
            let mut reader = match current.take() {
                Some(r) => r,
                None => match self.connect().await {
                    Ok((r, deferred)) => {
                        pending_resume = deferred;
                        r
                    }
                    Err(_) => break,
                },
            };
            let id = self.id();

            let res = tokio::select! {
                res = pump(&mut reader, &queues, &mut pending_resume, &id) => res,
                _ = shutdown.wait_for(|stop| *stop) => break,
            };
            match res {
                Ok(()) => current = Some(reader),
                Err(DispatchError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(client = %id, "server closed connection");
                    drop(reader);
                    self.close().await;
                }
                Err(DispatchError::Io(e)) => {
                    error!(client = %id, error = %e, "error reading from server");
                    drop(reader);
                    self.close().await;
                }
                Err(DispatchError::ResumeRejected(r)) => {
                    error!(client = %id, code = %r.code, message = %r.message, "stream resume rejected");
                    drop(reader);
                    self.close().await;
                    pending_resume = false;
                    if self.inner.retry.pause(&mut shutdown).await.is_err() {
                        break;
                    }
                }
                Err(DispatchError::Closed) => break,
            }
        }

        self.close().await;
        info!(client = %self.id(), "dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use datastream_proto::{EntryType, PacketType, ResultCode};
    use tokio::io::AsyncWriteExt;

    use super::*;

    fn tiny() -> QueueCapacity {
        QueueCapacity {
            results: 1,
            headers: 1,
            entries: 1,
            entry_responses: 1,
        }
    }

    #[tokio::test]
    async fn routes_by_packet_type() {
        let (wiring, replies) = Wiring::new(&QueueCapacity::default());
        let Wiring {
            queues,
            entries: mut data_rx,
        } = wiring;
        let mut pending = false;

        let result = ResultEntry::new(ResultCode::OK, "");
        let header = HeaderEntry::default();
        let data = FileEntry::new(1, EntryType(1), b"d".to_vec());
        let rsp = FileEntry::new(2, EntryType(1), b"r".to_vec());

        for p in [
            Packet::Result(result.clone()),
            Packet::Header(header),
            Packet::Data(data.clone()),
            Packet::DataResponse(rsp.clone()),
            Packet::Unknown(0x42),
        ] {
            queues.route(p, &mut pending, "test").await.unwrap();
        }

        assert_eq!(replies.results.lock().await.recv().await, Some(result));
        assert_eq!(replies.headers.lock().await.recv().await, Some(header));
        assert_eq!(replies.entries.lock().await.recv().await, Some(rsp));
        assert_eq!(data_rx.recv().await, Some(data));
        assert!(data_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn pending_resume_swallows_first_result() {
        let (wiring, replies) = Wiring::new(&QueueCapacity::default());
        let mut pending = true;

        let ok = Packet::Result(ResultEntry::new(ResultCode::OK, ""));
        wiring.queues.route(ok.clone(), &mut pending, "t").await.unwrap();
        assert!(!pending);
        assert!(replies.results.lock().await.try_recv().is_err());

        wiring.queues.route(ok, &mut pending, "t").await.unwrap();
        assert!(replies.results.lock().await.try_recv().is_ok());
    }

    #[tokio::test]
    async fn rejected_resume_is_reported() {
        let (wiring, replies) = Wiring::new(&QueueCapacity::default());
        let mut pending = true;

        let bad = Packet::Result(ResultEntry::new(ResultCode::BAD_FROM_ENTRY, "too far"));
        let err = wiring.queues.route(bad, &mut pending, "t").await.unwrap_err();
        assert!(matches!(err, DispatchError::ResumeRejected(r) if r.code == ResultCode::BAD_FROM_ENTRY));
        assert!(replies.results.lock().await.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_data_queue_blocks_instead_of_dropping() {
        let (wiring, _replies) = Wiring::new(&tiny());
        let Wiring {
            queues,
            entries: mut data_rx,
        } = wiring;
        let (mut server, mut client) = tokio::io::duplex(4096);

        for n in 0..3 {
            let e = FileEntry::new(n, EntryType(1), vec![n as u8; 8]);
            server.write_all(&e.encode(PacketType::Data)).await.unwrap();
        }

        let reader = tokio::spawn(async move {
            let mut pending = false;
            for _ in 0..3 {
                pump(&mut client, &queues, &mut pending, "t").await.unwrap();
            }
        });

        // First entry fills the queue; the second read stalls on push.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reader.is_finished());

        let mut got = Vec::new();
        while got.len() < 3 {
            let e = tokio::time::timeout(Duration::from_secs(5), data_rx.recv())
                .await
                .unwrap()
                .unwrap();
            got.push(e.number);
        }
        assert_eq!(got, vec![0, 1, 2]);
        tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn stopped_consumer_does_not_stall_dispatch() {
        let (wiring, _replies) = Wiring::new(&tiny());
        let Wiring { queues, entries } = wiring;
        drop(entries);

        let mut pending = false;
        for n in 0..3 {
            let p = Packet::Data(FileEntry::new(n, EntryType(1), Vec::new()));
            queues.route(p, &mut pending, "t").await.unwrap();
        }
    }

    #[tokio::test]
    async fn malformed_packet_is_io_error() {
        let (wiring, _replies) = Wiring::new(&tiny());
        let mut wire = FileEntry::new(1, EntryType(1), Vec::new()).encode(PacketType::Data);
        wire[1..5].copy_from_slice(&1u32.to_be_bytes());
        let mut r = wire.as_slice();
        let mut pending = false;
        let err = pump(&mut r, &wiring.queues, &mut pending, "t").await.unwrap_err();
        assert!(matches!(err, DispatchError::Io(e) if e.kind() == io::ErrorKind::InvalidData));
    }
}
