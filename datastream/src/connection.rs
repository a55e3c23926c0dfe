//! Connection manager: connect, resume, close.

use datastream_proto::Command;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tracing::{error, info};

use crate::{Error, Result, StreamClient};

impl StreamClient {
    /// Opens a connection, retrying at the policy interval until it succeeds.
    ///
    /// If a stream was active, a Start from the resume cursor is sent before
    /// the connection is published, without waiting for its result. Returns
    /// the read half and whether that deferred result is still outstanding.
    /// Fails only with [`Error::Shutdown`].
    pub(crate) async fn connect(&self) -> Result<(OwnedReadHalf, bool)> {
        let server = self.inner.server.as_str();
        let mut shutdown = self.inner.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                return Err(Error::Shutdown);
            }
            let attempt = tokio::select! {
                res = TcpStream::connect(server) => res,
                _ = shutdown.wait_for(|stop| *stop) => return Err(Error::Shutdown),
            };
            let stream = match attempt {
                Ok(s) => s,
                Err(e) => {
                    error!(server, error = %e, "error connecting to server");
                    self.inner.retry.pause(&mut shutdown).await?;
                    continue;
                }
            };

            let id = stream
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_default();
            let (reader, writer) = stream.into_split();
            *self.inner.writer.lock().await = Some(writer);
            let (streaming, next_entry) = {
                let mut st = self.state();
                st.id.clone_from(&id);
                (st.streaming, st.next_entry)
            };
            info!(client = %id, server, "connected to server");

            if !streaming {
                self.inner.connected.send_replace(true);
                return Ok((reader, false));
            }

            match self
                .execute(Command::Start.into(), true, next_entry, &[])
                .await
            {
                Ok(_) => {
                    info!(client = %id, entry = next_entry, "stream resume requested");
                    self.inner.connected.send_replace(true);
                    return Ok((reader, true));
                }
                Err(e) => {
                    error!(client = %id, error = %e, "error restoring streaming");
                    drop(reader);
                    self.close().await;
                    self.inner.retry.pause(&mut shutdown).await?;
                }
            }
        }
    }

    /// Drops the socket and clears the connected flag. Safe to call when
    /// already closed.
    pub(crate) async fn close(&self) {
        if self.inner.writer.lock().await.take().is_some() {
            info!(client = %self.id(), "close connection");
        }
        self.inner.connected.send_replace(false);
    }
}
