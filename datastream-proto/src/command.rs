//! Outbound command frames.
//!
//! ```text
//! [opcode u64][stream_type u64][params]
//! params: Start / Entry                -> [entry u64]
//!         StartBookmark / Bookmark     -> [len u32][bookmark bytes]
//!         Stop / Header                -> (none)
//! ```

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::MAX_RECORD_LEN;
use crate::entry::{Command, StreamType};

/// Parameter carried by a command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::exhaustive_enums)]
pub enum CommandParam {
    /// No parameter (Stop, Header).
    None,
    /// Entry number (Start, Entry).
    Entry(u64),
    /// Raw bookmark bytes (StartBookmark, Bookmark).
    Bookmark(Vec<u8>),
}

/// A complete command as written to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// Command opcode.
    pub command: Command,
    /// Stream namespace the command targets.
    pub stream_type: StreamType,
    /// Command-specific parameter.
    pub param: CommandParam,
}

impl CommandFrame {
    /// Builds a frame, picking whichever of `entry` or `bookmark` the
    /// command carries.
    pub fn new(command: Command, stream_type: StreamType, entry: u64, bookmark: &[u8]) -> Self {
        let param = match command {
            Command::Start | Command::Entry => CommandParam::Entry(entry),
            Command::StartBookmark | Command::Bookmark => CommandParam::Bookmark(bookmark.to_vec()),
            Command::Stop | Command::Header => CommandParam::None,
        };
        Self {
            command,
            stream_type,
            param,
        }
    }

    /// Serializes the frame.
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(24);
        buf.extend_from_slice(&self.command.opcode().to_be_bytes());
        buf.extend_from_slice(&self.stream_type.0.to_be_bytes());
        match &self.param {
            CommandParam::None => {}
            CommandParam::Entry(n) => buf.extend_from_slice(&n.to_be_bytes()),
            CommandParam::Bookmark(b) => {
                let len = u32::try_from(b.len()).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidInput, "bookmark exceeds u32::MAX")
                })?;
                buf.extend_from_slice(&len.to_be_bytes());
                buf.extend_from_slice(b);
            }
        }
        Ok(buf)
    }
}

/// Reads one command frame, as a server would.
pub async fn read_command<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<CommandFrame> {
    let opcode = r.read_u64().await?;
    let command = Command::try_from(opcode).map_err(|op| {
        io::Error::new(io::ErrorKind::InvalidData, format!("invalid command {op}"))
    })?;
    let stream_type = StreamType(r.read_u64().await?);
    let param = match command {
        Command::Start | Command::Entry => CommandParam::Entry(r.read_u64().await?),
        Command::StartBookmark | Command::Bookmark => {
            let len = r.read_u32().await?;
            if len > MAX_RECORD_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "bookmark exceeds 256 MiB limit",
                ));
            }
            let mut bookmark = vec![0u8; len as usize];
            r.read_exact(&mut bookmark).await?;
            CommandParam::Bookmark(bookmark)
        }
        Command::Stop | Command::Header => CommandParam::None,
    };
    Ok(CommandFrame {
        command,
        stream_type,
        param,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_frame_layout() {
        let frame = CommandFrame::new(Command::Start, StreamType::SEQUENCER, 42, b"ignored");
        let buf = frame.encode().unwrap();
        assert_eq!(buf.len(), 24);
        assert_eq!(&buf[..8], &1u64.to_be_bytes());
        assert_eq!(&buf[8..16], &1u64.to_be_bytes());
        assert_eq!(&buf[16..], &42u64.to_be_bytes());
    }

    #[test]
    fn header_frame_has_no_params() {
        let frame = CommandFrame::new(Command::Header, StreamType(9), 42, b"x");
        assert_eq!(frame.param, CommandParam::None);
        assert_eq!(frame.encode().unwrap().len(), 16);
    }

    #[tokio::test]
    async fn peer_reads_bookmark_frame() {
        let frame = CommandFrame::new(Command::Bookmark, StreamType(7), 0, &[0xAA, 0xBB, 0xCC]);
        let buf = frame.encode().unwrap();
        assert_eq!(&buf[16..20], &3u32.to_be_bytes());

        let mut cursor = io::Cursor::new(buf);
        let decoded = read_command(&mut cursor).await.unwrap();
        assert_eq!(decoded, frame);
    }

    #[tokio::test]
    async fn peer_rejects_unknown_opcode() {
        let mut buf = 99u64.to_be_bytes().to_vec();
        buf.extend_from_slice(&1u64.to_be_bytes());
        let mut cursor = io::Cursor::new(buf);
        let err = read_command(&mut cursor).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
