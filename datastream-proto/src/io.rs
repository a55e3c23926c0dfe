//! Async framed reads and writes over a byte stream.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{DecodeError, record_length};
use crate::command::CommandFrame;
use crate::entry::{
    FIXED_SIZE_FILE_ENTRY, FIXED_SIZE_RESULT_ENTRY, FileEntry, HEADER_SIZE, HeaderEntry,
    PacketType, ResultEntry,
};

/// One inbound packet, classified by its leading tag.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::exhaustive_enums)]
pub enum Packet {
    /// Outcome of a command.
    Result(ResultEntry),
    /// Reply to a header query.
    Header(HeaderEntry),
    /// Entry pushed by an active stream.
    Data(FileEntry),
    /// Entry sent in reply to an entry or bookmark query.
    DataResponse(FileEntry),
    /// Tag the client does not recognize; nothing after it was consumed.
    Unknown(u8),
}

fn invalid(e: DecodeError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// Reads one packet: the type tag, then the record it announces.
///
/// Short reads and EOF surface as I/O errors; malformed records as
/// [`io::ErrorKind::InvalidData`] wrapping a [`DecodeError`].
pub async fn read_packet<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<Packet> {
    let tag = r.read_u8().await?;
    let Some(packet) = PacketType::from_tag(tag) else {
        return Ok(Packet::Unknown(tag));
    };
    match packet {
        PacketType::Result => {
            let buf = read_record(r, tag, FIXED_SIZE_RESULT_ENTRY).await?;
            ResultEntry::decode(&buf).map(Packet::Result).map_err(invalid)
        }
        PacketType::Header => {
            let mut buf = vec![0u8; HEADER_SIZE as usize];
            buf[0] = tag;
            r.read_exact(&mut buf[1..]).await?;
            HeaderEntry::decode(&buf).map(Packet::Header).map_err(invalid)
        }
        PacketType::Data => {
            let buf = read_record(r, tag, FIXED_SIZE_FILE_ENTRY).await?;
            FileEntry::decode(&buf).map(Packet::Data).map_err(invalid)
        }
        PacketType::DataResponse => {
            let buf = read_record(r, tag, FIXED_SIZE_FILE_ENTRY).await?;
            FileEntry::decode(&buf)
                .map(Packet::DataResponse)
                .map_err(invalid)
        }
    }
}

/// Reads the fixed prefix of a length-delimited record, then its
/// variable part. The returned buffer starts with `tag`.
async fn read_record<R: AsyncRead + Unpin>(r: &mut R, tag: u8, fixed: u32) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; fixed as usize];
    buf[0] = tag;
    r.read_exact(&mut buf[1..]).await?;
    let len = record_length(&buf, fixed).map_err(invalid)?;
    buf.resize(len as usize, 0);
    r.read_exact(&mut buf[fixed as usize..]).await?;
    Ok(buf)
}

/// Writes a full command frame and flushes.
pub async fn write_command<W: AsyncWrite + Unpin>(w: &mut W, frame: &CommandFrame) -> io::Result<()> {
    let buf = frame.encode()?;
    w.write_all(&buf).await?;
    w.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::read_command;
    use crate::entry::{Command, EntryType, ResultCode, StreamType};

    #[tokio::test]
    async fn reads_each_packet_kind() {
        let result = ResultEntry::new(ResultCode::OK, "");
        let header = HeaderEntry {
            total_entries: 5,
            ..HeaderEntry::default()
        };
        let data = FileEntry::new(4, EntryType(1), b"payload".to_vec());
        let rsp = FileEntry::new(2, EntryType(1), Vec::new());

        let mut wire = result.encode();
        wire.extend(header.encode());
        wire.extend(data.encode(PacketType::Data));
        wire.extend(rsp.encode(PacketType::DataResponse));
        wire.push(0x00);

        let mut r = wire.as_slice();
        assert_eq!(read_packet(&mut r).await.unwrap(), Packet::Result(result));
        assert_eq!(read_packet(&mut r).await.unwrap(), Packet::Header(header));
        assert_eq!(read_packet(&mut r).await.unwrap(), Packet::Data(data));
        assert_eq!(read_packet(&mut r).await.unwrap(), Packet::DataResponse(rsp));
        assert_eq!(read_packet(&mut r).await.unwrap(), Packet::Unknown(0));
        let eof = read_packet(&mut r).await.unwrap_err();
        assert_eq!(eof.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn truncated_payload_is_eof() {
        let wire = FileEntry::new(1, EntryType(1), vec![7; 32]).encode(PacketType::Data);
        let mut r = &wire[..wire.len() - 1];
        let err = read_packet(&mut r).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn malformed_length_is_invalid_data() {
        let mut wire = ResultEntry::new(ResultCode::OK, "").encode();
        wire[1..5].copy_from_slice(&3u32.to_be_bytes());
        let mut r = wire.as_slice();
        let err = read_packet(&mut r).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn command_roundtrip_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let frame = CommandFrame::new(Command::StartBookmark, StreamType(2), 0, b"bm-1");
        write_command(&mut client, &frame).await.unwrap();
        assert_eq!(read_command(&mut server).await.unwrap(), frame);
    }
}
