//! Byte-level encoding of header, data and result records.
//!
//! Every buffer handled here starts with the packet type tag, exactly as it
//! appears on the wire. Integers are big-endian.
//!
//! ```text
//! data:   [tag u8][length u32][type u32][number u64][payload ...]
//! result: [tag u8][length u32][code u32][message ...]
//! header: [tag u8][length u32][version u8][system_id u64][stream_type u64]
//!         [total_length u64][total_entries u64]
//! ```

use crate::entry::{
    EntryType, FIXED_SIZE_FILE_ENTRY, FIXED_SIZE_RESULT_ENTRY, FileEntry, HEADER_SIZE,
    HeaderEntry, PacketType, ResultCode, ResultEntry, StreamType,
};

/// Largest framed record accepted from the wire (256 MiB).
pub const MAX_RECORD_LEN: u32 = 256 * 1024 * 1024;

/// Errors produced while decoding a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The buffer is shorter than the fixed part of the record.
    #[error("record too short: {len} bytes, need at least {min}")]
    TooShort {
        /// Bytes available.
        len: usize,
        /// Bytes required.
        min: usize,
    },

    /// The leading tag does not belong to the record being decoded.
    #[error("unexpected packet type {0:#04x}")]
    PacketType(u8),

    /// The length field is smaller than the fixed part of the record.
    #[error("declared length {declared} below fixed size {fixed}")]
    LengthTooSmall {
        /// Length read from the record.
        declared: u32,
        /// Fixed size of the record kind.
        fixed: u32,
    },

    /// The length field exceeds [`MAX_RECORD_LEN`].
    #[error("declared length {0} exceeds 256 MiB limit")]
    TooLarge(u32),

    /// The length field disagrees with the number of bytes supplied.
    #[error("declared length {declared} does not match buffer length {actual}")]
    LengthMismatch {
        /// Length read from the record.
        declared: u32,
        /// Actual buffer length.
        actual: usize,
    },
}

/// Reads the big-endian length field at offset 1 and checks it against the
/// record kind's fixed size.
pub(crate) fn record_length(prefix: &[u8], fixed: u32) -> Result<u32, DecodeError> {
    let declared = be_u32(prefix, 1);
    if declared < fixed {
        return Err(DecodeError::LengthTooSmall { declared, fixed });
    }
    if declared > MAX_RECORD_LEN {
        return Err(DecodeError::TooLarge(declared));
    }
    Ok(declared)
}

/// Checks minimum size, tag set and length field of a complete record.
fn check_record(buf: &[u8], fixed: u32, tags: &[PacketType]) -> Result<(), DecodeError> {
    if buf.len() < fixed as usize {
        return Err(DecodeError::TooShort {
            len: buf.len(),
            min: fixed as usize,
        });
    }
    if !tags.iter().any(|t| t.tag() == buf[0]) {
        return Err(DecodeError::PacketType(buf[0]));
    }
    let declared = record_length(buf, fixed)?;
    if declared as usize != buf.len() {
        return Err(DecodeError::LengthMismatch {
            declared,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn be_u32(buf: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    u32::from_be_bytes(b)
}

fn be_u64(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_be_bytes(b)
}

impl FileEntry {
    /// Encodes the entry as a data or data-response record.
    pub fn encode(&self, packet: PacketType) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FIXED_SIZE_FILE_ENTRY as usize + self.data.len());
        buf.push(packet.tag());
        buf.extend_from_slice(&self.length.to_be_bytes());
        buf.extend_from_slice(&self.entry_type.0.to_be_bytes());
        buf.extend_from_slice(&self.number.to_be_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Decodes a data or data-response record.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        check_record(
            buf,
            FIXED_SIZE_FILE_ENTRY,
            &[PacketType::Data, PacketType::DataResponse],
        )?;
        Ok(Self {
            length: be_u32(buf, 1),
            entry_type: EntryType(be_u32(buf, 5)),
            number: be_u64(buf, 9),
            data: buf[FIXED_SIZE_FILE_ENTRY as usize..].to_vec(),
        })
    }
}

impl ResultEntry {
    /// Encodes the result record.
    pub fn encode(&self) -> Vec<u8> {
        let msg = self.message.as_bytes();
        let len = u32::try_from(msg.len())
            .ok()
            .and_then(|n| n.checked_add(FIXED_SIZE_RESULT_ENTRY))
            .unwrap_or(u32::MAX);
        let mut buf = Vec::with_capacity(len as usize);
        buf.push(PacketType::Result.tag());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&self.code.0.to_be_bytes());
        buf.extend_from_slice(msg);
        buf
    }

    /// Decodes a result record.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        check_record(buf, FIXED_SIZE_RESULT_ENTRY, &[PacketType::Result])?;
        let message = String::from_utf8_lossy(&buf[FIXED_SIZE_RESULT_ENTRY as usize..]);
        Ok(Self {
            code: ResultCode(be_u32(buf, 5)),
            message: message.into_owned(),
        })
    }
}

impl HeaderEntry {
    /// Encodes the header record.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE as usize);
        buf.push(PacketType::Header.tag());
        buf.extend_from_slice(&HEADER_SIZE.to_be_bytes());
        buf.push(self.version);
        buf.extend_from_slice(&self.system_id.to_be_bytes());
        buf.extend_from_slice(&self.stream_type.0.to_be_bytes());
        buf.extend_from_slice(&self.total_length.to_be_bytes());
        buf.extend_from_slice(&self.total_entries.to_be_bytes());
        buf
    }

    /// Decodes a header record. Headers are always [`HEADER_SIZE`] bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        check_record(buf, HEADER_SIZE, &[PacketType::Header])?;
        Ok(Self {
            version: buf[5],
            system_id: be_u64(buf, 6),
            stream_type: StreamType(be_u64(buf, 14)),
            total_length: be_u64(buf, 22),
            total_entries: be_u64(buf, 30),
        })
    }
}
