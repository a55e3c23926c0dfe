//! Wire protocol for the datastream entry-log service.
//!
//! Clients send fixed-layout big-endian command frames; the server answers
//! with packets that begin with a one-byte type tag followed by a header,
//! data or result record. This crate owns both directions of the encoding
//! plus the async read/write helpers used over any reliable byte stream.

mod codec;
mod command;
mod entry;
mod io;

pub use codec::{DecodeError, MAX_RECORD_LEN};
pub use command::{CommandFrame, CommandParam, read_command};
pub use entry::{
    Command, EntryType, FIXED_SIZE_FILE_ENTRY, FIXED_SIZE_RESULT_ENTRY, FileEntry, HEADER_SIZE,
    HeaderEntry, PacketType, ResultCode, ResultEntry, StreamType,
};
pub use io::{Packet, read_packet, write_command};
