//! Record types and protocol constants.

use std::fmt;

use serde::Serialize;

/// Size of the fixed part of a data record (tag, length, type, number).
pub const FIXED_SIZE_FILE_ENTRY: u32 = 17;

/// Size of the fixed part of a result record (tag, length, error code).
pub const FIXED_SIZE_RESULT_ENTRY: u32 = 9;

/// Size of a header record. Headers have no variable part.
pub const HEADER_SIZE: u32 = 38;

/// Leading byte of every packet sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::exhaustive_enums)]
#[repr(u8)]
pub enum PacketType {
    /// Reply to [`Command::Header`].
    Header = 1,
    /// Entry pushed by an active stream.
    Data = 2,
    /// Entry sent in reply to [`Command::Entry`] / [`Command::Bookmark`].
    DataResponse = 0xFE,
    /// Outcome of any command.
    Result = 0xFF,
}

impl PacketType {
    /// Maps a wire tag to its packet type, if known.
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Header),
            2 => Some(Self::Data),
            0xFE => Some(Self::DataResponse),
            0xFF => Some(Self::Result),
            _ => None,
        }
    }

    /// Wire tag of this packet type.
    pub const fn tag(self) -> u8 {
        self as u8
    }
}

/// Client command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::exhaustive_enums)]
#[repr(u64)]
pub enum Command {
    /// Start streaming from an entry number.
    Start = 1,
    /// Stop an active stream.
    Stop = 2,
    /// Query the stream header.
    Header = 3,
    /// Start streaming from a bookmark.
    StartBookmark = 4,
    /// Fetch a single entry by number.
    Entry = 5,
    /// Fetch the entry a bookmark points to.
    Bookmark = 6,
}

impl Command {
    /// Wire opcode of this command.
    pub const fn opcode(self) -> u64 {
        self as u64
    }

    /// Human-readable command name used in logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::Stop => "Stop",
            Self::Header => "Header",
            Self::StartBookmark => "StartBookmark",
            Self::Entry => "Entry",
            Self::Bookmark => "Bookmark",
        }
    }
}

impl TryFrom<u64> for Command {
    type Error = u64;

    fn try_from(opcode: u64) -> Result<Self, Self::Error> {
        match opcode {
            1 => Ok(Self::Start),
            2 => Ok(Self::Stop),
            3 => Ok(Self::Header),
            4 => Ok(Self::StartBookmark),
            5 => Ok(Self::Entry),
            6 => Ok(Self::Bookmark),
            other => Err(other),
        }
    }
}

impl From<Command> for u64 {
    fn from(cmd: Command) -> Self {
        cmd.opcode()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.opcode(), self.name())
    }
}

/// Logical stream namespace requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct StreamType(pub u64);

impl StreamType {
    /// Sequencer stream.
    pub const SEQUENCER: Self = Self(1);
}

impl Default for StreamType {
    fn default() -> Self {
        Self::SEQUENCER
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Application-defined entry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct EntryType(pub u32);

impl EntryType {
    /// Reserved kind returned when a requested entry or bookmark does not exist.
    pub const NOT_FOUND: Self = Self(0x8000_0000);
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Error code carried by a [`ResultEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ResultCode(pub u32);

impl ResultCode {
    /// Command succeeded.
    pub const OK: Self = Self(0);
    /// Start issued while a stream is already active.
    pub const ALREADY_STARTED: Self = Self(1);
    /// Stop issued while no stream is active.
    pub const ALREADY_STOPPED: Self = Self(2);
    /// Start entry number beyond the end of the log.
    pub const BAD_FROM_ENTRY: Self = Self(3);
    /// Start bookmark unknown to the server.
    pub const BAD_FROM_BOOKMARK: Self = Self(4);
    /// Opcode not understood by the server.
    pub const INVALID_COMMAND: Self = Self(9);

    /// Whether this is the OK sentinel.
    pub const fn is_ok(self) -> bool {
        self.0 == Self::OK.0
    }

    /// Name of a well-known code.
    pub const fn name(self) -> &'static str {
        match self.0 {
            0 => "OK",
            1 => "AlreadyStarted",
            2 => "AlreadyStopped",
            3 => "BadFromEntry",
            4 => "BadFromBookmark",
            9 => "InvalidCommand",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.0, self.name())
    }
}

/// Stream header returned by [`Command::Header`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HeaderEntry {
    /// Stream file format version.
    pub version: u8,
    /// System identifier (e.g. a chain id).
    pub system_id: u64,
    /// Stream namespace the header describes.
    pub stream_type: StreamType,
    /// Total bytes used by the stream.
    pub total_length: u64,
    /// Total number of data entries in the stream.
    pub total_entries: u64,
}

/// One entry of the server's append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// Entry number.
    pub number: u64,
    /// Total framed length, fixed part included.
    pub length: u32,
    /// Entry kind.
    pub entry_type: EntryType,
    /// Opaque payload.
    pub data: Vec<u8>,
}

impl FileEntry {
    /// Builds an entry, computing its framed length from the payload.
    ///
    /// Payloads that would overflow the 32-bit length field saturate; such
    /// entries are rejected by the encoder's peer.
    pub fn new(number: u64, entry_type: EntryType, data: Vec<u8>) -> Self {
        let length = u32::try_from(data.len())
            .ok()
            .and_then(|n| n.checked_add(FIXED_SIZE_FILE_ENTRY))
            .unwrap_or(u32::MAX);
        Self {
            number,
            length,
            entry_type,
            data,
        }
    }

    /// Whether the server flagged this entry as not found.
    pub fn is_not_found(&self) -> bool {
        self.entry_type == EntryType::NOT_FOUND
    }
}

/// Outcome of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultEntry {
    /// Error code; [`ResultCode::OK`] on success.
    pub code: ResultCode,
    /// Server-provided error message.
    pub message: String,
}

impl ResultEntry {
    /// Builds a result record.
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Whether the command succeeded.
    pub const fn is_ok(&self) -> bool {
        self.code.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_opcodes_roundtrip() {
        for cmd in [
            Command::Start,
            Command::Stop,
            Command::Header,
            Command::StartBookmark,
            Command::Entry,
            Command::Bookmark,
        ] {
            assert_eq!(Command::try_from(cmd.opcode()), Ok(cmd));
        }
        assert_eq!(Command::try_from(0), Err(0));
        assert_eq!(Command::try_from(7), Err(7));
    }

    #[test]
    fn packet_tags() {
        assert_eq!(PacketType::from_tag(0xFF), Some(PacketType::Result));
        assert_eq!(PacketType::from_tag(0xFE), Some(PacketType::DataResponse));
        assert_eq!(PacketType::from_tag(0), None);
    }

    #[test]
    fn file_entry_length_includes_fixed_part() {
        let e = FileEntry::new(3, EntryType(2), vec![0; 10]);
        assert_eq!(e.length, 27);
        assert!(!e.is_not_found());
        assert!(FileEntry::new(0, EntryType::NOT_FOUND, Vec::new()).is_not_found());
    }

    #[test]
    fn result_code_display() {
        assert_eq!(ResultCode::BAD_FROM_ENTRY.to_string(), "3[BadFromEntry]");
        assert_eq!(ResultCode(42).to_string(), "42[Unknown]");
        assert!(ResultEntry::new(ResultCode::OK, "").is_ok());
    }
}
