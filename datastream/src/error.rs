//! Error types for datastream client operations.

use datastream_proto::ResultCode;

/// Alias for `Result<T, datastream::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by client operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A command was issued before [`StreamClient::start`](crate::StreamClient::start).
    #[error("execute command not allowed: client is not started")]
    NotAllowed,

    /// The opcode is not one of the six known commands.
    #[error("invalid command {0}")]
    InvalidCommand(u64),

    /// The server answered the command with a non-OK result.
    #[error("command failed with result {code}: {message}")]
    ResultCommand {
        /// Result code returned by the server.
        code: ResultCode,
        /// Error message returned by the server.
        message: String,
    },

    /// The requested entry does not exist.
    #[error("entry {0} not found")]
    EntryNotFound(u64),

    /// The requested bookmark does not exist.
    #[error("bookmark not found")]
    BookmarkNotFound,

    /// The client was shut down while the operation was waiting.
    #[error("client shut down")]
    Shutdown,

    /// The client configuration is invalid.
    #[error("invalid config: {0}")]
    Config(String),

    /// A socket or file I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
