use std::fmt::Display;

/// ShaleDB errors.
#[derive(Debug)]
pub enum Error {
    /// Malformed column type tag, unknown column name, or contradictory
    /// schema flags. Raised at compile time; fatal for the table open.
    InvalidSchema(String),
    /// Row does not match the row schema: bad length prefix, wrong column
    /// count, embedded NUL in a zero-terminated column.
    RowParse(String),
    /// Unique-index constraint violated.
    DuplicateKey {
        index_id: usize,
        key: Vec<u8>,
        existing_gid: u64,
    },
    /// Lookup by id or key failed. A normal outcome, not a fault.
    NotFound,
    /// Bulk-build string pool exceeded u32::MAX bytes; the caller must
    /// split the input.
    SizeOverflow(u64),
    /// Corrupt or truncated on-disk data.
    InvalidData(String),
    /// An IO error, wrapping the platform message.
    Io(String),
    /// Another process holds the table directory lock.
    Lock(String),
    /// The operation raced with drop_table.
    DropInProgress,
    /// The background queues are stopping.
    ShuttingDown,
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::InvalidSchema(msg) => write!(f, "invalid schema: {msg}"),
            Error::RowParse(msg) => write!(f, "row parse error: {msg}"),
            Error::DuplicateKey {
                index_id,
                existing_gid,
                ..
            } => write!(
                f,
                "duplicate key on index {index_id}, existing row id {existing_gid}"
            ),
            Error::NotFound => write!(f, "not found"),
            Error::SizeOverflow(size) => {
                write!(f, "string pool size {size} exceeds u32 offset range")
            }
            Error::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
            Error::Lock(msg) => write!(f, "lock error: {msg}"),
            Error::DropInProgress => write!(f, "table drop in progress"),
            Error::ShuttingDown => write!(f, "background queues are shutting down"),
        }
    }
}

/// A ShaleDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidData(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        Error::InvalidData(err.to_string())
    }
}
