use std::fmt;
use std::io;
use std::sync::Arc;

/// Unified error type for the storage engine core.
///
/// Every layer of the engine speaks this one vocabulary, so an error can
/// travel from a block read all the way up to a client unchanged. The first
/// five variants are produced by this crate; the reserved ones belong to the
/// write and scheduling layers built on top, which share the type.
///
/// `Error` is `Clone` because iterators hold on to the first error they hit
/// and keep answering `status()` with it. IO errors are wrapped in an `Arc`
/// to make that possible.
#[derive(Debug, Clone)]
pub enum Error {
    /// IO error from disk operations.
    Io(Arc<io::Error>),
    /// Data corruption detected (CRC mismatch, bad format, etc).
    Corruption(String),
    /// Key not found.
    NotFound,
    /// Valid request for something this build cannot do.
    NotSupported(String),
    /// Caller handed us something unusable.
    InvalidArgument(String),
    /// Reserved: a merge operand is still being applied.
    MergeInProgress,
    /// Reserved: a bounded operation stopped before finishing.
    Incomplete,
    /// Reserved: the engine is shutting down.
    ShutdownInProgress,
    /// Reserved: a lock or IO deadline expired.
    TimedOut,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Corruption(msg) => write!(f, "Corruption: {msg}"),
            Error::NotFound => write!(f, "Not found"),
            Error::NotSupported(msg) => write!(f, "Not supported: {msg}"),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            Error::MergeInProgress => write!(f, "Merge in progress"),
            Error::Incomplete => write!(f, "Incomplete"),
            Error::ShutdownInProgress => write!(f, "Shutdown in progress"),
            Error::TimedOut => write!(f, "Operation timed out"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
