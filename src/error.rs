//! Unified error type for all store operations.
//!
//! Callers branch on the variant (or on [`Error::recovery`]) rather than on
//! the message text. `Conflict` and `Locked` in particular call for different
//! handling: the first means "reload and redo", the second "wait and retry".

use crate::policy::Recovery;
use std::path::PathBuf;
use std::time::Duration;

/// Things that can go wrong when using the store.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// No document exists at the configured path yet.
    #[error("document not found")]
    NotFound,
    /// The document on disk is not well-formed JSON for the expected schema.
    #[error("document is corrupt: {0}")]
    Corrupt(String),
    /// Mutual exclusion could not be acquired before the timeout ran out.
    #[error("document is locked: {} (waited {waited:?})", .path.display())]
    Locked {
        /// Lock marker that was contended.
        path: PathBuf,
        /// How long the caller waited before giving up.
        waited: Duration,
    },
    /// The caller's expected version no longer matches the stored one.
    #[error(
        "version conflict: expected {expected}, found {}",
        .actual.as_deref().unwrap_or("<none>")
    )]
    Conflict {
        /// Version the caller based its change on.
        expected: String,
        /// Version currently on disk (`None` when no document exists).
        actual: Option<String>,
    },
    /// File system problem (read, write, rename, lock marker).
    #[error("i/o error: {0}")]
    Io(String),
    /// Failed to serialize the document to bytes.
    #[error("serialization error: {0}")]
    Serialize(String),
    /// Bad configuration (unparseable environment value, etc.).
    #[error("config error: {0}")]
    Config(String),
    /// A request argument was rejected before touching the store.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// How a caller is expected to react to this error.
    #[must_use]
    pub fn recovery(&self) -> Recovery {
        match self {
            Error::Conflict { .. } => Recovery::ReloadAndRedo,
            Error::Locked { .. } => Recovery::WaitAndRetry,
            Error::NotFound => Recovery::Bootstrap,
            _ => Recovery::Fatal,
        }
    }

    /// Stable machine-readable code for wire responses.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound => "NOT_FOUND",
            Error::Corrupt(_) => "CORRUPT",
            Error::Locked { .. } => "LOCKED",
            Error::Conflict { .. } => "CONFLICT",
            Error::Io(_) => "IO",
            Error::Serialize(_) => "SERIALIZE",
            Error::Config(_) => "CONFIG",
            Error::InvalidInput(_) => "INVALID_INPUT",
        }
    }

    /// `true` only for transient lock contention.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.recovery() == Recovery::WaitAndRetry
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            Error::Io(err.to_string())
        } else if err.is_syntax() || err.is_eof() || err.is_data() {
            Error::Corrupt(err.to_string())
        } else {
            Error::Serialize(err.to_string())
        }
    }
}

/// Result alias using our [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
