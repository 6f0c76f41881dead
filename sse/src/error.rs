//! Error types for the `sse` crate.
//!
//! Follows the same pattern as the other layers: a root `Error` struct holding
//! an `error_kind` enum and an optional `source` for error chaining. The `web`
//! layer maps `StreamErrorKind` onto HTTP status codes.

use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: StreamErrorKind,
}

/// Categories of errors raised by the streaming core.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamErrorKind {
    /// The request context is missing the user, organization or business unit.
    Unauthorized,
    /// An admission cap was reached.
    TooManyConnections(ConnectionLimit),
    /// The streaming service no longer accepts clients.
    ShuttingDown,
    /// The tenant stream key is already bound to a data source of another item type.
    StreamTypeMismatch,
    /// The caller supplied data source failed.
    Fetch(String),
    /// A payload could not be serialized into an SSE frame.
    Encode,
    /// The network side of a client connection has gone away.
    ConnectionClosed,
}

/// Which admission cap rejected a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimit {
    PerUser,
    PerStream,
}

impl Error {
    pub fn new(error_kind: StreamErrorKind) -> Self {
        Self {
            source: None,
            error_kind,
        }
    }

    /// Wraps a failure coming out of a data source.
    pub fn fetch<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        let source = err.into();
        Self {
            error_kind: StreamErrorKind::Fetch(source.to_string()),
            source: Some(source),
        }
    }

    pub fn is_connection_closed(&self) -> bool {
        self.error_kind == StreamErrorKind::ConnectionClosed
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            StreamErrorKind::Unauthorized => write!(f, "missing tenant request context"),
            StreamErrorKind::TooManyConnections(ConnectionLimit::PerUser) => {
                write!(f, "too many connections for user")
            }
            StreamErrorKind::TooManyConnections(ConnectionLimit::PerStream) => {
                write!(f, "too many connections for stream")
            }
            StreamErrorKind::ShuttingDown => write!(f, "streaming service is shutting down"),
            StreamErrorKind::StreamTypeMismatch => {
                write!(f, "stream key is bound to a different data source")
            }
            StreamErrorKind::Fetch(message) => write!(f, "{message}"),
            StreamErrorKind::Encode => write!(f, "failed to encode event"),
            StreamErrorKind::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: StreamErrorKind::Encode,
        }
    }
}
