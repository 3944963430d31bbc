use std::io;
use std::sync::Arc;
use thiserror::Error;

// ── Error hierarchy ────────────────────────────────────────────────
//
//  Error
//  ├── Connection        transport failure (fatal for the link)
//  ├── Protocol          reply did not match what the command expected
//  ├── Incomplete        frame scanner needs more bytes (internal)
//  ├── Redis             server replied with `-<message>`
//  ├── InvalidArgument   caller contract violated before encoding
//  ├── Config            bad configuration or URL
//  ├── Timeout           connect / reply / write / pool admission
//  └── Disposed          connection or pool shutting down

/// Structured server error kinds for programmatic matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisErrorKind {
    /// Generic ERR
    Err,
    /// WRONGTYPE Operation against a key holding the wrong kind of value
    WrongType,
    /// LOADING Redis is loading the dataset in memory
    Loading,
    /// READONLY You can't write against a read only replica
    ReadOnly,
    /// NOSCRIPT No matching script
    NoScript,
    /// BUSY Redis is busy running a script
    Busy,
    /// NOAUTH Authentication required
    NoAuth,
    /// Any other error prefix
    Other(String),
}

impl RedisErrorKind {
    /// Classify a server error message by its leading word.
    pub fn from_error_msg(msg: &str) -> Self {
        let prefix = msg.split_whitespace().next().unwrap_or("UNKNOWN");
        match prefix {
            "ERR" => Self::Err,
            "WRONGTYPE" => Self::WrongType,
            "LOADING" => Self::Loading,
            "READONLY" => Self::ReadOnly,
            "NOSCRIPT" => Self::NoScript,
            "BUSY" => Self::Busy,
            "NOAUTH" => Self::NoAuth,
            other => Self::Other(other.to_string()),
        }
    }
}

/// All error variants for redpipe.
///
/// Errors are `Clone` so one transport failure can be fanned out to every
/// call queued on the broken connection.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// TCP / IO level errors
    #[error("connection error: {0}")]
    Connection(#[source] Arc<io::Error>),
    /// Reply framing or shape did not match the command's expectation
    #[error("protocol error: {0}")]
    Protocol(String),
    /// RESP scanner needs more data; used as control flow, never surfaced.
    #[error("incomplete RESP message")]
    Incomplete,
    /// Server returned an error line
    #[error("redis error: {message}")]
    Redis {
        kind: RedisErrorKind,
        message: String,
    },
    /// Argument validation failed before a command was built
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Invalid configuration or connection URL
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Operation timed out
    #[error("timeout: {0}")]
    Timeout(String),
    /// The connection or pool is being disposed
    #[error("connection is disposing")]
    Disposed,
}

impl Error {
    /// Create a server error from a raw error message, auto-parsing the kind.
    pub fn redis(msg: impl Into<String>) -> Self {
        let message = msg.into();
        let kind = RedisErrorKind::from_error_msg(&message);
        Self::Redis { kind, message }
    }

    /// Build a transport error from a kind and message.
    pub fn connection(kind: io::ErrorKind, msg: impl Into<String>) -> Self {
        Self::Connection(Arc::new(io::Error::new(kind, msg.into())))
    }

    /// True when the error means the connection itself can no longer be
    /// trusted. The pool never returns such a connection to its idle set.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_) | Self::Disposed)
    }

    /// The server's message text, if this is a server error.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Redis { message, .. } => Some(message),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Connection(Arc::new(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Tests ──────────────────────────────────────────────────────────
