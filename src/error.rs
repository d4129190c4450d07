//! Error types for beanstalk-client.

use thiserror::Error;

/// Failure statuses the broker can answer a well-formed request with.
///
/// These never affect the connection: only the command that received the
/// status fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The job or tube does not exist (or is not reserved by this client).
    #[error("not found")]
    NotFound,

    /// The job was buried instead of being stored or released. `put`
    /// reports the new job's id, `release` does not.
    #[error("job was buried")]
    Buried(Option<u64>),

    /// The job body was not terminated by CRLF.
    #[error("expected CRLF after job body")]
    ExpectedCrlf,

    /// The job body exceeds the broker's `max-job-size`.
    #[error("job too big")]
    JobTooBig,

    /// The broker is in drain mode and refuses new jobs.
    #[error("server is draining")]
    Draining,

    /// A job reserved by this client is about to time out.
    #[error("deadline soon")]
    DeadlineSoon,

    /// `reserve-with-timeout` expired without a job.
    #[error("timed out")]
    TimedOut,

    /// Ignoring the last watched tube is not allowed.
    #[error("cannot ignore the only watched tube")]
    NotIgnored,

    /// The broker could not allocate memory.
    #[error("server out of memory")]
    OutOfMemory,

    /// The broker hit an internal error.
    #[error("server internal error")]
    InternalError,

    /// The broker could not parse the request.
    #[error("bad format")]
    BadFormat,

    /// The broker does not know the command.
    #[error("unknown command")]
    UnknownCommand,
}

impl CommandError {
    /// Map a bare status word from the broker to a command error.
    ///
    /// `BURIED` is not mapped here since it is a success reply for `bury`.
    pub fn from_status(status: &str) -> Option<Self> {
        let err = match status {
            "NOT_FOUND" => Self::NotFound,
            "EXPECTED_CRLF" => Self::ExpectedCrlf,
            "JOB_TOO_BIG" => Self::JobTooBig,
            "DRAINING" => Self::Draining,
            "DEADLINE_SOON" => Self::DeadlineSoon,
            "TIMED_OUT" => Self::TimedOut,
            "NOT_IGNORED" => Self::NotIgnored,
            "OUT_OF_MEMORY" => Self::OutOfMemory,
            "INTERNAL_ERROR" => Self::InternalError,
            "BAD_FORMAT" => Self::BadFormat,
            "UNKNOWN_COMMAND" => Self::UnknownCommand,
            _ => return None,
        };
        Some(err)
    }
}

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum BeanstalkError {
    /// I/O error on the socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connecting to the broker failed.
    #[error("connect to {addr} failed: {reason}")]
    ConnectFailed { addr: String, reason: String },

    /// The connection dropped while the command was in flight.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// The reply could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The broker answered with a failure status.
    #[error("command failed: {0}")]
    Command(#[from] CommandError),

    /// Command issued while the client is stopped.
    #[error("not connected")]
    NotConnected,

    /// API misuse (connecting twice, firing a gate twice, ...).
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// The codec refused to encode the command.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// YAML body from a stats or list reply could not be parsed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON configuration could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BeanstalkError {
    /// Whether the failure came from the transport rather than the command.
    ///
    /// Transport failures are the ones worth resubmitting after a reconnect.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ConnectFailed { .. } | Self::Disconnected(_)
        )
    }

    /// The broker failure status, if this is one.
    pub fn command_error(&self) -> Option<&CommandError> {
        match self {
            Self::Command(e) => Some(e),
            _ => None,
        }
    }
}

// Gate outcomes are fanned out to many waiters, so errors must be clonable.
// `io::Error` and the serde errors are not, so they collapse into their
// closest transport/decode variant.
impl Clone for BeanstalkError {
    fn clone(&self) -> Self {
        match self {
            Self::Io(e) => Self::Disconnected(e.to_string()),
            Self::ConnectFailed { addr, reason } => Self::ConnectFailed {
                addr: addr.clone(),
                reason: reason.clone(),
            },
            Self::Disconnected(r) => Self::Disconnected(r.clone()),
            Self::Decode(m) => Self::Decode(m.clone()),
            Self::Command(e) => Self::Command(e.clone()),
            Self::NotConnected => Self::NotConnected,
            Self::Precondition(m) => Self::Precondition(m.clone()),
            Self::InvalidArgument(m) => Self::InvalidArgument(m.clone()),
            Self::Yaml(e) => Self::Decode(e.to_string()),
            Self::Json(e) => Self::Decode(e.to_string()),
        }
    }
}

/// Result type alias using BeanstalkError.
pub type Result<T> = std::result::Result<T, BeanstalkError>;
