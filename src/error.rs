//! Error types shared by the probers, the scheduler and the configuration layer.
use std::collections::BTreeSet;
use std::io;
use thiserror::Error;
use tokio::task::JoinError;

/// Infrastructure failure raised by a single probe.
///
/// A `ProbeError` never aborts a run. The scheduler turns it into a negative
/// outcome for that work unit and reports each distinct message once.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("socket error: {0}")]
    Socket(#[source] io::Error),

    #[error("insufficient privilege: {0}")]
    Permission(String),

    #[error("resource exhausted, lower the thread count or raise the ulimit: {0}")]
    ResourceExhausted(#[source] io::Error),

    #[error("work unit panicked: {0}")]
    Join(String),

    /// A port walk stopped early. `open` holds the ports that answered before
    /// `cause` was hit.
    #[error("{cause}")]
    Incomplete {
        open: BTreeSet<u16>,
        #[source]
        cause: Box<ProbeError>,
    },
}

impl ProbeError {
    /// Classifies an I/O error raised while creating or using a socket.
    ///
    /// Descriptor exhaustion and privilege problems get their own variants so the
    /// process-level warning can tell the operator what to change.
    pub fn from_io(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::PermissionDenied {
            return Self::Permission(err.to_string());
        }

        let text = err.to_string().to_lowercase();
        if text.contains("too many open files") || text.contains("no buffer space") {
            Self::ResourceExhausted(err)
        } else {
            Self::Socket(err)
        }
    }

    /// Wraps `cause` so the ports already found open survive it. With nothing
    /// found yet the cause is returned as is.
    pub fn incomplete(open: BTreeSet<u16>, cause: Self) -> Self {
        if open.is_empty() {
            return cause;
        }
        Self::Incomplete {
            open,
            cause: Box::new(cause),
        }
    }

    /// Describes a failed work unit by its panic payload. The task id is left
    /// out so identical crashes on different hosts read the same.
    pub fn from_join(err: JoinError) -> Self {
        let message = match err.try_into_panic() {
            Ok(payload) => match payload.downcast::<String>() {
                Ok(message) => *message,
                Err(payload) => payload
                    .downcast_ref::<&'static str>()
                    .map_or_else(|| "unknown panic payload".to_owned(), |m| (*m).to_owned()),
            },
            Err(_) => "task aborted".to_owned(),
        };
        Self::Join(message)
    }
}

/// Fatal configuration problem detected before any probe is scheduled.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no valid targets found in the input")]
    NoTargets,

    #[error("invalid port specification: {0}")]
    InvalidPort(String),

    #[error("invalid value for `{name}`: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("could not read input: {0}")]
    Input(#[from] io::Error),
}
