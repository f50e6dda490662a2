use std::{error, fmt::Display, io};

use visionary_protocol::{Reply, error::ReadError};

/// Errors reported by control, streaming and acquisition operations.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Protocol(ReadError),
    /// The device answered, but not with the expected acknowledge.
    Rejected { action: String, reply: Reply },
    /// Streaming was started or stopped before `GetBlobClientConfig` succeeded.
    StreamNotInitialized,
    /// Frame acquisition failed `attempts` times in a row.
    AcquisitionFailed { attempts: u32, last: Box<Error> },
    /// The acquisition was stopped or the streaming connection was closed.
    Disconnected,
}

impl Error {
    pub(crate) fn rejected(action: impl Into<String>, reply: Reply) -> Error {
        Error::Rejected {
            action: action.into(),
            reply,
        }
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::Io(value)
    }
}

impl From<ReadError> for Error {
    fn from(value: ReadError) -> Self {
        match value {
            ReadError::IoError(err) => Error::Io(err),
            other => Error::Protocol(other),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(error) => write!(f, "{}", error),
            Error::Protocol(error) => write!(f, "Protocol error: {}", error),
            Error::Rejected { action, reply } => {
                write!(f, "Failed to {}: device answered '{}'", action, reply)
            }
            Error::StreamNotInitialized => {
                write!(f, "Streaming has not been initialised with GetBlobClientConfig")
            }
            Error::AcquisitionFailed { attempts, last } => {
                write!(f, "Acquisition failed after {} attempts: {}", attempts, last)
            }
            Error::Disconnected => write!(f, "Camera is disconnected"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(error) => Some(error),
            Error::Protocol(error) => Some(error),
            Error::AcquisitionFailed { last, .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
