use std::{
    error::Error,
    fmt::Display,
    io::{self},
    num::{ParseFloatError, ParseIntError},
    str::Utf8Error,
};

/// Errors that may occur when reading a frame, reply or blob from a stream.
#[derive(Debug)]
pub enum ReadError {
    IoError(io::Error),
    /// The start marker of a framed message did not match `02 02 02 02`.
    InvalidMarker([u8; 4]),
    /// The peer closed the connection before sending a single byte.
    EmptyResponse,
    ChecksumMismatch {
        expected: u8,
        got: u8,
    },
    /// A fixed header field carried a value this implementation does not understand.
    UnexpectedValue {
        field: &'static str,
        expected: u32,
        got: u32,
    },
    UnsupportedDatatype {
        channel: &'static str,
        datatype: String,
    },
    /// Leading and trailing dataset length of a binary segment differ.
    LengthMismatch {
        leading: u32,
        trailing: u32,
    },
    InvalidFormat(String),
    InvalidXml(String),
    TooManyBytes {
        max: usize,
        got: usize,
    },
}

impl From<io::Error> for ReadError {
    fn from(value: io::Error) -> Self {
        ReadError::IoError(value)
    }
}

impl From<Utf8Error> for ReadError {
    fn from(value: Utf8Error) -> Self {
        ReadError::InvalidFormat(format!("Invalid UTF8: {}", value))
    }
}

impl From<ParseIntError> for ReadError {
    fn from(value: ParseIntError) -> Self {
        ReadError::InvalidFormat(format!("Invalid integer: {}", value))
    }
}

impl From<ParseFloatError> for ReadError {
    fn from(value: ParseFloatError) -> Self {
        ReadError::InvalidFormat(format!("Invalid number: {}", value))
    }
}

impl From<roxmltree::Error> for ReadError {
    fn from(value: roxmltree::Error) -> Self {
        ReadError::InvalidXml(value.to_string())
    }
}

impl Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::IoError(error) => write!(f, "{}", error),
            ReadError::InvalidMarker(marker) => {
                write!(f, "Invalid start marker {:02x?}", marker)
            }
            ReadError::EmptyResponse => write!(f, "Device closed the connection without a reply"),
            ReadError::ChecksumMismatch { expected, got } => write!(
                f,
                "Checksum mismatch: expected 0x{:02x}, got 0x{:02x}",
                expected, got
            ),
            ReadError::UnexpectedValue {
                field,
                expected,
                got,
            } => write!(
                f,
                "Unexpected {}: expected 0x{:x}, got 0x{:x}",
                field, expected, got
            ),
            ReadError::UnsupportedDatatype { channel, datatype } => {
                write!(
                    f,
                    "Unsupported datatype '{}' for {} channel, only uint16 is supported",
                    datatype, channel
                )
            }
            ReadError::LengthMismatch { leading, trailing } => write!(
                f,
                "Dataset length mismatch: header says {}, trailer says {}",
                leading, trailing
            ),
            ReadError::InvalidFormat(format) => write!(f, "{}", format),
            ReadError::InvalidXml(reason) => write!(f, "Invalid XML segment: {}", reason),
            ReadError::TooManyBytes { max, got } => {
                write!(f, "Message too large! Maximum is {}, but got {}", max, got)
            }
        }
    }
}

impl Error for ReadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReadError::IoError(error) => Some(error),
            _ => None,
        }
    }
}
