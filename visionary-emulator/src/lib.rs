//! # Visionary-T Emulator
//!
//! This crate emulates the network side of a SICK Visionary-T camera, so
//! clients can be exercised without hardware.
//!
//! ## Architecture
//!
//! - **[`VisionaryDevice`] Trait**: the device model. It holds the variables,
//!   decides which access mode may write them and produces blobs.
//! - **[`server::Server`]**: speaks CoLa on the control port and pushes blobs on
//!   the streaming port, forwarding to the device.
//! - **[`synthetic::SyntheticDevice`]**: a device producing moving ramp patterns.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use visionary_emulator::{server::Builder, synthetic::SyntheticDevice};
//! use std::{net::{IpAddr, Ipv4Addr}, time::Duration};
//!
//! let server = Builder::new()
//!     .frame_interval(Duration::from_millis(100))
//!     .build(SyntheticDevice::new(176, 144));
//! server.listen(IpAddr::V4(Ipv4Addr::LOCALHOST), 2112, 2113)?;
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! ## Sessions
//!
//! Every control connection starts in [`AccessMode::Run`] and may raise its
//! mode with the digest of the matching default password. Streaming is a
//! property of the device: `PLAYSTART` on any control connection enables
//! blobs on every streaming connection.
use std::{error, fmt::Display, io};

use visionary_protocol::AccessMode;

pub mod server;
pub mod synthetic;

/// Reasons for a device to refuse a variable access.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeviceError {
    UnknownMethod,
    UnknownVariable,
    InvalidValue,
    WriteAccessDenied,
}

impl DeviceError {
    /// The code sent back in an `sFA` reply.
    pub fn code(&self) -> u16 {
        match self {
            DeviceError::UnknownMethod => 0x0002,
            DeviceError::UnknownVariable => 0x0003,
            DeviceError::InvalidValue => 0x0005,
            DeviceError::WriteAccessDenied => 0x000A,
        }
    }
}

impl Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceError::UnknownMethod => write!(f, "Unknown method"),
            DeviceError::UnknownVariable => write!(f, "Unknown variable"),
            DeviceError::InvalidValue => write!(f, "Invalid value"),
            DeviceError::WriteAccessDenied => write!(f, "Write access denied"),
        }
    }
}

impl error::Error for DeviceError {}

/// Device model served by [`server::Server`].
///
/// The server shares one device between all connections, so implementations
/// use interior mutability.
pub trait VisionaryDevice {
    /// Returns the big-endian encoded value of variable `name`.
    fn read_variable(&self, name: &str) -> Result<Box<[u8]>, DeviceError>;

    /// Writes the big-endian encoded `value` to variable `name` on behalf of a
    /// session holding access mode `mode`.
    fn write_variable(&self, name: &str, value: &[u8], mode: AccessMode)
    -> Result<(), DeviceError>;

    /// Produces the next blob, without package header.
    fn next_blob(&self) -> io::Result<Vec<u8>>;
}
