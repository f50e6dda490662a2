use std::fmt::Display;

use crate::endian::password_hash;

/// TCP port of the CoLa control channel.
pub const CONTROL_PORT: u16 = 2112;
/// TCP port of the blob streaming channel.
pub const STREAMING_PORT: u16 = 2113;

/// Start marker preceding every framed control message and every streamed package.
pub const START_MARKER: [u8; 4] = [0x02, 0x02, 0x02, 0x02];

/// Sent by the client on the streaming channel. The device drops silent streaming clients.
pub const HEARTBEAT: &[u8] = b"BlbReq";

/// Protocol version at the start of every streamed package.
pub const PROTOCOL_VERSION: u16 = 0x0001;
/// Packet type of a streamed blob package.
pub const PACKET_TYPE_BLOB: u8 = 0x62;
/// Identifier at the start of every blob.
pub const BLOB_ID: u16 = 0x0001;
/// Number of (offset, change counter) pairs in a blob header.
pub const SEGMENT_COUNT: u16 = 3;

/// Version of this library, reported by tools built on it.
pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The privilege tier of a control session.
/// Modes are ordered; a session can only ever raise its own mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u8)]
pub enum AccessMode {
    Run = 0,
    Operator = 1,
    Maintenance = 2,
    AuthorizedClient = 3,
    Service = 4,
}

#[test]
fn access_mode_ordering() {
    assert!(AccessMode::Run < AccessMode::Operator);
    assert!(AccessMode::Maintenance < AccessMode::AuthorizedClient);
    assert!(AccessMode::AuthorizedClient < AccessMode::Service);
}

impl AccessMode {
    pub const ALL: [AccessMode; 5] = [
        AccessMode::Run,
        AccessMode::Operator,
        AccessMode::Maintenance,
        AccessMode::AuthorizedClient,
        AccessMode::Service,
    ];

    pub fn from_u8(value: u8) -> Option<AccessMode> {
        AccessMode::ALL.get(value as usize).copied()
    }

    /// The fixed credential the device expects when switching into this mode.
    /// `Run` is the default mode and needs no credential.
    pub fn digest(&self) -> u32 {
        match self {
            AccessMode::Run => 0,
            AccessMode::Operator => password_hash("operator"),
            AccessMode::Maintenance => password_hash("main"),
            AccessMode::AuthorizedClient => password_hash("client"),
            AccessMode::Service => password_hash("servicelevel"),
        }
    }
}

#[test]
fn access_mode_from_u8() {
    for mode in AccessMode::ALL {
        assert_eq!(AccessMode::from_u8(mode as u8), Some(mode));
    }
    assert_eq!(AccessMode::from_u8(5), None);
}

impl Default for AccessMode {
    fn default() -> Self {
        Self::Run
    }
}

impl Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AccessMode::Run => "Run",
            AccessMode::Operator => "Operator",
            AccessMode::Maintenance => "Maintenance",
            AccessMode::AuthorizedClient => "AuthorizedClient",
            AccessMode::Service => "Service",
        };
        write!(f, "{}", name)
    }
}

/// Size of a device variable on the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VariableKind {
    Byte,
    Int32,
}

impl VariableKind {
    pub fn size(&self) -> usize {
        match self {
            VariableKind::Byte => 1,
            VariableKind::Int32 => 4,
        }
    }
}

/// Describes a device variable that can be read with `sRN` and written with `sWN`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Variable {
    pub name: &'static str,
    pub kind: VariableKind,
    /// The lowest access mode the device accepts a write in.
    pub write_access: AccessMode,
}

impl Variable {
    pub const INTEGRATION_TIME_US: Variable = Variable {
        name: "integrationTimeUs",
        kind: VariableKind::Int32,
        write_access: AccessMode::Service,
    };

    pub const MODULATION_FREQUENCY: Variable = Variable {
        name: "modulationFrequency",
        kind: VariableKind::Byte,
        write_access: AccessMode::AuthorizedClient,
    };
}

/// Well-known method names invoked through `sMN`.
pub mod method {
    pub const GET_ACCESS_MODE: &str = "GetAccessMode";
    pub const SET_ACCESS_MODE: &str = "SetAccessMode";
    pub const GET_BLOB_CLIENT_CONFIG: &str = "GetBlobClientConfig";
    pub const PLAY_START: &str = "PLAYSTART";
    pub const PLAY_STOP: &str = "PLAYSTOP";
}

/// A CoLa command is sent from the client to the device over the control channel.
/// Every command is answered by exactly one [`Reply`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// Queries the access mode of the current session.
    GetAccessMode,
    /// Switches the session into `mode`, authenticated by `digest`.
    SetAccessMode { mode: AccessMode, digest: u32 },
    /// Reads the variable called `name`.
    ReadVariable { name: String },
    /// Writes the big-endian encoded `value` to the variable called `name`.
    WriteVariable { name: String, value: Box<[u8]> },
    /// Invokes a parameterless method such as `PLAYSTART`.
    Method { name: String },
}

impl Command {
    pub fn set_access_mode(mode: AccessMode) -> Command {
        Command::SetAccessMode {
            mode,
            digest: mode.digest(),
        }
    }

    pub fn method(name: &str) -> Command {
        Command::Method {
            name: name.to_string(),
        }
    }
}

/// A reply is sent from the device to the client in response to a [`Command`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    /// Answer to a method invocation (`sAN`). `data` follows the method name.
    Method { name: String, data: Box<[u8]> },
    /// Answer to a variable read (`sRA`).
    Read { name: String, value: Box<[u8]> },
    /// Write acknowledge (`sWA`).
    Write { name: String },
    /// The device refused the command (`sFA`).
    Error { code: u16 },
}

impl Reply {
    /// Interprets the last byte of a method reply as a success flag.
    pub fn is_success(&self) -> bool {
        match self {
            Reply::Method { data, .. } => data.last() == Some(&1),
            Reply::Read { .. } | Reply::Write { .. } => true,
            Reply::Error { .. } => false,
        }
    }
}

impl Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Method { name, data } => write!(f, "sAN {} {:02x?}", name, data),
            Reply::Read { name, value } => write!(f, "sRA {} {:02x?}", name, value),
            Reply::Write { name } => write!(f, "sWA {}", name),
            Reply::Error { code } => write!(f, "sFA {:04x}", code),
        }
    }
}
