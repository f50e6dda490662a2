/// Read and write implementations for framed CoLa messages and streamed blob packages
use std::io::{self, ErrorKind, Read, Write};

use crate::{
    error::ReadError,
    protocol::{
        AccessMode, Command, PACKET_TYPE_BLOB, PROTOCOL_VERSION, Reply, START_MARKER,
        method,
    },
};

/// Largest control payload accepted from a peer.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;
/// Largest streamed package accepted from a device.
pub const MAX_PACKAGE_LEN: usize = 64 * 1024 * 1024;
/// Number of bytes [`sync`] discards before giving up on finding a start marker.
pub const MAX_SYNC_SCAN: usize = 16 * 1024 * 1024;

/// Size of the protocol version and packet type preceding each blob.
const PACKAGE_HEADER_LEN: usize = 3;

/// XOR of all payload bytes.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0, |acc, byte| acc ^ byte)
}

/// Wraps `payload` as `[marker][length: u32 BE][payload][checksum]`.
pub fn add_framing(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + 9);
    framed.extend_from_slice(&START_MARKER);
    framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    framed.extend_from_slice(payload);
    framed.push(checksum(payload));
    framed
}

pub fn write_framed(writer: &mut impl Write, payload: &[u8]) -> io::Result<()> {
    log::trace!("Writing framed payload: {:02x?}", payload);
    writer.write_all(&add_framing(payload))?;
    writer.flush()
}

/// Reads one framed message and returns its payload.
///
/// The marker and the checksum are validated. Nothing is retried; a failure
/// leaves the stream at an undefined position.
pub fn read_framed(reader: &mut impl Read) -> Result<Box<[u8]>, ReadError> {
    let mut header = [0u8; 8];
    let read = reader.read(&mut header)?;
    if read == 0 {
        return Err(ReadError::EmptyResponse);
    }
    reader.read_exact(&mut header[read..])?;

    let marker = [header[0], header[1], header[2], header[3]];
    if marker != START_MARKER {
        return Err(ReadError::InvalidMarker(marker));
    }
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ReadError::TooManyBytes {
            max: MAX_FRAME_LEN,
            got: len,
        });
    }

    let mut buf = vec![0u8; len + 1];
    reader.read_exact(&mut buf)?;
    let received = buf.pop().unwrap_or_default();
    let expected = checksum(&buf);
    if received != expected {
        return Err(ReadError::ChecksumMismatch {
            expected,
            got: received,
        });
    }
    log::trace!("Read framed payload: {:02x?}", &buf[..]);
    Ok(buf.into_boxed_slice())
}

/// Discards bytes until the start marker has been consumed.
/// Returns the number of bytes skipped in front of the marker.
pub fn sync(reader: &mut impl Read) -> io::Result<usize> {
    let mut window = [0u8; 4];
    let mut filled = 0;
    let mut skipped = 0;
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        if filled < window.len() {
            window[filled] = byte[0];
            filled += 1;
        } else {
            window.rotate_left(1);
            window[3] = byte[0];
            skipped += 1;
        }
        if filled == window.len() && window == START_MARKER {
            return Ok(skipped);
        }
        if skipped > MAX_SYNC_SCAN {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("no start marker within {} bytes", MAX_SYNC_SCAN),
            ));
        }
    }
}

/// Reads one streamed package and returns the blob following the package header.
pub fn read_blob_package(reader: &mut impl Read) -> Result<Box<[u8]>, ReadError> {
    let skipped = sync(reader)?;
    if skipped > 0 {
        log::warn!("Skipped {} bytes in front of the start marker", skipped);
    }

    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_PACKAGE_LEN {
        return Err(ReadError::TooManyBytes {
            max: MAX_PACKAGE_LEN,
            got: len,
        });
    }
    if len < PACKAGE_HEADER_LEN {
        return Err(ReadError::InvalidFormat(format!(
            "Package of {} bytes cannot hold a package header",
            len
        )));
    }

    let mut package = vec![0u8; len];
    reader.read_exact(&mut package)?;
    check_package_header(&package)?;
    Ok(package.split_off(PACKAGE_HEADER_LEN).into_boxed_slice())
}

pub(crate) fn check_package_header(package: &[u8]) -> Result<(), ReadError> {
    let version = u16::from_be_bytes([package[0], package[1]]);
    if version != PROTOCOL_VERSION {
        return Err(ReadError::UnexpectedValue {
            field: "protocol version",
            expected: PROTOCOL_VERSION as u32,
            got: version as u32,
        });
    }
    if package[2] != PACKET_TYPE_BLOB {
        return Err(ReadError::UnexpectedValue {
            field: "packet type",
            expected: PACKET_TYPE_BLOB as u32,
            got: package[2] as u32,
        });
    }
    Ok(())
}

/// Writes `blob` as one streamed package.
pub fn write_blob_package(writer: &mut impl Write, blob: &[u8]) -> io::Result<()> {
    writer.write_all(&START_MARKER)?;
    writer.write_all(&((blob.len() + PACKAGE_HEADER_LEN) as u32).to_be_bytes())?;
    writer.write_all(&PROTOCOL_VERSION.to_be_bytes())?;
    writer.write_all(&[PACKET_TYPE_BLOB])?;
    writer.write_all(blob)?;
    writer.flush()
}

/// Splits `"<name> <args>"` at the first space.
fn split_name(rest: &[u8]) -> (&[u8], Option<&[u8]>) {
    match rest.iter().position(|b| *b == b' ') {
        Some(index) => (&rest[..index], Some(&rest[index + 1..])),
        None => (rest, None),
    }
}

fn name_from(bytes: &[u8]) -> Result<String, ReadError> {
    Ok(str::from_utf8(bytes)?.to_string())
}

impl Command {
    const PREFIX_METHOD: &[u8; 4] = b"sMN ";
    const PREFIX_READ: &[u8; 4] = b"sRN ";
    const PREFIX_WRITE: &[u8; 4] = b"sWN ";

    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(32);
        match self {
            Command::GetAccessMode => {
                payload.extend_from_slice(Self::PREFIX_METHOD);
                payload.extend_from_slice(method::GET_ACCESS_MODE.as_bytes());
            }
            Command::SetAccessMode { mode, digest } => {
                payload.extend_from_slice(Self::PREFIX_METHOD);
                payload.extend_from_slice(method::SET_ACCESS_MODE.as_bytes());
                payload.push(b' ');
                payload.push(*mode as u8);
                payload.extend_from_slice(&digest.to_be_bytes());
            }
            Command::ReadVariable { name } => {
                payload.extend_from_slice(Self::PREFIX_READ);
                payload.extend_from_slice(name.as_bytes());
            }
            Command::WriteVariable { name, value } => {
                payload.extend_from_slice(Self::PREFIX_WRITE);
                payload.extend_from_slice(name.as_bytes());
                payload.push(b' ');
                payload.extend_from_slice(value);
            }
            Command::Method { name } => {
                payload.extend_from_slice(Self::PREFIX_METHOD);
                payload.extend_from_slice(name.as_bytes());
            }
        }
        payload
    }

    pub fn from_payload(payload: &[u8]) -> Result<Command, ReadError> {
        if payload.len() < 4 {
            return Err(ReadError::InvalidFormat(format!(
                "Command too short: {:02x?}",
                payload
            )));
        }
        let (prefix, rest) = payload.split_at(4);
        match prefix {
            p if p == Self::PREFIX_METHOD => {
                let (name, args) = split_name(rest);
                let name = name_from(name)?;
                match name.as_str() {
                    method::GET_ACCESS_MODE => Ok(Command::GetAccessMode),
                    method::SET_ACCESS_MODE => {
                        let &[mode, d0, d1, d2, d3] = args.unwrap_or_default() else {
                            return Err(ReadError::InvalidFormat(
                                "SetAccessMode expects a mode and a 4 byte digest".to_string(),
                            ));
                        };
                        let mode = AccessMode::from_u8(mode).ok_or_else(|| {
                            ReadError::InvalidFormat(format!("Unknown access mode {}", mode))
                        })?;
                        Ok(Command::SetAccessMode {
                            mode,
                            digest: u32::from_be_bytes([d0, d1, d2, d3]),
                        })
                    }
                    _ => Ok(Command::Method { name }),
                }
            }
            p if p == Self::PREFIX_READ => Ok(Command::ReadVariable {
                name: name_from(rest)?,
            }),
            p if p == Self::PREFIX_WRITE => {
                let (name, value) = split_name(rest);
                let value = value.ok_or_else(|| {
                    ReadError::InvalidFormat("Variable write without a value".to_string())
                })?;
                Ok(Command::WriteVariable {
                    name: name_from(name)?,
                    value: value.into(),
                })
            }
            _ => Err(ReadError::InvalidFormat(format!(
                "Unknown command prefix {}",
                String::from_utf8_lossy(prefix)
            ))),
        }
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        write_framed(writer, &self.to_payload())
    }

    pub fn from_reader(reader: &mut impl Read) -> Result<Command, ReadError> {
        Command::from_payload(&read_framed(reader)?)
    }
}

impl Reply {
    const PREFIX_METHOD: &[u8; 3] = b"sAN";
    const PREFIX_READ: &[u8; 3] = b"sRA";
    const PREFIX_WRITE: &[u8; 3] = b"sWA";
    const PREFIX_ERROR: &[u8; 3] = b"sFA";

    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(32);
        match self {
            Reply::Method { name, data } => {
                payload.extend_from_slice(Self::PREFIX_METHOD);
                payload.push(b' ');
                payload.extend_from_slice(name.as_bytes());
                if !data.is_empty() {
                    payload.push(b' ');
                    payload.extend_from_slice(data);
                }
            }
            Reply::Read { name, value } => {
                payload.extend_from_slice(Self::PREFIX_READ);
                payload.push(b' ');
                payload.extend_from_slice(name.as_bytes());
                payload.push(b' ');
                payload.extend_from_slice(value);
            }
            Reply::Write { name } => {
                payload.extend_from_slice(Self::PREFIX_WRITE);
                payload.push(b' ');
                payload.extend_from_slice(name.as_bytes());
            }
            Reply::Error { code } => {
                payload.extend_from_slice(Self::PREFIX_ERROR);
                payload.extend_from_slice(&code.to_be_bytes());
            }
        }
        payload
    }

    pub fn from_payload(payload: &[u8]) -> Result<Reply, ReadError> {
        if payload.len() < 3 {
            return Err(ReadError::InvalidFormat(format!(
                "Reply too short: {:02x?}",
                payload
            )));
        }
        let (prefix, rest) = payload.split_at(3);
        if prefix == Self::PREFIX_ERROR {
            let code = match rest {
                [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
                _ => 0,
            };
            return Ok(Reply::Error { code });
        }

        let rest = rest.strip_prefix(b" ").unwrap_or(rest);
        match prefix {
            p if p == Self::PREFIX_METHOD => {
                let (name, data) = split_name(rest);
                Ok(Reply::Method {
                    name: name_from(name)?,
                    data: data.unwrap_or_default().into(),
                })
            }
            p if p == Self::PREFIX_READ => {
                let (name, value) = split_name(rest);
                Ok(Reply::Read {
                    name: name_from(name)?,
                    value: value.unwrap_or_default().into(),
                })
            }
            p if p == Self::PREFIX_WRITE => Ok(Reply::Write {
                name: name_from(rest)?,
            }),
            _ => Err(ReadError::InvalidFormat(format!(
                "Unknown reply prefix {}",
                String::from_utf8_lossy(prefix)
            ))),
        }
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        write_framed(writer, &self.to_payload())
    }

    pub fn from_reader(reader: &mut impl Read) -> Result<Reply, ReadError> {
        Reply::from_payload(&read_framed(reader)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::Variable;
    use std::io::Cursor;

    #[test]
    fn checksum_is_xor_fold() {
        assert_eq!(checksum(&[]), 0x00);
        assert_eq!(checksum(&[0xA5]), 0xA5);
        assert_eq!(checksum(&[0x01, 0x02, 0x04]), 0x07);
        assert_eq!(checksum(&[0xFF, 0xFF]), 0x00);
    }

    #[test]
    fn framing_layout() {
        let payload = b"sRN integrationTimeUs";
        let framed = add_framing(payload);
        assert_eq!(&framed[..4], &START_MARKER);
        assert_eq!(&framed[4..8], &(payload.len() as u32).to_be_bytes());
        assert_eq!(&framed[8..8 + payload.len()], payload);
        assert_eq!(
            checksum(&framed[8..8 + payload.len()]),
            *framed.last().unwrap()
        );
    }

    #[test]
    fn framing_round_trip() {
        for payload in [&b""[..], &b"x"[..], &b"sMN GetAccessMode"[..]] {
            let mut cursor = Cursor::new(add_framing(payload));
            let decoded = read_framed(&mut cursor).unwrap();
            assert_eq!(&*decoded, payload);
            assert_eq!(cursor.position() as usize, payload.len() + 9);
        }
    }

    #[test]
    fn invalid_marker() {
        let mut framed = add_framing(b"sWA x");
        framed[1] = 0x03;
        match read_framed(&mut Cursor::new(framed)) {
            Err(ReadError::InvalidMarker(marker)) => assert_eq!(marker, [0x02, 0x03, 0x02, 0x02]),
            other => panic!("expected InvalidMarker, got {:?}", other),
        }
    }

    #[test]
    fn empty_response() {
        match read_framed(&mut Cursor::new(Vec::new())) {
            Err(ReadError::EmptyResponse) => {}
            other => panic!("expected EmptyResponse, got {:?}", other),
        }
    }

    #[test]
    fn checksum_mismatch() {
        let mut framed = add_framing(b"sAN PLAYSTART");
        *framed.last_mut().unwrap() ^= 0xFF;
        assert!(matches!(
            read_framed(&mut Cursor::new(framed)),
            Err(ReadError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn short_read_is_io_error() {
        let framed = add_framing(b"sAN PLAYSTART");
        let truncated = framed[..framed.len() - 3].to_vec();
        match read_framed(&mut Cursor::new(truncated)) {
            Err(ReadError::IoError(err)) => assert_eq!(err.kind(), ErrorKind::UnexpectedEof),
            other => panic!("expected IoError, got {:?}", other),
        }
    }

    #[test]
    fn sync_skips_garbage() {
        let mut data = vec![0x00, 0x02, 0x02, 0xFF, 0x02, 0x13, 0x37];
        data.extend_from_slice(&START_MARKER);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x10]);
        let mut cursor = Cursor::new(data);
        assert_eq!(sync(&mut cursor).unwrap(), 7);
        let mut len = [0u8; 4];
        cursor.read_exact(&mut len).unwrap();
        assert_eq!(u32::from_be_bytes(len), 0x10);
    }

    #[test]
    fn sync_without_marker_fails() {
        let mut cursor = Cursor::new(vec![0x02, 0x02, 0x02, 0x01, 0x02]);
        assert_eq!(
            sync(&mut cursor).unwrap_err().kind(),
            ErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn blob_package_round_trip() {
        let mut out = vec![0xAB, 0xCD];
        write_blob_package(&mut out, b"blob").unwrap();
        let blob = read_blob_package(&mut Cursor::new(out)).unwrap();
        assert_eq!(&*blob, b"blob");
    }

    #[test]
    fn blob_package_wrong_packet_type() {
        let mut out = Vec::new();
        write_blob_package(&mut out, b"blob").unwrap();
        out[10] = 0x63;
        match read_blob_package(&mut Cursor::new(out)) {
            Err(ReadError::UnexpectedValue { field, got, .. }) => {
                assert_eq!(field, "packet type");
                assert_eq!(got, 0x63);
            }
            other => panic!("expected UnexpectedValue, got {:?}", other),
        }
    }

    #[test]
    fn blob_package_wrong_version() {
        let mut out = Vec::new();
        write_blob_package(&mut out, b"blob").unwrap();
        out[9] = 0x02;
        assert!(matches!(
            read_blob_package(&mut Cursor::new(out)),
            Err(ReadError::UnexpectedValue {
                field: "protocol version",
                ..
            })
        ));
    }

    #[test]
    fn set_access_mode_payload() {
        let payload = Command::set_access_mode(AccessMode::AuthorizedClient).to_payload();
        assert_eq!(payload, b"sMN SetAccessMode \x03\xF4\x72\x47\x44".to_vec());
        assert_eq!(
            Command::from_payload(&payload).unwrap(),
            Command::SetAccessMode {
                mode: AccessMode::AuthorizedClient,
                digest: 0xF472_4744
            }
        );
    }

    #[test]
    fn read_and_write_variable_payloads() {
        let read = Command::ReadVariable {
            name: Variable::INTEGRATION_TIME_US.name.to_string(),
        };
        assert_eq!(read.to_payload(), b"sRN integrationTimeUs".to_vec());

        let write = Command::WriteVariable {
            name: Variable::INTEGRATION_TIME_US.name.to_string(),
            value: 1000_i32.to_be_bytes().into(),
        };
        let payload = write.to_payload();
        assert_eq!(payload, b"sWN integrationTimeUs \x00\x00\x03\xE8".to_vec());
        assert_eq!(Command::from_payload(&payload).unwrap(), write);
    }

    #[test]
    fn method_payloads() {
        assert_eq!(
            Command::method(method::PLAY_START).to_payload(),
            b"sMN PLAYSTART".to_vec()
        );
        assert_eq!(
            Command::from_payload(b"sMN GetAccessMode").unwrap(),
            Command::GetAccessMode
        );
        assert_eq!(
            Command::from_payload(b"sMN GetBlobClientConfig").unwrap(),
            Command::method(method::GET_BLOB_CLIENT_CONFIG)
        );
    }

    #[test]
    fn invalid_command_prefix() {
        match Command::from_payload(b"xyz something") {
            Err(ReadError::InvalidFormat(msg)) => assert!(msg.contains("xyz")),
            other => panic!("expected InvalidFormat, got {:?}", other),
        }
    }

    #[test]
    fn parse_replies() {
        assert_eq!(
            Reply::from_payload(b"sAN SetAccessMode \x01").unwrap(),
            Reply::Method {
                name: method::SET_ACCESS_MODE.to_string(),
                data: Box::new([0x01])
            }
        );
        assert_eq!(
            Reply::from_payload(b"sRA integrationTimeUs \x00\x00\x20\x00").unwrap(),
            Reply::Read {
                name: "integrationTimeUs".to_string(),
                value: Box::new([0x00, 0x00, 0x20, 0x00])
            }
        );
        assert_eq!(
            Reply::from_payload(b"sWA integrationTimeUs").unwrap(),
            Reply::Write {
                name: "integrationTimeUs".to_string()
            }
        );
        assert_eq!(
            Reply::from_payload(b"sFA\x00\x0B").unwrap(),
            Reply::Error { code: 0x0B }
        );
    }

    #[test]
    fn reply_value_may_contain_spaces() {
        let reply = Reply::Read {
            name: "modulationFrequency".to_string(),
            value: Box::new([b' ']),
        };
        let mut out = Vec::new();
        reply.write_to(&mut out).unwrap();
        assert_eq!(Reply::from_reader(&mut Cursor::new(out)).unwrap(), reply);
    }
}
