//! [`tokio_util::codec`] implementations of the control framing and the streamed packages.
//!
//! These mirror [`crate::codec::read_framed`] and [`crate::codec::read_blob_package`]
//! for asynchronous transports.
use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    codec::{MAX_FRAME_LEN, MAX_PACKAGE_LEN, check_package_header, checksum},
    error::ReadError,
    protocol::{PACKET_TYPE_BLOB, PROTOCOL_VERSION, START_MARKER},
};

const FRAME_HEADER_LEN: usize = 8;
const PACKAGE_HEADER_LEN: usize = 3;

/// Codec for framed CoLa payloads on the control channel.
#[derive(Clone, Copy, Debug, Default)]
pub struct ColaCodec;

impl Decoder for ColaCodec {
    type Item = Bytes;
    type Error = ReadError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ReadError> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let marker = [src[0], src[1], src[2], src[3]];
        if marker != START_MARKER {
            return Err(ReadError::InvalidMarker(marker));
        }
        let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(ReadError::TooManyBytes {
                max: MAX_FRAME_LEN,
                got: len,
            });
        }
        let total = FRAME_HEADER_LEN + len + 1;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        let payload = src.split_to(len).freeze();
        let received = src.get_u8();
        let expected = checksum(&payload);
        if received != expected {
            return Err(ReadError::ChecksumMismatch {
                expected,
                got: received,
            });
        }
        Ok(Some(payload))
    }
}

impl Encoder<&[u8]> for ColaCodec {
    type Error = io::Error;

    fn encode(&mut self, payload: &[u8], dst: &mut BytesMut) -> Result<(), io::Error> {
        dst.reserve(payload.len() + FRAME_HEADER_LEN + 1);
        dst.put_slice(&START_MARKER);
        dst.put_u32(payload.len() as u32);
        dst.put_slice(payload);
        dst.put_u8(checksum(payload));
        Ok(())
    }
}

/// Codec for packages on the streaming channel.
///
/// The decoder resynchronises on the start marker and yields the blob that
/// follows the package header.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlobCodec;

impl Decoder for BlobCodec {
    type Item = Bytes;
    type Error = ReadError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ReadError> {
        match src.windows(START_MARKER.len()).position(|w| w == START_MARKER) {
            Some(0) => {}
            Some(skip) => {
                log::warn!("Skipped {} bytes in front of the start marker", skip);
                src.advance(skip);
            }
            None => {
                // A partial marker may sit at the end of the buffer
                let discard = src.len().saturating_sub(START_MARKER.len() - 1);
                if discard > 0 {
                    log::warn!("Discarding {} bytes without start marker", discard);
                    src.advance(discard);
                }
                return Ok(None);
            }
        }

        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
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
        if src.len() < FRAME_HEADER_LEN + len {
            src.reserve(FRAME_HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        let package = src.split_to(len).freeze();
        check_package_header(&package)?;
        Ok(Some(package.slice(PACKAGE_HEADER_LEN..)))
    }
}

impl Encoder<&[u8]> for BlobCodec {
    type Error = io::Error;

    fn encode(&mut self, blob: &[u8], dst: &mut BytesMut) -> Result<(), io::Error> {
        dst.reserve(blob.len() + FRAME_HEADER_LEN + PACKAGE_HEADER_LEN);
        dst.put_slice(&START_MARKER);
        dst.put_u32((blob.len() + PACKAGE_HEADER_LEN) as u32);
        dst.put_u16(PROTOCOL_VERSION);
        dst.put_u8(PACKET_TYPE_BLOB);
        dst.put_slice(blob);
        Ok(())
    }
}
