//! Decoding and encoding of streamed blobs.
//!
//! A blob is laid out as follows. All header fields are big-endian, the image
//! samples are little-endian.
//!
//! ```text
//! [blob id: u16 = 1][segment count: u16 = 3]
//! 3 x [offset: u32][change counter: u32]
//! [XML segment]                            offsets[0]..offsets[1]
//! [binary segment]                         offsets[1]..offsets[2]
//!
//! binary segment:
//! [length: u32][timestamp: u64][version: u16][frame number: u32]
//! [data quality: u8][device status: u8]
//! [distance plane][intensity plane][confidence plane]   width * height * u16 each
//! [crc: u32][length: u32]
//! ```
use std::io::{self, ErrorKind, Write};

use crate::{
    calibration::Calibration,
    endian::ConvertEndianness,
    error::ReadError,
    protocol::{BLOB_ID, SEGMENT_COUNT},
};

/// Size of blob id, segment count and the segment table.
pub const BLOB_HEADER_LEN: usize = 4 + SEGMENT_COUNT as usize * 8;
/// Bytes in front of the distance plane, counted from the start of the binary segment.
pub const BINARY_HEADER_LEN: usize = 4 + 8 + 2 + 4 + 1 + 1;
/// CRC and trailing length copy following the confidence plane.
const BINARY_TRAILER_LEN: usize = 8;

/// One decoded frame. The image planes are kept in the received buffer and
/// addressed through offsets.
#[derive(Clone, Debug)]
pub struct FrameBlob {
    buffer: Box<[u8]>,
    calibration: Calibration,
    change_counters: [u32; 3],
    timestamp: u64,
    version: u16,
    frame_number: u32,
    data_quality: u8,
    device_status: u8,
    crc: u32,
    distance_offset: usize,
    intensity_offset: usize,
    confidence_offset: usize,
}

fn truncated(what: &str, needed: usize, available: usize) -> ReadError {
    ReadError::InvalidFormat(format!(
        "Blob truncated while reading {}: need {} bytes, have {}",
        what, needed, available
    ))
}

fn bytes<const N: usize>(buf: &[u8], offset: usize, what: &str) -> Result<[u8; N], ReadError> {
    buf.get(offset..offset + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| truncated(what, offset + N, buf.len()))
}

fn be_u16(buf: &[u8], offset: usize, what: &str) -> Result<u16, ReadError> {
    Ok(u16::from_ne_bytes(bytes(buf, offset, what)?).convert_endianness())
}

fn be_u32(buf: &[u8], offset: usize, what: &str) -> Result<u32, ReadError> {
    Ok(u32::from_ne_bytes(bytes(buf, offset, what)?).convert_endianness())
}

fn be_u64(buf: &[u8], offset: usize, what: &str) -> Result<u64, ReadError> {
    Ok(u64::from_ne_bytes(bytes(buf, offset, what)?).convert_endianness())
}

impl FrameBlob {
    /// Parses a blob as returned by [`crate::codec::read_blob_package`].
    pub fn parse(buffer: Box<[u8]>) -> Result<FrameBlob, ReadError> {
        let blob_id = be_u16(&buffer, 0, "blob id")?;
        if blob_id != BLOB_ID {
            return Err(ReadError::UnexpectedValue {
                field: "blob id",
                expected: BLOB_ID as u32,
                got: blob_id as u32,
            });
        }
        let segment_count = be_u16(&buffer, 2, "segment count")?;
        if segment_count != SEGMENT_COUNT {
            return Err(ReadError::UnexpectedValue {
                field: "segment count",
                expected: SEGMENT_COUNT as u32,
                got: segment_count as u32,
            });
        }

        let mut offsets = [0usize; 3];
        let mut change_counters = [0u32; 3];
        for i in 0..3 {
            offsets[i] = be_u32(&buffer, 4 + i * 8, "segment offset")? as usize;
            change_counters[i] = be_u32(&buffer, 8 + i * 8, "change counter")?;
        }
        let [xml_start, binary_start, binary_end] = offsets;
        if xml_start < BLOB_HEADER_LEN
            || xml_start > binary_start
            || binary_start > binary_end
            || binary_end > buffer.len()
        {
            return Err(ReadError::InvalidFormat(format!(
                "Invalid segment offsets {:?} for a blob of {} bytes",
                offsets,
                buffer.len()
            )));
        }

        let xml = str::from_utf8(&buffer[xml_start..binary_start])?;
        let calibration = Calibration::from_xml(xml.trim_end_matches('\0'))?;
        log::trace!(
            "Blob calibration: {}x{}, fx={}, fy={}, cx={}, cy={}",
            calibration.width,
            calibration.height,
            calibration.fx,
            calibration.fy,
            calibration.cx,
            calibration.cy
        );

        let segment = &buffer[binary_start..binary_end];
        let leading = be_u32(segment, 0, "dataset length")?;
        if leading as usize > segment.len() {
            return Err(ReadError::TooManyBytes {
                max: segment.len(),
                got: leading as usize,
            });
        }
        let timestamp = be_u64(segment, 4, "timestamp")?;
        let version = be_u16(segment, 12, "version")?;
        let frame_number = be_u32(segment, 14, "frame number")?;
        let [data_quality, device_status] = bytes(segment, 18, "device status")?;

        let oversized = || {
            ReadError::InvalidFormat(format!(
                "Image size {}x{} exceeds the addressable range",
                calibration.width, calibration.height
            ))
        };
        let plane_len = (calibration.width as usize)
            .checked_mul(calibration.height as usize)
            .and_then(|pixels| pixels.checked_mul(2))
            .ok_or_else(oversized)?;
        let crc_offset = plane_len
            .checked_mul(3)
            .and_then(|planes| planes.checked_add(BINARY_HEADER_LEN))
            .ok_or_else(oversized)?;
        let needed = crc_offset
            .checked_add(BINARY_TRAILER_LEN)
            .ok_or_else(oversized)?;
        if needed > segment.len() {
            return Err(truncated("image planes", needed, segment.len()));
        }
        let crc = be_u32(segment, crc_offset, "crc")?;
        let trailing = be_u32(segment, crc_offset + 4, "trailing dataset length")?;
        if trailing != leading {
            return Err(ReadError::LengthMismatch { leading, trailing });
        }

        let distance_offset = binary_start + BINARY_HEADER_LEN;
        Ok(FrameBlob {
            buffer,
            calibration,
            change_counters,
            timestamp,
            version,
            frame_number,
            data_quality,
            device_status,
            crc,
            distance_offset,
            intensity_offset: distance_offset + plane_len,
            confidence_offset: distance_offset + 2 * plane_len,
        })
    }

    pub fn width(&self) -> u32 {
        self.calibration.width
    }

    pub fn height(&self) -> u32 {
        self.calibration.height
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn change_counters(&self) -> [u32; 3] {
        self.change_counters
    }

    /// Raw device timestamp of the frame.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn frame_number(&self) -> u32 {
        self.frame_number
    }

    pub fn data_quality(&self) -> u8 {
        self.data_quality
    }

    pub fn device_status(&self) -> u8 {
        self.device_status
    }

    /// The CRC field of the binary segment. It is recorded as sent and not verified.
    pub fn crc(&self) -> u32 {
        self.crc
    }

    pub fn distance_offset(&self) -> usize {
        self.distance_offset
    }

    pub fn intensity_offset(&self) -> usize {
        self.intensity_offset
    }

    pub fn confidence_offset(&self) -> usize {
        self.confidence_offset
    }

    /// The complete blob the frame was decoded from.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    fn plane(&self, offset: usize) -> Plane<'_> {
        let len = self.calibration.num_pixels() * 2;
        Plane {
            data: &self.buffer[offset..offset + len],
            width: self.width(),
            height: self.height(),
        }
    }

    /// Radial distances in millimetres.
    pub fn distance(&self) -> Plane<'_> {
        self.plane(self.distance_offset)
    }

    pub fn intensity(&self) -> Plane<'_> {
        self.plane(self.intensity_offset)
    }

    pub fn confidence(&self) -> Plane<'_> {
        self.plane(self.confidence_offset)
    }
}

/// Read-only view on one image plane of little-endian `u16` samples.
#[derive(Copy, Clone, Debug)]
pub struct Plane<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
}

impl<'a> Plane<'a> {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The sample at column `x` and row `y`, if inside the image.
    pub fn get(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = (y as usize * self.width as usize + x as usize) * 2;
        Some(u16::from_le_bytes([self.data[index], self.data[index + 1]]))
    }

    /// Iterates the samples row by row.
    pub fn iter(&self) -> impl Iterator<Item = u16> + use<'a> {
        self.data
            .chunks_exact(2)
            .map(|sample| u16::from_le_bytes([sample[0], sample[1]]))
    }

    pub fn to_vec(&self) -> Vec<u16> {
        self.iter().collect()
    }
}

/// Encodes frames in the blob format. Used by emulated devices and tests.
#[derive(Clone, Debug)]
pub struct BlobWriter {
    calibration: Calibration,
    xml: String,
    version: u16,
}

impl BlobWriter {
    pub fn new(calibration: Calibration) -> BlobWriter {
        let xml = calibration.to_xml();
        BlobWriter {
            calibration,
            xml,
            version: 1,
        }
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Writes one blob. Each plane must hold `width * height` samples.
    pub fn write_to(
        &self,
        writer: &mut impl Write,
        header: FrameHeader,
        distance: &[u16],
        intensity: &[u16],
        confidence: &[u16],
    ) -> io::Result<()> {
        let num_pixels = self.calibration.num_pixels();
        for (name, plane) in [
            ("distance", distance),
            ("intensity", intensity),
            ("confidence", confidence),
        ] {
            if plane.len() != num_pixels {
                return Err(io::Error::new(
                    ErrorKind::InvalidInput,
                    format!(
                        "{} plane has {} samples, expected {}",
                        name,
                        plane.len(),
                        num_pixels
                    ),
                ));
            }
        }

        let xml_start = BLOB_HEADER_LEN;
        let binary_start = xml_start + self.xml.len();
        let dataset_len = BINARY_HEADER_LEN - 4 + 3 * num_pixels * 2 + 4;
        let binary_end = binary_start + 4 + dataset_len + 4;

        writer.write_all(&BLOB_ID.to_be_bytes())?;
        writer.write_all(&SEGMENT_COUNT.to_be_bytes())?;
        for offset in [xml_start, binary_start, binary_end] {
            writer.write_all(&(offset as u32).to_be_bytes())?;
            writer.write_all(&0u32.to_be_bytes())?;
        }
        writer.write_all(self.xml.as_bytes())?;

        writer.write_all(&(dataset_len as u32).to_be_bytes())?;
        writer.write_all(&header.timestamp.to_be_bytes())?;
        writer.write_all(&self.version.to_be_bytes())?;
        writer.write_all(&header.frame_number.to_be_bytes())?;
        writer.write_all(&[header.data_quality, header.device_status])?;
        for plane in [distance, intensity, confidence] {
            let mut bytes = Vec::with_capacity(plane.len() * 2);
            for sample in plane {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
            writer.write_all(&bytes)?;
        }
        writer.write_all(&0u32.to_be_bytes())?;
        writer.write_all(&(dataset_len as u32).to_be_bytes())
    }
}

/// Per-frame values written into the binary segment by [`BlobWriter`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FrameHeader {
    pub timestamp: u64,
    pub frame_number: u32,
    pub data_quality: u8,
    pub device_status: u8,
}
