//! # Visionary-T Protocol Library
//!
//! This crate provides a Rust implementation of the protocol spoken by SICK
//! Visionary-T time-of-flight cameras. A camera is driven through two TCP
//! connections:
//!
//! - the **control channel** (port [`CONTROL_PORT`]) carries CoLa commands,
//!   framed as `[02 02 02 02][length: u32 BE][payload][xor checksum]`
//! - the **streaming channel** (port [`STREAMING_PORT`]) carries blobs, each
//!   holding an XML description of the frame and three image planes
//!
//! ## Overview
//!
//! This library implements the wire formats only; it performs no I/O on its own.
//! You can:
//!
//! - Serialize and deserialize CoLa commands and replies
//! - Frame and unframe control payloads
//! - Synchronise on and read streamed packages
//! - Decode blobs into [`blob::FrameBlob`] values (and encode them again)
//!
//! ## Basic Usage
//!
//! ### Writing Commands
//!
//! ```
//! use visionary_protocol::{AccessMode, Command};
//!
//! let mut buffer = Vec::new();
//! Command::set_access_mode(AccessMode::AuthorizedClient)
//!     .write_to(&mut buffer)
//!     .expect("Writing to vector shouldn't fail");
//! assert_eq!(&buffer[..4], &[0x02, 0x02, 0x02, 0x02]);
//! assert_eq!(&buffer[8..26], b"sMN SetAccessMode ");
//! ```
//!
//! ### Reading Replies
//!
//! ```
//! use visionary_protocol::{Reply, codec::add_framing};
//! use std::io::Cursor;
//!
//! let framed = add_framing(b"sWA integrationTimeUs");
//! let reply = Reply::from_reader(&mut Cursor::new(framed)).expect("Reply should parse");
//! assert_eq!(reply, Reply::Write { name: "integrationTimeUs".to_string() });
//! ```
//!
//! ### Decoding Frames
//!
//! ```
//! use visionary_protocol::blob::{BlobWriter, FrameBlob, FrameHeader};
//! use visionary_protocol::calibration::Calibration;
//!
//! let mut blob = Vec::new();
//! BlobWriter::new(Calibration::pinhole(2, 1, 1.0))
//!     .write_to(&mut blob, FrameHeader::default(), &[1000, 2000], &[7, 8], &[0, 0])
//!     .expect("Writing to vector shouldn't fail");
//! let frame = FrameBlob::parse(blob.into()).expect("Blob should parse");
//! assert_eq!(frame.distance().get(1, 0), Some(2000));
//! ```
//!
//! ## Byte Order
//!
//! Lengths, offsets and header fields are big-endian. Image samples inside the
//! binary segment are little-endian `u16` values.
//!
//! ## Error Handling
//!
//! This library uses the [`error::ReadError`] type for framing and parsing errors.
//! No operation retries on its own.
//!
//! ## Features
//!
//! - `tokio`: codecs for `tokio_util::codec::Framed` in [`framed`]

pub mod protocol;
pub use protocol::*;
pub mod blob;
pub mod calibration;
pub mod codec;
pub mod endian;
pub mod error;
#[cfg(feature = "tokio")]
pub mod framed;
