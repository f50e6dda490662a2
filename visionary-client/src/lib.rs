//! # Visionary-T Client
//!
//! A client library for SICK Visionary-T time-of-flight cameras.
//!
//! ## Overview
//!
//! A camera is controlled through CoLa commands on its control port and pushes
//! frames on its streaming port. This crate provides:
//!
//! - [`control::Control`]: the control session (access modes, variables, streaming state)
//! - [`stream::Streaming`]: the streaming connection and blob reception
//! - [`acquisition::Acquisition`]: a background thread delivering the newest frame
//! - [`Camera`]: all of the above behind one handle
//! - [`channels`]: owned image planes and point clouds
//!
//! For the wire formats, see the [`visionary_protocol`] crate.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use visionary_client::{Camera, Config};
//!
//! let mut camera = Camera::connect("192.168.1.10".parse()?, Config::default())?;
//! camera.control().set_integration_time_us(1000)?;
//! let frame = camera.next_frame()?;
//! println!("Frame {} is {}x{}", frame.frame_number(), frame.width(), frame.height());
//! camera.disconnect()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Access Modes
//!
//! Writing variables requires an elevated access mode. The setters on
//! [`control::Control`] raise the mode on their own; the mode is never lowered.
//!
//! ## Threading
//!
//! [`Camera`] runs one acquisition thread. Frames that arrive while the
//! consumer is busy replace the unread frame, so [`Camera::next_frame`] always
//! returns the most recent one.
pub mod acquisition;
pub mod camera;
pub mod channels;
pub mod config;
pub mod control;
pub mod error;
pub mod stream;

pub use camera::Camera;
pub use config::Config;
pub use error::{Error, Result};
