use std::{
    collections::HashMap,
    io,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU32, Ordering},
    },
    time::Instant,
};

use visionary_protocol::{
    AccessMode, Variable, VariableKind,
    blob::{BlobWriter, FrameHeader},
    calibration::Calibration,
};

use crate::{DeviceError, VisionaryDevice};

const DEFAULT_INTEGRATION_TIME_US: i32 = 1000;
const BASE_DISTANCE_MM: u16 = 500;

/// An emulated camera producing ramp patterns that move by one pixel per frame.
///
/// Sample `(x, y)` of frame `n`:
/// - distance `500 + (x + y + n) % 1000`
/// - intensity `(x * y + n) % 65536`
/// - confidence `0xFFFF`
pub struct SyntheticDevice {
    writer: BlobWriter,
    variables: Mutex<HashMap<&'static str, (Variable, i32)>>,
    frame_number: AtomicU32,
    started: Instant,
}

impl SyntheticDevice {
    pub fn new(width: u32, height: u32) -> SyntheticDevice {
        SyntheticDevice::with_calibration(Calibration::pinhole(width, height, width as f64))
    }

    pub fn with_calibration(calibration: Calibration) -> SyntheticDevice {
        let variables = [
            (Variable::INTEGRATION_TIME_US, DEFAULT_INTEGRATION_TIME_US),
            (Variable::MODULATION_FREQUENCY, 0),
        ]
        .into_iter()
        .map(|(variable, value)| (variable.name, (variable, value)))
        .collect();
        SyntheticDevice {
            writer: BlobWriter::new(calibration),
            variables: Mutex::new(variables),
            frame_number: AtomicU32::new(0),
            started: Instant::now(),
        }
    }

    pub fn calibration(&self) -> &Calibration {
        self.writer.calibration()
    }

    /// Current value of variable `name`.
    pub fn variable(&self, name: &str) -> Option<i32> {
        self.variables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|(_, value)| *value)
    }

    fn planes(&self, frame_number: u32) -> (Vec<u16>, Vec<u16>, Vec<u16>) {
        let calibration = self.calibration();
        let n = calibration.num_pixels();
        let mut distance = Vec::with_capacity(n);
        let mut intensity = Vec::with_capacity(n);
        for y in 0..calibration.height {
            for x in 0..calibration.width {
                distance.push(BASE_DISTANCE_MM + ((x + y + frame_number) % 1000) as u16);
                intensity.push(x.wrapping_mul(y).wrapping_add(frame_number) as u16);
            }
        }
        (distance, intensity, vec![0xFFFF; n])
    }
}

impl VisionaryDevice for SyntheticDevice {
    fn read_variable(&self, name: &str) -> Result<Box<[u8]>, DeviceError> {
        let variables = self.variables.lock().unwrap_or_else(PoisonError::into_inner);
        let (variable, value) = variables.get(name).ok_or(DeviceError::UnknownVariable)?;
        let bytes: Box<[u8]> = match variable.kind {
            VariableKind::Byte => Box::new([*value as u8]),
            VariableKind::Int32 => Box::new(value.to_be_bytes()),
        };
        Ok(bytes)
    }

    fn write_variable(
        &self,
        name: &str,
        value: &[u8],
        mode: AccessMode,
    ) -> Result<(), DeviceError> {
        let mut variables = self.variables.lock().unwrap_or_else(PoisonError::into_inner);
        let (variable, stored) = variables
            .get_mut(name)
            .ok_or(DeviceError::UnknownVariable)?;
        if mode < variable.write_access {
            log::warn!(
                "Refused write of {} in access mode {}, requires {}",
                name,
                mode,
                variable.write_access
            );
            return Err(DeviceError::WriteAccessDenied);
        }
        *stored = match (variable.kind, value) {
            (VariableKind::Byte, &[byte]) => byte as i32,
            (VariableKind::Int32, &[b0, b1, b2, b3]) => i32::from_be_bytes([b0, b1, b2, b3]),
            _ => return Err(DeviceError::InvalidValue),
        };
        log::info!("Variable {} set to {}", name, stored);
        Ok(())
    }

    fn next_blob(&self) -> io::Result<Vec<u8>> {
        let frame_number = self.frame_number.fetch_add(1, Ordering::SeqCst);
        let (distance, intensity, confidence) = self.planes(frame_number);
        let mut blob = Vec::new();
        self.writer.write_to(
            &mut blob,
            FrameHeader {
                timestamp: self.started.elapsed().as_micros() as u64,
                frame_number,
                data_quality: 0,
                device_status: 0,
            },
            &distance,
            &intensity,
            &confidence,
        )?;
        Ok(blob)
    }
}
