//! Owned image channels and 3D reconstruction from a frame.
use visionary_protocol::blob::FrameBlob;

/// The three image planes of a frame, copied out of the receive buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Channels {
    pub width: u32,
    pub height: u32,
    pub distance: Vec<u16>,
    pub intensity: Vec<u16>,
    pub confidence: Vec<u16>,
}

impl Channels {
    pub fn decode(frame: &FrameBlob) -> Channels {
        Channels {
            width: frame.width(),
            height: frame.height(),
            distance: frame.distance().to_vec(),
            intensity: frame.intensity().to_vec(),
            confidence: frame.confidence().to_vec(),
        }
    }
}

/// A point in the camera coordinate system, in the unit of the distance channel (mm).
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Computes one point per pixel, in row-major order.
///
/// Pixel rays are undistorted with the radial coefficients `k1`/`k2` and the
/// depth is corrected by the focal-to-ray-cross distance. The camera-to-world
/// transform is not applied.
pub fn point_cloud(frame: &FrameBlob) -> Vec<Point3> {
    let calibration = frame.calibration();
    let distance = frame.distance();
    let mut points = Vec::with_capacity(calibration.num_pixels());
    for (index, d) in distance.iter().enumerate() {
        let col = (index % calibration.width as usize) as f64;
        let row = (index / calibration.width as usize) as f64;
        let xp = (calibration.cx - col) / calibration.fx;
        let yp = (calibration.cy - row) / calibration.fy;
        let r2 = xp * xp + yp * yp;
        let k = 1.0 + calibration.k1 * r2 + calibration.k2 * r2 * r2;
        let xd = xp * k;
        let yd = yp * k;
        let s0 = (xd * xd + yd * yd + 1.0).sqrt();
        let d = d as f64;
        points.push(Point3 {
            x: (xd * d / s0) as f32,
            y: (yd * d / s0) as f32,
            z: (d / s0 - calibration.focal_to_ray_cross) as f32,
        });
    }
    points
}
