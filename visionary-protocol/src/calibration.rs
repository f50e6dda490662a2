//! The XML segment of a blob.
//!
//! The device describes every frame with a `SickRecord` document. Only the
//! `DataStream` description is of interest; it is located by walking a fixed
//! node path:
//!
//! ```text
//! SickRecord/DataSets/DataSetDepthMap/FormatDescriptionDepthMap/DataStream
//! ```
use std::fmt::Write as _;

use roxmltree::{Document, Node};

use crate::error::ReadError;

const NODE_PATH: [&str; 4] = [
    "DataSets",
    "DataSetDepthMap",
    "FormatDescriptionDepthMap",
    "DataStream",
];
const ROOT: &str = "SickRecord";
const SUPPORTED_DATATYPE: &str = "uint16";

/// Image geometry and intrinsics of the time-of-flight sensor.
#[derive(Clone, Debug, PartialEq)]
pub struct Calibration {
    pub width: u32,
    pub height: u32,
    /// Row-major 4x4 camera-to-world transform.
    pub camera_to_world: [f64; 16],
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// Radial distortion coefficients
    pub k1: f64,
    pub k2: f64,
    /// Distance between the focal point and the crossing point of all rays, in millimetres.
    pub focal_to_ray_cross: f64,
}

impl Calibration {
    /// Creates a calibration for an ideal pinhole camera with the principal
    /// point in the image centre and an identity camera-to-world transform.
    pub fn pinhole(width: u32, height: u32, focal_length: f64) -> Calibration {
        let mut camera_to_world = [0.0; 16];
        for i in 0..4 {
            camera_to_world[i * 5] = 1.0;
        }
        Calibration {
            width,
            height,
            camera_to_world,
            fx: focal_length,
            fy: focal_length,
            cx: (width as f64 - 1.0) / 2.0,
            cy: (height as f64 - 1.0) / 2.0,
            k1: 0.0,
            k2: 0.0,
            focal_to_ray_cross: 0.0,
        }
    }

    /// Number of samples in each image plane.
    pub fn num_pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn from_xml(xml: &str) -> Result<Calibration, ReadError> {
        let document = Document::parse(xml)?;
        let root = document.root_element();
        if root.tag_name().name() != ROOT {
            return Err(ReadError::InvalidXml(format!(
                "Expected root node {}, got {}",
                ROOT,
                root.tag_name().name()
            )));
        }
        let stream = NODE_PATH
            .iter()
            .try_fold(root, |node, name| child(node, name))?;

        let width = parse_u32(child(stream, "Width")?)?;
        let height = parse_u32(child(stream, "Height")?)?;
        if width == 0 || height == 0 {
            return Err(ReadError::InvalidFormat(format!(
                "Invalid image size {}x{}",
                width, height
            )));
        }

        let transform = child(stream, "CameraToWorldTransform")?;
        let values = transform
            .children()
            .filter(Node::is_element)
            .map(parse_f64)
            .collect::<Result<Vec<_>, _>>()?;
        let camera_to_world: [f64; 16] = values.as_slice().try_into().map_err(|_| {
            ReadError::InvalidXml(format!(
                "CameraToWorldTransform has {} values instead of 16",
                values.len()
            ))
        })?;

        let matrix = child(stream, "CameraMatrix")?;
        let distortion = child(stream, "CameraDistortionParams")?;

        for channel in ["Distance", "Intensity", "Confidence"] {
            check_datatype(stream, channel)?;
        }

        Ok(Calibration {
            width,
            height,
            camera_to_world,
            fx: parse_f64(child(matrix, "FX")?)?,
            fy: parse_f64(child(matrix, "FY")?)?,
            cx: parse_f64(child(matrix, "CX")?)?,
            cy: parse_f64(child(matrix, "CY")?)?,
            k1: parse_f64(child(distortion, "K1")?)?,
            k2: parse_f64(child(distortion, "K2")?)?,
            focal_to_ray_cross: parse_f64(child(stream, "FocalToRayCross")?)?,
        })
    }

    /// Writes the calibration as a `SickRecord` document with `uint16` sample types.
    pub fn to_xml(&self) -> String {
        let mut transform = String::new();
        for value in self.camera_to_world {
            let _ = write!(transform, "<value>{}</value>", value);
        }
        format!(
            concat!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
                "<SickRecord><DataSets><DataSetDepthMap datacount=\"1\">",
                "<FormatDescriptionDepthMap><DataStream>",
                "<Width>{}</Width><Height>{}</Height>",
                "<CameraToWorldTransform>{}</CameraToWorldTransform>",
                "<CameraMatrix><FX>{}</FX><FY>{}</FY><CX>{}</CX><CY>{}</CY></CameraMatrix>",
                "<CameraDistortionParams><K1>{}</K1><K2>{}</K2><P1>0</P1><P2>0</P2><K3>0</K3></CameraDistortionParams>",
                "<FrameNumber>uint32</FrameNumber><DataQuality>uint8</DataQuality><DeviceStatus>uint8</DeviceStatus>",
                "<FocalToRayCross>{}</FocalToRayCross>",
                "<Distance>uint16</Distance><Intensity>uint16</Intensity><Confidence>uint16</Confidence>",
                "</DataStream></FormatDescriptionDepthMap></DataSetDepthMap></DataSets></SickRecord>"
            ),
            self.width,
            self.height,
            transform,
            self.fx,
            self.fy,
            self.cx,
            self.cy,
            self.k1,
            self.k2,
            self.focal_to_ray_cross
        )
    }
}

fn child<'a, 'input>(
    node: Node<'a, 'input>,
    name: &str,
) -> Result<Node<'a, 'input>, ReadError> {
    node.children()
        .find(|c| c.is_element() && c.tag_name().name() == name)
        .ok_or_else(|| {
            ReadError::InvalidXml(format!(
                "Missing node {} in {}",
                name,
                node.tag_name().name()
            ))
        })
}

fn text<'a>(node: Node<'a, '_>) -> &'a str {
    node.text().unwrap_or_default().trim()
}

fn parse_u32(node: Node) -> Result<u32, ReadError> {
    Ok(text(node).parse()?)
}

fn parse_f64(node: Node) -> Result<f64, ReadError> {
    Ok(text(node).parse()?)
}

fn check_datatype(stream: Node, channel: &'static str) -> Result<(), ReadError> {
    let datatype = text(child(stream, channel)?);
    if datatype != SUPPORTED_DATATYPE {
        return Err(ReadError::UnsupportedDatatype {
            channel,
            datatype: datatype.to_string(),
        });
    }
    Ok(())
}
