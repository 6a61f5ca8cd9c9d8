//! Frame acquisition and detection.

use serde::{Deserialize, Deserializer, Serialize};

pub use self::{command::CommandDetector, error::DetectorError};

pub mod command;
pub mod error;

/// One captured image, JPEG encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub jpeg: Vec<u8>,
}

impl Frame {
    pub fn new(jpeg: Vec<u8>) -> Self {
        Frame { jpeg }
    }

    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }
}

/// A labelled object above the confidence threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub conf: f32,
    /// `[x1, y1, x2, y2]` in pixels.
    #[serde(rename = "box", deserialize_with = "pixel_box")]
    pub bbox: [i32; 4],
}

fn pixel_box<'de, D>(deserializer: D) -> Result<[i32; 4], D::Error>
where
    D: Deserializer<'de>,
{
    let raw = <[f64; 4]>::deserialize(deserializer)?;
    Ok(raw.map(|v| v as i32))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub faces: u32,
}

impl DetectionResult {
    /// Nothing detected and no faces.
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty() && self.faces == 0
    }

    pub fn labels(&self) -> Vec<String> {
        self.detections.iter().map(|d| d.label.clone()).collect()
    }

    /// Drops detections below `threshold` and rounds confidences to three
    /// decimals.
    pub fn filtered(mut self, threshold: f32) -> Self {
        self.detections.retain(|d| d.conf >= threshold);
        for detection in &mut self.detections {
            detection.conf = (detection.conf * 1000.0).round() / 1000.0;
        }
        self
    }
}

/// Source of frames and detections.
#[async_trait::async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    /// Captures one frame. `Ok(None)` when the camera had nothing to give.
    async fn read_frame(&self) -> Result<Option<Frame>, DetectorError>;

    /// Runs detection; only detections with `conf >= threshold` are returned.
    async fn detect(&self, frame: &Frame, threshold: f32) -> Result<DetectionResult, DetectorError>;
}
