use image::{GrayImage, RgbImage};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Which pretrained model family the overlay runs. Chosen once per overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Detection,
    Segmentation,
    Classify,
    Pose,
}

impl Mode {
    /// Model artifact loaded for this mode when none is given explicitly.
    pub fn default_model_file(self) -> &'static str {
        match self {
            Mode::Detection => "yolov8n.onnx",
            Mode::Segmentation => "yolov8n-seg.onnx",
            Mode::Classify => "yolov8n-cls.onnx",
            Mode::Pose => "yolov8n-pose.onnx",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Detection => "detection",
            Mode::Segmentation => "segmentation",
            Mode::Classify => "classify",
            Mode::Pose => "pose",
        };
        f.write_str(name)
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "detection" | "detect" => Ok(Mode::Detection),
            "segmentation" | "segment" | "seg" => Ok(Mode::Segmentation),
            "classify" | "classification" | "cls" => Ok(Mode::Classify),
            "pose" => Ok(Mode::Pose),
            other => Err(format!(
                "invalid AI mode {other:?}; expected detection, segmentation, classify or pose"
            )),
        }
    }
}

/// One keypoint as reported by the model: `[x, y]` or `[x, y, confidence]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Keypoint(pub Vec<f32>);

impl Keypoint {
    /// Pixel position, if the keypoint carries at least two coordinates.
    pub fn xy(&self) -> Option<(f32, f32)> {
        match self.0.as_slice() {
            [x, y, ..] => Some((*x, *y)),
            _ => None,
        }
    }
}

/// A box predicted by the model, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxPrediction {
    /// `[x_min, y_min, x_max, y_max]`
    pub xyxy: [f32; 4],
    pub confidence: f32,
    pub class_id: usize,
}

/// Raw model output for one frame. Which fields are populated depends on
/// the model family; `masks` and `keypoints` are index-aligned with `boxes`.
#[derive(Debug, Clone, Default)]
pub struct InferenceResult {
    pub boxes: Vec<BoxPrediction>,
    /// Binary masks (0 or 255) at frame resolution.
    pub masks: Option<Vec<GrayImage>>,
    /// Per-class probabilities.
    pub probs: Option<Vec<f32>>,
    /// One keypoint list per detected pose.
    pub keypoints: Option<Vec<Vec<Keypoint>>>,
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("unexpected model output: {0}")]
    InvalidOutput(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Model backend seam: one frame in, zero or more results out.
pub trait Model: Send {
    fn infer(&mut self, image: &RgbImage) -> Result<Vec<InferenceResult>, ModelError>;
}

/// One structured result per detected entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
    pub class_id: usize,
    /// Rounded up to two decimals.
    pub confidence: f32,
    #[serde(flatten)]
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Payload {
    Box {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
    },
    Mask {
        #[serde(serialize_with = "serialize_mask")]
        mask: GrayImage,
    },
    Label {
        text: String,
    },
    Keypoints {
        points: Vec<Keypoint>,
    },
}

#[derive(Serialize)]
struct MaskSummary {
    width: u32,
    height: u32,
    area: usize,
}

fn serialize_mask<S: Serializer>(mask: &GrayImage, serializer: S) -> Result<S::Ok, S::Error> {
    MaskSummary {
        width: mask.width(),
        height: mask.height(),
        area: mask.pixels().filter(|p| p[0] > 0).count(),
    }
    .serialize(serializer)
}

/// Round a confidence up to two decimals.
///
/// Values already on a hundredth (up to float noise, e.g. `0.3f32`) are kept.
pub fn round_up_confidence(confidence: f32) -> f32 {
    let scaled = confidence as f64 * 100.0;
    let nearest = scaled.round();
    let hundredths = if (scaled - nearest).abs() < 1e-4 {
        nearest
    } else {
        scaled.ceil()
    };
    (hundredths / 100.0) as f32
}
