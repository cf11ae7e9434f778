//! camman-core — Frame effects and inference overlays.
//!
//! Effects are pure frame-to-frame filters. The overlay runs a YOLO model
//! (detection, segmentation, classification or pose) via ONNX Runtime,
//! draws its results onto the frame and collects one record per entity.

pub mod draw;
pub mod effects;
pub mod labels;
pub mod overlay;
pub mod types;
pub mod yolo;

pub use draw::OverlayStyle;
pub use effects::{Effect, EffectError};
pub use overlay::{Overlay, OverlayError};
pub use types::{
    BoxPrediction, DetectionRecord, InferenceResult, Keypoint, Mode, Model, ModelError, Payload,
};
pub use yolo::YoloModel;
