//! YOLOv8 ONNX backend via ONNX Runtime.
//!
//! One session per model family. Detection, segmentation and pose heads share
//! the `[1, 4 + classes + extra, anchors]` layout and are decoded the same
//! way, followed by per-class NMS. Classification heads produce one
//! probability vector per frame.

use crate::types::{BoxPrediction, InferenceResult, Keypoint, Mode, Model, ModelError};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

pub const DEFAULT_CONFIDENCE: f32 = 0.25;
pub const DEFAULT_IOU: f32 = 0.45;
const DETECT_INPUT_SIZE: u32 = 640;
const CLASSIFY_INPUT_SIZE: u32 = 224;
const LETTERBOX_FILL: f32 = 114.0;
const MAX_DETECTIONS: usize = 300;
const MASK_THRESHOLD: f32 = 0.5;
const POSE_KEYPOINTS: usize = 17;
const POSE_KEYPOINT_DIMS: usize = 3;

/// Mapping from letterboxed model input back to frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    frame_w: u32,
    frame_h: u32,
    input_size: u32,
}

impl Letterbox {
    fn new(frame_w: u32, frame_h: u32, input_size: u32) -> Self {
        let scale = (input_size as f32 / frame_w as f32).min(input_size as f32 / frame_h as f32);
        let new_w = (frame_w as f32 * scale).round();
        let new_h = (frame_h as f32 * scale).round();
        Self {
            scale,
            pad_x: ((input_size as f32 - new_w) / 2.0).floor(),
            pad_y: ((input_size as f32 - new_h) / 2.0).floor(),
            frame_w,
            frame_h,
            input_size,
        }
    }

    fn resized(&self) -> (u32, u32) {
        (
            (self.frame_w as f32 * self.scale).round() as u32,
            (self.frame_h as f32 * self.scale).round() as u32,
        )
    }

    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }

    fn to_input(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale + self.pad_x, y * self.scale + self.pad_y)
    }
}

/// A box candidate plus the per-anchor values following the class scores
/// (mask coefficients or keypoints).
#[derive(Debug, Clone)]
struct Candidate {
    pred: BoxPrediction,
    extra: Vec<f32>,
}

/// YOLOv8 model for one [`Mode`].
pub struct YoloModel {
    session: Session,
    mode: Mode,
    input_size: u32,
    confidence: f32,
    iou: f32,
}

impl YoloModel {
    /// Load an ONNX export from `path`.
    pub fn load(path: &Path, mode: Mode) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::ModelNotFound(path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(path)?;

        tracing::info!(
            path = %path.display(),
            %mode,
            inputs = ?session.inputs().iter().map(|i| i.name().to_string()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name().to_string()).collect::<Vec<_>>(),
            "loaded YOLO model"
        );

        let input_size = match mode {
            Mode::Classify => CLASSIFY_INPUT_SIZE,
            _ => DETECT_INPUT_SIZE,
        };

        Ok(Self {
            session,
            mode,
            input_size,
            confidence: DEFAULT_CONFIDENCE,
            iou: DEFAULT_IOU,
        })
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_iou(mut self, iou: f32) -> Self {
        self.iou = iou;
        self
    }
}

impl Model for YoloModel {
    fn infer(&mut self, image: &RgbImage) -> Result<Vec<InferenceResult>, ModelError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ModelError::InvalidOutput("empty input frame".into()));
        }

        if self.mode == Mode::Classify {
            let input = classify_tensor(image, self.input_size);
            let outputs = self
                .session
                .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (_, data) = outputs[0].try_extract_tensor::<f32>()?;
            let probs = normalize_probs(data);
            tracing::debug!(classes = probs.len(), "classification done");
            return Ok(vec![InferenceResult {
                probs: Some(probs),
                ..InferenceResult::default()
            }]);
        }

        let (input, letterbox) = letterbox_tensor(image, self.input_size);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let (rows, anchors) = head_dims(shape)?;

        let extra = match self.mode {
            Mode::Segmentation => {
                if outputs.len() < 2 {
                    return Err(ModelError::InvalidOutput(
                        "segmentation model needs a prototype output".into(),
                    ));
                }
                let (proto_shape, _) = outputs[1].try_extract_tensor::<f32>()?;
                proto_shape.get(1).copied().unwrap_or(0) as usize
            }
            Mode::Pose => POSE_KEYPOINTS * POSE_KEYPOINT_DIMS,
            _ => 0,
        };
        if rows <= 4 + extra {
            return Err(ModelError::InvalidOutput(format!(
                "head has {rows} rows, expected more than {}",
                4 + extra
            )));
        }
        let num_classes = rows - 4 - extra;

        let candidates = decode_candidates(data, rows, anchors, num_classes, &letterbox, self.confidence);
        let kept = nms(candidates, self.iou);
        tracing::debug!(mode = %self.mode, count = kept.len(), "detections after NMS");

        let mut result = InferenceResult::default();
        match self.mode {
            Mode::Segmentation => {
                let (proto_shape, protos) = outputs[1].try_extract_tensor::<f32>()?;
                let dims = proto_dims(proto_shape)?;
                let masks = kept
                    .iter()
                    .map(|c| decode_mask(&c.extra, protos, dims, &c.pred, &letterbox))
                    .collect();
                result.masks = Some(masks);
            }
            Mode::Pose => {
                let poses = kept.iter().map(|c| decode_keypoints(&c.extra, &letterbox)).collect();
                result.keypoints = Some(poses);
            }
            _ => {}
        }
        result.boxes = kept.into_iter().map(|c| c.pred).collect();
        Ok(vec![result])
    }
}

fn head_dims(shape: &[i64]) -> Result<(usize, usize), ModelError> {
    match shape {
        [1, rows, anchors] if *rows > 0 && *anchors > 0 => Ok((*rows as usize, *anchors as usize)),
        other => Err(ModelError::InvalidOutput(format!(
            "expected [1, rows, anchors], got {other:?}"
        ))),
    }
}

/// `(channels, height, width)` of the mask prototypes.
fn proto_dims(shape: &[i64]) -> Result<(usize, usize, usize), ModelError> {
    match shape {
        [1, c, h, w] if *c > 0 && *h > 0 && *w > 0 => Ok((*c as usize, *h as usize, *w as usize)),
        other => Err(ModelError::InvalidOutput(format!(
            "expected prototypes [1, c, h, w], got {other:?}"
        ))),
    }
}

/// Resize into a square NCHW tensor in 0..=1, padded with gray.
fn letterbox_tensor(image: &RgbImage, input_size: u32) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::new(image.width(), image.height(), input_size);
    let (new_w, new_h) = letterbox.resized();
    let resized = imageops::resize(image, new_w.max(1), new_h.max(1), FilterType::Triangle);

    let size = input_size as usize;
    let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), LETTERBOX_FILL / 255.0);
    let (off_x, off_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    for (x, y, px) in resized.enumerate_pixels() {
        let (tx, ty) = (x as usize + off_x, y as usize + off_y);
        if tx >= size || ty >= size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = px[c] as f32 / 255.0;
        }
    }
    (tensor, letterbox)
}

/// Plain square resize for classification heads.
fn classify_tensor(image: &RgbImage, input_size: u32) -> Array4<f32> {
    let resized = imageops::resize(image, input_size, input_size, FilterType::Triangle);
    let size = input_size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, px) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = px[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Softmax unless the head already emits a distribution.
fn normalize_probs(raw: &[f32]) -> Vec<f32> {
    let sum: f32 = raw.iter().sum();
    if raw.iter().all(|p| (0.0..=1.0).contains(p)) && (sum - 1.0).abs() < 1e-3 {
        return raw.to_vec();
    }
    let max = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = raw.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / total).collect()
}

/// Decode a channel-major `[rows, anchors]` head into thresholded candidates.
fn decode_candidates(
    data: &[f32],
    rows: usize,
    anchors: usize,
    num_classes: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Candidate> {
    let at = |row: usize, i: usize| data.get(row * anchors + i).copied().unwrap_or(0.0);
    let (max_x, max_y) = (letterbox.frame_w as f32, letterbox.frame_h as f32);

    let mut candidates = Vec::new();
    for i in 0..anchors {
        let Some((class_id, score)) = (0..num_classes)
            .map(|c| (c, at(4 + c, i)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            continue;
        };
        if score <= threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        let (x1, y1) = letterbox.to_frame(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_frame(cx + w / 2.0, cy + h / 2.0);

        candidates.push(Candidate {
            pred: BoxPrediction {
                xyxy: [
                    x1.clamp(0.0, max_x),
                    y1.clamp(0.0, max_y),
                    x2.clamp(0.0, max_x),
                    y2.clamp(0.0, max_y),
                ],
                confidence: score,
                class_id,
            },
            extra: (4 + num_classes..rows).map(|r| at(r, i)).collect(),
        });
    }
    candidates
}

/// Per-class non-maximum suppression, highest confidence first.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.pred.confidence.total_cmp(&a.pred.confidence));

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let overlaps = keep.iter().any(|k| {
            k.pred.class_id == candidate.pred.class_id
                && iou(&k.pred.xyxy, &candidate.pred.xyxy) > iou_threshold
        });
        if !overlaps {
            keep.push(candidate);
            if keep.len() == MAX_DETECTIONS {
                break;
            }
        }
    }
    keep
}

/// Intersection-over-Union of two `xyxy` boxes.
fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    let union = (a[2] - a[0]) * (a[3] - a[1]) + (b[2] - b[0]) * (b[3] - b[1]) - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Binary mask at frame resolution, cropped to the box.
fn decode_mask(
    coeffs: &[f32],
    protos: &[f32],
    (channels, mh, mw): (usize, usize, usize),
    pred: &BoxPrediction,
    letterbox: &Letterbox,
) -> GrayImage {
    let mut mask = GrayImage::new(letterbox.frame_w, letterbox.frame_h);
    let [x1, y1, x2, y2] = pred.xyxy;
    let (sx, sy) = (
        mw as f32 / letterbox.input_size as f32,
        mh as f32 / letterbox.input_size as f32,
    );

    let x_range = x1.floor().max(0.0) as u32..(x2.ceil() as u32).min(letterbox.frame_w);
    for y in y1.floor().max(0.0) as u32..(y2.ceil() as u32).min(letterbox.frame_h) {
        for x in x_range.clone() {
            let (ix, iy) = letterbox.to_input(x as f32 + 0.5, y as f32 + 0.5);
            let px = ((ix * sx) as usize).min(mw - 1);
            let py = ((iy * sy) as usize).min(mh - 1);
            let logit: f32 = coeffs
                .iter()
                .take(channels)
                .enumerate()
                .map(|(k, c)| c * protos.get(k * mh * mw + py * mw + px).copied().unwrap_or(0.0))
                .sum();
            if sigmoid(logit) > MASK_THRESHOLD {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
    }
    mask
}

fn decode_keypoints(values: &[f32], letterbox: &Letterbox) -> Vec<Keypoint> {
    values
        .chunks_exact(POSE_KEYPOINT_DIMS)
        .map(|kp| {
            let (x, y) = letterbox.to_frame(kp[0], kp[1]);
            Keypoint(vec![x, y, kp[2]])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(w: u32, h: u32) -> Letterbox {
        Letterbox::new(w, h, w.max(h))
    }

    fn cand(xyxy: [f32; 4], confidence: f32, class_id: usize) -> Candidate {
        Candidate {
            pred: BoxPrediction {
                xyxy,
                confidence,
                class_id,
            },
            extra: Vec::new(),
        }
    }

    #[test]
    fn test_letterbox_wide_frame() {
        let lb = Letterbox::new(1280, 720, 640);
        assert_eq!(lb.scale, 0.5);
        assert_eq!(lb.resized(), (640, 360));
        assert_eq!((lb.pad_x, lb.pad_y), (0.0, 140.0));
        assert_eq!(lb.to_frame(320.0, 320.0), (640.0, 360.0));
        assert_eq!(lb.to_input(640.0, 360.0), (320.0, 320.0));
    }

    #[test]
    fn test_letterbox_tensor_pads_with_gray() {
        let image = RgbImage::from_pixel(64, 32, image::Rgb([255, 0, 0]));
        let (tensor, lb) = letterbox_tensor(&image, 64);
        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);
        assert_eq!(lb.pad_y, 16.0);
        assert!((tensor[[0, 0, 0, 0]] - 114.0 / 255.0).abs() < 1e-6);
        assert_eq!(tensor[[0, 0, 32, 32]], 1.0);
        assert_eq!(tensor[[0, 1, 32, 32]], 0.0);
    }

    #[test]
    fn test_iou() {
        assert_eq!(iou(&[0.0, 0.0, 10.0, 10.0], &[0.0, 0.0, 10.0, 10.0]), 1.0);
        assert_eq!(iou(&[0.0, 0.0, 10.0, 10.0], &[20.0, 20.0, 30.0, 30.0]), 0.0);
        let half = iou(&[0.0, 0.0, 10.0, 10.0], &[5.0, 0.0, 15.0, 10.0]);
        assert!((half - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_is_per_class() {
        let kept = nms(
            vec![
                cand([0.0, 0.0, 10.0, 10.0], 0.8, 0),
                cand([1.0, 1.0, 11.0, 11.0], 0.9, 0),
                cand([1.0, 1.0, 11.0, 11.0], 0.7, 1),
                cand([50.0, 50.0, 60.0, 60.0], 0.6, 0),
            ],
            0.45,
        );
        let confs: Vec<f32> = kept.iter().map(|c| c.pred.confidence).collect();
        assert_eq!(confs, vec![0.9, 0.7, 0.6]);
    }

    #[test]
    fn test_decode_candidates() {
        // 4 box rows + 2 classes + 1 extra row, 3 anchors.
        let anchors = 3;
        #[rustfmt::skip]
        let data = vec![
            10.0, 50.0, 80.0, // cx
            10.0, 50.0, 80.0, // cy
            4.0, 20.0, 8.0,   // w
            4.0, 20.0, 8.0,   // h
            0.9, 0.1, 0.2,    // class 0
            0.05, 0.8, 0.1,   // class 1
            7.0, 8.0, 9.0,    // extra
        ];
        let lb = identity(100, 100);
        let cands = decode_candidates(&data, 7, anchors, 2, &lb, 0.25);
        assert_eq!(cands.len(), 2);
        assert_eq!(cands[0].pred.class_id, 0);
        assert_eq!(cands[0].pred.xyxy, [8.0, 8.0, 12.0, 12.0]);
        assert_eq!(cands[0].extra, vec![7.0]);
        assert_eq!(cands[1].pred.class_id, 1);
        assert_eq!(cands[1].pred.xyxy, [40.0, 40.0, 60.0, 60.0]);
    }

    #[test]
    fn test_decode_candidates_clamps_to_frame() {
        let data = vec![1.0, 1.0, 10.0, 10.0, 0.9];
        let cands = decode_candidates(&data, 5, 1, 1, &identity(50, 50), 0.25);
        assert_eq!(cands[0].pred.xyxy, [0.0, 0.0, 6.0, 6.0]);
    }

    #[test]
    fn test_normalize_probs() {
        assert_eq!(normalize_probs(&[0.2, 0.5, 0.3]), vec![0.2, 0.5, 0.3]);
        let soft = normalize_probs(&[1.0, 1.0]);
        assert!((soft[0] - 0.5).abs() < 1e-6);
        assert!((soft.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_decode_mask_crops_to_box() {
        // One prototype channel, positive everywhere.
        let protos = vec![5.0; 4 * 4];
        let lb = identity(8, 8);
        let pred = BoxPrediction {
            xyxy: [2.0, 2.0, 6.0, 4.0],
            confidence: 0.9,
            class_id: 0,
        };
        let mask = decode_mask(&[1.0], &protos, (1, 4, 4), &pred, &lb);
        assert_eq!(mask.dimensions(), (8, 8));
        let area = mask.pixels().filter(|p| p[0] == 255).count();
        assert_eq!(area, 4 * 2);
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_decode_mask_negative_logits_empty() {
        let protos = vec![-5.0; 4];
        let pred = BoxPrediction {
            xyxy: [0.0, 0.0, 4.0, 4.0],
            confidence: 0.9,
            class_id: 0,
        };
        let mask = decode_mask(&[1.0], &protos, (1, 2, 2), &pred, &identity(4, 4));
        assert!(mask.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn test_decode_keypoints() {
        let lb = Letterbox::new(1280, 720, 640);
        let kps = decode_keypoints(&[320.0, 320.0, 0.9, 0.0, 140.0, 0.1], &lb);
        assert_eq!(kps.len(), 2);
        assert_eq!(kps[0], Keypoint(vec![640.0, 360.0, 0.9]));
        assert_eq!(kps[1].xy(), Some((0.0, 0.0)));
    }

    #[test]
    fn test_head_dims() {
        assert_eq!(head_dims(&[1, 84, 8400]).unwrap(), (84, 8400));
        assert!(head_dims(&[1, 1000]).is_err());
        assert_eq!(proto_dims(&[1, 32, 160, 160]).unwrap(), (32, 160, 160));
    }

    #[test]
    fn test_load_missing_model() {
        let err = YoloModel::load(Path::new("/nonexistent/yolov8n.onnx"), Mode::Detection)
            .err()
            .unwrap();
        assert!(matches!(err, ModelError::ModelNotFound(_)));
    }
}
