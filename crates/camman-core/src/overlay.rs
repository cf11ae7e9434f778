//! Inference overlay: run a model on a frame, draw its results and emit
//! one [`DetectionRecord`] per detected entity.
//!
//! The processor for the overlay's [`Mode`] is picked once in
//! [`Overlay::new`] and reused for every frame.

use crate::draw::{FontLoadError, OverlayStyle};
use crate::types::{
    round_up_confidence, DetectionRecord, InferenceResult, Mode, Model, Payload,
};
use camman_hw::Frame;
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use thiserror::Error;

type Cause = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("{mode} inference failed: {source}")]
    InferenceFailure {
        mode: Mode,
        #[source]
        source: Cause,
    },
    #[error(transparent)]
    Font(#[from] FontLoadError),
}

/// Shared drawing context handed to processors.
struct Context<'a> {
    labels: &'a [String],
    style: &'a OverlayStyle,
}

impl Context<'_> {
    fn label(&self, class_id: usize) -> String {
        self.labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| class_id.to_string())
    }
}

/// Per-mode drawing and record extraction.
trait Processor: Send {
    fn process(
        &self,
        image: &mut RgbImage,
        result: &InferenceResult,
        ctx: &Context<'_>,
        records: &mut Vec<DetectionRecord>,
    ) -> Result<(), Cause>;
}

struct DetectionProcessor;

impl Processor for DetectionProcessor {
    fn process(
        &self,
        image: &mut RgbImage,
        result: &InferenceResult,
        ctx: &Context<'_>,
        records: &mut Vec<DetectionRecord>,
    ) -> Result<(), Cause> {
        for pred in &result.boxes {
            let [x1, y1, x2, y2] = pred.xyxy.map(|v| v as i32);
            let confidence = round_up_confidence(pred.confidence);

            ctx.style.draw_box(image, [x1, y1, x2, y2]);
            let text = format!("{} {confidence}", ctx.label(pred.class_id));
            ctx.style.draw_label(image, x1, (y1 - 20).max(0), &text);

            records.push(DetectionRecord {
                class_id: pred.class_id,
                confidence,
                payload: Payload::Box { x1, y1, x2, y2 },
            });
        }
        Ok(())
    }
}

struct SegmentationProcessor;

impl Processor for SegmentationProcessor {
    fn process(
        &self,
        image: &mut RgbImage,
        result: &InferenceResult,
        ctx: &Context<'_>,
        records: &mut Vec<DetectionRecord>,
    ) -> Result<(), Cause> {
        let Some(masks) = &result.masks else {
            return Ok(());
        };
        if masks.len() != result.boxes.len() {
            return Err(format!(
                "{} masks for {} boxes",
                masks.len(),
                result.boxes.len()
            )
            .into());
        }

        for (mask, pred) in masks.iter().zip(&result.boxes) {
            // Contours are traced at frame size; the record keeps the model's mask.
            let fitted = fit_mask(mask, image.width(), image.height());
            for contour in find_contours::<i32>(&fitted) {
                if contour.border_type == BorderType::Outer && contour.parent.is_none() {
                    ctx.style.draw_contour(image, &contour.points);
                }
            }
            records.push(DetectionRecord {
                class_id: pred.class_id,
                confidence: round_up_confidence(pred.confidence),
                payload: Payload::Mask { mask: mask.clone() },
            });
        }
        Ok(())
    }
}

struct ClassifyProcessor;

impl Processor for ClassifyProcessor {
    fn process(
        &self,
        image: &mut RgbImage,
        result: &InferenceResult,
        ctx: &Context<'_>,
        records: &mut Vec<DetectionRecord>,
    ) -> Result<(), Cause> {
        let Some(probs) = &result.probs else {
            return Ok(());
        };
        for (class_id, prob) in probs.iter().enumerate() {
            let confidence = round_up_confidence(*prob);
            let text = format!("{} {confidence}", ctx.label(class_id));
            ctx.style.draw_stacked_label(image, class_id, &text);
            records.push(DetectionRecord {
                class_id,
                confidence,
                payload: Payload::Label { text },
            });
        }
        Ok(())
    }
}

struct PoseProcessor;

impl Processor for PoseProcessor {
    fn process(
        &self,
        image: &mut RgbImage,
        result: &InferenceResult,
        ctx: &Context<'_>,
        records: &mut Vec<DetectionRecord>,
    ) -> Result<(), Cause> {
        let Some(poses) = &result.keypoints else {
            return Ok(());
        };
        for (i, points) in poses.iter().enumerate() {
            for (x, y) in points.iter().filter_map(|kp| kp.xy()) {
                ctx.style.draw_marker(image, x as i32, y as i32);
            }
            let (class_id, confidence) = result
                .boxes
                .get(i)
                .map(|b| (b.class_id, round_up_confidence(b.confidence)))
                .unwrap_or((0, 0.0));
            records.push(DetectionRecord {
                class_id,
                confidence,
                payload: Payload::Keypoints {
                    points: points.clone(),
                },
            });
        }
        Ok(())
    }
}

/// Resize a mask to the frame when the model reported it at another size.
fn fit_mask(mask: &GrayImage, width: u32, height: u32) -> GrayImage {
    if mask.dimensions() == (width, height) {
        mask.clone()
    } else {
        imageops::resize(mask, width, height, FilterType::Nearest)
    }
}

fn processor_for(mode: Mode) -> Box<dyn Processor> {
    match mode {
        Mode::Detection => Box::new(DetectionProcessor),
        Mode::Segmentation => Box::new(SegmentationProcessor),
        Mode::Classify => Box::new(ClassifyProcessor),
        Mode::Pose => Box::new(PoseProcessor),
    }
}

/// A model plus the processor for its mode.
pub struct Overlay {
    mode: Mode,
    model: Box<dyn Model>,
    processor: Box<dyn Processor>,
    labels: Vec<String>,
    style: OverlayStyle,
}

impl Overlay {
    pub fn new(mode: Mode, model: Box<dyn Model>) -> Self {
        tracing::info!(%mode, "overlay ready");
        Self {
            mode,
            model,
            processor: processor_for(mode),
            labels: Vec::new(),
            style: OverlayStyle::default(),
        }
    }

    /// Class names indexed by class id. Unnamed ids are shown as numbers.
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_style(mut self, style: OverlayStyle) -> Self {
        self.style = style;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Run the model, draw every result onto the frame and collect records.
    pub fn annotate(&mut self, frame: Frame) -> Result<(Frame, Vec<DetectionRecord>), OverlayError> {
        let mode = self.mode;
        let failure = |source: Cause| OverlayError::InferenceFailure { mode, source };

        let mut image = frame.into_rgb();
        let results = self
            .model
            .infer(&image)
            .map_err(|e| failure(Box::new(e)))?;

        let ctx = Context {
            labels: &self.labels,
            style: &self.style,
        };
        let mut records = Vec::new();
        for result in &results {
            self.processor
                .process(&mut image, result, &ctx, &mut records)
                .map_err(failure)?;
        }

        tracing::debug!(%mode, records = records.len(), "frame annotated");
        Ok((Frame::Color(image), records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw::MAGENTA;
    use crate::types::{BoxPrediction, Keypoint, ModelError};
    use image::{Luma, Rgb};

    /// Returns the same canned results for every frame.
    struct CannedModel(Vec<InferenceResult>);

    impl Model for CannedModel {
        fn infer(&mut self, _image: &RgbImage) -> Result<Vec<InferenceResult>, ModelError> {
            Ok(self.0.clone())
        }
    }

    struct FailingModel;

    impl Model for FailingModel {
        fn infer(&mut self, _image: &RgbImage) -> Result<Vec<InferenceResult>, ModelError> {
            Err(ModelError::InvalidOutput("boom".into()))
        }
    }

    fn overlay(mode: Mode, result: InferenceResult) -> Overlay {
        Overlay::new(mode, Box::new(CannedModel(vec![result])))
    }

    fn blank() -> Frame {
        Frame::Color(RgbImage::new(40, 40))
    }

    fn pred(xyxy: [f32; 4], confidence: f32, class_id: usize) -> BoxPrediction {
        BoxPrediction {
            xyxy,
            confidence,
            class_id,
        }
    }

    #[test]
    fn test_classify_records_every_class() {
        let mut overlay = overlay(
            Mode::Classify,
            InferenceResult {
                probs: Some(vec![0.2, 0.5, 0.3]),
                ..Default::default()
            },
        );
        let (_, records) = overlay.annotate(blank()).unwrap();
        assert_eq!(records.len(), 3);
        let confs: Vec<f32> = records.iter().map(|r| r.confidence).collect();
        let ids: Vec<usize> = records.iter().map(|r| r.class_id).collect();
        assert_eq!(confs, vec![0.2, 0.5, 0.3]);
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_classify_label_text_uses_names() {
        let mut overlay = overlay(
            Mode::Classify,
            InferenceResult {
                probs: Some(vec![0.25, 0.75]),
                ..Default::default()
            },
        )
        .with_labels(vec!["cat".into()]);
        let (_, records) = overlay.annotate(blank()).unwrap();
        assert_eq!(records[0].payload, Payload::Label { text: "cat 0.25".into() });
        assert_eq!(records[1].payload, Payload::Label { text: "1 0.75".into() });
    }

    #[test]
    fn test_detection_draws_and_records_boxes() {
        let mut overlay = overlay(
            Mode::Detection,
            InferenceResult {
                boxes: vec![pred([5.4, 6.9, 30.2, 25.0], 0.871, 2)],
                ..Default::default()
            },
        );
        let (frame, records) = overlay.annotate(blank()).unwrap();
        assert_eq!(
            records,
            vec![DetectionRecord {
                class_id: 2,
                confidence: 0.88,
                payload: Payload::Box { x1: 5, y1: 6, x2: 30, y2: 25 },
            }]
        );
        let Frame::Color(img) = frame else {
            panic!("overlay yields color frames");
        };
        assert_eq!(img.get_pixel(5, 15), &MAGENTA);
        assert_eq!(img.get_pixel(15, 15), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_segmentation_without_masks_yields_nothing() {
        let mut overlay = overlay(
            Mode::Segmentation,
            InferenceResult {
                boxes: vec![pred([0.0, 0.0, 10.0, 10.0], 0.9, 0)],
                masks: None,
                ..Default::default()
            },
        );
        let (_, records) = overlay.annotate(blank()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_segmentation_draws_outer_contour() {
        let mut mask = GrayImage::new(40, 40);
        for y in 10..20 {
            for x in 10..20 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let mut overlay = overlay(
            Mode::Segmentation,
            InferenceResult {
                boxes: vec![pred([10.0, 10.0, 20.0, 20.0], 0.9, 0)],
                masks: Some(vec![mask.clone()]),
                ..Default::default()
            },
        );
        let (frame, records) = overlay.annotate(blank()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, Payload::Mask { mask });
        let Frame::Color(img) = frame else {
            panic!("overlay yields color frames");
        };
        assert_eq!(img.get_pixel(10, 15), &MAGENTA);
        assert_eq!(img.get_pixel(15, 15), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_segmentation_records_mask_at_model_size() {
        let mut mask = GrayImage::new(20, 20);
        for y in 5..10 {
            for x in 5..10 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let mut overlay = overlay(
            Mode::Segmentation,
            InferenceResult {
                boxes: vec![pred([10.0, 10.0, 20.0, 20.0], 0.9, 0)],
                masks: Some(vec![mask.clone()]),
                ..Default::default()
            },
        );
        let (frame, records) = overlay.annotate(blank()).unwrap();
        assert_eq!(records[0].payload, Payload::Mask { mask });
        let Frame::Color(img) = frame else {
            panic!("overlay yields color frames");
        };
        assert!(img.pixels().any(|p| p == &MAGENTA));
    }

    #[test]
    fn test_segmentation_mask_count_mismatch_fails() {
        let mut overlay = overlay(
            Mode::Segmentation,
            InferenceResult {
                boxes: vec![],
                masks: Some(vec![GrayImage::new(40, 40)]),
                ..Default::default()
            },
        );
        assert!(matches!(
            overlay.annotate(blank()),
            Err(OverlayError::InferenceFailure { mode: Mode::Segmentation, .. })
        ));
    }

    #[test]
    fn test_pose_marks_keypoints_with_two_coords() {
        let points = vec![
            Keypoint(vec![8.0, 8.0, 0.9]),
            Keypoint(vec![30.0]),
            Keypoint(vec![20.0, 30.0]),
        ];
        let mut overlay = overlay(
            Mode::Pose,
            InferenceResult {
                boxes: vec![pred([0.0, 0.0, 39.0, 39.0], 0.6, 0)],
                keypoints: Some(vec![points.clone()]),
                ..Default::default()
            },
        );
        let (frame, records) = overlay.annotate(blank()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, Payload::Keypoints { points });
        assert_eq!(records[0].confidence, 0.6);
        let Frame::Color(img) = frame else {
            panic!("overlay yields color frames");
        };
        assert_eq!(img.get_pixel(8, 8), &MAGENTA);
        assert_eq!(img.get_pixel(20, 30), &MAGENTA);
    }

    #[test]
    fn test_model_error_is_inference_failure() {
        let mut overlay = Overlay::new(Mode::Detection, Box::new(FailingModel));
        let err = overlay.annotate(blank()).unwrap_err();
        assert!(matches!(err, OverlayError::InferenceFailure { mode: Mode::Detection, .. }));
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("boom"));
    }

    #[test]
    fn test_gray_frame_is_annotated_in_color() {
        let mut overlay = overlay(Mode::Detection, InferenceResult::default());
        let (frame, records) = overlay
            .annotate(Frame::Gray(GrayImage::new(8, 8)))
            .unwrap();
        assert!(records.is_empty());
        assert_eq!(frame.channels(), 3);
    }
}
