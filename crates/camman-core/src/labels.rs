//! Default class names for the pretrained model families.

use crate::types::Mode;

/// The 80 COCO classes used by the detection and segmentation models.
pub const COCO: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Built-in names for a mode. Classification models ship 1000 ImageNet
/// classes, which are not embedded; callers supply them via a labels file.
pub fn default_labels(mode: Mode) -> Vec<String> {
    match mode {
        Mode::Detection | Mode::Segmentation => COCO.iter().map(|s| s.to_string()).collect(),
        Mode::Pose => vec!["person".to_string()],
        Mode::Classify => Vec::new(),
    }
}

/// Parse a labels file: one class name per line, blank lines ignored.
pub fn parse_labels(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_labels() {
        assert_eq!(default_labels(Mode::Detection).len(), 80);
        assert_eq!(default_labels(Mode::Pose), vec!["person"]);
        assert!(default_labels(Mode::Classify).is_empty());
    }

    #[test]
    fn test_parse_labels() {
        assert_eq!(parse_labels("cat\n\n dog \n"), vec!["cat", "dog"]);
    }
}
