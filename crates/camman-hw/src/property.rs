//! The fixed set of device properties the settings store knows about.
//!
//! Each property has one stable snake-case key used in settings files.
//! Backends map properties to their own control IDs (see
//! `camera::control_id` for V4L2).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureProperty {
    /// Reserved: asks the driver to open its settings dialog. Never applied on load.
    Settings,
    FrameWidth,
    FrameHeight,
    Exposure,
    AutoExposure,
    Zoom,
    Focus,
    Autofocus,
    Fps,
    Fourcc,
    FrameCount,
    Hue,
    Gain,
    Guid,
    Gamma,
    Format,
    Pan,
    Tilt,
    Roll,
    Iris,
    Trigger,
    Contrast,
    Sharpness,
    IsoSpeed,
    Backlight,
    Monochrome,
    Brightness,
    Saturation,
    BufferSize,
    ConvertRgb,
    Temperature,
    Rectification,
    WhiteBalanceRedV,
    WhiteBalanceBlueU,
}

impl CaptureProperty {
    pub const ALL: [CaptureProperty; 34] = [
        CaptureProperty::Settings,
        CaptureProperty::FrameWidth,
        CaptureProperty::FrameHeight,
        CaptureProperty::Exposure,
        CaptureProperty::AutoExposure,
        CaptureProperty::Zoom,
        CaptureProperty::Focus,
        CaptureProperty::Autofocus,
        CaptureProperty::Fps,
        CaptureProperty::Fourcc,
        CaptureProperty::FrameCount,
        CaptureProperty::Hue,
        CaptureProperty::Gain,
        CaptureProperty::Guid,
        CaptureProperty::Gamma,
        CaptureProperty::Format,
        CaptureProperty::Pan,
        CaptureProperty::Tilt,
        CaptureProperty::Roll,
        CaptureProperty::Iris,
        CaptureProperty::Trigger,
        CaptureProperty::Contrast,
        CaptureProperty::Sharpness,
        CaptureProperty::IsoSpeed,
        CaptureProperty::Backlight,
        CaptureProperty::Monochrome,
        CaptureProperty::Brightness,
        CaptureProperty::Saturation,
        CaptureProperty::BufferSize,
        CaptureProperty::ConvertRgb,
        CaptureProperty::Temperature,
        CaptureProperty::Rectification,
        CaptureProperty::WhiteBalanceRedV,
        CaptureProperty::WhiteBalanceBlueU,
    ];

    /// Key used in settings files.
    pub fn key(self) -> &'static str {
        match self {
            CaptureProperty::Settings => "settings",
            CaptureProperty::FrameWidth => "frame_width",
            CaptureProperty::FrameHeight => "frame_height",
            CaptureProperty::Exposure => "exposure",
            CaptureProperty::AutoExposure => "auto_exposure",
            CaptureProperty::Zoom => "zoom",
            CaptureProperty::Focus => "focus",
            CaptureProperty::Autofocus => "autofocus",
            CaptureProperty::Fps => "fps",
            CaptureProperty::Fourcc => "fourcc",
            CaptureProperty::FrameCount => "frame_count",
            CaptureProperty::Hue => "hue",
            CaptureProperty::Gain => "gain",
            CaptureProperty::Guid => "guid",
            CaptureProperty::Gamma => "gamma",
            CaptureProperty::Format => "format",
            CaptureProperty::Pan => "pan",
            CaptureProperty::Tilt => "tilt",
            CaptureProperty::Roll => "roll",
            CaptureProperty::Iris => "iris",
            CaptureProperty::Trigger => "trigger",
            CaptureProperty::Contrast => "contrast",
            CaptureProperty::Sharpness => "sharpness",
            CaptureProperty::IsoSpeed => "iso_speed",
            CaptureProperty::Backlight => "backlight",
            CaptureProperty::Monochrome => "monochrome",
            CaptureProperty::Brightness => "brightness",
            CaptureProperty::Saturation => "saturation",
            CaptureProperty::BufferSize => "buffer_size",
            CaptureProperty::ConvertRgb => "convert_rgb",
            CaptureProperty::Temperature => "temperature",
            CaptureProperty::Rectification => "rectification",
            CaptureProperty::WhiteBalanceRedV => "white_balance_red_v",
            CaptureProperty::WhiteBalanceBlueU => "white_balance_blue_u",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.key() == key)
    }

    /// Properties that are recorded but never written back to a device.
    pub fn is_reserved(self) -> bool {
        matches!(self, CaptureProperty::Settings)
    }
}

impl fmt::Display for CaptureProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for CaptureProperty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_key(s).ok_or_else(|| format!("unknown capture property: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_unique() {
        let mut keys: Vec<_> = CaptureProperty::ALL.iter().map(|p| p.key()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), CaptureProperty::ALL.len());
    }

    #[test]
    fn test_serde_key_matches_table() {
        for prop in CaptureProperty::ALL {
            let json = serde_json::to_string(&prop).unwrap();
            assert_eq!(json, format!("\"{}\"", prop.key()));
        }
    }

    #[test]
    fn test_from_key() {
        assert_eq!(
            CaptureProperty::from_key("white_balance_blue_u"),
            Some(CaptureProperty::WhiteBalanceBlueU)
        );
        assert_eq!(CaptureProperty::from_key("CAP_PROP_FOCUS"), None);
        assert!("iso_speed".parse::<CaptureProperty>().is_ok());
    }

    #[test]
    fn test_only_settings_is_reserved() {
        let reserved: Vec<_> = CaptureProperty::ALL
            .into_iter()
            .filter(|p| p.is_reserved())
            .collect();
        assert_eq!(reserved, vec![CaptureProperty::Settings]);
    }
}
