//! Backend seams: hardware capture, window enumeration and screen grabs.
//!
//! The registry only talks to these traits. The shipped implementations are
//! [`crate::V4lBackend`] for cameras and [`crate::XcapWindows`] /
//! [`crate::XcapScreen`] for virtual-window sources.

use crate::property::CaptureProperty;
use image::{RgbImage, RgbaImage};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("device {0} could not be opened")]
    NotOpened(u32),
    #[error("backend {0} is not available on this platform")]
    UnsupportedHint(BackendHint),
    #[error("device has been released")]
    Closed,
    #[error("read failed: {0}")]
    Read(String),
    #[error("property {0} is not supported by this device")]
    UnsupportedProperty(CaptureProperty),
    #[error("failed to set {property} to {value}: {reason}")]
    SetProperty {
        property: CaptureProperty,
        value: f64,
        reason: String,
    },
    #[error("window query failed: {0}")]
    Window(String),
    #[error("screen capture failed: {0}")]
    Screen(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Preferred capture driver when opening a hardware index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendHint {
    /// Resolve to the platform's native driver.
    #[default]
    Auto,
    V4l2,
    DirectShow,
    MediaFoundation,
    AvFoundation,
}

impl BackendHint {
    /// The native driver for the current target OS.
    pub fn platform_default() -> Self {
        if cfg!(target_os = "windows") {
            BackendHint::DirectShow
        } else if cfg!(target_os = "macos") {
            BackendHint::AvFoundation
        } else {
            BackendHint::V4l2
        }
    }

    /// `Auto` resolved to a concrete driver; other hints pass through.
    pub fn resolve(self) -> Self {
        match self {
            BackendHint::Auto => Self::platform_default(),
            other => other,
        }
    }
}

impl fmt::Display for BackendHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendHint::Auto => "auto",
            BackendHint::V4l2 => "v4l2",
            BackendHint::DirectShow => "dshow",
            BackendHint::MediaFoundation => "msmf",
            BackendHint::AvFoundation => "avfoundation",
        };
        f.write_str(name)
    }
}

impl FromStr for BackendHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(BackendHint::Auto),
            "v4l2" | "v4l" => Ok(BackendHint::V4l2),
            "dshow" | "directshow" => Ok(BackendHint::DirectShow),
            "msmf" | "mediafoundation" => Ok(BackendHint::MediaFoundation),
            "avfoundation" | "avf" => Ok(BackendHint::AvFoundation),
            other => Err(format!("unknown capture backend: {other}")),
        }
    }
}

/// Screen-space rectangle of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenRect {
    pub top: i32,
    pub left: i32,
    pub width: u32,
    pub height: u32,
}

/// An opened capture resource. Dropping it must release the native handle.
pub trait CaptureDevice: Send {
    fn is_open(&self) -> bool;

    /// One blocking read, decoded to RGB.
    fn read(&mut self) -> Result<RgbImage, BackendError>;

    /// Current property value, or `None` if the device does not report it.
    fn get(&self, property: CaptureProperty) -> Option<f64>;

    fn set(&mut self, property: CaptureProperty, value: f64) -> Result<(), BackendError>;

    fn release(&mut self);
}

/// Opens hardware capture devices by index.
pub trait CaptureBackend: Send {
    fn open(&self, index: u32, hint: BackendHint) -> Result<Box<dyn CaptureDevice>, BackendError>;
}

/// Enumerates top-level application windows.
pub trait WindowBackend: Send {
    fn titles(&self) -> Result<Vec<String>, BackendError>;

    /// Current screen rectangle of the first window whose title matches exactly.
    fn find(&self, title: &str) -> Result<Option<ScreenRect>, BackendError>;
}

/// Grabs raw pixels from a screen region.
pub trait ScreenGrabber: Send {
    fn grab(&self, rect: &ScreenRect) -> Result<RgbaImage, BackendError>;
}
