//! V4L2 camera capture via the `v4l` crate.

use crate::backend::{BackendError, BackendHint, CaptureBackend, CaptureDevice};
use crate::frame;
use crate::property::CaptureProperty;
use image::RgbImage;
use std::path::Path;
use v4l::buffer::Type as BufType;
use v4l::control::{Control, Value};
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::FourCC;

const V4L2_CID_BASE: u32 = 0x0098_0900;
const V4L2_CID_CAMERA_CLASS_BASE: u32 = 0x009a_0900;

/// Buffers requested per mmap stream.
const STREAM_BUFFERS: u32 = 4;

/// V4L2 control ID for a property, if the property maps to a plain control.
///
/// Resolution, pixel format and frame rate are negotiated through the format
/// and streaming-parameter ioctls instead and are handled separately.
pub fn control_id(property: CaptureProperty) -> Option<u32> {
    use CaptureProperty::*;

    let id = match property {
        Brightness => V4L2_CID_BASE,
        Contrast => V4L2_CID_BASE + 1,
        Saturation => V4L2_CID_BASE + 2,
        Hue => V4L2_CID_BASE + 3,
        WhiteBalanceRedV => V4L2_CID_BASE + 14,
        WhiteBalanceBlueU => V4L2_CID_BASE + 15,
        Gamma => V4L2_CID_BASE + 16,
        Gain => V4L2_CID_BASE + 19,
        Temperature => V4L2_CID_BASE + 26,
        Sharpness => V4L2_CID_BASE + 27,
        Backlight => V4L2_CID_BASE + 28,
        AutoExposure => V4L2_CID_CAMERA_CLASS_BASE + 1,
        Exposure => V4L2_CID_CAMERA_CLASS_BASE + 2,
        Pan => V4L2_CID_CAMERA_CLASS_BASE + 8,
        Tilt => V4L2_CID_CAMERA_CLASS_BASE + 9,
        Focus => V4L2_CID_CAMERA_CLASS_BASE + 10,
        Autofocus => V4L2_CID_CAMERA_CLASS_BASE + 12,
        Zoom => V4L2_CID_CAMERA_CLASS_BASE + 13,
        Iris => V4L2_CID_CAMERA_CLASS_BASE + 17,
        IsoSpeed => V4L2_CID_CAMERA_CLASS_BASE + 23,
        _ => return None,
    };
    Some(id)
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Motion-JPEG, one JPEG image per buffer.
    Mjpeg,
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Packed 24-bit RGB.
    Rgb24,
    /// Packed 24-bit BGR.
    Bgr24,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"MJPG" => Some(PixelFormat::Mjpeg),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"BGR3" => Some(PixelFormat::Bgr24),
            _ => None,
        }
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub index: u32,
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Opens `/dev/videoN` devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct V4lBackend;

impl CaptureBackend for V4lBackend {
    fn open(&self, index: u32, hint: BackendHint) -> Result<Box<dyn CaptureDevice>, BackendError> {
        match hint.resolve() {
            BackendHint::V4l2 => Ok(Box::new(V4lCamera::open(index)?)),
            other => Err(BackendError::UnsupportedHint(other)),
        }
    }
}

impl V4lBackend {
    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16u32 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                index: i,
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

/// V4L2 camera device handle. The file descriptor closes when the handle is
/// released or dropped.
pub struct V4lCamera {
    device: Option<Device>,
    index: u32,
    width: u32,
    height: u32,
    fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl V4lCamera {
    /// Open `/dev/video{index}` and negotiate a decodable pixel format,
    /// keeping the driver's current resolution.
    pub fn open(index: u32) -> Result<Self, BackendError> {
        let device_path = format!("/dev/video{index}");
        if !Path::new(&device_path).exists() {
            return Err(BackendError::NotOpened(index));
        }

        let device = Device::new(index as usize)?;

        let caps = device.query_caps()?;
        tracing::info!(
            device = %device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            tracing::warn!(device = %device_path, "device has no video capture capability");
            return Err(BackendError::NotOpened(index));
        }

        // Prefer MJPEG for bandwidth; fall back to YUYV, then whatever the
        // driver keeps if it is one we can decode.
        let mut negotiated = device.format()?;
        for wanted in [b"MJPG", b"YUYV"] {
            let mut fmt = negotiated.clone();
            fmt.fourcc = FourCC::new(wanted);
            match device.set_format(&fmt) {
                Ok(fmt) if PixelFormat::from_fourcc(fmt.fourcc).is_some() => {
                    negotiated = fmt;
                    break;
                }
                Ok(fmt) => negotiated = fmt,
                Err(e) => tracing::debug!(error = %e, fourcc = ?wanted, "format rejected"),
            }
        }

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            BackendError::Read(format!(
                "unsupported pixel format: {:?} (need MJPG, YUYV, RGB3 or BGR3)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        Ok(Self {
            device: Some(device),
            index,
            width: negotiated.width,
            height: negotiated.height,
            fourcc: negotiated.fourcc,
            pixel_format,
        })
    }

    fn device(&self) -> Result<&Device, BackendError> {
        self.device.as_ref().ok_or(BackendError::Closed)
    }

    /// Decode a raw buffer according to the negotiated format.
    fn decode(&self, buf: &[u8]) -> Result<RgbImage, BackendError> {
        let decoded = match self.pixel_format {
            PixelFormat::Mjpeg => {
                image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
                    .map(|img| img.to_rgb8())
                    .map_err(frame::FrameError::from)
            }
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height),
            PixelFormat::Bgr24 => frame::bgr_to_rgb(buf, self.width, self.height),
            PixelFormat::Rgb24 => {
                let expected = (self.width * self.height * 3) as usize;
                buf.get(..expected)
                    .and_then(|px| RgbImage::from_raw(self.width, self.height, px.to_vec()))
                    .ok_or(frame::FrameError::InvalidLength {
                        expected,
                        actual: buf.len(),
                    })
            }
        };
        decoded.map_err(|e| BackendError::Read(e.to_string()))
    }

    fn set_resolution(&mut self, width: u32, height: u32) -> Result<(), BackendError> {
        let device = self.device()?;
        let mut fmt = device.format()?;
        fmt.width = width;
        fmt.height = height;
        fmt.fourcc = self.fourcc;
        let negotiated = device.set_format(&fmt)?;
        self.width = negotiated.width;
        self.height = negotiated.height;
        Ok(())
    }

    fn set_fourcc(&mut self, value: f64) -> Result<(), BackendError> {
        let fourcc = FourCC::new(&(value as u32).to_le_bytes());
        let pixel_format =
            PixelFormat::from_fourcc(fourcc).ok_or(BackendError::SetProperty {
                property: CaptureProperty::Fourcc,
                value,
                reason: format!("undecodable fourcc {fourcc:?}"),
            })?;
        let device = self.device()?;
        let mut fmt = device.format()?;
        fmt.fourcc = fourcc;
        let negotiated = device.set_format(&fmt)?;
        if negotiated.fourcc != fourcc {
            return Err(BackendError::SetProperty {
                property: CaptureProperty::Fourcc,
                value,
                reason: format!("driver kept {:?}", negotiated.fourcc),
            });
        }
        self.fourcc = fourcc;
        self.pixel_format = pixel_format;
        Ok(())
    }
}

impl CaptureDevice for V4lCamera {
    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn read(&mut self) -> Result<RgbImage, BackendError> {
        let device = self.device()?;
        let mut stream = MmapStream::with_buffers(device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| BackendError::Read(format!("failed to create mmap stream: {e}")))?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| BackendError::Read(format!("failed to dequeue buffer: {e}")))?;

        let used = (meta.bytesused as usize).min(buf.len());
        let used = if used == 0 { buf.len() } else { used };
        self.decode(&buf[..used])
    }

    fn get(&self, property: CaptureProperty) -> Option<f64> {
        let device = self.device.as_ref()?;
        match property {
            CaptureProperty::FrameWidth => Some(self.width as f64),
            CaptureProperty::FrameHeight => Some(self.height as f64),
            CaptureProperty::Fourcc => Some(u32::from_le_bytes(self.fourcc.repr) as f64),
            CaptureProperty::Fps => {
                let params = device.params().ok()?;
                let interval = params.interval;
                (interval.numerator > 0)
                    .then(|| interval.denominator as f64 / interval.numerator as f64)
            }
            other => {
                let id = control_id(other)?;
                match device.control(id) {
                    Ok(Control {
                        value: Value::Integer(v),
                        ..
                    }) => Some(v as f64),
                    Ok(Control {
                        value: Value::Boolean(b),
                        ..
                    }) => Some(if b { 1.0 } else { 0.0 }),
                    Ok(_) => None,
                    Err(e) => {
                        tracing::trace!(property = %other, error = %e, "control not readable");
                        None
                    }
                }
            }
        }
    }

    fn set(&mut self, property: CaptureProperty, value: f64) -> Result<(), BackendError> {
        match property {
            CaptureProperty::FrameWidth => self.set_resolution(value as u32, self.height),
            CaptureProperty::FrameHeight => self.set_resolution(self.width, value as u32),
            CaptureProperty::Fourcc => self.set_fourcc(value),
            CaptureProperty::Fps => {
                let device = self.device()?;
                device
                    .set_params(&Parameters::with_fps(value.round() as u32))
                    .map_err(|e| BackendError::SetProperty {
                        property,
                        value,
                        reason: e.to_string(),
                    })?;
                Ok(())
            }
            other => {
                let id = control_id(other).ok_or(BackendError::UnsupportedProperty(other))?;
                let device = self.device()?;
                device
                    .set_control(Control {
                        id,
                        value: Value::Integer(value.round() as i64),
                    })
                    .map_err(|e| BackendError::SetProperty {
                        property: other,
                        value,
                        reason: e.to_string(),
                    })
            }
        }
    }

    fn release(&mut self) {
        if self.device.take().is_some() {
            tracing::info!(index = self.index, "released camera");
        }
    }
}

impl Drop for V4lCamera {
    fn drop(&mut self) {
        self.release();
    }
}
