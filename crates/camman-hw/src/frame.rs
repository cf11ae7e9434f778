//! Frame type and pixel conversions to RGB.

use image::{GrayImage, Luma, Rgb, RgbImage, RgbaImage};
use std::path::Path;

/// A single captured or filtered frame.
///
/// Sources always produce `Color`; some effects (grayscale, edge maps)
/// produce `Gray`.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Color(RgbImage),
    Gray(GrayImage),
}

impl Frame {
    pub fn width(&self) -> u32 {
        match self {
            Frame::Color(img) => img.width(),
            Frame::Gray(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Frame::Color(img) => img.height(),
            Frame::Gray(img) => img.height(),
        }
    }

    /// Number of interleaved channels (3 for color, 1 for gray).
    pub fn channels(&self) -> u8 {
        match self {
            Frame::Color(_) => 3,
            Frame::Gray(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Convert to a 3-channel image, replicating the luma channel for gray frames.
    pub fn to_rgb(&self) -> RgbImage {
        match self {
            Frame::Color(img) => img.clone(),
            Frame::Gray(img) => gray_to_rgb(img),
        }
    }

    pub fn into_rgb(self) -> RgbImage {
        match self {
            Frame::Color(img) => img,
            Frame::Gray(img) => gray_to_rgb(&img),
        }
    }

    /// Luminance view of the frame. Gray frames are returned unchanged.
    pub fn to_gray(&self) -> GrayImage {
        match self {
            Frame::Color(img) => GrayImage::from_fn(img.width(), img.height(), |x, y| {
                // BT.601 luma weights.
                let [r, g, b] = img.get_pixel(x, y).0.map(f32::from);
                Luma([(0.299 * r + 0.587 * g + 0.114 * b).round().min(255.0) as u8])
            }),
            Frame::Gray(img) => img.clone(),
        }
    }

    /// Write the frame to disk; the format follows the file extension.
    pub fn save(&self, path: &Path) -> image::ImageResult<()> {
        match self {
            Frame::Color(img) => img.save(path),
            Frame::Gray(img) => img.save(path),
        }
    }
}

impl From<RgbImage> for Frame {
    fn from(img: RgbImage) -> Self {
        Frame::Color(img)
    }
}

impl From<GrayImage> for Frame {
    fn from(img: GrayImage) -> Self {
        Frame::Gray(img)
    }
}

fn gray_to_rgb(gray: &GrayImage) -> RgbImage {
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0];
        Rgb([v, v, v])
    })
}

/// Drop the alpha channel of a screen grab.
pub fn rgba_to_rgb(rgba: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let p = rgba.get_pixel(x, y);
        Rgb([p[0], p[1], p[2]])
    })
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as f32 - 16.0;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;

    let r = 1.164 * c + 1.596 * e;
    let g = 1.164 * c - 0.392 * d - 0.813 * e;
    let b = 1.164 * c + 2.017 * d;

    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
    ]
}

/// Expand packed 24-bit BGR into RGB.
pub fn bgr_to_rgb(bgr: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 3) as usize;
    if bgr.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: bgr.len(),
        });
    }
    let rgb = bgr[..expected]
        .chunks_exact(3)
        .flat_map(|p| [p[2], p[1], p[0]])
        .collect();
    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: bgr.len(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("jpeg decode failed: {0}")]
    Decode(#[from] image::ImageError),
}
