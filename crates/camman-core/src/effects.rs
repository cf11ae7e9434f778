//! Pure frame filters.
//!
//! Every filter takes a frame by reference and returns a new one. Color
//! filters accept gray input as well; `canny` and `grayscale` always
//! produce gray frames.

use camman_hw::Frame;
use imageproc::filter::filter;
use imageproc::kernel::Kernel;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_BLUR_KERNEL: u32 = 5;
pub const DEFAULT_CANNY_LOW: f32 = 100.0;
pub const DEFAULT_CANNY_HIGH: f32 = 200.0;

/// Output rows are (R, G, B); input columns are (B, G, R), the order
/// the tone matrix was tuned for on BGR capture buffers.
const SEPIA: [[f32; 3]; 3] = [
    [0.393, 0.769, 0.189],
    [0.349, 0.686, 0.168],
    [0.272, 0.534, 0.131],
];

#[rustfmt::skip]
const EMBOSS: [f32; 9] = [
    0.0, -1.0, -1.0,
    1.0,  0.0, -1.0,
    1.0,  1.0,  0.0,
];

#[derive(Error, Debug, PartialEq)]
pub enum EffectError {
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("blur kernel size must be odd and positive, got {0}")]
    InvalidKernel(u32),
}

fn check(frame: &Frame) -> Result<(), EffectError> {
    if frame.is_empty() {
        return Err(EffectError::InvalidDimensions {
            width: frame.width(),
            height: frame.height(),
        });
    }
    Ok(())
}

/// Luminance conversion. Gray frames pass through unchanged.
pub fn grayscale(frame: &Frame) -> Result<Frame, EffectError> {
    check(frame)?;
    Ok(Frame::Gray(frame.to_gray()))
}

/// Gaussian blur with an odd `ksize`×`ksize` kernel.
pub fn gaussian_blur(frame: &Frame, ksize: u32) -> Result<Frame, EffectError> {
    check(frame)?;
    if ksize == 0 || ksize % 2 == 0 {
        return Err(EffectError::InvalidKernel(ksize));
    }
    let kernel = gaussian_kernel(ksize);
    // Each pass rounds back to u8.
    let horizontal = correlate(frame, Kernel::new(kernel.as_slice(), ksize, 1));
    Ok(correlate(&horizontal, Kernel::new(kernel.as_slice(), 1, ksize)))
}

/// Dual-threshold hysteresis edge map. The thresholds may come in either order.
pub fn canny(frame: &Frame, low: f32, high: f32) -> Result<Frame, EffectError> {
    check(frame)?;
    let (low, high) = if low <= high { (low, high) } else { (high, low) };
    let gray = frame.to_gray();
    Ok(Frame::Gray(imageproc::edges::canny(&gray, low, high)))
}

/// Fixed color-mixing sepia tone, clipped to 0..=255.
pub fn sepia(frame: &Frame) -> Result<Frame, EffectError> {
    check(frame)?;
    let mut out = frame.to_rgb();
    for px in out.pixels_mut() {
        let [r, g, b] = px.0.map(|v| v as f32);
        px.0 = SEPIA.map(|row| saturate(row[0] * b + row[1] * g + row[2] * r));
    }
    Ok(Frame::Color(out))
}

/// 3×3 emboss convolution, border pixels replicated.
pub fn emboss(frame: &Frame) -> Result<Frame, EffectError> {
    check(frame)?;
    Ok(correlate(frame, Kernel::new(&EMBOSS[..], 3, 3)))
}

/// Per-channel bitwise inversion.
pub fn negative(frame: &Frame) -> Result<Frame, EffectError> {
    check(frame)?;
    Ok(match frame {
        Frame::Color(img) => {
            let mut out = img.clone();
            out.pixels_mut().for_each(|p| p.0 = p.0.map(|v| !v));
            Frame::Color(out)
        }
        Frame::Gray(img) => {
            let mut out = img.clone();
            out.pixels_mut().for_each(|p| p.0 = p.0.map(|v| !v));
            Frame::Gray(out)
        }
    })
}

/// A named filter with its parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Effect {
    Gray,
    Blur { kernel: u32 },
    Canny { low: f32, high: f32 },
    Sepia,
    Emboss,
    Negative,
}

impl Effect {
    pub fn apply(&self, frame: &Frame) -> Result<Frame, EffectError> {
        match *self {
            Effect::Gray => grayscale(frame),
            Effect::Blur { kernel } => gaussian_blur(frame, kernel),
            Effect::Canny { low, high } => canny(frame, low, high),
            Effect::Sepia => sepia(frame),
            Effect::Emboss => emboss(frame),
            Effect::Negative => negative(frame),
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Gray => f.write_str("gray"),
            Effect::Blur { kernel } => write!(f, "blur:{kernel}"),
            Effect::Canny { low, high } => write!(f, "canny:{low}:{high}"),
            Effect::Sepia => f.write_str("sepia"),
            Effect::Emboss => f.write_str("emboss"),
            Effect::Negative => f.write_str("negative"),
        }
    }
}

impl FromStr for Effect {
    type Err = String;

    /// `gray`, `blur[:k]`, `canny[:low:high]`, `sepia`, `emboss`, `negative`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let name = parts.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = parts.collect();
        let num = |v: &str| v.parse::<f32>().map_err(|e| format!("{s}: {e}"));

        match (name.as_str(), args.as_slice()) {
            ("gray" | "grayscale", []) => Ok(Effect::Gray),
            ("blur", []) => Ok(Effect::Blur {
                kernel: DEFAULT_BLUR_KERNEL,
            }),
            ("blur", [k]) => Ok(Effect::Blur {
                kernel: k.parse().map_err(|e| format!("{s}: {e}"))?,
            }),
            ("canny", []) => Ok(Effect::Canny {
                low: DEFAULT_CANNY_LOW,
                high: DEFAULT_CANNY_HIGH,
            }),
            ("canny", [low, high]) => Ok(Effect::Canny {
                low: num(low)?,
                high: num(high)?,
            }),
            ("sepia", []) => Ok(Effect::Sepia),
            ("emboss", []) => Ok(Effect::Emboss),
            ("negative" | "invert", []) => Ok(Effect::Negative),
            _ => Err(format!("unknown effect: {s}")),
        }
    }
}

fn saturate(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Per-channel correlation with replicated borders, keeping the variant.
fn correlate(frame: &Frame, kernel: Kernel<f32>) -> Frame {
    match frame {
        Frame::Color(img) => Frame::Color(filter(img, kernel, saturate)),
        Frame::Gray(img) => Frame::Gray(filter(img, kernel, saturate)),
    }
}

/// Normalized 1-D Gaussian weights, sigma derived from the kernel size.
fn gaussian_kernel(ksize: u32) -> Vec<f32> {
    let sigma = 0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let half = (ksize / 2) as i32;
    let weights: Vec<f32> = (-half..=half)
        .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|v| v / sum).collect()
}
