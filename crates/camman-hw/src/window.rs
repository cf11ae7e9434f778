//! Virtual-window sources: window lookup and screen-region grabs via `xcap`.

use crate::backend::{BackendError, ScreenGrabber, ScreenRect, WindowBackend};
use image::RgbaImage;

/// Window enumeration through the platform's window system.
#[derive(Debug, Default, Clone, Copy)]
pub struct XcapWindows;

impl WindowBackend for XcapWindows {
    fn titles(&self) -> Result<Vec<String>, BackendError> {
        let windows = xcap::Window::all().map_err(|e| BackendError::Window(e.to_string()))?;
        Ok(windows.iter().filter_map(|w| w.title().ok()).collect())
    }

    fn find(&self, title: &str) -> Result<Option<ScreenRect>, BackendError> {
        let windows = xcap::Window::all().map_err(|e| BackendError::Window(e.to_string()))?;
        let Some(window) = windows
            .into_iter()
            .find(|w| w.title().map(|t| t == title).unwrap_or(false))
        else {
            return Ok(None);
        };

        let rect = (|| -> xcap::XCapResult<ScreenRect> {
            Ok(ScreenRect {
                top: window.y()?,
                left: window.x()?,
                width: window.width()?,
                height: window.height()?,
            })
        })()
        .map_err(|e| BackendError::Window(e.to_string()))?;

        tracing::trace!(title, ?rect, "window located");
        Ok(Some(rect))
    }
}

/// Screen grabs of the monitor under the rectangle's top-left corner,
/// cropped to the rectangle.
#[derive(Debug, Default, Clone, Copy)]
pub struct XcapScreen;

impl ScreenGrabber for XcapScreen {
    fn grab(&self, rect: &ScreenRect) -> Result<RgbaImage, BackendError> {
        let screen_err = |e: xcap::XCapError| BackendError::Screen(e.to_string());

        let monitor = xcap::Monitor::from_point(rect.left, rect.top).map_err(screen_err)?;
        let origin_x = monitor.x().map_err(screen_err)?;
        let origin_y = monitor.y().map_err(screen_err)?;
        let shot = monitor.capture_image().map_err(screen_err)?;

        crop_to_rect(&shot, origin_x, origin_y, rect)
    }
}

/// Crop a monitor image (whose top-left sits at `origin` in screen space)
/// to `rect`, clipping at the monitor edges.
pub(crate) fn crop_to_rect(
    shot: &RgbaImage,
    origin_x: i32,
    origin_y: i32,
    rect: &ScreenRect,
) -> Result<RgbaImage, BackendError> {
    let x = (rect.left - origin_x).max(0) as u32;
    let y = (rect.top - origin_y).max(0) as u32;
    if x >= shot.width() || y >= shot.height() {
        return Err(BackendError::Screen(format!(
            "window rectangle {rect:?} lies outside the monitor"
        )));
    }
    // Columns and rows of the window that hang off the monitor's top-left.
    let clip_x = (origin_x - rect.left).max(0) as u32;
    let clip_y = (origin_y - rect.top).max(0) as u32;
    let width = rect.width.saturating_sub(clip_x).min(shot.width() - x);
    let height = rect.height.saturating_sub(clip_y).min(shot.height() - y);
    if width == 0 || height == 0 {
        return Err(BackendError::Screen(format!("window rectangle {rect:?} is empty")));
    }

    Ok(image::imageops::crop_imm(shot, x, y, width, height).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn shot() -> RgbaImage {
        RgbaImage::from_fn(100, 50, |x, y| Rgba([x as u8, y as u8, 0, 255]))
    }

    #[test]
    fn test_crop_inside_monitor() {
        let rect = ScreenRect { top: 10, left: 20, width: 30, height: 15 };
        let out = crop_to_rect(&shot(), 0, 0, &rect).unwrap();
        assert_eq!(out.dimensions(), (30, 15));
        assert_eq!(out.get_pixel(0, 0), &Rgba([20, 10, 0, 255]));
    }

    #[test]
    fn test_crop_clips_at_monitor_edge() {
        let rect = ScreenRect { top: 40, left: 90, width: 30, height: 30 };
        let out = crop_to_rect(&shot(), 0, 0, &rect).unwrap();
        assert_eq!(out.dimensions(), (10, 10));
    }

    #[test]
    fn test_crop_clips_window_above_left_of_monitor() {
        let rect = ScreenRect { top: -5, left: -10, width: 30, height: 15 };
        let out = crop_to_rect(&shot(), 0, 0, &rect).unwrap();
        // Only screen columns 0..20 and rows 0..10 belong to the window.
        assert_eq!(out.dimensions(), (20, 10));
        assert_eq!(out.get_pixel(19, 9), &Rgba([19, 9, 0, 255]));
    }

    #[test]
    fn test_crop_honors_monitor_origin() {
        // Second monitor placed to the right of a 1920px one.
        let rect = ScreenRect { top: 5, left: 1925, width: 4, height: 4 };
        let out = crop_to_rect(&shot(), 1920, 0, &rect).unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgba([5, 5, 0, 255]));
    }

    #[test]
    fn test_crop_outside_monitor_fails() {
        let rect = ScreenRect { top: 0, left: 500, width: 10, height: 10 };
        assert!(crop_to_rect(&shot(), 0, 0, &rect).is_err());
    }
}
