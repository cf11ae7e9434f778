//! In-memory backends for tests and demos.
//!
//! Enabled for this crate's own tests and, for dependants, through the
//! `testing` feature.

use crate::backend::{
    BackendError, BackendHint, CaptureBackend, CaptureDevice, ScreenGrabber, ScreenRect,
    WindowBackend,
};
use crate::property::CaptureProperty;
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared counter observable after the backend has been moved into a registry.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Capture backend whose openable indices are fixed up front. Opening any
/// other index yields a handle that reports itself as not opened.
#[derive(Debug, Default)]
pub struct MockBackend {
    openable: BTreeSet<u32>,
    width: u32,
    height: u32,
    fail_reads: bool,
    opens: Counter,
    releases: Counter,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            width: 4,
            height: 4,
            ..Self::default()
        }
    }

    pub fn with_devices(mut self, indices: impl IntoIterator<Item = u32>) -> Self {
        self.openable.extend(indices);
        self
    }

    pub fn with_frame_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub fn open_count(&self) -> Counter {
        self.opens.clone()
    }

    pub fn release_count(&self) -> Counter {
        self.releases.clone()
    }
}

impl CaptureBackend for MockBackend {
    fn open(&self, index: u32, _hint: BackendHint) -> Result<Box<dyn CaptureDevice>, BackendError> {
        self.opens.bump();
        let mut camera = MockCamera::new(self.width, self.height);
        camera.open = self.openable.contains(&index);
        camera.fail_reads = self.fail_reads;
        camera.releases = self.releases.clone();
        Ok(Box::new(camera))
    }
}

/// A fake camera with an in-memory property table.
#[derive(Debug)]
pub struct MockCamera {
    open: bool,
    released: bool,
    fail_reads: bool,
    width: u32,
    height: u32,
    properties: BTreeMap<CaptureProperty, f64>,
    rejected: BTreeSet<CaptureProperty>,
    releases: Counter,
}

impl MockCamera {
    /// An open camera reporting resolution, fps and a handful of controls.
    pub fn new(width: u32, height: u32) -> Self {
        let properties = BTreeMap::from([
            (CaptureProperty::FrameWidth, width as f64),
            (CaptureProperty::FrameHeight, height as f64),
            (CaptureProperty::Fps, 30.0),
            (CaptureProperty::Brightness, 128.0),
            (CaptureProperty::Contrast, 32.0),
            (CaptureProperty::Exposure, 156.0),
            (CaptureProperty::Autofocus, 1.0),
            (CaptureProperty::Focus, 0.0),
            (CaptureProperty::Gain, 0.0),
        ]);
        Self {
            open: true,
            released: false,
            fail_reads: false,
            width,
            height,
            properties,
            rejected: BTreeSet::new(),
            releases: Counter::default(),
        }
    }

    /// Make every `set` of `property` fail.
    pub fn rejecting(mut self, property: CaptureProperty) -> Self {
        self.rejected.insert(property);
        self
    }

    pub fn properties(&self) -> &BTreeMap<CaptureProperty, f64> {
        &self.properties
    }
}

impl CaptureDevice for MockCamera {
    fn is_open(&self) -> bool {
        self.open && !self.released
    }

    fn read(&mut self) -> Result<RgbImage, BackendError> {
        if !self.is_open() {
            return Err(BackendError::Closed);
        }
        if self.fail_reads {
            return Err(BackendError::Read("mock read failure".into()));
        }
        Ok(RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([(x * 16) as u8, (y * 16) as u8, 128])
        }))
    }

    fn get(&self, property: CaptureProperty) -> Option<f64> {
        self.properties.get(&property).copied()
    }

    fn set(&mut self, property: CaptureProperty, value: f64) -> Result<(), BackendError> {
        if self.rejected.contains(&property) || property == CaptureProperty::Settings {
            return Err(BackendError::SetProperty {
                property,
                value,
                reason: "rejected by mock".into(),
            });
        }
        self.properties.insert(property, value);
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.releases.bump();
        }
    }
}

impl Drop for MockCamera {
    fn drop(&mut self) {
        self.release();
    }
}

/// Fixed set of windows with fixed rectangles.
#[derive(Debug, Default)]
pub struct MockWindows {
    windows: Vec<(String, ScreenRect)>,
}

impl MockWindows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(mut self, title: &str, rect: ScreenRect) -> Self {
        self.windows.push((title.to_string(), rect));
        self
    }
}

impl WindowBackend for MockWindows {
    fn titles(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.windows.iter().map(|(t, _)| t.clone()).collect())
    }

    fn find(&self, title: &str) -> Result<Option<ScreenRect>, BackendError> {
        Ok(self
            .windows
            .iter()
            .find(|(t, _)| t == title)
            .map(|(_, rect)| *rect))
    }
}

/// Screen grabber returning a semi-transparent gradient of the requested size.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockScreen;

impl ScreenGrabber for MockScreen {
    fn grab(&self, rect: &ScreenRect) -> Result<RgbaImage, BackendError> {
        Ok(RgbaImage::from_fn(rect.width, rect.height, |x, y| {
            Rgba([x as u8, y as u8, 200, 128])
        }))
    }
}
