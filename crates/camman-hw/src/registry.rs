//! Device registry and frame source adapter.
//!
//! Maps [`DeviceKey`]s to open capture handles and tracks the active
//! selection. The active key, when set, always names a registered device.

use crate::backend::{
    BackendError, BackendHint, CaptureBackend, CaptureDevice, ScreenGrabber, WindowBackend,
};
use crate::camera::V4lBackend;
use crate::frame::{self, Frame};
use crate::settings::SettingsError;
use crate::window::{XcapScreen, XcapWindows};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("failed to open device [{key}]: {source}")]
    OpenFailure {
        key: DeviceKey,
        #[source]
        source: BackendError,
    },
    #[error("device [{0}] is not registered")]
    NotFound(DeviceKey),
    #[error("no active device")]
    NoActiveDevice,
    #[error("failed to read frame from [{key}]: {source}")]
    ReadFailure {
        key: DeviceKey,
        #[source]
        source: BackendError,
    },
    #[error("failed to capture image from [{key}] to {}: {reason}", .path.display())]
    CaptureFailure {
        key: DeviceKey,
        path: PathBuf,
        reason: String,
    },
    #[error("device [{0}] does not support this operation")]
    Unsupported(DeviceKey),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Identifies a registered source: a hardware index or a window title.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceKey {
    Index(u32),
    Window(String),
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKey::Index(i) => write!(f, "{i}"),
            DeviceKey::Window(title) => f.write_str(title),
        }
    }
}

impl From<u32> for DeviceKey {
    fn from(index: u32) -> Self {
        DeviceKey::Index(index)
    }
}

impl From<&str> for DeviceKey {
    fn from(title: &str) -> Self {
        DeviceKey::Window(title.to_string())
    }
}

impl From<String> for DeviceKey {
    fn from(title: String) -> Self {
        DeviceKey::Window(title)
    }
}

impl FromStr for DeviceKey {
    type Err = std::convert::Infallible;

    /// All-digit strings are hardware indices; anything else is a window title.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<u32>() {
            Ok(i) if s.bytes().all(|b| b.is_ascii_digit()) => DeviceKey::Index(i),
            _ => DeviceKey::Window(s.to_string()),
        })
    }
}

/// Options for [`Registry::add`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AddOptions {
    /// Capture driver for hardware indices. Ignored for windows.
    pub backend: BackendHint,
}

enum DeviceHandle {
    Hardware(Box<dyn CaptureDevice>),
    Window { title: String },
}

/// Registered capture sources plus the active selection.
pub struct Registry {
    capture: Box<dyn CaptureBackend>,
    windows: Box<dyn WindowBackend>,
    screen: Box<dyn ScreenGrabber>,
    devices: BTreeMap<DeviceKey, DeviceHandle>,
    active: Option<DeviceKey>,
}

impl Registry {
    pub fn new(
        capture: Box<dyn CaptureBackend>,
        windows: Box<dyn WindowBackend>,
        screen: Box<dyn ScreenGrabber>,
    ) -> Self {
        Self {
            capture,
            windows,
            screen,
            devices: BTreeMap::new(),
            active: None,
        }
    }

    /// Registry wired to V4L2 cameras and xcap window capture.
    pub fn platform() -> Self {
        Self::new(
            Box::new(V4lBackend),
            Box::new(XcapWindows),
            Box::new(XcapScreen),
        )
    }

    /// Open and register a source. Registering an existing key is a no-op.
    /// The first registered source becomes active.
    pub fn add(&mut self, key: impl Into<DeviceKey>, options: AddOptions) -> Result<(), DeviceError> {
        let key = key.into();
        if self.devices.contains_key(&key) {
            tracing::info!(%key, "device already added");
            return Ok(());
        }

        let handle = self.open(&key, options).map_err(|source| {
            tracing::warn!(%key, error = %source, "failed to open device");
            DeviceError::OpenFailure {
                key: key.clone(),
                source,
            }
        })?;

        self.devices.insert(key.clone(), handle);
        if self.active.is_none() {
            self.active = Some(key.clone());
        }
        tracing::info!(%key, "device added");
        Ok(())
    }

    fn open(&self, key: &DeviceKey, options: AddOptions) -> Result<DeviceHandle, BackendError> {
        match key {
            DeviceKey::Index(index) => {
                let mut device = self.capture.open(*index, options.backend)?;
                if !device.is_open() {
                    device.release();
                    return Err(BackendError::NotOpened(*index));
                }
                Ok(DeviceHandle::Hardware(device))
            }
            DeviceKey::Window(title) => match self.windows.find(title)? {
                Some(_) => Ok(DeviceHandle::Window {
                    title: title.clone(),
                }),
                None => Err(BackendError::Window(format!("no window titled {title:?}"))),
            },
        }
    }

    /// Release and unregister a source. Clears the active key if it pointed here.
    pub fn remove(&mut self, key: &DeviceKey) -> Result<(), DeviceError> {
        let handle = self
            .devices
            .remove(key)
            .ok_or_else(|| DeviceError::NotFound(key.clone()))?;

        if let DeviceHandle::Hardware(mut device) = handle {
            device.release();
        }
        if self.active.as_ref() == Some(key) {
            self.active = None;
        }
        tracing::info!(%key, "device released");
        Ok(())
    }

    /// Release every source, hardware and virtual alike.
    pub fn remove_all(&mut self) {
        let keys: Vec<DeviceKey> = self.devices.keys().cloned().collect();
        for key in &keys {
            // Keys come from the map itself, so removal cannot miss.
            let _ = self.remove(key);
        }
        tracing::info!(count = keys.len(), "all devices released");
    }

    pub fn set_active(&mut self, key: &DeviceKey) -> Result<(), DeviceError> {
        if !self.devices.contains_key(key) {
            return Err(DeviceError::NotFound(key.clone()));
        }
        self.active = Some(key.clone());
        tracing::info!(%key, "active device switched");
        Ok(())
    }

    pub fn keys(&self) -> Vec<DeviceKey> {
        self.devices.keys().cloned().collect()
    }

    pub fn active_key(&self) -> Option<&DeviceKey> {
        self.active.as_ref()
    }

    /// Probe hardware indices from 0 upward until one fails to open.
    /// Probe handles are released immediately.
    pub fn available_devices(&self, hint: BackendHint, max_probe: u32) -> Vec<u32> {
        let mut found = Vec::new();
        for index in 0..max_probe {
            match self.capture.open(index, hint) {
                Ok(mut device) => {
                    let opened = device.is_open();
                    device.release();
                    if !opened {
                        break;
                    }
                    found.push(index);
                }
                Err(e) => {
                    tracing::debug!(index, error = %e, "probe stopped");
                    break;
                }
            }
        }
        if found.is_empty() {
            tracing::info!("no cameras available");
        }
        found
    }

    /// Titles of every top-level window the window backend reports.
    pub fn window_titles(&self) -> Result<Vec<String>, DeviceError> {
        Ok(self.windows.titles()?)
    }

    /// Mutable access to a registered hardware device, for settings.
    pub fn device_mut(&mut self, key: &DeviceKey) -> Result<&mut dyn CaptureDevice, DeviceError> {
        match self.devices.get_mut(key) {
            Some(DeviceHandle::Hardware(device)) => Ok(device.as_mut()),
            Some(DeviceHandle::Window { .. }) => Err(DeviceError::Unsupported(key.clone())),
            None => Err(DeviceError::NotFound(key.clone())),
        }
    }

    /// Explicit key, or the active key when `key` is `None`.
    pub fn resolve(&self, key: Option<&DeviceKey>) -> Result<DeviceKey, DeviceError> {
        match key {
            Some(key) => Ok(key.clone()),
            None => self.active.clone().ok_or(DeviceError::NoActiveDevice),
        }
    }

    /// Read one frame from `key` (or the active device). Each call is an
    /// independent blocking read; window frames follow the window's current size.
    pub fn read_frame(&mut self, key: Option<&DeviceKey>) -> Result<Frame, DeviceError> {
        let key = self.resolve(key)?;
        let handle = self
            .devices
            .get_mut(&key)
            .ok_or_else(|| DeviceError::NotFound(key.clone()))?;

        let image = match handle {
            DeviceHandle::Hardware(device) => device.read(),
            DeviceHandle::Window { title } => {
                grab_window(self.windows.as_ref(), self.screen.as_ref(), title)
            }
        }
        .map_err(|source| {
            tracing::warn!(%key, error = %source, "failed to get frame");
            DeviceError::ReadFailure {
                key: key.clone(),
                source,
            }
        })?;

        Ok(Frame::Color(image))
    }

    /// Read one frame and write it to `destination`; the image format follows
    /// the file extension.
    pub fn capture_image(
        &mut self,
        key: Option<&DeviceKey>,
        destination: impl AsRef<Path>,
    ) -> Result<PathBuf, DeviceError> {
        let key = self.resolve(key)?;
        let path = destination.as_ref().to_path_buf();

        let frame = self.read_frame(Some(&key)).map_err(|e| match e {
            DeviceError::ReadFailure { key, source } => DeviceError::CaptureFailure {
                key,
                path: path.clone(),
                reason: source.to_string(),
            },
            other => other,
        })?;

        frame.save(&path).map_err(|e| DeviceError::CaptureFailure {
            key: key.clone(),
            path: path.clone(),
            reason: e.to_string(),
        })?;

        tracing::info!(%key, path = %path.display(), "image captured");
        Ok(path)
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if !self.devices.is_empty() {
            self.remove_all();
        }
    }
}

fn grab_window(
    windows: &dyn WindowBackend,
    screen: &dyn ScreenGrabber,
    title: &str,
) -> Result<image::RgbImage, BackendError> {
    let rect = windows
        .find(title)?
        .ok_or_else(|| BackendError::Window(format!("window {title:?} is gone")))?;
    let rgba = screen.grab(&rect)?;
    Ok(frame::rgba_to_rgb(&rgba))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScreenRect;
    use crate::testing::{MockBackend, MockScreen, MockWindows};

    fn registry(backend: MockBackend) -> Registry {
        let windows = MockWindows::new().with_window(
            "Game",
            ScreenRect {
                top: 0,
                left: 0,
                width: 8,
                height: 6,
            },
        );
        Registry::new(Box::new(backend), Box::new(windows), Box::new(MockScreen))
    }

    #[test]
    fn test_add_unopenable_leaves_registry_empty() {
        let mut reg = registry(MockBackend::new());
        let err = reg.add(0u32, AddOptions::default()).unwrap_err();
        assert!(matches!(err, DeviceError::OpenFailure { key: DeviceKey::Index(0), .. }));
        assert!(reg.keys().is_empty());
        assert_eq!(reg.active_key(), None);
    }

    #[test]
    fn test_add_sets_first_active() {
        let mut reg = registry(MockBackend::new().with_devices([0]));
        reg.add(0u32, AddOptions::default()).unwrap();
        assert_eq!(reg.keys(), vec![DeviceKey::Index(0)]);
        assert_eq!(reg.active_key(), Some(&DeviceKey::Index(0)));
    }

    #[test]
    fn test_first_registration_wins() {
        let mut reg = registry(MockBackend::new().with_devices([0, 1]));
        reg.add(1u32, AddOptions::default()).unwrap();
        reg.add(0u32, AddOptions::default()).unwrap();
        assert_eq!(reg.active_key(), Some(&DeviceKey::Index(1)));
    }

    #[test]
    fn test_add_existing_is_noop() {
        let backend = MockBackend::new().with_devices([0]);
        let opens = backend.open_count();
        let mut reg = registry(backend);
        reg.add(0u32, AddOptions::default()).unwrap();
        reg.add(0u32, AddOptions::default()).unwrap();
        assert_eq!(opens.get(), 1);
        assert_eq!(reg.keys().len(), 1);
    }

    #[test]
    fn test_remove_active_clears_selection() {
        let backend = MockBackend::new().with_devices([0, 1]);
        let released = backend.release_count();
        let mut reg = registry(backend);
        reg.add(0u32, AddOptions::default()).unwrap();
        reg.add(1u32, AddOptions::default()).unwrap();

        reg.remove(&DeviceKey::Index(0)).unwrap();
        assert_eq!(reg.keys(), vec![DeviceKey::Index(1)]);
        assert_eq!(reg.active_key(), None);
        assert!(released.get() >= 1);
    }

    #[test]
    fn test_remove_inactive_keeps_selection() {
        let mut reg = registry(MockBackend::new().with_devices([0, 1]));
        reg.add(0u32, AddOptions::default()).unwrap();
        reg.add(1u32, AddOptions::default()).unwrap();
        reg.remove(&DeviceKey::Index(1)).unwrap();
        assert_eq!(reg.active_key(), Some(&DeviceKey::Index(0)));
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let mut reg = registry(MockBackend::new());
        let err = reg.remove(&DeviceKey::Index(3)).unwrap_err();
        assert!(matches!(err, DeviceError::NotFound(DeviceKey::Index(3))));
    }

    #[test]
    fn test_remove_all_covers_windows() {
        let mut reg = registry(MockBackend::new().with_devices([0]));
        reg.add(0u32, AddOptions::default()).unwrap();
        reg.add("Game", AddOptions::default()).unwrap();
        reg.remove_all();
        assert!(reg.keys().is_empty());
        assert_eq!(reg.active_key(), None);
    }

    #[test]
    fn test_set_active_unknown_keeps_previous() {
        let mut reg = registry(MockBackend::new().with_devices([0]));
        reg.add(0u32, AddOptions::default()).unwrap();
        let err = reg.set_active(&DeviceKey::Index(9)).unwrap_err();
        assert!(matches!(err, DeviceError::NotFound(_)));
        assert_eq!(reg.active_key(), Some(&DeviceKey::Index(0)));
    }

    #[test]
    fn test_set_active_switches() {
        let mut reg = registry(MockBackend::new().with_devices([0]));
        reg.add(0u32, AddOptions::default()).unwrap();
        reg.add("Game", AddOptions::default()).unwrap();
        reg.set_active(&DeviceKey::from("Game")).unwrap();
        assert_eq!(reg.active_key(), Some(&DeviceKey::from("Game")));
    }

    #[test]
    fn test_add_missing_window_fails() {
        let mut reg = registry(MockBackend::new());
        let err = reg.add("Nope", AddOptions::default()).unwrap_err();
        assert!(matches!(err, DeviceError::OpenFailure { .. }));
        assert!(reg.keys().is_empty());
    }

    #[test]
    fn test_read_frame_without_active() {
        let mut reg = registry(MockBackend::new());
        assert!(matches!(reg.read_frame(None), Err(DeviceError::NoActiveDevice)));
    }

    #[test]
    fn test_read_frame_from_active_hardware() {
        let mut reg = registry(MockBackend::new().with_devices([0]).with_frame_size(4, 3));
        reg.add(0u32, AddOptions::default()).unwrap();
        let frame = reg.read_frame(None).unwrap();
        assert_eq!((frame.width(), frame.height(), frame.channels()), (4, 3, 3));
    }

    #[test]
    fn test_read_frame_from_window_drops_alpha() {
        let mut reg = registry(MockBackend::new());
        reg.add("Game", AddOptions::default()).unwrap();
        let frame = reg.read_frame(Some(&DeviceKey::from("Game"))).unwrap();
        assert_eq!((frame.width(), frame.height(), frame.channels()), (8, 6, 3));
    }

    #[test]
    fn test_read_failure_is_signaled() {
        let mut reg = registry(MockBackend::new().with_devices([0]).failing_reads());
        reg.add(0u32, AddOptions::default()).unwrap();
        let err = reg.read_frame(None).unwrap_err();
        assert!(matches!(err, DeviceError::ReadFailure { .. }));
    }

    #[test]
    fn test_read_unregistered_key() {
        let mut reg = registry(MockBackend::new());
        let err = reg.read_frame(Some(&DeviceKey::Index(2))).unwrap_err();
        assert!(matches!(err, DeviceError::NotFound(_)));
    }

    #[test]
    fn test_capture_image_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.png");
        let mut reg = registry(MockBackend::new().with_devices([0]).with_frame_size(5, 4));
        reg.add(0u32, AddOptions::default()).unwrap();

        reg.capture_image(None, &path).unwrap();
        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (5, 4));
    }

    #[test]
    fn test_capture_image_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = registry(MockBackend::new().with_devices([0]).failing_reads());
        reg.add(0u32, AddOptions::default()).unwrap();
        let err = reg.capture_image(None, dir.path().join("x.png")).unwrap_err();
        assert!(matches!(err, DeviceError::CaptureFailure { .. }));
    }

    #[test]
    fn test_capture_image_needs_active() {
        let mut reg = registry(MockBackend::new());
        let err = reg.capture_image(None, "unused.jpg").unwrap_err();
        assert!(matches!(err, DeviceError::NoActiveDevice));
    }

    #[test]
    fn test_available_devices_stops_at_first_gap() {
        let backend = MockBackend::new().with_devices([0, 1, 3]);
        let released = backend.release_count();
        let reg = registry(backend);
        assert_eq!(reg.available_devices(BackendHint::Auto, 10), vec![0, 1]);
        // Both successful probes and the failing one are released.
        assert_eq!(released.get(), 3);
    }

    #[test]
    fn test_device_mut_rejects_windows() {
        let mut reg = registry(MockBackend::new());
        reg.add("Game", AddOptions::default()).unwrap();
        let err = reg.device_mut(&DeviceKey::from("Game")).err().unwrap();
        assert!(matches!(err, DeviceError::Unsupported(_)));
    }

    #[test]
    fn test_key_parsing() {
        assert_eq!("0".parse::<DeviceKey>().unwrap(), DeviceKey::Index(0));
        assert_eq!("+1".parse::<DeviceKey>().unwrap(), DeviceKey::from("+1"));
        assert_eq!(
            "My Window".parse::<DeviceKey>().unwrap(),
            DeviceKey::Window("My Window".into())
        );
        assert_eq!(DeviceKey::Index(2).to_string(), "2");
    }
}
