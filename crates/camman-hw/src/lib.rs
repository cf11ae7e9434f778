//! camman-hw — Hardware abstraction for camera and virtual-window capture.
//!
//! Provides the device registry with its frame source adapter, V4L2-based
//! camera access, screen-region capture of application windows, and the
//! settings store that snapshots device properties to JSON.

pub mod backend;
pub mod camera;
pub mod frame;
pub mod property;
pub mod registry;
pub mod settings;
pub mod window;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{
    BackendError, BackendHint, CaptureBackend, CaptureDevice, ScreenGrabber, ScreenRect,
    WindowBackend,
};
pub use camera::{V4lBackend, V4lCamera};
pub use frame::Frame;
pub use property::CaptureProperty;
pub use registry::{AddOptions, DeviceError, DeviceKey, Registry};
pub use settings::{SettingsError, SettingsSnapshot, SettingsStore};
pub use window::{XcapScreen, XcapWindows};
