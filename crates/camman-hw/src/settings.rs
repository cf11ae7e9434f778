//! Settings store. Snapshots device properties to a flat JSON file and
//! restores them.
//!
//! Individual property failures are logged and skipped; only file-level
//! problems (I/O, malformed JSON) abort an operation.

use crate::backend::{BackendError, CaptureDevice};
use crate::property::CaptureProperty;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Indentation used for settings files.
const INDENT: &[u8] = b"    ";

pub type SettingsSnapshot = BTreeMap<CaptureProperty, f64>;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings file {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persists device settings to one file.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, device: &dyn CaptureDevice) -> Result<SettingsSnapshot, SettingsError> {
        Self::save_to(device, &self.path)
    }

    pub fn load(&self, device: &mut dyn CaptureDevice) -> Result<SettingsSnapshot, SettingsError> {
        Self::load_from(device, &self.path)
    }

    /// Read every property the device reports and write them to `path`.
    pub fn save_to(
        device: &dyn CaptureDevice,
        path: &Path,
    ) -> Result<SettingsSnapshot, SettingsError> {
        let snapshot = snapshot(device);

        let io_err = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };
        // Write beside the target, then rename over it, so a failed write
        // leaves the previous file intact.
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            let formatter = serde_json::ser::PrettyFormatter::with_indent(INDENT);
            let mut ser = serde_json::Serializer::with_formatter(&mut writer, formatter);
            snapshot
                .serialize(&mut ser)
                .map_err(|source| SettingsError::Json {
                    path: path.to_path_buf(),
                    source,
                })?;
            writer.write_all(b"\n").map_err(io_err)?;
            writer.flush().map_err(io_err)?;
        }
        tmp.persist(path).map_err(|e| io_err(e.error))?;

        tracing::info!(path = %path.display(), count = snapshot.len(), "settings saved");
        Ok(snapshot)
    }

    /// Apply the settings stored at `path` to the device and return them.
    ///
    /// When `path` does not exist, the device's current values are saved there
    /// as a first snapshot and an empty map is returned.
    pub fn load_from(
        device: &mut dyn CaptureDevice,
        path: &Path,
    ) -> Result<SettingsSnapshot, SettingsError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no settings file found, saving defaults");
            Self::save_to(device, path)?;
            return Ok(SettingsSnapshot::new());
        }

        let file = File::open(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: BTreeMap<String, f64> =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| SettingsError::Json {
                path: path.to_path_buf(),
                source,
            })?;

        let mut loaded = SettingsSnapshot::new();
        for (key, value) in raw {
            let Some(property) = CaptureProperty::from_key(&key) else {
                tracing::warn!(key, "unknown property in settings file, skipping");
                continue;
            };
            loaded.insert(property, value);

            if property.is_reserved() {
                continue;
            }
            if let Err(e) = device.set(property, value) {
                tracing::warn!(%property, value, error = %e, "failed to set property");
            }
        }

        tracing::info!(path = %path.display(), count = loaded.len(), "settings loaded");
        Ok(loaded)
    }

    /// Switch autofocus off, then set an explicit focus value.
    pub fn focus(device: &mut dyn CaptureDevice, value: f64) -> Result<(), BackendError> {
        device.set(CaptureProperty::Autofocus, 0.0)?;
        device.set(CaptureProperty::Focus, value)?;
        tracing::info!(value, "manual focus set");
        Ok(())
    }
}

/// Current value of every property the device reports.
pub fn snapshot(device: &dyn CaptureDevice) -> SettingsSnapshot {
    let mut values = SettingsSnapshot::new();
    for property in CaptureProperty::ALL {
        match device.get(property) {
            Some(v) if v.is_finite() => {
                values.insert(property, v);
            }
            Some(v) => tracing::debug!(%property, value = v, "non-finite value, skipping"),
            None => tracing::debug!(%property, "property not reported"),
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCamera;

    #[test]
    fn test_save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        let mut camera = MockCamera::new(640, 480);
        let before = camera.properties().clone();

        let saved = store.save(&camera).unwrap();
        let loaded = store.load(&mut camera).unwrap();

        assert_eq!(saved, loaded);
        assert_eq!(camera.properties(), &before);
    }

    #[test]
    fn test_load_missing_file_saves_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("first.json");
        let mut camera = MockCamera::new(320, 240);

        let loaded = SettingsStore::load_from(&mut camera, &path).unwrap();
        assert!(loaded.is_empty());
        assert!(path.exists());

        let written: BTreeMap<String, f64> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.get("frame_width"), Some(&320.0));
    }

    #[test]
    fn test_load_applies_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, r#"{ "brightness": 10, "gain": 3.5 }"#).unwrap();
        let mut camera = MockCamera::new(4, 4);

        let loaded = SettingsStore::load_from(&mut camera, &path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(camera.properties()[&CaptureProperty::Brightness], 10.0);
        assert_eq!(camera.properties()[&CaptureProperty::Gain], 3.5);
    }

    #[test]
    fn test_load_skips_reserved_unknown_and_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(
            &path,
            r#"{ "settings": 1, "bogus": 2, "contrast": 99, "hue": 7 }"#,
        )
        .unwrap();
        let mut camera = MockCamera::new(4, 4).rejecting(CaptureProperty::Contrast);

        let loaded = SettingsStore::load_from(&mut camera, &path).unwrap();
        // Reserved and rejected keys are still reported; unknown keys are not.
        assert_eq!(loaded.len(), 3);
        assert!(loaded.contains_key(&CaptureProperty::Settings));
        assert_eq!(camera.properties().get(&CaptureProperty::Settings), None);
        assert_eq!(camera.properties()[&CaptureProperty::Contrast], 32.0);
        assert_eq!(camera.properties()[&CaptureProperty::Hue], 7.0);
    }

    #[test]
    fn test_load_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();
        let mut camera = MockCamera::new(4, 4);
        assert!(matches!(
            SettingsStore::load_from(&mut camera, &path),
            Err(SettingsError::Json { .. })
        ));
    }

    #[test]
    fn test_saved_file_uses_four_space_indent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        SettingsStore::save_to(&MockCamera::new(4, 4), &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.lines().nth(1).unwrap().starts_with("    \""));
    }

    #[test]
    fn test_save_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, r#"{ "brightness": 1 }"#).unwrap();

        SettingsStore::save_to(&MockCamera::new(8, 6), &path).unwrap();

        let written: BTreeMap<String, f64> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.get("frame_width"), Some(&8.0));
        // The staging file is renamed into place, not left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_focus_disables_autofocus() {
        let mut camera = MockCamera::new(4, 4);
        SettingsStore::focus(&mut camera, 42.0).unwrap();
        assert_eq!(camera.properties()[&CaptureProperty::Autofocus], 0.0);
        assert_eq!(camera.properties()[&CaptureProperty::Focus], 42.0);
    }
}
