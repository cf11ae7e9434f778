//! `CamManager`: one handle over the registry, the settings store and the
//! optional inference overlay.

use crate::config::Config;
use camman_core::labels::{default_labels, parse_labels};
use camman_core::{
    DetectionRecord, Effect, EffectError, Mode, Model, ModelError, Overlay, OverlayError,
    OverlayStyle, YoloModel,
};
use camman_hw::{
    AddOptions, BackendError, BackendHint, DeviceError, DeviceKey, Frame, Registry, SettingsError,
    SettingsSnapshot, SettingsStore,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("effect failed: {0}")]
    Effect(#[from] EffectError),
    #[error(transparent)]
    Overlay(#[from] OverlayError),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("labels file {}: {source}", .path.display())]
    Labels {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("inference overlay is not enabled")]
    NoOverlay,
}

/// Registry, settings and overlay composed behind one API.
pub struct CamManager {
    registry: Registry,
    settings: SettingsStore,
    overlay: Option<Overlay>,
    backend: BackendHint,
    max_probe: u32,
}

impl CamManager {
    pub fn new(registry: Registry, settings: SettingsStore) -> Self {
        Self {
            registry,
            settings,
            overlay: None,
            backend: BackendHint::Auto,
            max_probe: Config::default().max_probe,
        }
    }

    /// Platform backends plus everything `config` enables.
    pub fn from_config(config: &Config) -> Result<Self, ManagerError> {
        let mut manager = Self::new(
            Registry::platform(),
            SettingsStore::new(&config.settings_file),
        )
        .with_backend(config.backend)
        .with_max_probe(config.max_probe);

        if let Some(mode) = config.ai_mode {
            let model = YoloModel::load(&config.model_path(mode), mode)?
                .with_confidence(config.confidence)
                .with_iou(config.iou);

            let labels = match &config.labels_file {
                Some(path) => {
                    let text = std::fs::read_to_string(path).map_err(|source| {
                        ManagerError::Labels {
                            path: path.clone(),
                            source,
                        }
                    })?;
                    parse_labels(&text)
                }
                None => default_labels(mode),
            };

            let mut style = OverlayStyle::default();
            if let Some(font) = &config.font_path {
                style = style.with_font_file(font).map_err(OverlayError::from)?;
            }

            manager = manager.with_overlay(
                Overlay::new(mode, Box::new(model))
                    .with_labels(labels)
                    .with_style(style),
            );
        }

        tracing::info!(
            settings = %config.settings_file.display(),
            backend = %config.backend,
            ai_mode = ?config.ai_mode,
            "camera manager ready"
        );
        Ok(manager)
    }

    pub fn with_overlay(mut self, overlay: Overlay) -> Self {
        self.overlay = Some(overlay);
        self
    }

    /// Overlay backed by a caller-supplied model.
    pub fn with_model(self, mode: Mode, model: Box<dyn Model>) -> Self {
        self.with_overlay(Overlay::new(mode, model).with_labels(default_labels(mode)))
    }

    pub fn with_backend(mut self, backend: BackendHint) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_max_probe(mut self, max_probe: u32) -> Self {
        self.max_probe = max_probe;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn has_overlay(&self) -> bool {
        self.overlay.is_some()
    }

    // --- Registry ---

    /// Open and register a camera index or window title with the configured backend.
    pub fn add(&mut self, key: impl Into<DeviceKey>) -> Result<(), ManagerError> {
        self.registry.add(
            key,
            AddOptions {
                backend: self.backend,
            },
        )?;
        Ok(())
    }

    pub fn remove(&mut self, key: &DeviceKey) -> Result<(), ManagerError> {
        Ok(self.registry.remove(key)?)
    }

    pub fn remove_all(&mut self) {
        self.registry.remove_all();
    }

    pub fn set_active(&mut self, key: &DeviceKey) -> Result<(), ManagerError> {
        Ok(self.registry.set_active(key)?)
    }

    pub fn keys(&self) -> Vec<DeviceKey> {
        self.registry.keys()
    }

    pub fn active_key(&self) -> Option<&DeviceKey> {
        self.registry.active_key()
    }

    /// Hardware indices that currently open.
    pub fn available_devices(&self) -> Vec<u32> {
        self.registry.available_devices(self.backend, self.max_probe)
    }

    pub fn window_titles(&self) -> Result<Vec<String>, ManagerError> {
        Ok(self.registry.window_titles()?)
    }

    // --- Frames ---

    pub fn read_frame(&mut self, key: Option<&DeviceKey>) -> Result<Frame, ManagerError> {
        Ok(self.registry.read_frame(key)?)
    }

    pub fn capture_image(
        &mut self,
        key: Option<&DeviceKey>,
        destination: impl AsRef<Path>,
    ) -> Result<PathBuf, ManagerError> {
        Ok(self.registry.capture_image(key, destination)?)
    }

    pub fn apply_effect(&self, frame: &Frame, effect: Effect) -> Result<Frame, ManagerError> {
        Ok(effect.apply(frame)?)
    }

    pub fn annotate(&mut self, frame: Frame) -> Result<(Frame, Vec<DetectionRecord>), ManagerError> {
        let overlay = self.overlay.as_mut().ok_or(ManagerError::NoOverlay)?;
        Ok(overlay.annotate(frame)?)
    }

    /// Read a frame, apply `effect`, then the overlay when one is configured.
    /// Records are empty without an overlay.
    pub fn process_frame(
        &mut self,
        key: Option<&DeviceKey>,
        effect: Option<Effect>,
    ) -> Result<(Frame, Vec<DetectionRecord>), ManagerError> {
        let mut frame = self.read_frame(key)?;
        if let Some(effect) = effect {
            frame = effect.apply(&frame)?;
        }
        match self.overlay.as_mut() {
            Some(overlay) => Ok(overlay.annotate(frame)?),
            None => Ok((frame, Vec::new())),
        }
    }

    // --- Settings ---

    pub fn save_settings(&mut self, key: Option<&DeviceKey>) -> Result<SettingsSnapshot, ManagerError> {
        let key = self.registry.resolve(key)?;
        let device = self.registry.device_mut(&key)?;
        Ok(self.settings.save(device)?)
    }

    pub fn load_settings(&mut self, key: Option<&DeviceKey>) -> Result<SettingsSnapshot, ManagerError> {
        let key = self.registry.resolve(key)?;
        let device = self.registry.device_mut(&key)?;
        Ok(self.settings.load(device)?)
    }

    /// Disable autofocus and set a manual focus value.
    pub fn focus(&mut self, key: Option<&DeviceKey>, value: f64) -> Result<(), ManagerError> {
        let key = self.registry.resolve(key)?;
        let device = self.registry.device_mut(&key)?;
        Ok(SettingsStore::focus(device, value)?)
    }
}
