use camman_core::Mode;
use camman_hw::BackendHint;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_SETTINGS_FILE: &str = "settings.json";
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_MAX_PROBE: u32 = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Manager configuration: defaults, then an optional TOML file, then
/// `CAMMAN_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// JSON file used by `settings save` / `settings load`.
    pub settings_file: PathBuf,
    /// Capture driver used when opening hardware indices.
    pub backend: BackendHint,
    /// Inference overlay mode. `None` disables the overlay.
    pub ai_mode: Option<Mode>,
    /// Minimum class score for a detection.
    pub confidence: f32,
    /// NMS overlap threshold.
    pub iou: f32,
    /// TrueType font for overlay labels. Without one only geometry is drawn.
    pub font_path: Option<PathBuf>,
    /// Class names, one per line. Overrides the built-in COCO names.
    pub labels_file: Option<PathBuf>,
    /// Highest hardware index probed by device discovery (exclusive).
    pub max_probe: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            settings_file: PathBuf::from(DEFAULT_SETTINGS_FILE),
            backend: BackendHint::Auto,
            ai_mode: None,
            confidence: DEFAULT_CONFIDENCE,
            iou: DEFAULT_IOU,
            font_path: None,
            labels_file: None,
            max_probe: DEFAULT_MAX_PROBE,
        }
    }
}

/// On-disk form. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    model_dir: Option<PathBuf>,
    settings_file: Option<PathBuf>,
    backend: Option<String>,
    ai_mode: Option<String>,
    confidence: Option<f32>,
    iou: Option<f32>,
    font_path: Option<PathBuf>,
    labels_file: Option<PathBuf>,
    max_probe: Option<u32>,
}

impl Config {
    /// Load configuration from `CAMMAN_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with a TOML file, then with the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(base.with_env(|key| std::env::var(key).ok()))
    }

    /// Defaults overlaid with the keys present in a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::default();
        if let Some(v) = file.model_dir {
            config.model_dir = v;
        }
        if let Some(v) = file.settings_file {
            config.settings_file = v;
        }
        if let Some(v) = file.backend {
            config.backend = v
                .parse()
                .map_err(|reason| ConfigError::Invalid { key: "backend", reason })?;
        }
        if let Some(v) = file.ai_mode {
            config.ai_mode = Some(
                v.parse()
                    .map_err(|reason| ConfigError::Invalid { key: "ai_mode", reason })?,
            );
        }
        if let Some(v) = file.confidence {
            config.confidence = v;
        }
        if let Some(v) = file.iou {
            config.iou = v;
        }
        config.font_path = file.font_path.or(config.font_path);
        config.labels_file = file.labels_file.or(config.labels_file);
        if let Some(v) = file.max_probe {
            config.max_probe = v;
        }

        tracing::info!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    /// Apply `CAMMAN_*` overrides read through `lookup`. Unparseable values
    /// are logged and ignored.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("CAMMAN_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CAMMAN_SETTINGS_FILE") {
            self.settings_file = PathBuf::from(v);
        }
        if let Some(v) = parsed(&lookup, "CAMMAN_BACKEND") {
            self.backend = v;
        }
        if let Some(v) = lookup("CAMMAN_AI_MODE") {
            if v.is_empty() || v == "off" || v == "none" {
                self.ai_mode = None;
            } else {
                match v.parse() {
                    Ok(mode) => self.ai_mode = Some(mode),
                    Err(e) => tracing::warn!(error = %e, "ignoring CAMMAN_AI_MODE"),
                }
            }
        }
        if let Some(v) = parsed(&lookup, "CAMMAN_CONFIDENCE") {
            self.confidence = v;
        }
        if let Some(v) = parsed(&lookup, "CAMMAN_IOU") {
            self.iou = v;
        }
        if let Some(v) = lookup("CAMMAN_FONT_PATH") {
            self.font_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("CAMMAN_LABELS_FILE") {
            self.labels_file = Some(PathBuf::from(v));
        }
        if let Some(v) = parsed(&lookup, "CAMMAN_MAX_PROBE") {
            self.max_probe = v;
        }
        self
    }

    /// Path to the ONNX model for `mode`.
    pub fn model_path(&self, mode: Mode) -> PathBuf {
        self.model_dir.join(mode.default_model_file())
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "ignoring invalid environment value");
            None
        }
    }
}

/// `$XDG_DATA_HOME/camman/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("camman/models")
}
