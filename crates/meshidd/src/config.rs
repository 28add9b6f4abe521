use meshid_core::{DEFAULT_THRESHOLD, FACE_MESH_LANDMARKS};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("similarity threshold {0} outside [-1, 1]")]
    InvalidThreshold(f32),
    #[error("landmark count must be non-zero")]
    InvalidLandmarkCount,
    #[error("refresh rate must be between 1 and 240 Hz, got {0}")]
    InvalidRefreshRate(u32),
}

/// Optional `meshidd.toml` contents. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub camera_image: Option<PathBuf>,
    pub landmarks_path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub similarity_threshold: Option<f32>,
    pub landmark_count: Option<usize>,
    pub refresh_hz: Option<u32>,
}

/// Daemon configuration: config file, then `MESHID_*` environment overrides.
#[derive(Debug, Clone)]
pub struct Config {
    /// Image served by the still-image camera.
    pub camera_image: PathBuf,
    /// Recorded landmark frames fed to the replay detector.
    pub landmarks_path: PathBuf,
    /// Path to the SQLite template database.
    pub db_path: PathBuf,
    /// Cosine similarity a live face must exceed to be accepted.
    pub similarity_threshold: f32,
    /// Landmarks per detected face.
    pub landmark_count: usize,
    /// Detection loop tick rate.
    pub refresh_hz: u32,
}

impl Config {
    /// Load from `MESHID_CONFIG` or `$XDG_CONFIG_HOME/meshid/meshidd.toml` (if present),
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("MESHID_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("meshidd.toml"));

        let file = if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            tracing::info!(path = %path.display(), "loaded config file");
            toml::from_str(&text)?
        } else {
            FileConfig::default()
        };

        Self::resolve(file, &data_dir(), |key| std::env::var(key).ok())
    }

    fn resolve(
        file: FileConfig,
        data_dir: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let path_var = |key: &str, fallback: Option<PathBuf>, default: &str| {
            env(key)
                .map(PathBuf::from)
                .or(fallback)
                .unwrap_or_else(|| data_dir.join(default))
        };

        let config = Self {
            camera_image: path_var("MESHID_CAMERA_IMAGE", file.camera_image, "camera.png"),
            landmarks_path: path_var("MESHID_LANDMARKS_PATH", file.landmarks_path, "landmarks.json"),
            db_path: path_var("MESHID_DB_PATH", file.db_path, "template.db"),
            similarity_threshold: parsed(&env, "MESHID_SIMILARITY_THRESHOLD")
                .or(file.similarity_threshold)
                .unwrap_or(DEFAULT_THRESHOLD),
            landmark_count: parsed(&env, "MESHID_LANDMARK_COUNT")
                .or(file.landmark_count)
                .unwrap_or(FACE_MESH_LANDMARKS),
            refresh_hz: parsed(&env, "MESHID_REFRESH_HZ")
                .or(file.refresh_hz)
                .unwrap_or(60),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::InvalidThreshold(self.similarity_threshold));
        }
        if self.landmark_count == 0 {
            return Err(ConfigError::InvalidLandmarkCount);
        }
        if !(1..=240).contains(&self.refresh_hz) {
            return Err(ConfigError::InvalidRefreshRate(self.refresh_hz));
        }
        Ok(())
    }

    /// Interval between detection loop ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.refresh_hz))
    }
}

fn parsed<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(fallback)
        })
        .join("meshid")
}

fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
}

fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
}
