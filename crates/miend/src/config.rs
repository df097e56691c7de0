use mien_core::{DetectorVariant, PipelineConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "/etc/mien/miend.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{name} threshold {value} is outside [0, 1]")]
    InvalidThreshold { name: &'static str, value: f32 },
}

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    Session,
    System,
}

/// Daemon configuration: optional TOML file, then `MIEN_*` overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: BusKind,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load from `MIEN_CONFIG` (or the default path) and apply the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("MIEN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = Self::from_file(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let pipeline = &mut self.pipeline;
        if let Some(dir) = var("MIEN_MODEL_DIR") {
            pipeline.model_dir = PathBuf::from(dir);
        }
        if let Some(anchors) = var("MIEN_ANCHORS") {
            pipeline.anchors = Some(PathBuf::from(anchors));
        }
        if let Some(back) = var("MIEN_BACK_MODEL") {
            pipeline.variant = if back != "0" {
                DetectorVariant::Back
            } else {
                DetectorVariant::Front
            };
        }
        if let Some(score) = env_f32(&var, "MIEN_SCORE_THRESHOLD") {
            pipeline.score_threshold = Some(score);
        }
        if let Some(nms) = env_f32(&var, "MIEN_NMS_THRESHOLD") {
            pipeline.nms_threshold = Some(nms);
        }
        if let Some(threads) = env_usize(&var, "MIEN_INTRA_THREADS") {
            pipeline.intra_threads = threads;
        }
        match var("MIEN_BUS").as_deref() {
            Some("system") => self.bus = BusKind::System,
            Some("session") => self.bus = BusKind::Session,
            Some(other) => tracing::warn!(value = other, "ignoring unknown MIEN_BUS"),
            None => {}
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let thresholds = [
            ("score", self.pipeline.score_threshold),
            ("nms", self.pipeline.nms_threshold),
        ];
        for (name, value) in thresholds {
            if let Some(value) = value.filter(|v| !(0.0..=1.0).contains(v)) {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }
        Ok(())
    }
}

fn env_f32(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<f32> {
    var(key).and_then(|v| v.parse().ok())
}

fn env_usize(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    var(key).and_then(|v| v.parse().ok())
}
