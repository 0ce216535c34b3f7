use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fusion::{RequestThresholds, SessionThresholds};

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be finite, got {value}")]
    NotFinite { field: &'static str, value: f64 },
    #[error("{field} must be within [0, 1], got {value}")]
    OutOfUnitRange { field: &'static str, value: f64 },
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },
    #[error("invalid value for {key}: {value:?}")]
    Parse { key: String, value: String },
    #[error("failed to read config file {path}: {reason}")]
    File { path: String, reason: String },
}

/// How below-threshold EAR frames turn into blinks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlinkCounting {
    /// Every frame under the threshold counts. A single physical blink that
    /// spans several frames is counted several times.
    #[default]
    PerFrame,
    /// One blink per contiguous run of under-threshold frames.
    Debounced,
}

/// Tunables for the liveness pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Averaged EAR below this value marks a closed-eye frame.
    pub ear_threshold: f64,
    /// Mean head displacement below this value flags a replay.
    pub min_head_movement: f64,
    pub blink_weight: f64,
    pub movement_weight: f64,
    pub mouth_weight: f64,
    pub audio_weight: f64,
    /// Rate the audio track is resampled to before measuring energy.
    pub audio_sample_rate: u32,
    /// Minimum face-presence confidence for a full-frame detection.
    pub detection_confidence: f64,
    /// Minimum face-presence confidence when tracking from the previous frame.
    pub tracking_confidence: f64,
    /// Frames consumed per session before the stream is cut off.
    pub max_frames: usize,
    /// Wall-clock budget per session, in seconds.
    pub max_session_secs: u64,
    pub blink_counting: BlinkCounting,
    pub session: SessionThresholds,
    pub request: RequestThresholds,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            ear_threshold: 0.19,
            min_head_movement: crate::replay::DEFAULT_MIN_HEAD_MOVEMENT,
            blink_weight: 0.2,
            movement_weight: 50.0,
            mouth_weight: 30.0,
            audio_weight: 10.0,
            audio_sample_rate: 16_000,
            detection_confidence: 0.5,
            tracking_confidence: 0.5,
            max_frames: 900,
            max_session_secs: 30,
            blink_counting: BlinkCounting::PerFrame,
            session: SessionThresholds::default(),
            request: RequestThresholds::default(),
        }
    }
}

impl LivenessConfig {
    /// Parse a TOML document. Omitted fields keep their defaults; the result is validated.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s).map_err(|e| ConfigError::File {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::File { reason, .. } => ConfigError::File {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// Reject any threshold that would make the pipeline meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("ear_threshold", self.ear_threshold)?;
        positive("min_head_movement", self.min_head_movement)?;
        positive("blink_weight", self.blink_weight)?;
        positive("movement_weight", self.movement_weight)?;
        positive("mouth_weight", self.mouth_weight)?;
        positive("audio_weight", self.audio_weight)?;
        positive("audio_sample_rate", self.audio_sample_rate as f64)?;
        positive("max_frames", self.max_frames as f64)?;
        positive("max_session_secs", self.max_session_secs as f64)?;

        unit("detection_confidence", self.detection_confidence)?;
        unit("tracking_confidence", self.tracking_confidence)?;
        unit("session.lip_sync", self.session.lip_sync)?;
        unit("session.liveness", self.session.liveness)?;
        unit("request.liveness", self.request.liveness)?;
        unit("request.lip_sync", self.request.lip_sync)?;
        unit("request.device_trust", self.request.device_trust)?;
        Ok(())
    }
}

fn finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotFinite { field, value })
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(field, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

fn unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(field, value)?;
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfUnitRange { field, value })
    }
}
