use serde::{Deserialize, Serialize};

use crate::config::LivenessConfig;
use crate::signals::SessionStatistics;

/// Audio energy of a full track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioProfile {
    /// Mean absolute amplitude at the configured sample rate.
    pub energy: f64,
    pub sample_count: usize,
}

impl AudioProfile {
    /// Profile of a missing or unreadable track.
    pub fn silent() -> Self {
        Self::default()
    }

    /// Non-finite samples are dropped before averaging.
    pub fn from_samples(samples: &[f32]) -> Self {
        let (total, count) = samples
            .iter()
            .filter(|s| s.is_finite())
            .fold((0.0f64, 0usize), |(sum, n), s| (sum + s.abs() as f64, n + 1));
        if count == 0 {
            return Self::silent();
        }
        Self {
            energy: total / count as f64,
            sample_count: count,
        }
    }
}

/// Unrounded liveness and lip-sync scores, both in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub liveness: f64,
    pub lip_sync: f64,
    pub mouth_energy: f64,
    pub audio_energy: f64,
}

/// Clamp a raw score into [0, 1]; NaN scores 0.
fn clamp_unit(raw: f64) -> f64 {
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, 1.0)
    }
}

/// `min(blinks * blink_weight + mean_movement * movement_weight, 1)`.
pub fn liveness_score(stats: &SessionStatistics, config: &LivenessConfig) -> f64 {
    let raw = stats.blink_count as f64 * config.blink_weight
        + stats.mean_head_movement() * config.movement_weight;
    clamp_unit(raw)
}

/// `min((mouth * mouth_weight) / (audio * audio_weight), 1)`, or 0 for silent audio.
pub fn lip_sync_score(mouth_energy: f64, audio: &AudioProfile, config: &LivenessConfig) -> f64 {
    if audio.energy == 0.0 {
        return 0.0;
    }
    let raw = (mouth_energy * config.mouth_weight) / (audio.energy * config.audio_weight);
    clamp_unit(raw)
}

/// Score a finished session. Pure: identical inputs give bit-identical output.
pub fn score(stats: &SessionStatistics, audio: &AudioProfile, config: &LivenessConfig) -> Scores {
    let mouth_energy = stats.mouth_energy();
    Scores {
        liveness: liveness_score(stats, config),
        lip_sync: lip_sync_score(mouth_energy, audio, config),
        mouth_energy,
        audio_energy: audio.energy,
    }
}

/// Round to two decimals for reporting.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
