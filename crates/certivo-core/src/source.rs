//! Collaborator seams: where frames, landmarks and audio come from.
//!
//! The core never decodes media itself. Concrete implementations live in
//! `certivo-media`; tests drive the pipeline with in-memory fakes.

use thiserror::Error;

use crate::types::{Frame, LandmarkSet};

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("failed to open video resource: {0}")]
    Open(String),
    #[error("failed to decode frame {index}: {reason}")]
    Decode { index: usize, reason: String },
}

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("landmark model failed to load: {0}")]
    Load(String),
    #[error("landmark inference failed: {0}")]
    Inference(String),
    #[error("frame buffer does not match {width}x{height} RGB8")]
    BadFrame { width: u32, height: u32 },
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("failed to open audio resource: {0}")]
    Open(String),
    #[error("failed to decode audio: {0}")]
    Decode(String),
    #[error("unsupported audio format: {0}")]
    Unsupported(String),
}

/// A decoded video stream, consumed front to back.
pub trait FrameSource {
    /// Next frame, `Some(Err)` for a frame that failed to decode, `None` at end of stream.
    fn next_frame(&mut self) -> Option<Result<Frame, FrameError>>;
}

/// Frame-level face landmark detector.
///
/// Takes `&mut self`: implementations may keep tracking state between frames
/// and must not be shared across concurrent sessions.
pub trait LandmarkModel {
    /// Landmarks for the primary face, or `None` when no face is found.
    fn detect(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>, LandmarkError>;

    /// Drop any tracking state carried over from a previous session.
    fn reset(&mut self) {}
}

/// A full audio track.
pub trait AudioSource {
    /// Mono waveform in [-1, 1] at `target_rate` Hz.
    fn load(&self, target_rate: u32) -> Result<Vec<f32>, AudioError>;
}

/// In-memory frame stream, used by callers that already hold decoded frames.
pub struct VecFrames {
    frames: std::vec::IntoIter<Result<Frame, FrameError>>,
}

impl VecFrames {
    pub fn new(frames: Vec<Result<Frame, FrameError>>) -> Self {
        Self {
            frames: frames.into_iter(),
        }
    }
}

impl FrameSource for VecFrames {
    fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        self.frames.next()
    }
}

/// Audio already resident in memory at a known sample rate.
pub struct PcmAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioSource for PcmAudio {
    fn load(&self, target_rate: u32) -> Result<Vec<f32>, AudioError> {
        if self.sample_rate == 0 {
            return Err(AudioError::Unsupported("sample rate 0".to_string()));
        }
        Ok(resample_linear(&self.samples, self.sample_rate, target_rate))
    }
}

/// Linear-interpolation resampler for a mono signal.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round().max(1.0) as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let lo = (pos.floor() as usize).min(last);
            let hi = (lo + 1).min(last);
            let frac = (pos - lo as f64) as f32;
            samples[lo] + (samples[hi] - samples[lo]) * frac
        })
        .collect()
}
