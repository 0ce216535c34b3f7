use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::LivenessConfig;
use crate::fusion::{FusionInputs, FusionPolicy, ReasonCode, RequestThresholds, Verdict};
use crate::replay::detect_replay;
use crate::scoring::{round2, score, AudioProfile};
use crate::signals::{SessionStatistics, SignalAggregator};
use crate::source::{AudioSource, FrameError, FrameSource, LandmarkModel};

/// Session facts behind a verdict, with unrounded scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub liveness_score: f64,
    pub lip_sync_score: f64,
    pub face_ever_detected: bool,
    pub blink_count: u32,
    pub frame_count: usize,
    pub face_frame_count: usize,
    pub mean_head_movement: f64,
    pub mouth_energy: f64,
    pub audio_energy: f64,
    pub truncated: bool,
    /// Why the video could not be read, if it could not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_error: Option<String>,
}

/// Outcome of one verification session.
///
/// Reported scores are rounded to two decimals; every decision is taken on
/// the unrounded values kept in [`Evidence`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub liveness_score: f64,
    pub lip_sync_score: f64,
    pub replay_flag: bool,
    pub challenge_passed: bool,
    pub message: String,
    pub reasons: Vec<ReasonCode>,
    pub evidence: Evidence,
}

impl VerificationResult {
    /// Score and judge finished session statistics with the session policy.
    pub fn from_statistics(
        stats: &SessionStatistics,
        audio: &AudioProfile,
        config: &LivenessConfig,
    ) -> Self {
        let scores = score(stats, audio, config);
        let replay = detect_replay(stats, config.min_head_movement);

        let verdict = FusionPolicy::Session(config.session).evaluate(&FusionInputs {
            liveness_score: scores.liveness,
            lip_sync_score: scores.lip_sync,
            replay_flag: replay.replay_flag,
            face_ever_detected: stats.face_ever_detected,
            blink_count: stats.blink_count,
            challenge_passed: false,
            device_trust_score: 0.0,
        });

        Self {
            liveness_score: round2(scores.liveness),
            lip_sync_score: round2(scores.lip_sync),
            replay_flag: replay.replay_flag,
            challenge_passed: verdict.passed,
            message: summarize(&verdict, stats),
            reasons: verdict.reasons,
            evidence: Evidence {
                liveness_score: scores.liveness,
                lip_sync_score: scores.lip_sync,
                face_ever_detected: stats.face_ever_detected,
                blink_count: stats.blink_count,
                frame_count: stats.frame_count,
                face_frame_count: stats.face_frame_count,
                mean_head_movement: replay.mean_head_movement,
                mouth_energy: scores.mouth_energy,
                audio_energy: scores.audio_energy,
                truncated: stats.truncated,
                input_error: None,
            },
        }
    }

    /// Minimal failing result for a video that could not be opened at all.
    pub fn unreadable(error: &FrameError, config: &LivenessConfig) -> Self {
        let mut result =
            Self::from_statistics(&SessionStatistics::default(), &AudioProfile::silent(), config);
        result.message = format!("Video unreadable: {error}");
        result.evidence.input_error = Some(error.to_string());
        result
    }
}

fn summarize(verdict: &Verdict, stats: &SessionStatistics) -> String {
    if verdict.passed {
        return "Verification complete".to_string();
    }
    if !stats.face_ever_detected {
        return "No face detected".to_string();
    }
    let failed: Vec<&str> = verdict.failures().map(|r| r.as_str()).collect();
    format!("Verification failed: {}", failed.join(", "))
}

/// Runs capture sessions against one landmark model.
///
/// Owns its model exclusively; give each concurrent worker its own verifier.
pub struct SessionVerifier<M> {
    model: M,
    config: LivenessConfig,
}

impl<M: LandmarkModel> SessionVerifier<M> {
    pub fn new(model: M, config: LivenessConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Consume the whole video, then score and judge it.
    ///
    /// Never fails: undecodable frames and landmark errors skip the frame,
    /// unreadable audio counts as silence.
    pub fn run_session_verification(
        &mut self,
        video: &mut dyn FrameSource,
        audio: Option<&dyn AudioSource>,
    ) -> VerificationResult {
        let stats = self.collect(video);
        let audio = self.audio_profile(audio);
        let result = VerificationResult::from_statistics(&stats, &audio, &self.config);

        tracing::info!(
            frames = stats.frame_count,
            face_frames = stats.face_frame_count,
            blinks = stats.blink_count,
            liveness = result.evidence.liveness_score,
            lip_sync = result.evidence.lip_sync_score,
            replay = result.replay_flag,
            passed = result.challenge_passed,
            "session verified"
        );
        result
    }

    /// Same as [`Self::run_session_verification`], for a video that may have failed to open.
    pub fn run_opened<F: FrameSource>(
        &mut self,
        video: Result<F, FrameError>,
        audio: Option<&dyn AudioSource>,
    ) -> VerificationResult {
        match video {
            Ok(mut frames) => self.run_session_verification(&mut frames, audio),
            Err(e) => {
                tracing::warn!(error = %e, "video unreadable");
                VerificationResult::unreadable(&e, &self.config)
            }
        }
    }

    fn collect(&mut self, video: &mut dyn FrameSource) -> SessionStatistics {
        self.model.reset();

        let mut agg = SignalAggregator::new(&self.config);
        // A budget too large to represent as an Instant has no deadline.
        let deadline =
            Instant::now().checked_add(Duration::from_secs(self.config.max_session_secs));
        let mut decode_failures = 0usize;

        while let Some(next) = video.next_frame() {
            if agg.frame_count() >= self.config.max_frames {
                tracing::warn!(max = self.config.max_frames, "frame cap reached, truncating session");
                agg.mark_truncated();
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!(
                    secs = self.config.max_session_secs,
                    "session time budget exhausted, truncating"
                );
                agg.mark_truncated();
                break;
            }

            let frame = match next {
                Ok(frame) => frame,
                Err(e) => {
                    decode_failures += 1;
                    tracing::debug!(error = %e, "frame skipped");
                    continue;
                }
            };

            let landmarks = match self.model.detect(&frame) {
                Ok(landmarks) => landmarks,
                Err(e) => {
                    tracing::debug!(frame = frame.index, error = %e, "landmark detection failed");
                    None
                }
            };
            agg.record_frame(landmarks.as_ref());
        }

        if decode_failures > 0 {
            tracing::warn!(decode_failures, "some frames could not be decoded");
        }
        agg.finish()
    }

    fn audio_profile(&self, audio: Option<&dyn AudioSource>) -> AudioProfile {
        let Some(audio) = audio else {
            return AudioProfile::silent();
        };
        match audio.load(self.config.audio_sample_rate) {
            Ok(samples) => AudioProfile::from_samples(&samples),
            Err(e) => {
                tracing::warn!(error = %e, "audio unreadable, treating as silence");
                AudioProfile::silent()
            }
        }
    }
}

/// Request-level decision combining a session result with device trust.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDecision {
    pub verified: bool,
    pub reasons: Vec<ReasonCode>,
    pub device_trust_score: f64,
}

/// Apply the request policy to a finished session and an external device-trust score.
pub fn fuse_with_device_trust(
    result: &VerificationResult,
    device_trust_score: f64,
    thresholds: &RequestThresholds,
) -> RequestDecision {
    let verdict = FusionPolicy::Request(*thresholds).evaluate(&FusionInputs {
        liveness_score: result.evidence.liveness_score,
        lip_sync_score: result.evidence.lip_sync_score,
        replay_flag: result.replay_flag,
        face_ever_detected: result.evidence.face_ever_detected,
        blink_count: result.evidence.blink_count,
        challenge_passed: result.challenge_passed,
        device_trust_score,
    });

    RequestDecision {
        verified: verdict.passed,
        reasons: verdict.reasons,
        device_trust_score,
    }
}
