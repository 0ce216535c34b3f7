use std::path::PathBuf;
use std::time::Duration;

use certivo_core::{AudioSource, LandmarkModel, LivenessConfig, SessionVerifier, VerificationResult};
use certivo_media::{ImageSequence, VideoSource, WavAudio};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("verification timed out after {0}s")]
    Timeout(u64),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Where a session's frames live on disk.
#[derive(Debug, Clone)]
pub enum VideoInput {
    /// A recorded video file, or a single frame image.
    File(PathBuf),
    /// Every frame image in a directory, in file-name order.
    Directory(PathBuf),
    /// Explicit frame files, in the given order.
    Frames(Vec<PathBuf>),
}

#[derive(Debug, Clone)]
pub struct VerifyJob {
    pub video: VideoInput,
    /// Optional WAV track.
    pub audio: Option<PathBuf>,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Verify {
        job: VerifyJob,
        reply: oneshot::Sender<VerificationResult>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Queue a session and wait for its result, giving up after `timeout`.
    ///
    /// A timed-out session still runs to completion on the engine thread;
    /// its result is discarded.
    pub async fn verify(
        &self,
        job: VerifyJob,
        timeout: Duration,
    ) -> Result<VerificationResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = async {
            self.tx
                .send(EngineRequest::Verify {
                    job,
                    reply: reply_tx,
                })
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)
        };

        tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| EngineError::Timeout(timeout.as_secs()))?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the landmark model and runs one session at a time;
/// tracking state never leaks between sessions.
pub fn spawn_engine<M>(model: M, config: LivenessConfig) -> Result<EngineHandle, EngineError>
where
    M: LandmarkModel + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let mut verifier = SessionVerifier::new(model, config);

    std::thread::Builder::new()
        .name("certivo-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Verify { job, reply } => {
                        let result = run_job(&mut verifier, job);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_job<M: LandmarkModel>(verifier: &mut SessionVerifier<M>, job: VerifyJob) -> VerificationResult {
    let video = match job.video {
        VideoInput::File(path) | VideoInput::Directory(path) => VideoSource::open(&path),
        VideoInput::Frames(paths) => Ok(VideoSource::Images(ImageSequence::from_paths(paths))),
    };
    let audio = job.audio.map(WavAudio::new);
    verifier.run_opened(video, audio.as_ref().map(|a| a as &dyn AudioSource))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{live_pixels, static_pixels, temp_dir, wav_bytes, write_frames, PixelFace};
    use certivo_core::ReasonCode;

    #[tokio::test]
    async fn live_session_passes() {
        let dir = temp_dir("engine-live");
        write_frames(&dir, &live_pixels());
        let audio = dir.join("audio.wav");
        std::fs::write(&audio, wav_bytes()).unwrap();

        let engine = spawn_engine(PixelFace::new(), LivenessConfig::default()).unwrap();
        let result = engine
            .verify(
                VerifyJob {
                    video: VideoInput::Directory(dir.clone()),
                    audio: Some(audio),
                },
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        assert!(result.challenge_passed, "{result:?}");
        assert!(!result.replay_flag);
        assert_eq!(result.evidence.blink_count, 3);
        assert_eq!(result.evidence.frame_count, 10);
        assert_eq!(result.liveness_score, 1.0);
        assert_eq!(result.lip_sync_score, 1.0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn sessions_run_back_to_back() {
        let dir = temp_dir("engine-seq");
        let still = write_frames(&dir, &static_pixels());

        let engine = spawn_engine(PixelFace::new(), LivenessConfig::default()).unwrap();
        for _ in 0..2 {
            let result = engine
                .verify(
                    VerifyJob {
                        video: VideoInput::Frames(still.clone()),
                        audio: None,
                    },
                    Duration::from_secs(10),
                )
                .await
                .unwrap();
            assert!(!result.challenge_passed);
            assert!(result.replay_flag);
            assert!(result.reasons.contains(&ReasonCode::NoBlink));
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_directory_is_unreadable_not_an_error() {
        let engine = spawn_engine(PixelFace::new(), LivenessConfig::default()).unwrap();
        let result = engine
            .verify(
                VerifyJob {
                    video: VideoInput::Directory(PathBuf::from("/nonexistent/certivo-frames")),
                    audio: None,
                },
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        assert!(!result.challenge_passed);
        assert!(result.message.starts_with("Video unreadable"));
        assert!(result.evidence.input_error.is_some());
    }

    #[tokio::test]
    async fn undecodable_video_file_is_unreadable() {
        let dir = temp_dir("engine-garbage");
        let clip = dir.join("clip.mp4");
        std::fs::write(&clip, b"not a video container").unwrap();

        let engine = spawn_engine(PixelFace::new(), LivenessConfig::default()).unwrap();
        let result = engine
            .verify(
                VerifyJob {
                    video: VideoInput::File(clip),
                    audio: None,
                },
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        assert!(!result.challenge_passed);
        assert!(result.message.starts_with("Video unreadable"), "{}", result.message);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn slow_session_times_out() {
        let dir = temp_dir("engine-slow");
        let frames = write_frames(&dir, &static_pixels());

        let model = PixelFace {
            delay: Duration::from_millis(200),
        };
        let engine = spawn_engine(model, LivenessConfig::default()).unwrap();
        let err = engine
            .verify(
                VerifyJob {
                    video: VideoInput::Frames(frames),
                    audio: None,
                },
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
