//! certivo: offline liveness verification and model management.
//!
//! Usage:
//!   certivo verify --video take.mp4 --model face_mesh.onnx [--detector face_detector.onnx]
//!                  [--audio take.wav] [--device-trust 0.9]
//!   certivo setup --url URL --sha256 HEX [--model-dir DIR] [--file-name NAME]
//!   certivo check-model --model face_mesh.onnx --sha256 HEX

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use certivo_core::{
    fuse_with_device_trust, AudioSource, LandmarkModel, LivenessConfig, RequestDecision,
    SessionVerifier, VerificationResult,
};
use certivo_media::{FaceDetector, OnnxFaceMesh, VideoSource, WavAudio};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod setup;

#[derive(Parser, Debug)]
#[command(name = "certivo", version, about = "Remote human-liveness verification")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify one recorded session and print the result as JSON
    Verify {
        /// Video file, frame image, or directory of frame images played in file-name order
        #[arg(long, alias = "frames")]
        video: PathBuf,
        /// WAV recording of the same session
        #[arg(long)]
        audio: Option<PathBuf>,
        /// Face-mesh ONNX model
        #[arg(long)]
        model: PathBuf,
        /// Face-detector ONNX model used to locate the face before the mesh runs
        #[arg(long)]
        detector: Option<PathBuf>,
        /// TOML file overriding liveness thresholds and weights
        #[arg(long)]
        config: Option<PathBuf>,
        /// Also apply the credential policy with this device-trust score
        #[arg(long)]
        device_trust: Option<f64>,
    },
    /// Download the face-mesh model and verify its checksum
    Setup {
        #[arg(long)]
        url: String,
        /// Expected SHA-256 of the model (hex)
        #[arg(long)]
        sha256: String,
        /// Target directory (default: $XDG_DATA_HOME/certivo/models)
        #[arg(long)]
        model_dir: Option<PathBuf>,
        #[arg(long, default_value = "face_mesh.onnx")]
        file_name: String,
    },
    /// Check a model file against its expected SHA-256
    CheckModel {
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        sha256: String,
    },
}

/// What `certivo verify` prints.
#[derive(Debug, Serialize)]
struct Report {
    session: VerificationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    request: Option<RequestDecision>,
}

impl Report {
    fn passed(&self) -> bool {
        match &self.request {
            Some(decision) => decision.verified,
            None => self.session.challenge_passed,
        }
    }
}

fn verify_session<M: LandmarkModel>(
    model: M,
    config: LivenessConfig,
    video: &Path,
    audio: Option<&Path>,
    device_trust: Option<f64>,
) -> Report {
    let thresholds = config.request;
    let mut verifier = SessionVerifier::new(model, config);
    let audio = audio.map(WavAudio::new);
    let session = verifier.run_opened(
        VideoSource::open(video),
        audio.as_ref().map(|a| a as &dyn AudioSource),
    );
    let request = device_trust.map(|trust| fuse_with_device_trust(&session, trust, &thresholds));

    let report = Report { session, request };
    tracing::info!(
        video = %video.display(),
        frames = report.session.evidence.frame_count,
        device_trust = ?device_trust,
        passed = report.passed(),
        "verification finished"
    );
    report
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Verify {
            video,
            audio,
            model,
            detector,
            config,
            device_trust,
        } => {
            let config = match config {
                Some(path) => LivenessConfig::load(&path)?,
                None => LivenessConfig::default(),
            };
            let mut mesh = OnnxFaceMesh::load(
                &model,
                config.detection_confidence,
                config.tracking_confidence,
            )
            .context("failed to load face mesh model")?;
            match detector {
                Some(path) => {
                    let detector = FaceDetector::load(&path, config.detection_confidence)
                        .context("failed to load face detector model")?;
                    mesh = mesh.with_detector(detector);
                }
                None => tracing::warn!("no --detector given, running the mesh on whole frames"),
            }

            let report = verify_session(mesh, config, &video, audio.as_deref(), device_trust);
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.passed() {
                std::process::exit(1);
            }
        }
        Command::Setup {
            url,
            sha256,
            model_dir,
            file_name,
        } => {
            setup::run(&url, &sha256, model_dir, &file_name)?;
        }
        Command::CheckModel { model, sha256 } => {
            certivo_media::verify_model(&model, &sha256)?;
            tracing::debug!(model = %model.display(), "checksum verified");
            println!("{}: checksum ok", model.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use certivo_core::{Frame, LandmarkError, LandmarkSet, ReasonCode};

    struct Blind;

    impl LandmarkModel for Blind {
        fn detect(&mut self, _frame: &Frame) -> Result<Option<LandmarkSet>, LandmarkError> {
            Ok(None)
        }
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "certivo-cli-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn cli_parses_verify() {
        let cli = Cli::try_parse_from([
            "certivo",
            "verify",
            "--video",
            "/tmp/take.mp4",
            "--model",
            "/tmp/m.onnx",
            "--device-trust",
            "0.9",
        ])
        .unwrap();
        match cli.command {
            Command::Verify {
                video,
                device_trust,
                audio,
                detector,
                ..
            } => {
                assert_eq!(video, PathBuf::from("/tmp/take.mp4"));
                assert_eq!(device_trust, Some(0.9));
                assert!(audio.is_none());
                assert!(detector.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_accepts_frames_alias() {
        let cli = Cli::try_parse_from([
            "certivo", "verify", "--frames", "/tmp/frames", "--model", "/tmp/m.onnx",
        ])
        .unwrap();
        match cli.command {
            Command::Verify { video, .. } => assert_eq!(video, PathBuf::from("/tmp/frames")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_requires_model_for_verify() {
        assert!(Cli::try_parse_from(["certivo", "verify", "--video", "/tmp"]).is_err());
    }

    #[test]
    fn faceless_session_fails_both_policies() {
        let dir = temp_dir("faceless");
        for i in 0..3 {
            image::RgbImage::new(4, 4)
                .save(dir.join(format!("frame_{i}.png")))
                .unwrap();
        }

        let report = verify_session(Blind, LivenessConfig::default(), &dir, None, Some(0.97));
        assert!(!report.passed());
        assert_eq!(report.session.message, "No face detected");
        assert_eq!(report.session.evidence.frame_count, 3);

        let request = report.request.as_ref().unwrap();
        assert!(!request.verified);
        assert!(request.reasons.contains(&ReasonCode::DeviceSafe));
        assert!(request.reasons.contains(&ReasonCode::ChallengeFailed));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["session"]["challenge_passed"], false);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_video_reports_unreadable_video() {
        let report = verify_session(
            Blind,
            LivenessConfig::default(),
            Path::new("/nonexistent/certivo-frames"),
            None,
            None,
        );
        assert!(!report.passed());
        assert!(report.request.is_none());
        assert!(report.session.message.starts_with("Video unreadable"));
    }
}
