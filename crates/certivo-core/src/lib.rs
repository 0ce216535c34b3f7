//! certivo-core: remote liveness decision pipeline.
//!
//! Turns a stream of face-mesh landmarks and an audio track into blink,
//! head-movement and lip-movement statistics, scores them, flags static or
//! replayed captures, and fuses everything into an auditable pass/fail verdict.

pub mod config;
pub mod fusion;
pub mod replay;
pub mod scoring;
pub mod session;
pub mod signals;
pub mod source;
pub mod types;

pub use config::{BlinkCounting, ConfigError, LivenessConfig};
pub use fusion::{FusionInputs, FusionPolicy, ReasonCode, RequestThresholds, SessionThresholds, Verdict};
pub use session::{fuse_with_device_trust, Evidence, RequestDecision, SessionVerifier, VerificationResult};
pub use signals::SessionStatistics;
pub use source::{AudioError, AudioSource, FrameError, FrameSource, LandmarkError, LandmarkModel};
pub use types::{Frame, LandmarkSet, Point};
