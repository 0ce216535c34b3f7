//! Score fusion: turning sub-scores and flags into a pass/fail verdict.
//!
//! Two policies exist and they are deliberately kept apart:
//!
//! - [`FusionPolicy::Session`] decides whether a single capture session
//!   passed its challenge (lenient score thresholds, requires a face and a blink).
//! - [`FusionPolicy::Request`] decides whether a device earns a trusted-device
//!   credential (strict score thresholds plus an external device-trust score).
//!
//! Every predicate contributes exactly one [`ReasonCode`], in evaluation
//! order, whether it passed or failed.

use serde::{Deserialize, Serialize};

/// Thresholds for the per-session challenge decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionThresholds {
    /// Lip-sync must be strictly above this.
    pub lip_sync: f64,
    /// Liveness must be strictly above this.
    pub liveness: f64,
}

impl Default for SessionThresholds {
    fn default() -> Self {
        Self {
            lip_sync: 0.3,
            liveness: 0.4,
        }
    }
}

/// Thresholds for issuing a trusted-device credential. All are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestThresholds {
    pub liveness: f64,
    pub lip_sync: f64,
    pub device_trust: f64,
}

impl Default for RequestThresholds {
    fn default() -> Self {
        Self {
            liveness: 0.8,
            lip_sync: 0.8,
            device_trust: 0.75,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FusionPolicy {
    Session(SessionThresholds),
    Request(RequestThresholds),
}

/// Everything a policy may look at. Fields a policy does not use are ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionInputs {
    pub liveness_score: f64,
    pub lip_sync_score: f64,
    pub replay_flag: bool,
    pub face_ever_detected: bool,
    pub blink_count: u32,
    pub challenge_passed: bool,
    pub device_trust_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    FaceDetected,
    NoFaceDetected,
    BlinkOk,
    NoBlink,
    LivenessOk,
    LivenessLow,
    LipSyncOk,
    LipSyncLow,
    ChallengeOk,
    ChallengeFailed,
    ReplayClear,
    ReplaySuspected,
    DeviceSafe,
    DeviceUntrusted,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FaceDetected => "face_detected",
            Self::NoFaceDetected => "no_face_detected",
            Self::BlinkOk => "blink_ok",
            Self::NoBlink => "no_blink",
            Self::LivenessOk => "liveness_ok",
            Self::LivenessLow => "liveness_low",
            Self::LipSyncOk => "lip_sync_ok",
            Self::LipSyncLow => "lip_sync_low",
            Self::ChallengeOk => "challenge_ok",
            Self::ChallengeFailed => "challenge_failed",
            Self::ReplayClear => "replay_clear",
            Self::ReplaySuspected => "replay_suspected",
            Self::DeviceSafe => "device_safe",
            Self::DeviceUntrusted => "device_untrusted",
        }
    }

    /// Whether this code records a satisfied predicate.
    pub fn is_ok(&self) -> bool {
        matches!(
            self,
            Self::FaceDetected
                | Self::BlinkOk
                | Self::LivenessOk
                | Self::LipSyncOk
                | Self::ChallengeOk
                | Self::ReplayClear
                | Self::DeviceSafe
        )
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pass/fail decision with one reason per predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    pub reasons: Vec<ReasonCode>,
}

impl Verdict {
    /// Reasons for predicates that failed, in evaluation order.
    pub fn failures(&self) -> impl Iterator<Item = ReasonCode> + '_ {
        self.reasons.iter().copied().filter(|r| !r.is_ok())
    }
}

struct Checks {
    reasons: Vec<ReasonCode>,
    passed: bool,
}

impl Checks {
    fn new() -> Self {
        Self {
            reasons: Vec::with_capacity(5),
            passed: true,
        }
    }

    fn check(&mut self, ok: bool, pass: ReasonCode, fail: ReasonCode) {
        self.passed &= ok;
        self.reasons.push(if ok { pass } else { fail });
    }

    fn finish(self) -> Verdict {
        Verdict {
            passed: self.passed,
            reasons: self.reasons,
        }
    }
}

impl FusionPolicy {
    pub fn evaluate(&self, inputs: &FusionInputs) -> Verdict {
        match self {
            Self::Session(t) => evaluate_session(t, inputs),
            Self::Request(t) => evaluate_request(t, inputs),
        }
    }
}

fn evaluate_session(t: &SessionThresholds, i: &FusionInputs) -> Verdict {
    let mut c = Checks::new();
    c.check(
        i.face_ever_detected,
        ReasonCode::FaceDetected,
        ReasonCode::NoFaceDetected,
    );
    c.check(i.blink_count > 0, ReasonCode::BlinkOk, ReasonCode::NoBlink);
    c.check(
        i.lip_sync_score > t.lip_sync,
        ReasonCode::LipSyncOk,
        ReasonCode::LipSyncLow,
    );
    c.check(
        i.liveness_score > t.liveness,
        ReasonCode::LivenessOk,
        ReasonCode::LivenessLow,
    );
    c.check(
        !i.replay_flag,
        ReasonCode::ReplayClear,
        ReasonCode::ReplaySuspected,
    );
    c.finish()
}

fn evaluate_request(t: &RequestThresholds, i: &FusionInputs) -> Verdict {
    let mut c = Checks::new();
    c.check(
        i.liveness_score >= t.liveness,
        ReasonCode::LivenessOk,
        ReasonCode::LivenessLow,
    );
    c.check(
        i.lip_sync_score >= t.lip_sync,
        ReasonCode::LipSyncOk,
        ReasonCode::LipSyncLow,
    );
    c.check(
        i.challenge_passed,
        ReasonCode::ChallengeOk,
        ReasonCode::ChallengeFailed,
    );
    c.check(
        !i.replay_flag,
        ReasonCode::ReplayClear,
        ReasonCode::ReplaySuspected,
    );
    c.check(
        sanitize_trust(i.device_trust_score) >= t.device_trust,
        ReasonCode::DeviceSafe,
        ReasonCode::DeviceUntrusted,
    );
    c.finish()
}

/// Device trust outside [0, 1] (or NaN) is treated as untrusted.
fn sanitize_trust(score: f64) -> f64 {
    if score.is_finite() && (0.0..=1.0).contains(&score) {
        score
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passing() -> FusionInputs {
        FusionInputs {
            liveness_score: 0.95,
            lip_sync_score: 0.92,
            replay_flag: false,
            face_ever_detected: true,
            blink_count: 3,
            challenge_passed: true,
            device_trust_score: 0.97,
        }
    }

    fn session() -> FusionPolicy {
        FusionPolicy::Session(SessionThresholds::default())
    }

    fn request() -> FusionPolicy {
        FusionPolicy::Request(RequestThresholds::default())
    }

    #[test]
    fn session_policy_passes_and_lists_every_predicate() {
        let v = session().evaluate(&passing());
        assert!(v.passed);
        assert_eq!(
            v.reasons,
            vec![
                ReasonCode::FaceDetected,
                ReasonCode::BlinkOk,
                ReasonCode::LipSyncOk,
                ReasonCode::LivenessOk,
                ReasonCode::ReplayClear,
            ]
        );
    }

    #[test]
    fn request_policy_passes_with_canonical_reason_order() {
        let v = request().evaluate(&passing());
        assert!(v.passed);
        let codes: Vec<_> = v.reasons.iter().map(|r| r.as_str()).collect();
        assert_eq!(
            codes,
            vec!["liveness_ok", "lip_sync_ok", "challenge_ok", "replay_clear", "device_safe"]
        );
    }

    #[test]
    fn replay_overrides_any_scores_in_both_policies() {
        let inputs = FusionInputs {
            liveness_score: 1.0,
            lip_sync_score: 1.0,
            replay_flag: true,
            ..passing()
        };
        for policy in [session(), request()] {
            let v = policy.evaluate(&inputs);
            assert!(!v.passed);
            assert_eq!(v.failures().collect::<Vec<_>>(), vec![ReasonCode::ReplaySuspected]);
        }
    }

    #[test]
    fn session_thresholds_are_strict() {
        let at_threshold = FusionInputs {
            lip_sync_score: 0.3,
            liveness_score: 0.4,
            ..passing()
        };
        let v = session().evaluate(&at_threshold);
        assert!(!v.passed);
        assert_eq!(
            v.failures().collect::<Vec<_>>(),
            vec![ReasonCode::LipSyncLow, ReasonCode::LivenessLow]
        );
    }

    #[test]
    fn request_thresholds_are_inclusive() {
        let at_threshold = FusionInputs {
            liveness_score: 0.8,
            lip_sync_score: 0.8,
            device_trust_score: 0.75,
            ..passing()
        };
        assert!(request().evaluate(&at_threshold).passed);
    }

    #[test]
    fn low_device_trust_fails_request_policy() {
        for trust in [0.0, 0.5, 0.7499] {
            let v = request().evaluate(&FusionInputs {
                device_trust_score: trust,
                ..passing()
            });
            assert!(!v.passed);
            assert_eq!(v.failures().collect::<Vec<_>>(), vec![ReasonCode::DeviceUntrusted]);
        }
    }

    #[test]
    fn invalid_device_trust_is_untrusted() {
        for trust in [f64::NAN, f64::INFINITY, 1.5, -0.1] {
            let v = request().evaluate(&FusionInputs {
                device_trust_score: trust,
                ..passing()
            });
            assert!(!v.passed);
        }
    }

    #[test]
    fn session_policy_ignores_device_trust() {
        let v = session().evaluate(&FusionInputs {
            device_trust_score: 0.0,
            challenge_passed: false,
            ..passing()
        });
        assert!(v.passed);
    }

    #[test]
    fn no_face_and_no_blink_reported() {
        let v = session().evaluate(&FusionInputs {
            face_ever_detected: false,
            blink_count: 0,
            ..passing()
        });
        assert!(!v.passed);
        assert_eq!(v.reasons[0], ReasonCode::NoFaceDetected);
        assert_eq!(v.reasons[1], ReasonCode::NoBlink);
    }

    #[test]
    fn policies_disagree_between_thresholds() {
        // Mid-range scores satisfy the session policy but not the request policy.
        let inputs = FusionInputs {
            liveness_score: 0.6,
            lip_sync_score: 0.5,
            ..passing()
        };
        assert!(session().evaluate(&inputs).passed);
        assert!(!request().evaluate(&inputs).passed);
    }

    #[test]
    fn reason_codes_serialize_snake_case() {
        let json = serde_json::to_string(&vec![ReasonCode::DeviceSafe, ReasonCode::LipSyncLow])
            .unwrap();
        assert_eq!(json, r#"["device_safe","lip_sync_low"]"#);
    }

    #[test]
    fn policy_deserializes_from_tagged_form() {
        let p: FusionPolicy =
            serde_json::from_str(r#"{"policy":"request","device_trust":0.9}"#).unwrap();
        match p {
            FusionPolicy::Request(t) => {
                assert_eq!(t.device_trust, 0.9);
                assert_eq!(t.liveness, 0.8);
            }
            other => panic!("unexpected policy {other:?}"),
        }
    }
}
