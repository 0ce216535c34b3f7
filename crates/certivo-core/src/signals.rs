//! Per-frame geometric signals and their session-level accumulation.
//!
//! Each frame with a detected face contributes three measurements taken from
//! the face-mesh landmarks:
//!
//! - **Eye aspect ratio (EAR)**: eyelid opening relative to eye width,
//!   averaged over both eyes. Falls sharply while the eye is closed.
//! - **Mouth openness**: vertical gap between the inner upper and lower lip.
//! - **Nose-tip position**: compared with the previous face frame to give a
//!   head displacement sample.
//!
//! Frames without a face are skipped entirely: they add nothing to any series
//! and do not break the displacement chain between the face frames around them.

use serde::{Deserialize, Serialize};

use crate::config::{BlinkCounting, LivenessConfig};
use crate::types::{mesh, LandmarkSet, Point};

/// Below this eye width the EAR is undefined.
const MIN_EYE_WIDTH: f32 = 1e-6;

/// Eye aspect ratio for one eye, points ordered corner, upper, upper, corner, lower, lower.
///
/// Returns `None` when the corner points coincide.
pub fn eye_aspect_ratio(eye: &[Point; 6]) -> Option<f64> {
    let horizontal = eye[0].distance(&eye[3]);
    if horizontal < MIN_EYE_WIDTH {
        return None;
    }
    let vertical = eye[1].distance(&eye[5]) + eye[2].distance(&eye[4]);
    Some(vertical as f64 / (2.0 * horizontal as f64))
}

/// Signals measured on one face frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSignals {
    /// Mean of left and right EAR; `None` if either eye is degenerate.
    pub ear: Option<f64>,
    pub mouth_openness: f64,
    pub nose_tip: Point,
}

impl FrameSignals {
    /// Measure a landmark set. `None` if any required landmark is missing or non-finite.
    pub fn measure(landmarks: &LandmarkSet) -> Option<Self> {
        let left = landmarks.group(&mesh::LEFT_EYE)?;
        let right = landmarks.group(&mesh::RIGHT_EYE)?;
        let upper = landmarks.get(mesh::UPPER_LIP)?;
        let lower = landmarks.get(mesh::LOWER_LIP)?;
        let nose_tip = landmarks.get(mesh::NOSE_TIP)?;

        let all_finite = left
            .iter()
            .chain(right.iter())
            .chain([upper, lower, nose_tip].iter())
            .all(Point::is_finite);
        if !all_finite {
            return None;
        }

        let ear = match (eye_aspect_ratio(&left), eye_aspect_ratio(&right)) {
            (Some(l), Some(r)) => Some((l + r) / 2.0),
            _ => None,
        };

        Some(Self {
            ear,
            mouth_openness: (lower.y - upper.y).abs() as f64,
            nose_tip,
        })
    }
}

/// Accumulated statistics for a whole session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub blink_count: u32,
    /// Frames that decoded successfully, with or without a face.
    pub frame_count: usize,
    /// Frames that produced usable landmarks.
    pub face_frame_count: usize,
    /// One entry per face frame.
    pub mouth_openness_series: Vec<f64>,
    /// One entry per consecutive pair of face frames (`face_frame_count - 1`).
    pub head_movement_series: Vec<f64>,
    pub face_ever_detected: bool,
    /// Set when a frame or time cap stopped consumption early.
    pub truncated: bool,
}

impl SessionStatistics {
    /// Mean nose displacement; 0 when there are fewer than two face frames.
    pub fn mean_head_movement(&self) -> f64 {
        mean(&self.head_movement_series)
    }

    /// Mean mouth openness; 0 when no face was seen.
    pub fn mouth_energy(&self) -> f64 {
        mean(&self.mouth_openness_series)
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Builds [`SessionStatistics`] one frame at a time.
pub struct SignalAggregator {
    ear_threshold: f64,
    counting: BlinkCounting,
    stats: SessionStatistics,
    prev_nose: Option<Point>,
    eye_closed: bool,
}

impl SignalAggregator {
    pub fn new(config: &LivenessConfig) -> Self {
        Self {
            ear_threshold: config.ear_threshold,
            counting: config.blink_counting,
            stats: SessionStatistics::default(),
            prev_nose: None,
            eye_closed: false,
        }
    }

    /// Record one decoded frame and the landmarks found in it, if any.
    pub fn record_frame(&mut self, landmarks: Option<&LandmarkSet>) {
        self.stats.frame_count += 1;

        let Some(landmarks) = landmarks else {
            return;
        };
        let Some(signals) = FrameSignals::measure(landmarks) else {
            tracing::debug!(
                points = landmarks.points.len(),
                "landmark set incomplete, frame skipped"
            );
            return;
        };

        self.record_signals(&signals);
    }

    fn record_signals(&mut self, signals: &FrameSignals) {
        self.stats.face_ever_detected = true;
        self.stats.face_frame_count += 1;

        if let Some(ear) = signals.ear {
            let closed = ear < self.ear_threshold;
            match self.counting {
                BlinkCounting::PerFrame => {
                    if closed {
                        self.stats.blink_count += 1;
                    }
                }
                BlinkCounting::Debounced => {
                    if closed && !self.eye_closed {
                        self.stats.blink_count += 1;
                    }
                }
            }
            self.eye_closed = closed;
        }

        self.stats
            .mouth_openness_series
            .push(signals.mouth_openness);

        if let Some(prev) = self.prev_nose {
            self.stats
                .head_movement_series
                .push(signals.nose_tip.manhattan(&prev) as f64);
        }
        self.prev_nose = Some(signals.nose_tip);
    }

    /// Note that the stream was cut short by a session cap.
    pub fn mark_truncated(&mut self) {
        self.stats.truncated = true;
    }

    pub fn frame_count(&self) -> usize {
        self.stats.frame_count
    }

    pub fn finish(self) -> SessionStatistics {
        self.stats
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Face-mesh landmark set with controllable eye opening, mouth gap and nose position.
    pub(crate) fn face(eye_open: f32, mouth_gap: f32, nose: (f32, f32)) -> LandmarkSet {
        let mut points = vec![Point::new(0.5, 0.5); mesh::POINT_COUNT];

        // Each eye is 0.1 wide; EAR = (2 * eye_open) / (2 * 0.1) = eye_open / 0.1.
        for (eye, cx) in [(mesh::LEFT_EYE, 0.35f32), (mesh::RIGHT_EYE, 0.65f32)] {
            let half = eye_open / 2.0;
            points[eye[0]] = Point::new(cx - 0.05, 0.4);
            points[eye[1]] = Point::new(cx - 0.02, 0.4 - half);
            points[eye[2]] = Point::new(cx + 0.02, 0.4 - half);
            points[eye[3]] = Point::new(cx + 0.05, 0.4);
            points[eye[4]] = Point::new(cx + 0.02, 0.4 + half);
            points[eye[5]] = Point::new(cx - 0.02, 0.4 + half);
        }

        points[mesh::UPPER_LIP] = Point::new(0.5, 0.7);
        points[mesh::LOWER_LIP] = Point::new(0.5, 0.7 + mouth_gap);
        points[mesh::NOSE_TIP] = Point::new(nose.0, nose.1);

        LandmarkSet::new(points)
    }

    #[test]
    fn ear_of_open_and_closed_eye() {
        let open = FrameSignals::measure(&face(0.03, 0.0, (0.5, 0.5))).unwrap();
        assert!((open.ear.unwrap() - 0.3).abs() < 1e-4);

        let closed = FrameSignals::measure(&face(0.01, 0.0, (0.5, 0.5))).unwrap();
        assert!((closed.ear.unwrap() - 0.1).abs() < 1e-4);
    }

    #[test]
    fn degenerate_eye_has_no_ear() {
        let eye = [Point::new(0.3, 0.4); 6];
        assert!(eye_aspect_ratio(&eye).is_none());
    }

    #[test]
    fn mouth_openness_is_lip_gap() {
        let s = FrameSignals::measure(&face(0.03, 0.05, (0.5, 0.5))).unwrap();
        assert!((s.mouth_openness - 0.05).abs() < 1e-5);
    }

    #[test]
    fn incomplete_landmarks_are_skipped() {
        let mut agg = SignalAggregator::new(&LivenessConfig::default());
        agg.record_frame(Some(&LandmarkSet::new(vec![Point::new(0.1, 0.1); 20])));
        let stats = agg.finish();
        assert_eq!(stats.frame_count, 1);
        assert_eq!(stats.face_frame_count, 0);
        assert!(!stats.face_ever_detected);
        assert!(stats.mouth_openness_series.is_empty());
    }

    #[test]
    fn non_finite_landmarks_count_as_no_face() {
        let mut broken = face(0.03, 0.02, (0.5, 0.5));
        broken.points[mesh::NOSE_TIP].x = f32::NAN;
        assert!(FrameSignals::measure(&broken).is_none());

        let mut agg = SignalAggregator::new(&LivenessConfig::default());
        agg.record_frame(Some(&face(0.03, 0.02, (0.5, 0.5))));
        agg.record_frame(Some(&broken));
        agg.record_frame(Some(&face(0.03, 0.02, (0.5, 0.5))));
        let stats = agg.finish();

        assert_eq!(stats.frame_count, 3);
        assert_eq!(stats.face_frame_count, 2);
        assert_eq!(stats.head_movement_series, vec![0.0]);
        assert!(stats.mean_head_movement().is_finite());
    }

    #[test]
    fn first_face_frame_has_no_displacement() {
        let mut agg = SignalAggregator::new(&LivenessConfig::default());
        agg.record_frame(Some(&face(0.03, 0.02, (0.5, 0.5))));
        let stats = agg.finish();
        assert_eq!(stats.face_frame_count, 1);
        assert_eq!(stats.mouth_openness_series.len(), 1);
        assert!(stats.head_movement_series.is_empty());
        assert_eq!(stats.mean_head_movement(), 0.0);
    }

    #[test]
    fn displacement_is_manhattan_and_bridges_no_face_frames() {
        let mut agg = SignalAggregator::new(&LivenessConfig::default());
        agg.record_frame(Some(&face(0.03, 0.02, (0.50, 0.50))));
        agg.record_frame(None);
        agg.record_frame(Some(&face(0.03, 0.02, (0.53, 0.46))));
        let stats = agg.finish();

        assert_eq!(stats.frame_count, 3);
        assert_eq!(stats.face_frame_count, 2);
        assert_eq!(stats.head_movement_series.len(), 1);
        assert!((stats.head_movement_series[0] - 0.07).abs() < 1e-5);
    }

    #[test]
    fn per_frame_counting_counts_every_closed_frame() {
        let mut agg = SignalAggregator::new(&LivenessConfig::default());
        for open in [0.03, 0.01, 0.01, 0.01, 0.03] {
            agg.record_frame(Some(&face(open, 0.0, (0.5, 0.5))));
        }
        assert_eq!(agg.finish().blink_count, 3);
    }

    #[test]
    fn debounced_counting_counts_runs() {
        let config = LivenessConfig {
            blink_counting: BlinkCounting::Debounced,
            ..LivenessConfig::default()
        };
        let mut agg = SignalAggregator::new(&config);
        for open in [0.03, 0.01, 0.01, 0.03, 0.01, 0.03] {
            agg.record_frame(Some(&face(open, 0.0, (0.5, 0.5))));
        }
        assert_eq!(agg.finish().blink_count, 2);
    }

    #[test]
    fn no_face_frames_leave_series_empty() {
        let mut agg = SignalAggregator::new(&LivenessConfig::default());
        for _ in 0..5 {
            agg.record_frame(None);
        }
        let stats = agg.finish();
        assert_eq!(stats.frame_count, 5);
        assert!(!stats.face_ever_detected);
        assert_eq!(stats.blink_count, 0);
        assert_eq!(stats.mouth_energy(), 0.0);
    }
}
