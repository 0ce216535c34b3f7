//! 468-point face mesh via ONNX Runtime.
//!
//! The model takes a 192×192 RGB crop scaled to [-1, 1] and returns 468
//! landmarks (x, y, z in crop pixels) plus a face-presence logit. With no
//! face tracked, the [`FaceDetector`] finds the primary face and the mesh
//! runs on its padded box. Later frames reuse the region around the previous
//! frame's landmarks until the presence score drops under the tracking
//! threshold, at which point the detector runs again. Without a detector the
//! whole frame is used, which only works when the face fills most of it.

use std::path::Path;

use certivo_core::types::mesh::POINT_COUNT;
use certivo_core::{Frame, LandmarkError, LandmarkModel, LandmarkSet, Point};

use crate::detector::{FaceBox, FaceDetector};
use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};

const INPUT_SIZE: u32 = 192;
/// Padding added around a detected box or the previous landmarks' bounding box.
const ROI_PADDING: f32 = 0.25;

/// Region of a frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Roi {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
}

impl Roi {
    fn full(frame: &Frame) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            w: frame.width as f32,
            h: frame.height as f32,
        }
    }

    /// Padded bounding box of pixel-space landmarks, clipped to the frame.
    fn around(points: &[Point], frame: &Frame) -> Option<Self> {
        let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
        let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Self::padded(min_x, min_y, max_x, max_y, frame)
    }

    /// Padded detector box, clipped to the frame.
    fn from_box(face: &FaceBox, frame: &Frame) -> Option<Self> {
        Self::padded(face.x, face.y, face.x + face.w, face.y + face.h, frame)
    }

    fn padded(min_x: f32, min_y: f32, max_x: f32, max_y: f32, frame: &Frame) -> Option<Self> {
        let pad_w = (max_x - min_x) * ROI_PADDING;
        let pad_h = (max_y - min_y) * ROI_PADDING;
        let x = (min_x - pad_w / 2.0).max(0.0);
        let y = (min_y - pad_h / 2.0).max(0.0);
        let w = (max_x + pad_w / 2.0).min(frame.width as f32) - x;
        let h = (max_y + pad_h / 2.0).min(frame.height as f32) - y;

        (w >= 1.0 && h >= 1.0).then_some(Self { x, y, w, h })
    }
}

fn sigmoid(logit: f32) -> f32 {
    1.0 / (1.0 + (-logit).exp())
}

/// Crop, resize and scale a region into an NHWC input tensor.
fn preprocess(image: &RgbImage, roi: Roi) -> Array4<f32> {
    let crop = image::imageops::crop_imm(
        image,
        roi.x as u32,
        roi.y as u32,
        roi.w.max(1.0) as u32,
        roi.h.max(1.0) as u32,
    )
    .to_image();
    let resized = image::imageops::resize(&crop, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    Array4::from_shape_fn((1, size, size, 3), |(_, y, x, c)| {
        resized.get_pixel(x as u32, y as u32)[c] as f32 / 127.5 - 1.0
    })
}

/// Map crop-space model output back to pixel coordinates.
fn to_frame_points(raw: &[f32], roi: Roi) -> Vec<Point> {
    let sx = roi.w / INPUT_SIZE as f32;
    let sy = roi.h / INPUT_SIZE as f32;
    raw.chunks_exact(3)
        .take(POINT_COUNT)
        .map(|p| Point {
            x: roi.x + p[0] * sx,
            y: roi.y + p[1] * sy,
            z: p[2],
        })
        .collect()
}

/// Face-mesh landmark model. Not shareable between sessions; see [`LandmarkModel`].
pub struct OnnxFaceMesh {
    session: Session,
    detector: Option<FaceDetector>,
    detection_confidence: f32,
    tracking_confidence: f32,
    /// Pixel-space landmarks of the previous frame, when a face was found.
    tracked: Option<Vec<Point>>,
}

impl OnnxFaceMesh {
    pub fn load(
        model_path: &Path,
        detection_confidence: f64,
        tracking_confidence: f64,
    ) -> Result<Self, LandmarkError> {
        if !model_path.exists() {
            return Err(LandmarkError::Load(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| LandmarkError::Load(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| LandmarkError::Load(e.to_string()))?
            .with_intra_threads(1)
            .map_err(|e| LandmarkError::Load(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| LandmarkError::Load(e.to_string()))?;

        tracing::info!(path = %model_path.display(), "face mesh model loaded");

        Ok(Self {
            session,
            detector: None,
            detection_confidence: detection_confidence as f32,
            tracking_confidence: tracking_confidence as f32,
            tracked: None,
        })
    }

    /// Locate faces with `detector` before running the mesh on untracked frames.
    pub fn with_detector(mut self, detector: FaceDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Run the mesh on one region. Returns pixel-space landmarks and presence probability.
    fn infer(&mut self, image: &RgbImage, roi: Roi) -> Result<(Vec<Point>, f32), LandmarkError> {
        let size = INPUT_SIZE as usize;
        let (data, _) = preprocess(image, roi).into_raw_vec_and_offset();
        let tensor = ort::value::Tensor::from_array(([1usize, size, size, 3], data))
            .map_err(|e| LandmarkError::Inference(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| LandmarkError::Inference(e.to_string()))?;
        if outputs.len() < 2 {
            return Err(LandmarkError::Inference(format!(
                "expected landmark and presence outputs, got {}",
                outputs.len()
            )));
        }

        let (_, landmarks) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::Inference(e.to_string()))?;
        let (_, presence) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::Inference(e.to_string()))?;

        if landmarks.len() < POINT_COUNT * 3 {
            return Err(LandmarkError::Inference(format!(
                "landmark output too short: {} values",
                landmarks.len()
            )));
        }
        let logit = presence.first().copied().unwrap_or(f32::NEG_INFINITY);

        Ok((to_frame_points(landmarks, roi), sigmoid(logit)))
    }
}

impl LandmarkModel for OnnxFaceMesh {
    fn detect(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>, LandmarkError> {
        let bad_frame = LandmarkError::BadFrame {
            width: frame.width,
            height: frame.height,
        };
        if frame.width == 0 || frame.height == 0 {
            return Err(bad_frame);
        }
        let image =
            RgbImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or(bad_frame)?;

        let tracked_roi = self
            .tracked
            .take()
            .and_then(|points| Roi::around(&points, frame));

        let mut found = None;
        if let Some(roi) = tracked_roi {
            let (points, presence) = self.infer(&image, roi)?;
            if presence >= self.tracking_confidence {
                found = Some(points);
            } else {
                tracing::debug!(frame = frame.index, presence, "tracking lost");
            }
        }
        if found.is_none() {
            let roi = match self.detector.as_mut() {
                Some(detector) => match detector.detect(&image)? {
                    Some(face) => Roi::from_box(&face, frame),
                    None => None,
                },
                None => Some(Roi::full(frame)),
            };
            let Some(roi) = roi else {
                tracing::debug!(frame = frame.index, "detector found no face");
                return Ok(None);
            };

            let (points, presence) = self.infer(&image, roi)?;
            if presence >= self.detection_confidence {
                found = Some(points);
            } else {
                tracing::debug!(frame = frame.index, presence, "no face detected");
            }
        }

        let Some(points) = found else {
            return Ok(None);
        };

        let (w, h) = (frame.width as f32, frame.height as f32);
        let normalized = points
            .iter()
            .map(|p| Point {
                x: p.x / w,
                y: p.y / h,
                z: p.z / w,
            })
            .collect();
        self.tracked = Some(points);

        Ok(Some(LandmarkSet::new(normalized)))
    }

    fn reset(&mut self) {
        self.tracked = None;
    }
}
