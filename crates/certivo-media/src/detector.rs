//! Primary-face detector (UltraFace layout) that seeds the face mesh.
//!
//! The model takes a 320×240 NCHW image scaled as `(p - 127) / 128` and
//! returns, per anchor, a background/face score pair and an encoded box.
//! Only the single best box is kept; the mesh handles one face.

use std::path::Path;

use certivo_core::LandmarkError;
use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};

const INPUT_WIDTH: u32 = 320;
const INPUT_HEIGHT: u32 = 240;
const CENTER_VARIANCE: f32 = 0.1;
const SIZE_VARIANCE: f32 = 0.2;
const STRIDES: [u32; 4] = [8, 16, 32, 64];
const MIN_BOXES: [&[f32]; 4] = [
    &[10.0, 16.0, 24.0],
    &[32.0, 48.0],
    &[64.0, 96.0],
    &[128.0, 192.0, 256.0],
];

/// Face box in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub score: f32,
}

/// Prior box, normalized `(cx, cy, w, h)`.
type Anchor = (f32, f32, f32, f32);

fn anchors() -> Vec<Anchor> {
    let (w, h) = (INPUT_WIDTH as f32, INPUT_HEIGHT as f32);
    let mut out = Vec::new();
    for (stride, sizes) in STRIDES.iter().zip(MIN_BOXES) {
        let s = *stride as f32;
        let rows = (h / s).ceil() as u32;
        let cols = (w / s).ceil() as u32;
        for row in 0..rows {
            for col in 0..cols {
                let cx = (col as f32 + 0.5) * s / w;
                let cy = (row as f32 + 0.5) * s / h;
                for size in sizes {
                    out.push((cx, cy, size / w, size / h));
                }
            }
        }
    }
    out
}

/// Highest-scoring face at or above `threshold`, in normalized coordinates.
fn best_box(anchors: &[Anchor], scores: &[f32], boxes: &[f32], threshold: f32) -> Option<FaceBox> {
    let mut best: Option<FaceBox> = None;
    for (i, &(ax, ay, aw, ah)) in anchors.iter().enumerate() {
        let (Some(&score), Some(enc)) = (scores.get(i * 2 + 1), boxes.get(i * 4..i * 4 + 4)) else {
            break;
        };
        if score.is_nan() || score < threshold || best.is_some_and(|b| b.score >= score) {
            continue;
        }

        let cx = enc[0] * CENTER_VARIANCE * aw + ax;
        let cy = enc[1] * CENTER_VARIANCE * ah + ay;
        let w = (enc[2] * SIZE_VARIANCE).exp() * aw;
        let h = (enc[3] * SIZE_VARIANCE).exp() * ah;
        let candidate = FaceBox {
            x: cx - w / 2.0,
            y: cy - h / 2.0,
            w,
            h,
            score,
        };
        if [candidate.x, candidate.y, candidate.w, candidate.h]
            .iter()
            .all(|v| v.is_finite())
        {
            best = Some(candidate);
        }
    }
    best
}

fn preprocess(image: &RgbImage) -> Array4<f32> {
    let resized = image::imageops::resize(image, INPUT_WIDTH, INPUT_HEIGHT, FilterType::Triangle);
    Array4::from_shape_fn(
        (1, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize),
        |(_, c, y, x)| (resized.get_pixel(x as u32, y as u32)[c] as f32 - 127.0) / 128.0,
    )
}

pub struct FaceDetector {
    session: Session,
    anchors: Vec<Anchor>,
    score_threshold: f32,
}

impl FaceDetector {
    pub fn load(model_path: &Path, score_threshold: f64) -> Result<Self, LandmarkError> {
        if !model_path.exists() {
            return Err(LandmarkError::Load(format!(
                "detector model not found: {}",
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

        tracing::info!(path = %model_path.display(), "face detector loaded");

        Ok(Self {
            session,
            anchors: anchors(),
            score_threshold: score_threshold as f32,
        })
    }

    /// Box around the primary face, in pixels of `image`.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Option<FaceBox>, LandmarkError> {
        let shape = [1usize, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize];
        let (data, _) = preprocess(image).into_raw_vec_and_offset();
        let tensor = ort::value::Tensor::from_array((shape, data))
            .map_err(|e| LandmarkError::Inference(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| LandmarkError::Inference(e.to_string()))?;
        if outputs.len() < 2 {
            return Err(LandmarkError::Inference(format!(
                "expected score and box outputs, got {}",
                outputs.len()
            )));
        }
        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::Inference(e.to_string()))?;
        let (_, boxes) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::Inference(e.to_string()))?;

        let Some(face) = best_box(&self.anchors, scores, boxes, self.score_threshold) else {
            return Ok(None);
        };
        let (w, h) = (image.width() as f32, image.height() as f32);
        Ok(Some(FaceBox {
            x: face.x * w,
            y: face.y * h,
            w: face.w * w,
            h: face.h * h,
            score: face.score,
        }))
    }
}
