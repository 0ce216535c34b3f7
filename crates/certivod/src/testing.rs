//! Test fixtures shared by the engine and HTTP tests.
//!
//! `PixelFace` reads a synthetic face off the first pixel of each frame:
//! red 0 means no face, red below 128 means closed eyes, green nudges the
//! nose tip and blue sets the lip gap.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use certivo_core::types::mesh;
use certivo_core::{Frame, LandmarkError, LandmarkModel, LandmarkSet, Point};
use image::{ImageFormat, Rgb, RgbImage};

pub struct PixelFace {
    pub delay: Duration,
}

impl PixelFace {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }
}

impl LandmarkModel for PixelFace {
    fn detect(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>, LandmarkError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let [r, g, b] = match frame.data.get(..3) {
            Some(&[r, g, b]) => [r, g, b],
            _ => return Ok(None),
        };
        if r == 0 {
            return Ok(None);
        }

        let eye_open = if r < 128 { 0.01 } else { 0.03 };
        let mut points = vec![Point::new(0.5, 0.5); mesh::POINT_COUNT];
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
        points[mesh::LOWER_LIP] = Point::new(0.5, 0.7 + b as f32 / 1000.0);
        points[mesh::NOSE_TIP] = Point::new(0.5 + g as f32 / 1000.0, 0.5);

        Ok(Some(LandmarkSet::new(points)))
    }
}

/// Pixels for a ten-frame live session: blinks on frames 2, 5 and 8, a
/// nose that shifts every frame, and an open mouth.
pub fn live_pixels() -> Vec<[u8; 3]> {
    (0..10)
        .map(|i| {
            let r = if matches!(i, 2 | 5 | 8) { 100 } else { 255 };
            let g = if i % 2 == 0 { 0 } else { 10 };
            [r, g, 50]
        })
        .collect()
}

/// Pixels for a still photo held to the camera.
pub fn static_pixels() -> Vec<[u8; 3]> {
    vec![[255, 0, 0]; 10]
}

pub fn png_bytes(pixel: [u8; 3]) -> Vec<u8> {
    let mut bytes = Vec::new();
    RgbImage::from_pixel(8, 8, Rgb(pixel))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// 16 kHz mono square wave at ±0.02.
pub fn wav_bytes() -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut bytes = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
        for i in 0..1600 {
            writer
                .write_sample(if i % 2 == 0 { 0.02f32 } else { -0.02 })
                .unwrap();
        }
        writer.finalize().unwrap();
    }
    bytes
}

pub fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "certivod-{tag}-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Write `pixels` as `frame_000.png`, `frame_001.png`, ... under `dir`.
pub fn write_frames(dir: &Path, pixels: &[[u8; 3]]) -> Vec<PathBuf> {
    pixels
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            let path = dir.join(format!("frame_{i:03}.png"));
            std::fs::write(&path, png_bytes(p)).unwrap();
            path
        })
        .collect()
}
