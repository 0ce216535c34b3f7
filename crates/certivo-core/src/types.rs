use serde::{Deserialize, Serialize};

/// One decoded video frame, RGB8, row-major.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position of the frame in the decoded stream (decodable frames only).
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// A single landmark, normalized to [0, 1] by frame width/height.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }

    /// Euclidean distance in the image plane.
    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Manhattan distance in the image plane.
    pub fn manhattan(&self, other: &Point) -> f32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Landmarks for the primary face in one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LandmarkSet {
    pub points: Vec<Point>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn get(&self, index: usize) -> Option<Point> {
        self.points.get(index).copied()
    }

    /// Fetch a fixed group of landmarks, or `None` if any index is missing.
    pub fn group<const N: usize>(&self, indices: &[usize; N]) -> Option<[Point; N]> {
        let mut out = [Point::default(); N];
        for (slot, &idx) in out.iter_mut().zip(indices.iter()) {
            *slot = self.get(idx)?;
        }
        Some(out)
    }
}

/// Indices into the 468-point face-mesh topology.
pub mod mesh {
    /// Number of landmarks produced by the face-mesh model.
    pub const POINT_COUNT: usize = 468;

    /// Left eye: corner, upper, upper, corner, lower, lower.
    pub const LEFT_EYE: [usize; 6] = [33, 160, 158, 133, 153, 144];
    /// Right eye, same ordering as [`LEFT_EYE`].
    pub const RIGHT_EYE: [usize; 6] = [362, 385, 387, 263, 373, 380];

    pub const UPPER_LIP: usize = 13;
    pub const LOWER_LIP: usize = 14;

    pub const NOSE_TIP: usize = 1;
}
