//! certivo-media: concrete media collaborators for the liveness core.
//!
//! Video files demuxed with OpenCV, frame sequences decoded with `image`,
//! WAV tracks decoded with `hound`, and a face detector plus face-mesh
//! landmark model running on ONNX Runtime.

pub mod audio;
pub mod detector;
pub mod frames;
pub mod integrity;
pub mod mesh;
pub mod video;

pub use audio::WavAudio;
pub use detector::{FaceBox, FaceDetector};
pub use frames::ImageSequence;
pub use integrity::{sha256_file_hex, verify_model, IntegrityError};
pub use mesh::OnnxFaceMesh;
#[cfg(feature = "video")]
pub use video::VideoFile;
pub use video::VideoSource;
