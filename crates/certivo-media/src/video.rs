//! Recorded video files, and picking the right reader for a path.
//!
//! Containers are demuxed with OpenCV's `VideoCapture`, which hands back BGR
//! frames; they are converted to the RGB8 layout the core expects. Container
//! support needs the `video` feature. Still-image inputs never touch OpenCV.

use std::path::Path;

use certivo_core::{Frame, FrameError, FrameSource};

use crate::frames::ImageSequence;

/// Either reader, chosen by [`VideoSource::open`].
pub enum VideoSource {
    Images(ImageSequence),
    #[cfg(feature = "video")]
    Container(VideoFile),
}

impl VideoSource {
    /// Open a directory of frames, a single frame image, or a video file.
    pub fn open(path: &Path) -> Result<Self, FrameError> {
        if path.is_dir() {
            return ImageSequence::open(path).map(Self::Images);
        }
        if !path.is_file() {
            return Err(FrameError::Open(format!("{}: no such file", path.display())));
        }
        if is_still_image(path) {
            return Ok(Self::Images(ImageSequence::from_paths(vec![path.to_path_buf()])));
        }
        open_container(path)
    }
}

#[cfg(feature = "video")]
fn open_container(path: &Path) -> Result<VideoSource, FrameError> {
    VideoFile::open(path).map(VideoSource::Container)
}

#[cfg(not(feature = "video"))]
fn open_container(path: &Path) -> Result<VideoSource, FrameError> {
    Err(FrameError::Open(format!(
        "{}: not a frame image, and video container support is not built in",
        path.display()
    )))
}

fn is_still_image(path: &Path) -> bool {
    image::ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map(|reader| reader.format().is_some())
        .unwrap_or(false)
}

impl FrameSource for VideoSource {
    fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        match self {
            Self::Images(seq) => seq.next_frame(),
            #[cfg(feature = "video")]
            Self::Container(file) => file.next_frame(),
        }
    }
}

#[cfg(feature = "video")]
pub use container::VideoFile;

#[cfg(feature = "video")]
mod container {
    use std::path::Path;

    use certivo_core::{Frame, FrameError, FrameSource};
    use opencv::core::Mat;
    use opencv::imgproc;
    use opencv::prelude::*;
    use opencv::videoio::{VideoCapture, CAP_ANY};

    /// A video container decoded front to back.
    pub struct VideoFile {
        capture: VideoCapture,
        buffer: Mat,
        position: usize,
        decoded: usize,
        finished: bool,
    }

    impl VideoFile {
        pub fn open(path: &Path) -> Result<Self, FrameError> {
            let open_err = |reason: String| FrameError::Open(format!("{}: {reason}", path.display()));

            let name = path
                .to_str()
                .ok_or_else(|| open_err("path is not valid UTF-8".to_string()))?;
            let capture =
                VideoCapture::from_file(name, CAP_ANY).map_err(|e| open_err(e.to_string()))?;
            if !capture.is_opened().map_err(|e| open_err(e.to_string()))? {
                return Err(open_err("not a readable video".to_string()));
            }

            tracing::debug!(path = %path.display(), "video file opened");
            Ok(Self {
                capture,
                buffer: Mat::default(),
                position: 0,
                decoded: 0,
                finished: false,
            })
        }

        fn convert(&mut self, position: usize) -> Result<Frame, FrameError> {
            let decode_err = |reason: String| FrameError::Decode {
                index: position,
                reason,
            };
            if self.buffer.empty() {
                return Err(decode_err("empty frame".to_string()));
            }

            let mut rgb = Mat::default();
            imgproc::cvt_color_def(&self.buffer, &mut rgb, imgproc::COLOR_BGR2RGB)
                .map_err(|e| decode_err(e.to_string()))?;

            let (width, height) = (rgb.cols() as u32, rgb.rows() as u32);
            let data = rgb
                .data_bytes()
                .map_err(|e| decode_err(e.to_string()))?
                .to_vec();
            if data.len() != (width as usize) * (height as usize) * 3 {
                return Err(decode_err(format!(
                    "{width}x{height} frame has {} bytes",
                    data.len()
                )));
            }

            let index = self.decoded;
            self.decoded += 1;
            Ok(Frame {
                index,
                width,
                height,
                data,
            })
        }
    }

    impl FrameSource for VideoFile {
        fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
            if self.finished {
                return None;
            }
            let position = self.position;
            self.position += 1;

            match self.capture.read(&mut self.buffer) {
                Ok(true) => Some(self.convert(position)),
                Ok(false) => {
                    self.finished = true;
                    None
                }
                Err(e) => {
                    self.finished = true;
                    Some(Err(FrameError::Decode {
                        index: position,
                        reason: e.to_string(),
                    }))
                }
            }
        }
    }

}
