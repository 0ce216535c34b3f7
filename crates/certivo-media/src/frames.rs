use std::path::{Path, PathBuf};

use certivo_core::{Frame, FrameError, FrameSource};

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// A video stored as a directory of still frames, played back in file-name order.
pub struct ImageSequence {
    paths: std::vec::IntoIter<PathBuf>,
    position: usize,
    decoded: usize,
}

impl ImageSequence {
    /// List the frame images in `dir`. Other files are ignored.
    pub fn open(dir: &Path) -> Result<Self, FrameError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| FrameError::Open(format!("{}: {e}", dir.display())))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| FrameError::Open(format!("{}: {e}", dir.display())))?
                .path();
            if is_frame_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        tracing::debug!(dir = %dir.display(), frames = paths.len(), "image sequence opened");
        Ok(Self::from_paths(paths))
    }

    /// Play back an explicit list of frame files in the given order.
    ///
    /// The image format is sniffed from file contents, so names need not carry an extension.
    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            paths: paths.into_iter(),
            position: 0,
            decoded: 0,
        }
    }

    /// Frames not yet consumed.
    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        let path = self.paths.next()?;
        let position = self.position;
        self.position += 1;

        let decoded = image::ImageReader::open(&path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(image::ImageError::IoError)
            .and_then(|reader| reader.decode());
        let image = match decoded {
            Ok(image) => image.to_rgb8(),
            Err(e) => {
                return Some(Err(FrameError::Decode {
                    index: position,
                    reason: format!("{}: {e}", path.display()),
                }))
            }
        };

        let index = self.decoded;
        self.decoded += 1;
        let (width, height) = image.dimensions();
        Some(Ok(Frame {
            index,
            width,
            height,
            data: image.into_raw(),
        }))
    }
}
