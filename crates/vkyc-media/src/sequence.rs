//! Frames from a directory of still images, ordered by file name.

use crate::error::{MediaError, MediaResult};
use std::path::{Path, PathBuf};
use vkyc_core::{FrameError, FrameSource, VideoFrame};

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "webp", "tiff"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|known| e.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    next: usize,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path) -> MediaResult<Self> {
        if !dir.is_dir() {
            return Err(MediaError::FileNotFound(dir.to_path_buf()));
        }
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && is_image(&path) {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            return Err(MediaError::EmptySequence(dir.to_path_buf()));
        }
        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        tracing::debug!(dir = %dir.display(), frames = paths.len(), "image sequence opened");
        Ok(Self { paths, next: 0 })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, FrameError> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        let index = self.next;
        self.next += 1;

        let image = image::open(path).map_err(|e| FrameError::Corrupt {
            index,
            reason: format!("{}: {e}", path.display()),
        })?;
        Ok(Some(VideoFrame::new(index, image.to_rgb8())))
    }
}
