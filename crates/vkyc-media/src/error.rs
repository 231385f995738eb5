use std::path::PathBuf;
use thiserror::Error;
use vkyc_core::FrameError;

pub type MediaResult<T> = Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("ffmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("ffprobe not found in PATH")]
    FfprobeNotFound,

    #[error("ffprobe failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("no video stream in {0}")]
    NoVideoStream(PathBuf),

    #[error("no image files in {0}")]
    EmptySequence(PathBuf),

    #[error("frame buffer has {actual} bytes, expected {expected}")]
    InvalidFrameLength { expected: usize, actual: usize },

    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// Anything that stops a source from being constructed is an open failure.
impl From<MediaError> for FrameError {
    fn from(e: MediaError) -> Self {
        FrameError::Open(e.to_string())
    }
}
