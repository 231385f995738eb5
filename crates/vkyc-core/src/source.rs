use crate::types::VideoFrame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    /// The stream could not be opened at all. Fatal to the run.
    #[error("cannot open video: {0}")]
    Open(String),
    /// The decoder failed mid-stream and cannot continue. Fatal to the run.
    #[error("video stream failed: {0}")]
    Stream(String),
    /// A single frame could not be decoded. The run skips it and continues.
    #[error("corrupt frame {index}: {reason}")]
    Corrupt { index: usize, reason: String },
}

impl FrameError {
    /// Whether the run can continue past this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, FrameError::Corrupt { .. })
    }
}

/// Ordered, finite sequence of decoded frames.
///
/// Cancellation is "stop calling `next_frame`": implementations release their
/// decoder when dropped.
pub trait FrameSource {
    /// Next frame in stream order, or `Ok(None)` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, FrameError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, FrameError> {
        (**self).next_frame()
    }
}

/// In-memory frame source over pre-decoded results.
pub struct VecFrameSource {
    frames: std::vec::IntoIter<Result<VideoFrame, FrameError>>,
}

impl VecFrameSource {
    pub fn new(frames: Vec<VideoFrame>) -> Self {
        Self::from_results(frames.into_iter().map(Ok).collect())
    }

    /// Source that replays the given frames and errors in order.
    pub fn from_results(frames: Vec<Result<VideoFrame, FrameError>>) -> Self {
        Self {
            frames: frames.into_iter(),
        }
    }
}

impl FrameSource for VecFrameSource {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, FrameError> {
        self.frames.next().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_vec_source_yields_in_order_then_ends() {
        let frames = (0..3)
            .map(|i| VideoFrame::new(i, RgbImage::new(2, 2)))
            .collect();
        let mut src = VecFrameSource::new(frames);
        for expected in 0..3 {
            assert_eq!(src.next_frame().unwrap().unwrap().index, expected);
        }
        assert!(src.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_only_corrupt_frames_are_transient() {
        let corrupt = FrameError::Corrupt {
            index: 4,
            reason: "bad".into(),
        };
        assert!(corrupt.is_transient());
        assert!(!FrameError::Stream("eof".into()).is_transient());
        assert!(!FrameError::Open("missing".into()).is_transient());
    }
}
