//! Raw decoder output to frames.

use crate::error::{MediaError, MediaResult};
use image::RgbImage;
use std::io::{ErrorKind, Read};
use vkyc_core::{FrameError, VideoFrame};

/// Bytes in one packed RGB24 frame.
pub fn rgb24_frame_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

/// Wrap a packed RGB24 buffer as an image, rejecting buffers of the wrong size.
pub fn rgb24_to_image(data: Vec<u8>, width: u32, height: u32) -> MediaResult<RgbImage> {
    let expected = rgb24_frame_len(width, height);
    let actual = data.len();
    if actual != expected {
        return Err(MediaError::InvalidFrameLength { expected, actual });
    }
    RgbImage::from_raw(width, height, data).ok_or(MediaError::InvalidFrameLength { expected, actual })
}

/// Read until `buf` is full or the reader is exhausted; returns bytes read.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Splits a byte stream of packed RGB24 frames into [`VideoFrame`]s.
pub struct RawFrameReader<R> {
    reader: R,
    width: u32,
    height: u32,
    next_index: usize,
    done: bool,
}

impl<R: Read> RawFrameReader<R> {
    pub fn new(reader: R, width: u32, height: u32) -> Self {
        Self {
            reader,
            width,
            height,
            next_index: 0,
            done: false,
        }
    }

    pub fn frames_read(&self) -> usize {
        self.next_index
    }

    /// Next full frame. A short trailing read ends the stream; an I/O error
    /// is a broken stream.
    pub fn read_frame(&mut self) -> Result<Option<VideoFrame>, FrameError> {
        if self.done {
            return Ok(None);
        }
        let mut buf = vec![0u8; rgb24_frame_len(self.width, self.height)];
        let filled = fill(&mut self.reader, &mut buf).map_err(|e| {
            self.done = true;
            FrameError::Stream(format!("read frame {}: {e}", self.next_index))
        })?;

        if filled < buf.len() {
            if filled > 0 {
                tracing::debug!(filled, expected = buf.len(), "discarding partial trailing frame");
            }
            self.done = true;
            return Ok(None);
        }

        let image = rgb24_to_image(buf, self.width, self.height).map_err(|e| FrameError::Corrupt {
            index: self.next_index,
            reason: e.to_string(),
        })?;
        let frame = VideoFrame::new(self.next_index, image);
        self.next_index += 1;
        Ok(Some(frame))
    }
}
