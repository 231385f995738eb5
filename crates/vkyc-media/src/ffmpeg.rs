//! Video decoding through an `ffmpeg` child process.
//!
//! ffmpeg writes packed RGB24 frames to stdout; the source reads them one
//! frame at a time so decoding stays in lockstep with analysis. Dropping the
//! source kills the child, which is how a capped or abandoned run stops it.

use crate::error::MediaError;
use crate::frame::RawFrameReader;
use crate::probe::probe_video;
use std::io::{BufReader, Read};
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use vkyc_core::{FrameError, FrameSource, VideoFrame};

/// Longest stderr excerpt carried into an error message.
const MAX_STDERR_CHARS: usize = 1024;

pub struct FfmpegSource {
    child: Child,
    frames: RawFrameReader<BufReader<ChildStdout>>,
    stderr: Option<JoinHandle<String>>,
    exhausted: bool,
}

impl FfmpegSource {
    /// Probe `path` and start decoding it. Any failure here is an open failure.
    pub fn open(path: &Path) -> Result<Self, FrameError> {
        let ffmpeg = which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;
        let info = probe_video(path)?;

        let mut child = Command::new(ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FrameError::Open(format!("spawn ffmpeg: {e}")))?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(FrameError::Open("ffmpeg stdout not captured".to_string()));
        };

        // Drained on its own thread so a chatty decoder never blocks on a full pipe.
        let stderr = child.stderr.take().and_then(|pipe| {
            std::thread::Builder::new()
                .name("ffmpeg-stderr".to_string())
                .spawn(move || drain(pipe))
                .ok()
        });

        tracing::debug!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            fps = ?info.fps,
            "ffmpeg decoder started"
        );

        Ok(Self {
            child,
            frames: RawFrameReader::new(BufReader::new(stdout), info.width, info.height),
            stderr,
            exhausted: false,
        })
    }

    fn collect_stderr(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}

fn drain(mut pipe: ChildStderr) -> String {
    let mut bytes = Vec::new();
    let _ = pipe.read_to_end(&mut bytes);
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Error text for a decoder that exited badly, with the tail of its stderr.
fn exit_message(status: ExitStatus, frames_read: usize, stderr: &str) -> String {
    let mut message = format!("ffmpeg exited with {status} after {frames_read} frames");
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        let skip = stderr.chars().count().saturating_sub(MAX_STDERR_CHARS);
        let tail: String = stderr.chars().skip(skip).collect();
        message.push_str(": ");
        message.push_str(&tail);
    }
    message
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, FrameError> {
        if self.exhausted {
            return Ok(None);
        }
        match self.frames.read_frame()? {
            Some(frame) => Ok(Some(frame)),
            None => {
                self.exhausted = true;
                // End of output: a failing exit status means the decoder gave up.
                let status = self
                    .child
                    .wait()
                    .map_err(|e| FrameError::Stream(format!("wait for ffmpeg: {e}")))?;
                let stderr = self.collect_stderr();
                if status.success() {
                    if !stderr.trim().is_empty() {
                        tracing::debug!(stderr = %stderr.trim(), "ffmpeg finished with warnings");
                    }
                    Ok(None)
                } else {
                    let message = exit_message(status, self.frames.frames_read(), &stderr);
                    tracing::warn!(error = %message, "ffmpeg decoder failed");
                    Err(FrameError::Stream(message))
                }
            }
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
        // The pipe closes with the child, so this join does not block for long.
        let _ = self.collect_stderr();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn test_exit_message_carries_stderr() {
        let status = ExitStatus::from_raw(1 << 8);
        let message = exit_message(
            status,
            42,
            "\n[h264 @ 0x55] Invalid NAL unit size\nError while decoding stream #0:0\n",
        );
        assert!(message.starts_with("ffmpeg exited with"));
        assert!(message.contains("after 42 frames"));
        assert!(message.ends_with("Error while decoding stream #0:0"));

        let quiet = exit_message(status, 0, "  \n");
        assert!(quiet.ends_with("after 0 frames"));
    }

    #[test]
    fn test_exit_message_keeps_stderr_tail() {
        let noisy = format!("{}END", "x".repeat(5000));
        let message = exit_message(ExitStatus::from_raw(1 << 8), 3, &noisy);
        assert!(message.ends_with("END"));
        assert!(message.len() < 1200);
    }

    #[test]
    fn test_drain_reads_child_stderr() {
        let mut child = Command::new("sh")
            .args(["-c", "echo 'moov atom not found' >&2; exit 1"])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let text = drain(child.stderr.take().unwrap());
        assert!(!child.wait().unwrap().success());
        assert_eq!(text.trim(), "moov atom not found");
    }

    #[test]
    fn test_open_missing_file_is_open_error() {
        // Fails either at ffmpeg discovery or at the probe; both are open errors.
        match FfmpegSource::open(Path::new("/nonexistent/kyc/video.webm")) {
            Err(FrameError::Open(_)) => {}
            Err(other) => panic!("expected open error, got {other}"),
            Ok(_) => panic!("opened a missing file"),
        }
    }
}
