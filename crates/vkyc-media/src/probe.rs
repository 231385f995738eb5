//! ffprobe stream dimensions.

use crate::error::{MediaError, MediaResult};
use serde::Deserialize;
use std::path::Path;
use std::process::{Command, Stdio};

/// Geometry of the first video stream, as ffmpeg will output it.
///
/// ffmpeg applies a stream's display rotation while decoding, so a portrait
/// phone clip stored as 1920x1080 with a 90° rotation reports 1080x1920.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Average frame rate, when ffprobe reports one.
    pub fps: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
    #[serde(default)]
    tags: FfprobeTags,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    rotate: Option<String>,
}

impl FfprobeStream {
    /// Display rotation in degrees, normalised to 0..360.
    ///
    /// Newer ffprobe reports it in the display matrix side data, older
    /// builds in the `rotate` tag.
    fn rotation(&self) -> i64 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|d| d.rotation)
            .or_else(|| self.tags.rotate.as_deref().and_then(|r| r.trim().parse().ok()))
            .unwrap_or(0.0);
        (degrees.round() as i64).rem_euclid(360)
    }

    fn display_size(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => match self.rotation() {
                90 | 270 => Some((height, width)),
                _ => Some((width, height)),
            },
            _ => None,
        }
    }
}

/// "30000/1001" → 29.97; "0/0" and garbage → None.
fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/')?;
    let (num, den): (f64, f64) = (num.trim().parse().ok()?, den.trim().parse().ok()?);
    (den > 0.0 && num > 0.0).then(|| num / den)
}

fn parse_probe(json: &[u8], path: &Path) -> MediaResult<VideoInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;
    probe
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("video"))
        .find_map(|s| {
            let (width, height) = s.display_size()?;
            Some(VideoInfo {
                width,
                height,
                fps: s.avg_frame_rate.as_deref().and_then(parse_rate),
            })
        })
        .ok_or_else(|| MediaError::NoVideoStream(path.to_path_buf()))
}

/// Probe a video file for the dimensions of its first video stream.
pub fn probe_video(path: &Path) -> MediaResult<VideoInfo> {
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    let ffprobe = which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let output = Command::new(ffprobe)
        .args(["-v", "quiet", "-print_format", "json", "-show_streams", "-select_streams", "v:0"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("exit status {}", output.status),
            stderr: Some(String::from_utf8_lossy(&output.stderr).into_owned()),
        });
    }

    parse_probe(&output.stdout, path)
}
