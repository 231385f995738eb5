//! vkyc-media — Frame sources and reference image loading.
//!
//! Videos are decoded by an external `ffmpeg`; directories of stills are
//! read in file-name order. [`verify_files`] wires both into the core
//! pipeline for callers that start from paths.

pub mod error;
pub mod ffmpeg;
pub mod frame;
pub mod probe;
pub mod sequence;

pub use error::{MediaError, MediaResult};
pub use ffmpeg::FfmpegSource;
pub use sequence::ImageSequenceSource;

use image::RgbImage;
use std::path::Path;
use vkyc_core::{run_face_verification, FailureKind, FrameError, ModelSet, VerificationResult, VerifyOptions};

/// Decode the document photo to RGB.
pub fn load_reference(path: &Path) -> MediaResult<RgbImage> {
    if !path.is_file() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    Ok(image::open(path)?.to_rgb8())
}

/// Verify a document photo against a video file or a directory of frames.
///
/// Never fails: an unreadable reference becomes a `reference_unreadable`
/// error result, and source failures are handled by the pipeline.
pub fn verify_files(
    models: &ModelSet,
    reference_path: &Path,
    video_path: &Path,
    options: &VerifyOptions,
) -> VerificationResult {
    let reference = match load_reference(reference_path) {
        Ok(image) => image,
        Err(e) => {
            tracing::warn!(path = %reference_path.display(), error = %e, "reference unreadable");
            return VerificationResult::error(FailureKind::ReferenceUnreadable, e.to_string());
        }
    };

    if video_path.is_dir() {
        run_face_verification(
            models,
            &reference,
            || ImageSequenceSource::open(video_path).map_err(FrameError::from),
            options,
        )
    } else {
        run_face_verification(models, &reference, || FfmpegSource::open(video_path), options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Rgb};
    use std::sync::Arc;
    use vkyc_core::{
        CapabilityError, FaceEmbeddingProvider, FaceEncoding, LandmarkDetector, LandmarkSet,
        MatchLabel, NoSmileDetector,
    };

    struct RedChannel;

    impl FaceEmbeddingProvider for RedChannel {
        fn encode(&self, image: &RgbImage) -> Result<Option<FaceEncoding>, CapabilityError> {
            Ok(Some(FaceEncoding::new(vec![image.get_pixel(0, 0)[0] as f32 / 100.0])))
        }
    }

    struct NoFaces;

    impl LandmarkDetector for NoFaces {
        fn detect(&self, _gray: &GrayImage) -> Result<Vec<LandmarkSet>, CapabilityError> {
            Ok(Vec::new())
        }
    }

    fn models() -> ModelSet {
        ModelSet::new(Arc::new(RedChannel), Arc::new(NoFaces), Arc::new(NoSmileDetector))
    }

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("vkyc-media-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_unreadable_reference() {
        let r = verify_files(
            &models(),
            Path::new("/nonexistent/doc.jpg"),
            Path::new("/nonexistent/video.mp4"),
            &VerifyOptions::default(),
        );
        assert_eq!(r.failure, Some(FailureKind::ReferenceUnreadable));
        assert!(r.is_error());
    }

    #[test]
    fn test_image_sequence_run() {
        let dir = scratch_dir("run");
        let frames = dir.join("frames");
        std::fs::create_dir_all(&frames).unwrap();
        let reference = dir.join("doc.png");
        RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])).save(&reference).unwrap();
        for (i, red) in [70u8, 30, 55].iter().enumerate() {
            RgbImage::from_pixel(4, 4, Rgb([*red, 0, 0]))
                .save(frames.join(format!("{i:03}.png")))
                .unwrap();
        }

        let r = verify_files(&models(), &reference, &frames, &VerifyOptions::default());
        assert_eq!(r.frames_processed, 3);
        assert!((r.score - 0.7).abs() < 1e-6, "score = {}", r.score);
        assert_eq!(r.match_label, MatchLabel::Match);
        assert_eq!(r.liveness_label, "Failed (0 blinks)");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_empty_frame_directory_is_open_failure() {
        let dir = scratch_dir("empty");
        let reference = dir.join("doc.png");
        RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])).save(&reference).unwrap();
        let frames = dir.join("frames");
        std::fs::create_dir_all(&frames).unwrap();

        let r = verify_files(&models(), &reference, &frames, &VerifyOptions::default());
        assert_eq!(r.failure, Some(FailureKind::StreamOpen));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
