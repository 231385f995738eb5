use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use vkyc_core::VerifyOptions;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Optional on-disk overrides. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub model_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub max_frames: Option<usize>,
    pub ear_threshold: Option<f32>,
    pub match_threshold: Option<f32>,
    pub smile_ratio: Option<f32>,
    pub parallel_scoring: Option<bool>,
    pub engine_workers: Option<usize>,
    pub verify_timeout_secs: Option<u64>,
    pub session_bus: Option<bool>,
}

/// Daemon configuration.
///
/// Resolved in three layers: built-in defaults, then the TOML file named by
/// `VKYC_CONFIG` (if set), then `VKYC_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Frames read from a video before the run stops.
    pub max_frames: usize,
    /// Eye aspect ratio below which an eye counts as closed.
    pub ear_threshold: f32,
    /// Minimum similarity for a "Match" label.
    pub match_threshold: f32,
    /// Mouth/jaw width ratio at which a face counts as smiling.
    pub smile_ratio: f32,
    pub parallel_scoring: bool,
    /// Engine worker threads; each runs one verification at a time.
    pub engine_workers: usize,
    /// Wall-clock limit for a Verify call, in seconds.
    pub verify_timeout_secs: u64,
    /// Serve on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl Default for Config {
    fn default() -> Self {
        let options = VerifyOptions::default();
        Self {
            model_dir: vkyc_models::default_model_dir(),
            db_path: data_dir().join("kyc.db"),
            max_frames: options.max_frames,
            ear_threshold: options.ear_threshold,
            match_threshold: options.match_threshold,
            smile_ratio: vkyc_models::DEFAULT_SMILE_RATIO,
            parallel_scoring: options.parallel_scoring,
            engine_workers: 2,
            verify_timeout_secs: 120,
            session_bus: false,
        }
    }
}

impl Config {
    /// Load the config file named by `VKYC_CONFIG` and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var("VKYC_CONFIG") {
            Ok(path) => FileConfig::read(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    /// Layer `file` and then the variables returned by `env` over the defaults.
    pub fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            model_dir: env("VKYC_MODEL_DIR")
                .map(PathBuf::from)
                .or(file.model_dir)
                .unwrap_or(defaults.model_dir),
            db_path: env("VKYC_DB_PATH")
                .map(PathBuf::from)
                .or(file.db_path)
                .unwrap_or(defaults.db_path),
            max_frames: env_parse(&env, "VKYC_MAX_FRAMES")
                .or(file.max_frames)
                .unwrap_or(defaults.max_frames),
            ear_threshold: ratio("VKYC_EAR_THRESHOLD", env_parse(&env, "VKYC_EAR_THRESHOLD"))
                .or(ratio("ear_threshold", file.ear_threshold))
                .unwrap_or(defaults.ear_threshold),
            match_threshold: ratio("VKYC_MATCH_THRESHOLD", env_parse(&env, "VKYC_MATCH_THRESHOLD"))
                .or(ratio("match_threshold", file.match_threshold))
                .unwrap_or(defaults.match_threshold),
            smile_ratio: ratio("VKYC_SMILE_RATIO", env_parse(&env, "VKYC_SMILE_RATIO"))
                .or(ratio("smile_ratio", file.smile_ratio))
                .unwrap_or(defaults.smile_ratio),
            parallel_scoring: env("VKYC_PARALLEL_SCORING")
                .map(|v| env_flag(&v))
                .or(file.parallel_scoring)
                .unwrap_or(defaults.parallel_scoring),
            engine_workers: env_parse(&env, "VKYC_ENGINE_WORKERS")
                .or(file.engine_workers)
                .unwrap_or(defaults.engine_workers)
                .max(1),
            verify_timeout_secs: env_parse(&env, "VKYC_VERIFY_TIMEOUT_SECS")
                .or(file.verify_timeout_secs)
                .unwrap_or(defaults.verify_timeout_secs),
            session_bus: env("VKYC_SESSION_BUS")
                .map(|v| env_flag(&v))
                .or(file.session_bus)
                .unwrap_or(defaults.session_bus),
        }
    }

    /// Pipeline options derived from this config.
    pub fn verify_options(&self) -> VerifyOptions {
        VerifyOptions {
            max_frames: self.max_frames,
            ear_threshold: self.ear_threshold,
            match_threshold: self.match_threshold,
            parallel_scoring: self.parallel_scoring,
            ..VerifyOptions::default()
        }
    }
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("vkyc")
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.trim().parse().ok())
}

/// Thresholds are ratios: anything outside (0, 1], NaN included, is dropped
/// so the next layer applies.
fn ratio(key: &str, value: Option<f32>) -> Option<f32> {
    let value = value?;
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Some(value)
    } else {
        tracing::warn!(key, value, "threshold must be in (0, 1]; ignoring");
        None
    }
}

/// "0", "false", "no" and "off" are false; anything else is true.
fn env_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}
