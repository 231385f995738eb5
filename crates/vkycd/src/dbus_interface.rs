use std::path::PathBuf;
use std::time::{Duration, Instant};
use zbus::interface;

use crate::config::Config;
use crate::engine::EngineHandle;
use crate::store::{FinalizeRequest, KycStore, StoreError};

pub const BUS_NAME: &str = "org.vkyc.Verifier1";
pub const OBJECT_PATH: &str = "/org/vkyc/Verifier1";

/// D-Bus interface for the vkyc verification daemon.
///
/// Bus name: org.vkyc.Verifier1
/// Object path: /org/vkyc/Verifier1
///
/// Every method answers with a JSON document.
pub struct VerifierService {
    config: Config,
    engine: EngineHandle,
    store: KycStore,
    verify_timeout: Duration,
}

impl VerifierService {
    pub fn new(config: Config, engine: EngineHandle, store: KycStore) -> Self {
        let verify_timeout = Duration::from_secs(config.verify_timeout_secs);
        Self {
            config,
            engine,
            store,
            verify_timeout,
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn store_failure(e: StoreError) -> zbus::fdo::Error {
    match e {
        StoreError::InvalidRequest(msg) => zbus::fdo::Error::InvalidArgs(msg),
        other => {
            tracing::error!(error = %other, "store operation failed");
            zbus::fdo::Error::Failed(other.to_string())
        }
    }
}

fn require(name: &str, value: &str) -> zbus::fdo::Result<()> {
    if value.trim().is_empty() {
        return Err(zbus::fdo::Error::InvalidArgs(format!("{name} must not be empty")));
    }
    Ok(())
}

#[interface(name = "org.vkyc.Verifier1")]
impl VerifierService {
    /// Decide whether the stored verification for a document pair is still valid.
    async fn check_revalidation(&self, doc_id_1: &str, doc_id_2: &str) -> zbus::fdo::Result<String> {
        require("doc_id_1", doc_id_1)?;
        require("doc_id_2", doc_id_2)?;

        let record = self
            .store
            .get_record(doc_id_1, doc_id_2)
            .await
            .map_err(store_failure)?;
        let status = vkyc_core::check_revalidation(record.as_ref(), chrono::Local::now().naive_local());
        tracing::info!(status = %status.status, "revalidation checked");
        to_json(&status)
    }

    /// Compare the document photo at `reference` with the video at `video`.
    ///
    /// Pipeline failures come back as an error-variant result; only a timeout
    /// or a dead engine is a D-Bus error. The run itself stops at the same
    /// deadline, so a timed-out request does not keep a worker busy.
    async fn verify(&self, reference: &str, video: &str) -> zbus::fdo::Result<String> {
        require("reference", reference)?;
        require("video", video)?;
        tracing::info!(reference, video, "verify requested");

        let deadline = Instant::now() + self.verify_timeout;
        let call = self
            .engine
            .verify(PathBuf::from(reference), PathBuf::from(video), Some(deadline));
        let result = match tokio::time::timeout(self.verify_timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "verify failed");
                return Err(zbus::fdo::Error::Failed(e.to_string()));
            }
            Err(_) => {
                tracing::warn!(timeout_secs = self.verify_timeout.as_secs(), "verify timed out");
                return Err(zbus::fdo::Error::Failed(format!(
                    "verification timed out after {}s",
                    self.verify_timeout.as_secs()
                )));
            }
        };

        tracing::info!(
            match_label = %result.match_label,
            score = result.score,
            blinks = result.blinks,
            "verify complete"
        );
        to_json(&result)
    }

    /// Record a verifier's decision. Takes and returns JSON.
    async fn finalize(&self, request: &str) -> zbus::fdo::Result<String> {
        let request: FinalizeRequest = serde_json::from_str(request)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("invalid finalize request: {e}")))?;
        let record = self.store.finalize(request).await.map_err(store_failure)?;
        to_json(&record)
    }

    /// Audit trail for a document pair, newest first.
    async fn history(&self, doc_id_1: &str, doc_id_2: &str) -> zbus::fdo::Result<String> {
        require("doc_id_1", doc_id_1)?;
        require("doc_id_2", doc_id_2)?;
        let entries = self
            .store
            .history(doc_id_1, doc_id_2)
            .await
            .map_err(store_failure)?;
        to_json(&entries)
    }

    /// Return daemon status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let records = self.store.count_records().await.map_err(store_failure)?;
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "records": records,
            "engine_workers": self.engine.workers(),
            "max_frames": self.config.max_frames,
            "ear_threshold": self.config.ear_threshold,
            "match_threshold": self.config.match_threshold,
            "verify_timeout_secs": self.config.verify_timeout_secs,
            "bus": if self.config.session_bus { "session" } else { "system" },
        });
        Ok(status.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileConfig;
    use crate::engine::{spawn_workers, Runner};
    use std::path::Path;
    use std::sync::Arc;
    use vkyc_core::{FailureKind, VerificationResult};

    async fn service(runner: Arc<Runner>, verify_timeout: Duration) -> VerifierService {
        let config = Config::resolve(FileConfig::default(), |_| None);
        let engine = spawn_workers(runner, 1).unwrap();
        let store = KycStore::open(Path::new(":memory:")).await.unwrap();
        VerifierService {
            config,
            engine,
            store,
            verify_timeout,
        }
    }

    fn stub_runner() -> Arc<Runner> {
        Arc::new(|_: &Path, video: &Path, _: Option<Instant>| {
            let mut result = VerificationResult::error(FailureKind::StreamOpen, "cannot open");
            result.frames_processed = video.as_os_str().len();
            result
        })
    }

    #[tokio::test]
    async fn test_unknown_customer_is_new_user() {
        let svc = service(stub_runner(), Duration::from_secs(5)).await;
        let json = svc.check_revalidation("1234", "ABCD").await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"], "new_user");
        assert!(value.get("valid_until").is_none());
    }

    #[tokio::test]
    async fn test_finalize_then_check_and_history() {
        let svc = service(stub_runner(), Duration::from_secs(5)).await;
        let record = svc
            .finalize(r#"{"doc_id_1":"1234","doc_id_2":"ABCD","risk_category":"High","blinks":2}"#)
            .await
            .unwrap();
        assert!(record.contains("\"risk_category\":\"High\""));

        let status: serde_json::Value =
            serde_json::from_str(&svc.check_revalidation("1234", "ABCD").await.unwrap()).unwrap();
        assert_eq!(status["status"], "valid_kyc");
        assert_eq!(status["risk_category"], "High");

        let history: serde_json::Value =
            serde_json::from_str(&svc.history("1234", "ABCD").await.unwrap()).unwrap();
        assert_eq!(history.as_array().map(Vec::len), Some(1));

        let daemon: serde_json::Value = serde_json::from_str(&svc.status().await.unwrap()).unwrap();
        assert_eq!(daemon["records"], 1);
    }

    #[tokio::test]
    async fn test_bad_arguments_are_invalid_args() {
        let svc = service(stub_runner(), Duration::from_secs(5)).await;
        assert!(matches!(
            svc.finalize("not json").await,
            Err(zbus::fdo::Error::InvalidArgs(_))
        ));
        assert!(matches!(
            svc.finalize(r#"{"doc_id_1":"","doc_id_2":"X"}"#).await,
            Err(zbus::fdo::Error::InvalidArgs(_))
        ));
        assert!(matches!(
            svc.check_revalidation(" ", "X").await,
            Err(zbus::fdo::Error::InvalidArgs(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_returns_result_json() {
        let svc = service(stub_runner(), Duration::from_secs(5)).await;
        let json = svc.verify("ref.jpg", "clip.mp4").await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["match_label"], "Error");
        assert_eq!(value["failure"], "stream_open");
        assert_eq!(value["frames_processed"], 8);
    }

    #[tokio::test]
    async fn test_verify_timeout() {
        let slow: Arc<Runner> = Arc::new(|_: &Path, _: &Path, _: Option<Instant>| {
            std::thread::sleep(Duration::from_millis(300));
            VerificationResult::error(FailureKind::Internal, "late")
        });
        let svc = service(slow, Duration::from_millis(20)).await;
        assert!(matches!(
            svc.verify("ref.jpg", "clip.mp4").await,
            Err(zbus::fdo::Error::Failed(msg)) if msg.contains("timed out")
        ));
    }

    #[tokio::test]
    async fn test_verify_hands_deadline_to_run() {
        // A run that honours its deadline, like the pipeline's frame loop.
        let polite: Arc<Runner> = Arc::new(|_: &Path, _: &Path, deadline: Option<Instant>| {
            let Some(deadline) = deadline else {
                return VerificationResult::error(FailureKind::Internal, "no deadline");
            };
            while Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            VerificationResult::error(FailureKind::TimedOut, "stopped")
        });
        let svc = service(polite, Duration::from_millis(50)).await;
        let started = Instant::now();
        // Whichever of the two timers fires first, the caller sees a timeout.
        match svc.verify("ref.jpg", "clip.mp4").await {
            Err(zbus::fdo::Error::Failed(msg)) => assert!(msg.contains("timed out")),
            Ok(json) => assert!(json.contains("\"timed_out\"")),
            Err(other) => panic!("unexpected error: {other}"),
        }
        // The single worker is free again right after the deadline.
        let call = svc.engine.verify(
            PathBuf::from("ref.jpg"),
            PathBuf::from("clip.mp4"),
            Some(Instant::now() + Duration::from_millis(50)),
        );
        let result = tokio::time::timeout(Duration::from_secs(2), call)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.failure, Some(FailureKind::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
