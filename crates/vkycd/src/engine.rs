use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use vkyc_core::{FailureKind, ModelSet, VerificationResult, VerifyOptions};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine workers exited")]
    ChannelClosed,
}

/// Runs one verification on the calling thread, giving up at the deadline.
pub(crate) type Runner = dyn Fn(&Path, &Path, Option<Instant>) -> VerificationResult + Send + Sync;

/// Messages sent from D-Bus handlers to the worker pool.
enum EngineRequest {
    Verify {
        reference: PathBuf,
        video: PathBuf,
        deadline: Option<Instant>,
        reply: oneshot::Sender<VerificationResult>,
    },
}

/// Clone-safe handle to the engine worker pool.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    workers: usize,
}

impl EngineHandle {
    /// Queue a verification of `video` against the document photo `reference`.
    ///
    /// Failures inside the run come back as an error-variant result; `Err`
    /// only means the pool is gone. A request still queued when its caller
    /// goes away is dropped without running.
    pub async fn verify(
        &self,
        reference: PathBuf,
        video: PathBuf,
        deadline: Option<Instant>,
    ) -> Result<VerificationResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Verify {
                reference,
                video,
                deadline,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

/// Spawn `workers` dedicated OS threads that verify files with the shared models.
pub fn spawn_engine(
    models: ModelSet,
    options: VerifyOptions,
    workers: usize,
) -> Result<EngineHandle, EngineError> {
    let runner: Arc<Runner> = Arc::new(move |reference: &Path, video: &Path, deadline: Option<Instant>| {
        let options = VerifyOptions {
            deadline,
            ..options.clone()
        };
        vkyc_media::verify_files(&models, reference, video, &options)
    });
    spawn_workers(runner, workers)
}

pub(crate) fn spawn_workers(runner: Arc<Runner>, workers: usize) -> Result<EngineHandle, EngineError> {
    let workers = workers.max(1);
    let (tx, rx) = mpsc::channel::<EngineRequest>(workers * 2);
    let rx = Arc::new(Mutex::new(rx));

    for id in 0..workers {
        let rx = Arc::clone(&rx);
        let runner = Arc::clone(&runner);
        std::thread::Builder::new()
            .name(format!("vkyc-engine-{id}"))
            .spawn(move || worker_loop(id, &rx, runner.as_ref()))
            .map_err(EngineError::Spawn)?;
    }
    tracing::info!(workers, "engine started");

    Ok(EngineHandle { tx, workers })
}

fn worker_loop(id: usize, rx: &Mutex<mpsc::Receiver<EngineRequest>>, runner: &Runner) {
    tracing::debug!(worker = id, "engine worker started");
    loop {
        // The lock is released before the run so other workers can pick up requests.
        let request = match rx.lock() {
            Ok(mut rx) => rx.blocking_recv(),
            Err(_) => None,
        };
        let Some(request) = request else { break };

        match request {
            EngineRequest::Verify {
                reference,
                video,
                deadline,
                reply,
            } => {
                if reply.is_closed() {
                    tracing::warn!(worker = id, video = %video.display(), "verify caller gone; skipping");
                    continue;
                }
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    tracing::warn!(worker = id, video = %video.display(), "verify expired in queue");
                    let _ = reply.send(VerificationResult::error(
                        FailureKind::TimedOut,
                        "verification timed out before it started",
                    ));
                    continue;
                }
                tracing::info!(
                    worker = id,
                    reference = %reference.display(),
                    video = %video.display(),
                    "verify started"
                );
                let result = run_contained(runner, &reference, &video, deadline);
                if reply.send(result).is_err() {
                    tracing::warn!(worker = id, "verify caller went away before the result");
                }
            }
        }
    }
    tracing::debug!(worker = id, "engine worker exiting");
}

/// Run one request, turning a panic into an `internal` result so the worker survives.
fn run_contained(
    runner: &Runner,
    reference: &Path,
    video: &Path,
    deadline: Option<Instant>,
) -> VerificationResult {
    panic::catch_unwind(AssertUnwindSafe(|| runner(reference, video, deadline))).unwrap_or_else(
        |payload| {
            let message = vkyc_core::panic_message(payload.as_ref());
            tracing::error!(video = %video.display(), panic = %message, "verify panicked");
            VerificationResult::error(
                FailureKind::Internal,
                format!("verification panicked: {message}"),
            )
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use vkyc_core::MatchLabel;

    fn echo_runner() -> Arc<Runner> {
        Arc::new(|reference: &Path, video: &Path, _: Option<Instant>| {
            let mut result = VerificationResult::error(FailureKind::Internal, "stub");
            result.frames_processed = reference.as_os_str().len() + video.as_os_str().len();
            result
        })
    }

    #[tokio::test]
    async fn test_verify_round_trip() {
        let engine = spawn_workers(echo_runner(), 1).unwrap();
        let result = engine
            .verify(PathBuf::from("ref.jpg"), PathBuf::from("clip.mp4"), None)
            .await
            .unwrap();
        assert_eq!(result.frames_processed, 15);
        assert_eq!(result.match_label, MatchLabel::Error);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_requests_run_concurrently() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let runner: Arc<Runner> = {
            let (active, peak) = (Arc::clone(&active), Arc::clone(&peak));
            Arc::new(move |_: &Path, _: &Path, _: Option<Instant>| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(150));
                active.fetch_sub(1, Ordering::SeqCst);
                VerificationResult::error(FailureKind::Internal, "stub")
            })
        };
        let engine = spawn_workers(runner, 3).unwrap();
        assert_eq!(engine.workers(), 3);

        let calls = (0..3).map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .verify(PathBuf::from(format!("r{i}")), PathBuf::from("v"), None)
                    .await
            })
        });
        for call in calls.collect::<Vec<_>>() {
            assert!(call.await.unwrap().is_ok());
        }
        assert!(peak.load(Ordering::SeqCst) >= 2, "runs never overlapped");
    }

    #[test]
    fn test_zero_workers_still_serves() {
        let engine = spawn_workers(echo_runner(), 0).unwrap();
        assert_eq!(engine.workers(), 1);
    }

    #[tokio::test]
    async fn test_worker_survives_panicking_run() {
        let runner: Arc<Runner> = Arc::new(|_: &Path, video: &Path, _: Option<Instant>| {
            if video == Path::new("boom.mp4") {
                panic!("decoder state corrupted");
            }
            VerificationResult::error(FailureKind::StreamOpen, "stub")
        });
        let engine = spawn_workers(runner, 1).unwrap();

        let crashed = engine
            .verify(PathBuf::from("ref.jpg"), PathBuf::from("boom.mp4"), None)
            .await
            .unwrap();
        assert_eq!(crashed.failure, Some(FailureKind::Internal));
        assert!(crashed.error.unwrap().contains("decoder state corrupted"));

        let next = engine
            .verify(PathBuf::from("ref.jpg"), PathBuf::from("ok.mp4"), None)
            .await
            .unwrap();
        assert_eq!(next.failure, Some(FailureKind::StreamOpen));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_expired_requests_never_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner: Arc<Runner> = {
            let calls = Arc::clone(&calls);
            Arc::new(move |_: &Path, _: &Path, _: Option<Instant>| {
                calls.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(150));
                VerificationResult::error(FailureKind::Internal, "stub")
            })
        };
        let engine = spawn_workers(runner, 1).unwrap();

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .verify(PathBuf::from("r"), PathBuf::from("first"), None)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Caller gives up while the request is still queued.
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            engine.verify(PathBuf::from("r"), PathBuf::from("abandoned"), None),
        )
        .await;
        assert!(abandoned.is_err());

        // Deadline passes while queued.
        let expired = engine
            .verify(
                PathBuf::from("r"),
                PathBuf::from("expired"),
                Some(Instant::now() + Duration::from_millis(10)),
            )
            .await
            .unwrap();
        assert_eq!(expired.failure, Some(FailureKind::TimedOut));

        assert!(first.await.unwrap().is_ok());
        engine
            .verify(PathBuf::from("r"), PathBuf::from("last"), None)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
