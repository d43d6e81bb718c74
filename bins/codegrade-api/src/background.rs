// Bounded background pool for work that must not hold up a response
//
// Jobs go through a fixed-capacity queue. A single dispatcher drains it and
// runs at most `workers` jobs at once. Failures are logged and counted, and
// reach the submitter only through the optional ticket.

use crate::metrics::{BACKGROUND_FAILURES, STAGING_RESULTS};
use crate::store::GradeStore;
use crate::trace::TraceClient;
use codegrade_common::sandbox::SandboxClient;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    StageFile { file_id: String, contents: Vec<u8> },
    Annotate { submission_id: Uuid },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::StageFile { .. } => "stage_file",
            Job::Annotate { .. } => "annotate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Done,
    /// Nothing to do, e.g. no trace service configured
    Skipped,
    Failed(String),
}

/// Completion handle for a submitted job. Dropping it is fine.
#[derive(Debug)]
pub struct JobTicket {
    rx: oneshot::Receiver<JobOutcome>,
}

impl JobTicket {
    /// `None` if the job never reported back (the task panicked).
    pub async fn wait(self) -> Option<JobOutcome> {
        self.rx.await.ok()
    }
}

/// Everything a job may need to talk to.
#[derive(Clone)]
pub struct JobContext {
    pub sandbox: SandboxClient,
    pub trace: Option<TraceClient>,
    pub store: Arc<dyn GradeStore>,
}

struct Envelope {
    job: Job,
    done: oneshot::Sender<JobOutcome>,
}

#[derive(Clone)]
pub struct BackgroundPool {
    tx: mpsc::Sender<Envelope>,
}

impl BackgroundPool {
    /// Spawn the dispatcher. Must be called inside a Tokio runtime.
    pub fn start(ctx: JobContext, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(dispatch(rx, ctx, workers.max(1)));
        info!(workers, capacity, "Background pool started");
        Self { tx }
    }

    /// Queue a job without waiting. A full or closed queue drops the job.
    pub fn submit(&self, job: Job) -> Option<JobTicket> {
        let kind = job.kind();
        let (done, rx) = oneshot::channel();

        match self.tx.try_send(Envelope { job, done }) {
            Ok(()) => {
                debug!(job = kind, "Background job queued");
                Some(JobTicket { rx })
            }
            Err(TrySendError::Full(_)) => {
                warn!(job = kind, "Background queue full, dropping job");
                BACKGROUND_FAILURES.with_label_values(&[kind]).inc();
                None
            }
            Err(TrySendError::Closed(_)) => {
                warn!(job = kind, "Background pool stopped, dropping job");
                BACKGROUND_FAILURES.with_label_values(&[kind]).inc();
                None
            }
        }
    }
}

async fn dispatch(mut rx: mpsc::Receiver<Envelope>, ctx: JobContext, workers: usize) {
    let semaphore = Arc::new(Semaphore::new(workers));

    while let Some(envelope) = rx.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let ctx = ctx.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let outcome = run_job(&ctx, envelope.job).await;
            // Submitter may have dropped the ticket
            let _ = envelope.done.send(outcome);
        });
    }

    debug!("Background dispatcher stopped");
}

async fn run_job(ctx: &JobContext, job: Job) -> JobOutcome {
    let kind = job.kind();

    let outcome = match job {
        Job::StageFile { file_id, contents } => match ctx.sandbox.stage(&file_id, &contents).await {
            Ok(()) => {
                STAGING_RESULTS.with_label_values(&["ok"]).inc();
                JobOutcome::Done
            }
            Err(e) => {
                STAGING_RESULTS.with_label_values(&["error"]).inc();
                error!(job = kind, file_id = %file_id, error = %e, "Background staging failed");
                JobOutcome::Failed(e.to_string())
            }
        },
        Job::Annotate { submission_id } => annotate(ctx, submission_id).await,
    };

    if matches!(outcome, JobOutcome::Failed(_)) {
        BACKGROUND_FAILURES.with_label_values(&[kind]).inc();
    }
    outcome
}

async fn annotate(ctx: &JobContext, submission_id: Uuid) -> JobOutcome {
    let Some(trace_client) = &ctx.trace else {
        debug!(submission_id = %submission_id, "No trace service configured");
        return JobOutcome::Skipped;
    };

    let trace = match trace_client.trace(&submission_id).await {
        Ok(trace) => trace,
        Err(e) => {
            error!(submission_id = %submission_id, error = %e, "Trace request failed");
            return JobOutcome::Failed(e.to_string());
        }
    };

    match ctx.store.set_trace(&submission_id, &trace).await {
        Ok(()) => {
            info!(submission_id = %submission_id, "Trace stored");
            JobOutcome::Done
        }
        Err(e) => {
            error!(submission_id = %submission_id, error = %e, "Failed to store trace");
            JobOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{dead_url, spawn_server, MemoryStore};
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{post, put};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn sandbox(base_url: &str) -> SandboxClient {
        SandboxClient::new(base_url, Duration::from_secs(5)).unwrap()
    }

    fn context(sandbox_url: &str, trace: Option<TraceClient>, store: Arc<MemoryStore>) -> JobContext {
        JobContext {
            sandbox: sandbox(sandbox_url),
            trace,
            store,
        }
    }

    fn stage_job(file_id: &str) -> Job {
        Job::StageFile {
            file_id: file_id.to_string(),
            contents: b"3 4\n".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_stage_job_reports_done() {
        let cache: Arc<Mutex<HashMap<String, String>>> = Arc::default();
        let cache_by_handler = cache.clone();
        let app = Router::new().route(
            "/files/:id",
            put(move |Path(id): Path<String>, Json(body): Json<Value>| {
                let cache = cache_by_handler.clone();
                async move {
                    let contents = body["file_contents"].as_str().unwrap_or_default().to_string();
                    cache.lock().unwrap().insert(id, contents);
                    StatusCode::NO_CONTENT
                }
            }),
        );
        let url = spawn_server(app).await;
        let pool = BackgroundPool::start(context(&url, None, Arc::default()), 2, 8);

        let ticket = pool.submit(stage_job("abc")).unwrap();
        assert_eq!(ticket.wait().await, Some(JobOutcome::Done));
        assert_eq!(cache.lock().unwrap()["abc"], "MyA0Cg==");
    }

    #[tokio::test]
    async fn test_stage_failure_stays_in_ticket() {
        let url = dead_url().await;
        let pool = BackgroundPool::start(context(&url, None, Arc::default()), 1, 8);

        let outcome = pool.submit(stage_job("abc")).unwrap().wait().await;
        assert!(matches!(outcome, Some(JobOutcome::Failed(_))));
    }

    #[tokio::test]
    async fn test_annotate_without_trace_service_is_skipped() {
        let store = Arc::new(MemoryStore::default());
        let pool = BackgroundPool::start(context(&dead_url().await, None, store.clone()), 1, 8);

        let outcome = pool
            .submit(Job::Annotate { submission_id: Uuid::new_v4() })
            .unwrap()
            .wait()
            .await;
        assert_eq!(outcome, Some(JobOutcome::Skipped));
        assert!(store.traces.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_annotate_stores_trace() {
        let app = Router::new().route(
            "/trace",
            post(|Json(body): Json<Value>| async move {
                Json(json!({"post_id": body["post_id"], "trace": "loops"}))
            }),
        );
        let trace = TraceClient::new(&spawn_server(app).await, Duration::from_secs(5)).unwrap();
        let store = Arc::new(MemoryStore::default());
        let pool = BackgroundPool::start(
            context(&dead_url().await, Some(trace), store.clone()),
            1,
            8,
        );

        let submission_id = Uuid::new_v4();
        let outcome = pool
            .submit(Job::Annotate { submission_id })
            .unwrap()
            .wait()
            .await;
        assert_eq!(outcome, Some(JobOutcome::Done));
        assert_eq!(store.traces.lock().unwrap()[&submission_id], "loops");
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        // Single-threaded runtime: the dispatcher cannot drain until we yield
        let pool = BackgroundPool::start(context(&dead_url().await, None, Arc::default()), 1, 1);

        assert!(pool.submit(stage_job("a")).is_some());
        assert!(pool.submit(stage_job("b")).is_none());
        assert!(pool.submit(stage_job("c")).is_none());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (in_flight_h, peak_h) = (in_flight.clone(), peak.clone());
        let app = Router::new().route(
            "/files/:id",
            put(move || {
                let (in_flight, peak) = (in_flight_h.clone(), peak_h.clone());
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    StatusCode::NO_CONTENT
                }
            }),
        );
        let url = spawn_server(app).await;
        let pool = BackgroundPool::start(context(&url, None, Arc::default()), 2, 16);

        let tickets: Vec<JobTicket> = (0..6)
            .map(|i| pool.submit(stage_job(&format!("f{}", i))).unwrap())
            .collect();
        for ticket in tickets {
            assert_eq!(ticket.wait().await, Some(JobOutcome::Done));
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
