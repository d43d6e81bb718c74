// Test doubles shared by the API test modules

use crate::store::GradeStore;
use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use codegrade_common::types::{RunRecord, Testcase};
use codegrade_common::{GradeError, GradeResult};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    pub testcases: Mutex<HashMap<Uuid, Testcase>>,
    pub runs: Mutex<Vec<RunRecord>>,
    pub total_runs: Mutex<HashMap<String, i64>>,
    pub traces: Mutex<HashMap<Uuid, String>>,
    pub fail_appends: AtomicBool,
}

impl MemoryStore {
    pub fn with_testcase(testcase: Testcase) -> Self {
        let store = Self::default();
        store
            .testcases
            .lock()
            .unwrap()
            .insert(testcase.submission_id, testcase);
        store
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub fn total_runs(&self, student_id: &str) -> i64 {
        self.total_runs
            .lock()
            .unwrap()
            .get(student_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl GradeStore for MemoryStore {
    async fn get_testcase(&self, submission_id: &Uuid) -> GradeResult<Option<Testcase>> {
        Ok(self.testcases.lock().unwrap().get(submission_id).cloned())
    }

    async fn put_testcase(&self, testcase: &Testcase) -> GradeResult<()> {
        self.testcases
            .lock()
            .unwrap()
            .insert(testcase.submission_id, testcase.clone());
        Ok(())
    }

    async fn append_run(&self, record: &RunRecord) -> GradeResult<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(GradeError::Persistence("store offline".to_string()));
        }
        self.runs.lock().unwrap().push(record.clone());
        *self
            .total_runs
            .lock()
            .unwrap()
            .entry(record.student_id.clone())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn run_history(
        &self,
        submission_id: &Uuid,
        student_id: &str,
    ) -> GradeResult<Vec<RunRecord>> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| &r.submission_id == submission_id && r.student_id == student_id)
            .cloned()
            .collect())
    }

    async fn set_trace(&self, submission_id: &Uuid, trace: &str) -> GradeResult<()> {
        self.traces
            .lock()
            .unwrap()
            .insert(*submission_id, trace.to_string());
        Ok(())
    }
}

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Base URL nothing is listening on.
pub async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// In-process stand-in for the sandbox HTTP API.
pub struct FakeSandbox {
    pub files: Mutex<HashMap<String, String>>,
    /// Each run body together with the file ids staged when it arrived
    pub runs: Mutex<Vec<(Value, Vec<String>)>>,
    reply: (u16, Value),
}

impl FakeSandbox {
    pub fn replying(status: u16, body: Value) -> Arc<Self> {
        Arc::new(Self {
            files: Mutex::default(),
            runs: Mutex::default(),
            reply: (status, body),
        })
    }

    pub fn completed(stdout: &str) -> Arc<Self> {
        Self::replying(
            200,
            json!({"run_id": null, "outcome": 15, "cmpinfo": "", "stdout": stdout, "stderr": ""}),
        )
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub fn last_run(&self) -> (Value, Vec<String>) {
        self.runs.lock().unwrap().last().cloned().unwrap()
    }
}

async fn fake_put_file(
    State(fake): State<Arc<FakeSandbox>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    match body["file_contents"].as_str() {
        Some(contents) => {
            fake.files.lock().unwrap().insert(id, contents.to_string());
            StatusCode::NO_CONTENT
        }
        None => StatusCode::BAD_REQUEST,
    }
}

async fn fake_head_file(State(fake): State<Arc<FakeSandbox>>, Path(id): Path<String>) -> StatusCode {
    if fake.files.lock().unwrap().contains_key(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn fake_run(
    State(fake): State<Arc<FakeSandbox>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut staged: Vec<String> = fake.files.lock().unwrap().keys().cloned().collect();
    staged.sort();
    fake.runs.lock().unwrap().push((body, staged));

    let (status, reply) = fake.reply.clone();
    (StatusCode::from_u16(status).unwrap(), Json(reply))
}

pub async fn spawn_sandbox(fake: Arc<FakeSandbox>) -> String {
    let app = Router::new()
        .route("/files/:id", put(fake_put_file).head(fake_head_file))
        .route("/runs", post(fake_run))
        .route(
            "/languages",
            get(|| async { Json(json!([["cpp", "11.4.0"], ["python3", "3.10.12"]])) }),
        )
        .with_state(fake);
    spawn_server(app).await
}
