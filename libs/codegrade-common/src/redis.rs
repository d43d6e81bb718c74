use crate::types::{RunRecord, Testcase};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Redis storage layout for grading data.
/// Keys are deterministic so the API and any offline tooling agree on where
/// a submission's testcase and run history live.

pub const KEY_PREFIX: &str = "codegrade";
pub const TOTAL_RUNS_FIELD: &str = "total_runs";

pub fn testcase_key(submission_id: &Uuid) -> String {
    format!("{}:testcase:{}", KEY_PREFIX, submission_id)
}

pub fn run_key(run_id: impl fmt::Display) -> String {
    format!("{}:run:{}", KEY_PREFIX, run_id)
}

/// Ordered run ids for one (submission, student) pair
pub fn run_history_key(submission_id: &Uuid, student_id: &str) -> String {
    format!("{}:runs:{}:{}", KEY_PREFIX, submission_id, student_id)
}

/// Hash of per-student profile counters
pub fn student_key(student_id: &str) -> String {
    format!("{}:student:{}", KEY_PREFIX, student_id)
}

pub fn trace_key(submission_id: &Uuid) -> String {
    format!("{}:trace:{}", KEY_PREFIX, submission_id)
}

fn encode<T: Serialize>(value: &T) -> RedisResult<String> {
    serde_json::to_string(value).map_err(|e| {
        redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
    })
}

fn decode<T: DeserializeOwned>(payload: &str) -> RedisResult<T> {
    serde_json::from_str(payload).map_err(|e| {
        redis::RedisError::from((redis::ErrorKind::TypeError, "deserialization error", e.to_string()))
    })
}

pub async fn put_testcase(conn: &mut ConnectionManager, testcase: &Testcase) -> RedisResult<()> {
    let payload = encode(testcase)?;
    conn.set(testcase_key(&testcase.submission_id), payload).await
}

pub async fn get_testcase(
    conn: &mut ConnectionManager,
    submission_id: &Uuid,
) -> RedisResult<Option<Testcase>> {
    let payload: Option<String> = conn.get(testcase_key(submission_id)).await?;
    payload.map(|data| decode(&data)).transpose()
}

/// Store a run record, append it to its history list and bump the student's
/// `total_runs` counter. All three writes go through one MULTI/EXEC so the
/// counter never drifts from the history.
pub async fn append_run(conn: &mut ConnectionManager, record: &RunRecord) -> RedisResult<()> {
    let payload = encode(record)?;
    redis::pipe()
        .atomic()
        .set(run_key(record.id), payload)
        .ignore()
        .rpush(
            run_history_key(&record.submission_id, &record.student_id),
            record.id.to_string(),
        )
        .ignore()
        .hincr(student_key(&record.student_id), TOTAL_RUNS_FIELD, 1)
        .ignore()
        .query_async(conn)
        .await
}

/// All runs for a (submission, student) pair, oldest first.
pub async fn run_history(
    conn: &mut ConnectionManager,
    submission_id: &Uuid,
    student_id: &str,
) -> RedisResult<Vec<RunRecord>> {
    let ids: Vec<String> = conn
        .lrange(run_history_key(submission_id, student_id), 0, -1)
        .await?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut pipe = redis::pipe();
    for id in &ids {
        pipe.get(run_key(id));
    }
    let payloads: Vec<Option<String>> = pipe.query_async(conn).await?;

    payloads
        .into_iter()
        .flatten()
        .map(|data| decode(&data))
        .collect()
}

pub async fn total_runs(conn: &mut ConnectionManager, student_id: &str) -> RedisResult<i64> {
    let total: Option<i64> = conn.hget(student_key(student_id), TOTAL_RUNS_FIELD).await?;
    Ok(total.unwrap_or(0))
}

pub async fn set_trace(
    conn: &mut ConnectionManager,
    submission_id: &Uuid,
    trace: &str,
) -> RedisResult<()> {
    conn.set(trace_key(submission_id), trace).await
}
