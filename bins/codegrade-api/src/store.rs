// Persistence seam for the grading pipeline

use async_trait::async_trait;
use codegrade_common::redis;
use codegrade_common::types::{RunRecord, Testcase};
use codegrade_common::GradeResult;
use ::redis::aio::ConnectionManager;
use uuid::Uuid;

/// Storage used by grading. The API runs on [`RedisStore`]; tests swap in an
/// in-memory implementation.
#[async_trait]
pub trait GradeStore: Send + Sync {
    async fn get_testcase(&self, submission_id: &Uuid) -> GradeResult<Option<Testcase>>;

    async fn put_testcase(&self, testcase: &Testcase) -> GradeResult<()>;

    /// Append-only. Records are never updated or removed. The student's
    /// `total_runs` counter moves in the same write, or not at all.
    async fn append_run(&self, record: &RunRecord) -> GradeResult<()>;

    async fn run_history(&self, submission_id: &Uuid, student_id: &str)
        -> GradeResult<Vec<RunRecord>>;

    async fn set_trace(&self, submission_id: &Uuid, trace: &str) -> GradeResult<()>;
}

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl GradeStore for RedisStore {
    async fn get_testcase(&self, submission_id: &Uuid) -> GradeResult<Option<Testcase>> {
        let mut conn = self.conn.clone();
        Ok(redis::get_testcase(&mut conn, submission_id).await?)
    }

    async fn put_testcase(&self, testcase: &Testcase) -> GradeResult<()> {
        let mut conn = self.conn.clone();
        Ok(redis::put_testcase(&mut conn, testcase).await?)
    }

    async fn append_run(&self, record: &RunRecord) -> GradeResult<()> {
        let mut conn = self.conn.clone();
        Ok(redis::append_run(&mut conn, record).await?)
    }

    async fn run_history(
        &self,
        submission_id: &Uuid,
        student_id: &str,
    ) -> GradeResult<Vec<RunRecord>> {
        let mut conn = self.conn.clone();
        Ok(redis::run_history(&mut conn, submission_id, student_id).await?)
    }

    async fn set_trace(&self, submission_id: &Uuid, trace: &str) -> GradeResult<()> {
        let mut conn = self.conn.clone();
        Ok(redis::set_trace(&mut conn, submission_id, trace).await?)
    }
}
