// Run Recorder: append-only persistence of graded runs

use crate::store::GradeStore;
use codegrade_common::types::RunRecord;
use codegrade_common::{GradeError, GradeResult};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct RunRecorder {
    store: Arc<dyn GradeStore>,
}

impl RunRecorder {
    pub fn new(store: Arc<dyn GradeStore>) -> Self {
        Self { store }
    }

    /// Persist one record. Any storage failure is a `Persistence` error.
    pub async fn save(&self, record: &RunRecord) -> GradeResult<()> {
        match self.store.append_run(record).await {
            Ok(()) => {
                info!(
                    run_id = %record.id,
                    submission_id = %record.submission_id,
                    student_id = %record.student_id,
                    score = record.score,
                    "Run recorded"
                );
                Ok(())
            }
            Err(e) => {
                error!(run_id = %record.id, error = %e, "Failed to record run");
                Err(match e {
                    GradeError::Persistence(_) => e,
                    other => GradeError::Persistence(other.to_string()),
                })
            }
        }
    }

    pub async fn history(&self, submission_id: &Uuid, student_id: &str) -> GradeResult<Vec<RunRecord>> {
        self.store.run_history(submission_id, student_id).await
    }
}
