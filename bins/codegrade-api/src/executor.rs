// Submission orchestration: validate, stage, build, submit, grade, record
//
// Nothing here retries. A run is not idempotent on the sandbox, so a
// transport failure goes straight back to the caller.

use crate::builder::build_for_profile;
use crate::evaluator;
use crate::metrics::{GRADE_SCORES, RUN_OUTCOMES, SANDBOX_RUN_SECONDS};
use crate::profile::ProfileRegistry;
use crate::recorder::RunRecorder;
use crate::store::GradeStore;
use codegrade_common::sandbox::SandboxClient;
use codegrade_common::types::{is_valid_identifier, testcase_file_id, SandboxStatus};
use codegrade_common::{GradeError, GradeResult};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub submission_id: Uuid,
    pub student_id: String,
    /// Falls back to the default profile
    pub language_id: Option<String>,
    /// Falls back to the testcase's grading code
    pub source_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed {
        record_id: Uuid,
        score: u8,
        log: String,
        stdout: String,
    },
    /// Accepted for later execution. Nothing is recorded and there is no way
    /// to collect the result from here.
    Queued,
}

#[derive(Clone)]
pub struct Orchestrator {
    sandbox: SandboxClient,
    store: Arc<dyn GradeStore>,
    recorder: RunRecorder,
    profiles: Arc<ProfileRegistry>,
}

impl Orchestrator {
    pub fn new(
        sandbox: SandboxClient,
        store: Arc<dyn GradeStore>,
        profiles: Arc<ProfileRegistry>,
    ) -> Self {
        Self {
            sandbox,
            recorder: RunRecorder::new(store.clone()),
            store,
            profiles,
        }
    }

    pub fn recorder(&self) -> &RunRecorder {
        &self.recorder
    }

    /// Make sure `file_id` is in the sandbox cache, staging it if missing.
    pub async fn ensure_staged(&self, file_id: &str, contents: &[u8]) -> GradeResult<()> {
        if self.sandbox.check_exists(file_id).await? {
            debug!(file_id = %file_id, "File already staged");
            return Ok(());
        }
        self.sandbox.stage(file_id, contents).await
    }

    #[instrument(
        skip(self, request),
        fields(submission_id = %request.submission_id, student_id = %request.student_id)
    )]
    pub async fn submit_run(&self, request: RunRequest) -> GradeResult<RunOutcome> {
        let result = self.run(request).await;
        let status = match &result {
            Ok(RunOutcome::Completed { .. }) => "completed",
            Ok(RunOutcome::Queued) => "queued",
            Err(GradeError::SandboxRejected(_)) => "rejected",
            Err(GradeError::SandboxUnreachable(_)) => "unreachable",
            Err(_) => "failed",
        };
        RUN_OUTCOMES.with_label_values(&[status]).inc();
        result
    }

    async fn run(&self, request: RunRequest) -> GradeResult<RunOutcome> {
        let RunRequest {
            submission_id,
            student_id,
            language_id,
            source_code,
        } = request;

        if !is_valid_identifier(&student_id) {
            return Err(GradeError::InvalidStudentId(student_id));
        }
        let profile = self.profiles.resolve(language_id.as_deref())?;

        let testcase = self
            .store
            .get_testcase(&submission_id)
            .await?
            .ok_or(GradeError::TestcaseNotFound(submission_id))?;

        let source_code = source_code
            .filter(|code| !code.trim().is_empty())
            .unwrap_or_else(|| testcase.code.clone());
        if source_code.trim().is_empty() {
            return Err(GradeError::MissingRequiredField("sourcecode"));
        }

        let config_file_id = if testcase.input.is_empty() {
            None
        } else {
            let file_id = testcase_file_id(&submission_id);
            self.ensure_staged(&file_id, testcase.input.as_bytes()).await?;
            Some(file_id)
        };

        let spec = build_for_profile(profile, &student_id, &source_code, config_file_id.as_deref())?;
        debug!(
            language = %spec.language_id,
            files = spec.file_list.len(),
            "Run spec built"
        );

        let started = Instant::now();
        let reply = self.sandbox.submit(&spec).await?;
        SANDBOX_RUN_SECONDS.observe(started.elapsed().as_secs_f64());

        match reply.status {
            SandboxStatus::Completed => {}
            SandboxStatus::Queued => {
                info!("Run queued by sandbox, nothing recorded");
                return Ok(RunOutcome::Queued);
            }
            other => {
                warn!(
                    status = other.as_str(),
                    body = %String::from_utf8_lossy(&reply.body),
                    "Sandbox rejected run"
                );
                return Err(GradeError::SandboxRejected(other));
            }
        }

        let graded = evaluator::grade(self.store.as_ref(), submission_id, &student_id, &reply.body).await?;
        self.recorder.save(&graded.record).await?;
        GRADE_SCORES
            .with_label_values(&[&graded.record.score.to_string()])
            .inc();

        info!(
            run_id = %graded.record.id,
            score = graded.record.score,
            "Run graded"
        );

        Ok(RunOutcome::Completed {
            record_id: graded.record.id,
            score: graded.record.score,
            log: graded.record.log,
            stdout: graded.stdout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{dead_url, spawn_sandbox, FakeSandbox, MemoryStore};
    use codegrade_common::types::Testcase;
    use codegrade_common::ErrorClass;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const STUDENT: &str = "2112198";

    fn testcase(input: &str, expected: &str) -> Testcase {
        let mut testcase = Testcase::new(Uuid::new_v4());
        testcase.input = input.to_string();
        testcase.expected = expected.to_string();
        testcase.code = "#include \"main.h\"\nint main() { return run(); }".to_string();
        testcase
    }

    fn orchestrator(sandbox_url: &str, store: Arc<MemoryStore>) -> Orchestrator {
        Orchestrator::new(
            SandboxClient::new(sandbox_url, Duration::from_secs(5)).unwrap(),
            store,
            Arc::new(ProfileRegistry::builtin()),
        )
    }

    fn request(submission_id: Uuid) -> RunRequest {
        RunRequest {
            submission_id,
            student_id: STUDENT.to_string(),
            language_id: None,
            source_code: None,
        }
    }

    #[tokio::test]
    async fn test_completed_run_is_graded_and_recorded() {
        let fake = FakeSandbox::completed("5\n");
        let tc = testcase("3 4", "5");
        let submission_id = tc.submission_id;
        let store = Arc::new(MemoryStore::with_testcase(tc));
        let orch = orchestrator(&spawn_sandbox(fake.clone()).await, store.clone());

        let outcome = orch.submit_run(request(submission_id)).await.unwrap();
        let RunOutcome::Completed { record_id, score, log, stdout } = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(score, 1);
        assert_eq!(log, "5");
        assert_eq!(stdout, "5\n");

        let history = orch.recorder().history(&submission_id, STUDENT).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, record_id);
        assert_eq!(store.total_runs(STUDENT), 1);
    }

    #[tokio::test]
    async fn test_config_is_staged_before_run() {
        let fake = FakeSandbox::completed("5");
        let tc = testcase("3 4", "5");
        let submission_id = tc.submission_id;
        let store = Arc::new(MemoryStore::with_testcase(tc));
        let orch = orchestrator(&spawn_sandbox(fake.clone()).await, store);

        orch.submit_run(request(submission_id)).await.unwrap();

        let config_id = testcase_file_id(&submission_id);
        let (body, staged_at_run) = fake.last_run();
        assert!(staged_at_run.contains(&config_id));
        assert_eq!(fake.files.lock().unwrap()[&config_id], "MyA0");
        assert_eq!(
            body["run_spec"]["file_list"],
            json!([
                ["2112198cpp", "hcmcampaign.cpp"],
                ["2112198h", "hcmcampaign.h"],
                ["systemmainh", "main.h"],
                [config_id, "config.txt"]
            ])
        );
        assert_eq!(body["run_spec"]["sourcefilename"], "main.cpp");
    }

    #[tokio::test]
    async fn test_already_staged_config_is_not_restaged() {
        let fake = FakeSandbox::completed("5");
        let tc = testcase("3 4", "5");
        let submission_id = tc.submission_id;
        let config_id = testcase_file_id(&submission_id);
        fake.files
            .lock()
            .unwrap()
            .insert(config_id.clone(), "previous".to_string());
        let orch = orchestrator(
            &spawn_sandbox(fake.clone()).await,
            Arc::new(MemoryStore::with_testcase(tc)),
        );

        orch.submit_run(request(submission_id)).await.unwrap();
        assert_eq!(fake.files.lock().unwrap()[&config_id], "previous");
    }

    #[tokio::test]
    async fn test_empty_input_skips_config_file() {
        let fake = FakeSandbox::completed("ok");
        let tc = testcase("", "ok");
        let submission_id = tc.submission_id;
        let orch = orchestrator(
            &spawn_sandbox(fake.clone()).await,
            Arc::new(MemoryStore::with_testcase(tc)),
        );

        orch.submit_run(request(submission_id)).await.unwrap();
        let (body, _) = fake.last_run();
        assert_eq!(body["run_spec"]["file_list"].as_array().unwrap().len(), 3);
        assert!(fake.files.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_source_overrides_testcase_code() {
        let fake = FakeSandbox::completed("5");
        let tc = testcase("", "5");
        let submission_id = tc.submission_id;
        let orch = orchestrator(
            &spawn_sandbox(fake.clone()).await,
            Arc::new(MemoryStore::with_testcase(tc)),
        );

        let mut req = request(submission_id);
        req.source_code = Some("int main() { puts(\"5\"); }".to_string());
        orch.submit_run(req).await.unwrap();

        let (body, _) = fake.last_run();
        assert_eq!(body["run_spec"]["sourcecode"], "int main() { puts(\"5\"); }");
    }

    #[tokio::test]
    async fn test_missing_source_everywhere() {
        let fake = FakeSandbox::completed("5");
        let mut tc = testcase("", "5");
        tc.code = String::new();
        let submission_id = tc.submission_id;
        let orch = orchestrator(
            &spawn_sandbox(fake.clone()).await,
            Arc::new(MemoryStore::with_testcase(tc)),
        );

        let err = orch.submit_run(request(submission_id)).await.unwrap_err();
        assert!(matches!(err, GradeError::MissingRequiredField("sourcecode")));
        assert_eq!(fake.run_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_source_stages_nothing() {
        let fake = FakeSandbox::completed("7");
        let mut tc = testcase("3 4", "7");
        tc.code = String::new();
        let submission_id = tc.submission_id;
        let orch = orchestrator(
            &spawn_sandbox(fake.clone()).await,
            Arc::new(MemoryStore::with_testcase(tc)),
        );

        let mut req = request(submission_id);
        req.source_code = Some("   ".to_string());
        let err = orch.submit_run(req).await.unwrap_err();
        assert!(matches!(err, GradeError::MissingRequiredField("sourcecode")));
        assert!(fake.files.lock().unwrap().is_empty());
        assert_eq!(fake.run_count(), 0);
    }

    #[tokio::test]
    async fn test_queued_run_records_nothing() {
        let fake = FakeSandbox::replying(202, json!({"run_id": "abc"}));
        let tc = testcase("", "5");
        let submission_id = tc.submission_id;
        let store = Arc::new(MemoryStore::with_testcase(tc));
        let orch = orchestrator(&spawn_sandbox(fake).await, store.clone());

        let outcome = orch.submit_run(request(submission_id)).await.unwrap();
        assert_eq!(outcome, RunOutcome::Queued);
        assert_eq!(store.run_count(), 0);
        assert_eq!(store.total_runs(STUDENT), 0);
    }

    #[tokio::test]
    async fn test_rejected_run_records_nothing() {
        let fake = FakeSandbox::replying(400, json!({"error": "bad run_spec"}));
        let tc = testcase("", "5");
        let submission_id = tc.submission_id;
        let store = Arc::new(MemoryStore::with_testcase(tc));
        let orch = orchestrator(&spawn_sandbox(fake).await, store.clone());

        let err = orch.submit_run(request(submission_id)).await.unwrap_err();
        assert!(matches!(err, GradeError::SandboxRejected(SandboxStatus::BadRunSpec)));
        assert_eq!(store.run_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_sandbox_records_nothing() {
        let tc = testcase("", "5");
        let submission_id = tc.submission_id;
        let store = Arc::new(MemoryStore::with_testcase(tc));
        let orch = orchestrator(&dead_url().await, store.clone());

        let err = orch.submit_run(request(submission_id)).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::SandboxTransport);
        assert_eq!(store.run_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_testcase_never_reaches_sandbox() {
        let fake = FakeSandbox::completed("5");
        let store = Arc::new(MemoryStore::default());
        let orch = orchestrator(&spawn_sandbox(fake.clone()).await, store.clone());

        let submission_id = Uuid::new_v4();
        let err = orch.submit_run(request(submission_id)).await.unwrap_err();
        assert!(matches!(err, GradeError::TestcaseNotFound(id) if id == submission_id));
        assert_eq!(fake.run_count(), 0);
        assert_eq!(store.run_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_completed_body() {
        let fake = FakeSandbox::replying(200, json!({"stdout": "5"}));
        let tc = testcase("", "5");
        let submission_id = tc.submission_id;
        let store = Arc::new(MemoryStore::with_testcase(tc));
        let orch = orchestrator(&spawn_sandbox(fake).await, store.clone());

        let err = orch.submit_run(request(submission_id)).await.unwrap_err();
        assert!(matches!(err, GradeError::MalformedSandboxOutput(_)));
        assert_eq!(store.run_count(), 0);
    }

    #[tokio::test]
    async fn test_record_failure_is_surfaced() {
        let fake = FakeSandbox::completed("5");
        let tc = testcase("", "5");
        let submission_id = tc.submission_id;
        let store = Arc::new(MemoryStore::with_testcase(tc));
        store.fail_appends.store(true, Ordering::SeqCst);
        let orch = orchestrator(&spawn_sandbox(fake).await, store.clone());

        let err = orch.submit_run(request(submission_id)).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Persistence);
        assert_eq!(store.total_runs(STUDENT), 0);
    }

    #[tokio::test]
    async fn test_validation_happens_first() {
        let orch = orchestrator(&dead_url().await, Arc::new(MemoryStore::default()));

        let mut req = request(Uuid::new_v4());
        req.student_id = "../etc".to_string();
        assert!(matches!(
            orch.submit_run(req).await,
            Err(GradeError::InvalidStudentId(_))
        ));

        let mut req = request(Uuid::new_v4());
        req.language_id = Some("cobol".to_string());
        assert!(matches!(
            orch.submit_run(req).await,
            Err(GradeError::UnknownLanguage(_))
        ));
    }
}
