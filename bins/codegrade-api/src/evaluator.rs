/// Result Grader - Scoring Logic for Completed Sandbox Runs
///
/// **Core Responsibility:**
/// Turn the body of a completed sandbox run into a binary score and a log
/// line, checked against the submission's stored testcase.
///
/// **Check Order (first match wins, each forces score 0):**
/// 1. Compiler diagnostics present → `Compilation error: ...`
/// 2. Standard error present → `Runtime error: ...`
/// 3. Outcome other than the normal-completion sentinel → `Execution failed: ...`
/// 4. Otherwise score 1 when the outputs match, 0 when they don't; log is the
///    trimmed stdout
///
/// **Normalization Rules:**
/// - Trim leading and trailing whitespace: YES
/// - Internal whitespace, case and line endings: significant
/// - Partial credit: NO

use crate::store::GradeStore;
use codegrade_common::types::{RunRecord, SandboxRunResult};
use codegrade_common::{GradeError, GradeResult};
use uuid::Uuid;

/// Score and log for one run, before it is attached to a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub score: u8,
    pub log: String,
}

/// A graded run ready to be recorded.
#[derive(Debug, Clone)]
pub struct Graded {
    pub record: RunRecord,
    pub stdout: String,
}

/// Normalize output string for comparison
fn normalize_output(output: &str) -> &str {
    output.trim()
}

/// Decide the verdict for a parsed run result against the expected output.
pub fn evaluate(result: &SandboxRunResult, expected: &str) -> Verdict {
    if !result.cmpinfo.is_empty() {
        return Verdict {
            score: 0,
            log: format!("Compilation error: {}", result.cmpinfo),
        };
    }
    if !result.stderr.is_empty() {
        return Verdict {
            score: 0,
            log: format!("Runtime error: {}", result.stderr),
        };
    }
    if !result.completed_normally() {
        return Verdict {
            score: 0,
            log: format!("Execution failed: {}", result.outcome),
        };
    }

    let stdout = normalize_output(&result.stdout);
    Verdict {
        score: u8::from(stdout == normalize_output(expected)),
        log: stdout.to_string(),
    }
}

/// Grade the raw body of a completed run.
///
/// Fails with `MalformedSandboxOutput` before touching storage, and with
/// `TestcaseNotFound` when the submission has no testcase. Nothing is
/// persisted here.
pub async fn grade(
    store: &dyn GradeStore,
    submission_id: Uuid,
    student_id: &str,
    body: &[u8],
) -> GradeResult<Graded> {
    let result = SandboxRunResult::parse(body)
        .map_err(|e| GradeError::MalformedSandboxOutput(e.to_string()))?;

    let testcase = store
        .get_testcase(&submission_id)
        .await?
        .ok_or(GradeError::TestcaseNotFound(submission_id))?;

    let verdict = evaluate(&result, &testcase.expected);
    Ok(Graded {
        record: RunRecord::new(submission_id, student_id, verdict.log, verdict.score),
        stdout: result.stdout,
    })
}
