use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

/// Outcome code the sandbox reports when compilation and execution both
/// finished normally.
pub const OUTCOME_OK: i32 = 15;

/// Grading data owned by a single submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Testcase {
    pub submission_id: Uuid,
    /// Staged into the sandbox as the run's config file.
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub expected: String,
    /// Grading driver compiled as the run's main source.
    #[serde(default)]
    pub code: String,
}

/// Partial update for a testcase; empty or absent fields leave the stored
/// value untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestcaseEdit {
    pub input: Option<String>,
    pub expected: Option<String>,
    pub code: Option<String>,
}

impl Testcase {
    pub fn new(submission_id: Uuid) -> Self {
        Self {
            submission_id,
            input: String::new(),
            expected: String::new(),
            code: String::new(),
        }
    }

    /// Apply an edit. Returns true when the input changed and needs restaging.
    pub fn apply(&mut self, edit: TestcaseEdit) -> bool {
        let mut input_changed = false;
        if let Some(input) = edit.input.filter(|v| !v.is_empty()) {
            input_changed = input != self.input;
            self.input = input;
        }
        if let Some(expected) = edit.expected.filter(|v| !v.is_empty()) {
            self.expected = expected;
        }
        if let Some(code) = edit.code.filter(|v| !v.is_empty()) {
            self.code = code;
        }
        input_changed
    }
}

/// One graded attempt. Append-only: never updated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub student_id: String,
    pub log: String,
    pub score: u8,
    pub created_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(submission_id: Uuid, student_id: impl Into<String>, log: String, score: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            submission_id,
            student_id: student_id.into(),
            log,
            score,
            created_at: Utc::now(),
        }
    }
}

/// A staged file made visible to a run under `filename`.
///
/// On the wire this is a two-element array: `[file_id, filename]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct FileRef {
    pub file_id: String,
    pub filename: String,
}

impl FileRef {
    pub fn new(file_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            filename: filename.into(),
        }
    }
}

impl From<(String, String)> for FileRef {
    fn from((file_id, filename): (String, String)) -> Self {
        Self { file_id, filename }
    }
}

impl From<FileRef> for (String, String) {
    fn from(file: FileRef) -> Self {
        (file.file_id, file.filename)
    }
}

/// Sandbox `parameters` block. Passed through untouched; unset fields are
/// omitted from the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_execution_time: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory_usage: Option<u64>,
    #[serde(rename = "compileargs", default, skip_serializing_if = "Vec::is_empty")]
    pub compile_args: Vec<String>,
    #[serde(rename = "linkargs", default, skip_serializing_if = "Vec::is_empty")]
    pub link_args: Vec<String>,
    #[serde(rename = "args", default, skip_serializing_if = "Vec::is_empty")]
    pub run_args: Vec<String>,
}

impl ResourceLimits {
    pub fn is_empty(&self) -> bool {
        self.max_execution_time.is_none()
            && self.max_memory_usage.is_none()
            && self.compile_args.is_empty()
            && self.link_args.is_empty()
            && self.run_args.is_empty()
    }
}

/// A single execution request for the sandbox. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    pub language_id: String,
    #[serde(rename = "sourcecode")]
    pub source_code: String,
    #[serde(rename = "sourcefilename", default, skip_serializing_if = "Option::is_none")]
    pub source_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Order is significant: compile and link arguments refer to these
    /// files by name and position.
    #[serde(default)]
    pub file_list: Vec<FileRef>,
    #[serde(default, skip_serializing_if = "ResourceLimits::is_empty")]
    pub parameters: ResourceLimits,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub debug: bool,
}

impl RunSpec {
    pub fn with_source_filename(mut self, filename: impl Into<String>) -> Self {
        self.source_filename = Some(filename.into());
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Envelope for `POST /runs`.
#[derive(Debug, Serialize)]
pub struct RunRequest<'a> {
    pub run_spec: &'a RunSpec,
}

/// Body of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxRunResult {
    #[serde(default)]
    pub run_id: Option<String>,
    pub outcome: i32,
    #[serde(default, deserialize_with = "string_or_null")]
    pub cmpinfo: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub stdout: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub stderr: String,
}

impl SandboxRunResult {
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    pub fn completed_normally(&self) -> bool {
        self.outcome == OUTCOME_OK
    }
}

fn string_or_null<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// How the sandbox answered a run submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStatus {
    Completed,
    Queued,
    BadRunSpec,
    EndpointMissing,
    Unexpected(u16),
}

impl SandboxStatus {
    pub fn from_http(code: u16) -> Self {
        match code {
            200 => SandboxStatus::Completed,
            202 => SandboxStatus::Queued,
            400 => SandboxStatus::BadRunSpec,
            404 => SandboxStatus::EndpointMissing,
            other => SandboxStatus::Unexpected(other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxStatus::Completed => "completed",
            SandboxStatus::Queued => "queued",
            SandboxStatus::BadRunSpec => "bad_run_spec",
            SandboxStatus::EndpointMissing => "endpoint_missing",
            SandboxStatus::Unexpected(_) => "unexpected",
        }
    }
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxStatus::Completed => write!(f, "run completed"),
            SandboxStatus::Queued => write!(f, "run queued for later execution"),
            SandboxStatus::BadRunSpec => write!(f, "invalid run_spec or missing parameters"),
            SandboxStatus::EndpointMissing => {
                write!(f, "sandbox endpoint or a referenced staged file not found")
            }
            SandboxStatus::Unexpected(code) => write!(f, "unexpected response code {}", code),
        }
    }
}

/// Staged-file id for a student's own source file, e.g. `2112198cpp`.
pub fn student_file_id(student_id: &str, suffix: &str) -> String {
    format!("{}{}", student_id, suffix)
}

/// Staged-file id for the config file derived from a submission's testcase.
pub fn testcase_file_id(submission_id: &Uuid) -> String {
    submission_id.simple().to_string()
}

/// Student and file ids end up inside sandbox URLs and Redis keys.
pub fn is_valid_identifier(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
