// HTTP route handlers for the codegrade API

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequestParts, Multipart, Path, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
};
use codegrade_common::types::{
    is_valid_identifier, student_file_id, testcase_file_id, SandboxStatus, Testcase, TestcaseEdit,
};
use codegrade_common::{ErrorClass, GradeError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::background::Job;
use crate::executor::{RunOutcome, RunRequest};
use crate::metrics;
use crate::AppState;

pub const STUDENT_HEADER: &str = "x-student-id";

/// Verified student identity, resolved upstream and forwarded as a header.
pub struct StudentId(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for StudentId {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(STUDENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .unwrap_or_default();

        if value.is_empty() {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Student identity not provided" })),
            )
                .into_response());
        }
        if !is_valid_identifier(value) {
            return Err(ApiError(GradeError::InvalidStudentId(value.to_string())).into_response());
        }
        Ok(StudentId(value.to_string()))
    }
}

/// HTTP status for a pipeline error
pub fn status_for(err: &GradeError) -> StatusCode {
    match err {
        GradeError::EndpointUnavailable => StatusCode::NOT_FOUND,
        GradeError::SandboxCacheError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        GradeError::SandboxRejected(SandboxStatus::BadRunSpec) => StatusCode::BAD_REQUEST,
        GradeError::SandboxRejected(SandboxStatus::EndpointMissing) => StatusCode::NOT_FOUND,
        other => match other.class() {
            ErrorClass::Validation => StatusCode::BAD_REQUEST,
            ErrorClass::GradingData => StatusCode::NOT_FOUND,
            ErrorClass::SandboxTransport => StatusCode::SERVICE_UNAVAILABLE,
            ErrorClass::SandboxProtocol => StatusCode::BAD_GATEWAY,
            ErrorClass::Persistence => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

pub struct ApiError(pub GradeError);

impl From<GradeError> for ApiError {
    fn from(err: GradeError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (status_for(&self.0), Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn upload_failure(status: StatusCode, file_id: Option<String>, error: impl Into<String>) -> Response {
    (
        status,
        Json(UploadResponse {
            success: false,
            file_id,
            message: None,
            error: Some(error.into()),
        }),
    )
        .into_response()
}

/// Pull every file part out of a multipart body, keyed by field name.
async fn read_parts(multipart: &mut Multipart) -> Result<HashMap<String, (Option<String>, Vec<u8>)>, String> {
    let mut parts = HashMap::new();
    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await.map_err(|e| e.to_string())?;
        parts.insert(name, (file_name, bytes.to_vec()));
    }
    Ok(parts)
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus exposition
pub async fn metrics_handler() -> Response {
    match metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /sandbox/languages - Languages the sandbox reports
pub async fn list_languages(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let languages = state.sandbox.languages().await?;
    Ok(Json(languages))
}

/// PUT /sandbox/files/:id - Stage one file synchronously
pub async fn stage_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
    mut multipart: Multipart,
) -> Response {
    if !is_valid_identifier(&file_id) {
        return upload_failure(StatusCode::BAD_REQUEST, Some(file_id), "Invalid file id");
    }

    let mut parts = match read_parts(&mut multipart).await {
        Ok(parts) => parts,
        Err(e) => return upload_failure(StatusCode::BAD_REQUEST, Some(file_id), e),
    };
    let Some((_, contents)) = parts.remove("file") else {
        return upload_failure(StatusCode::BAD_REQUEST, Some(file_id), "Missing form field 'file'");
    };

    match state.sandbox.stage(&file_id, &contents).await {
        Ok(()) => {
            metrics::STAGING_RESULTS.with_label_values(&["ok"]).inc();
            (
                StatusCode::OK,
                Json(UploadResponse {
                    success: true,
                    file_id: Some(file_id),
                    message: Some("File staged".to_string()),
                    error: None,
                }),
            )
                .into_response()
        }
        Err(e) => {
            metrics::STAGING_RESULTS.with_label_values(&["error"]).inc();
            warn!(file_id = %file_id, error = %e, "Staging failed");
            upload_failure(status_for(&e), Some(file_id), e.to_string())
        }
    }
}

/// HEAD /sandbox/files/:id - Whether a file is staged
pub async fn check_file(State(state): State<Arc<AppState>>, Path(file_id): Path<String>) -> StatusCode {
    if !is_valid_identifier(&file_id) {
        return StatusCode::BAD_REQUEST;
    }
    match state.sandbox.check_exists(&file_id).await {
        Ok(true) => StatusCode::NO_CONTENT,
        Ok(false) => StatusCode::NOT_FOUND,
        Err(e) => {
            warn!(file_id = %file_id, error = %e, "File check failed");
            StatusCode::BAD_GATEWAY
        }
    }
}

/// POST /upload - Stage the caller's own source files
///
/// Expects one multipart field `{suffix}_file` per student file of the default
/// run profile (`cpp_file` and `h_file` for C++), each with a matching
/// extension.
pub async fn upload_student_files(
    State(state): State<Arc<AppState>>,
    StudentId(student_id): StudentId,
    mut multipart: Multipart,
) -> Response {
    let mut parts = match read_parts(&mut multipart).await {
        Ok(parts) => parts,
        Err(e) => return upload_failure(StatusCode::BAD_REQUEST, None, e),
    };

    let profile = state.profiles.default_profile();
    let mut staged = Vec::with_capacity(profile.student_files.len());
    for file in &profile.student_files {
        let field = format!("{}_file", file.suffix);
        let Some((file_name, contents)) = parts.remove(&field) else {
            return upload_failure(
                StatusCode::BAD_REQUEST,
                None,
                format!("Missing form field '{}'", field),
            );
        };
        let extension = format!(".{}", file.suffix);
        if !file_name.unwrap_or_default().ends_with(&extension) {
            return upload_failure(
                StatusCode::BAD_REQUEST,
                None,
                format!("{} must have a {} extension", field, extension),
            );
        }
        staged.push((file.suffix.clone(), contents));
    }

    let mut body = Map::new();
    for (suffix, contents) in staged {
        let file_id = student_file_id(&student_id, &suffix);
        if let Err(e) = state.sandbox.stage(&file_id, &contents).await {
            metrics::STAGING_RESULTS.with_label_values(&["error"]).inc();
            warn!(student_id = %student_id, file_id = %file_id, error = %e, "Upload staging failed");
            return upload_failure(status_for(&e), Some(file_id), e.to_string());
        }
        metrics::STAGING_RESULTS.with_label_values(&["ok"]).inc();
        body.insert(format!("{}_file_id", suffix), Value::String(file_id));
    }

    info!(student_id = %student_id, files = body.len(), "Student files uploaded");
    body.insert("success".to_string(), Value::Bool(true));
    body.insert(
        "message".to_string(),
        Value::String("All files uploaded".to_string()),
    );
    (StatusCode::OK, Json(Value::Object(body))).into_response()
}

/// GET /upload/check - Which of the caller's files are staged
pub async fn check_student_files(
    State(state): State<Arc<AppState>>,
    StudentId(student_id): StudentId,
) -> Response {
    let profile = state.profiles.default_profile();
    let mut present = Map::new();
    for file in &profile.student_files {
        let file_id = student_file_id(&student_id, &file.suffix);
        match state.sandbox.check_exists(&file_id).await {
            Ok(exists) => {
                present.insert(file_id, Value::Bool(exists));
            }
            Err(e) => {
                warn!(file_id = %file_id, error = %e, "File check failed");
                return ApiError(e).into_response();
            }
        }
    }

    let staged = present.values().filter(|v| v.as_bool() == Some(true)).count();
    if staged == present.len() {
        StatusCode::NO_CONTENT.into_response()
    } else if staged == 0 {
        (StatusCode::NOT_FOUND, Json(json!({ "files": present }))).into_response()
    } else {
        (StatusCode::PARTIAL_CONTENT, Json(json!({ "files": present }))).into_response()
    }
}

/// PUT /submissions/:id/testcase - Create or update a submission's testcase
pub async fn put_testcase(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<Uuid>,
    Json(edit): Json<TestcaseEdit>,
) -> Result<impl IntoResponse, ApiError> {
    let mut testcase = state
        .store
        .get_testcase(&submission_id)
        .await?
        .unwrap_or_else(|| Testcase::new(submission_id));
    let input_changed = testcase.apply(edit);
    state.store.put_testcase(&testcase).await?;
    info!(submission_id = %submission_id, input_changed, "Testcase saved");

    if input_changed {
        // Tickets dropped: failures are only logged
        state.background.submit(Job::StageFile {
            file_id: testcase_file_id(&submission_id),
            contents: testcase.input.clone().into_bytes(),
        });
    }
    state.background.submit(Job::Annotate { submission_id });

    Ok(Json(testcase))
}

#[derive(Debug, Default, Deserialize)]
pub struct RunBody {
    pub language_id: Option<String>,
    #[serde(rename = "sourcecode")]
    pub source_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub status: u16,
    pub result: String,
    pub score: u8,
    pub log: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn run_failure(err: GradeError) -> (StatusCode, RunResponse) {
    let status = status_for(&err);
    (
        status,
        RunResponse {
            status: status.as_u16(),
            result: String::new(),
            score: 0,
            log: String::new(),
            error: Some(err.to_string()),
        },
    )
}

/// An empty body means "use the defaults". Anything else must be a valid
/// run body.
fn parse_run_body(raw: &[u8]) -> Result<RunBody, GradeError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(RunBody::default());
    }
    serde_json::from_slice(raw)
        .map_err(|e| GradeError::InvalidRequest(format!("malformed run body: {}", e)))
}

/// POST /submissions/:id/run - Grade the caller's code against the testcase
pub async fn run_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<Uuid>,
    StudentId(student_id): StudentId,
    raw: Bytes,
) -> Response {
    let body = match parse_run_body(&raw) {
        Ok(body) => body,
        Err(e) => {
            warn!(submission_id = %submission_id, error = %e, "Rejected run body");
            let (status, response) = run_failure(e);
            return (status, Json(response)).into_response();
        }
    };
    let request = RunRequest {
        submission_id,
        student_id,
        language_id: body.language_id,
        source_code: body.source_code,
    };

    let (status, response) = match state.orchestrator.submit_run(request).await {
        Ok(RunOutcome::Completed { score, log, stdout, .. }) => (
            StatusCode::OK,
            RunResponse {
                status: StatusCode::OK.as_u16(),
                result: stdout,
                score,
                log,
                error: None,
            },
        ),
        Ok(RunOutcome::Queued) => (
            StatusCode::ACCEPTED,
            RunResponse {
                status: StatusCode::ACCEPTED.as_u16(),
                result: "Job queued for later execution".to_string(),
                score: 0,
                log: String::new(),
                error: None,
            },
        ),
        Err(e) => {
            error!(submission_id = %submission_id, error = %e, "Run failed");
            run_failure(e)
        }
    };
    (status, Json(response)).into_response()
}

/// GET /submissions/:id/runs - The caller's run history for a submission
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<Uuid>,
    StudentId(student_id): StudentId,
) -> Result<impl IntoResponse, ApiError> {
    let history = state
        .orchestrator
        .recorder()
        .history(&submission_id, &student_id)
        .await?;
    Ok(Json(history))
}
