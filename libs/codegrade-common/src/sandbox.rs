//! Client for the remote code-execution sandbox.
//!
//! Covers the three things the grading pipeline needs from it:
//! - staging files into its content cache (`PUT`/`HEAD /files/{id}`)
//! - submitting runs (`POST /runs`)
//! - listing supported languages (`GET /languages`)
//!
//! The client never retries. A run is not idempotent on the sandbox side, so
//! whether to try again is the caller's decision.

use crate::error::{GradeError, GradeResult};
use crate::types::{RunRequest, RunSpec, SandboxRunResult, SandboxStatus};
use base64::{engine::general_purpose, Engine as _};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The sandbox may itself spend several seconds running untrusted code.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct StageFileBody {
    file_contents: String,
}

/// Raw answer to a run submission. The body is kept as bytes so grading can
/// decide how to interpret it.
#[derive(Debug, Clone)]
pub struct SandboxReply {
    pub status: SandboxStatus,
    pub body: Vec<u8>,
}

impl SandboxReply {
    pub fn result(&self) -> GradeResult<SandboxRunResult> {
        SandboxRunResult::parse(&self.body)
            .map_err(|e| GradeError::MalformedSandboxOutput(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct SandboxClient {
    base_url: String,
    http: reqwest::Client,
}

impl SandboxClient {
    pub fn new(base_url: &str, timeout: Duration) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Push `contents` into the sandbox cache under `file_id`.
    ///
    /// Staging the same id again replaces the cached content, so repeated
    /// calls are safe.
    pub async fn stage(&self, file_id: &str, contents: &[u8]) -> GradeResult<()> {
        let body = StageFileBody {
            file_contents: general_purpose::STANDARD.encode(contents),
        };
        let url = self.url(&format!("files/{}", file_id));
        debug!(file_id = %file_id, bytes = contents.len(), url = %url, "Staging file");

        let response = self
            .http
            .put(&url)
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::NO_CONTENT => {
                info!(file_id = %file_id, "File staged in sandbox");
                Ok(())
            }
            StatusCode::BAD_REQUEST => Err(GradeError::InvalidRequest(file_id.to_string())),
            StatusCode::NOT_FOUND => Err(GradeError::EndpointUnavailable),
            StatusCode::INTERNAL_SERVER_ERROR => {
                Err(GradeError::SandboxCacheError(file_id.to_string()))
            }
            other => {
                warn!(file_id = %file_id, status = other.as_u16(), "Unexpected staging response");
                Err(GradeError::UnexpectedSandboxResponse(other.as_u16()))
            }
        }
    }

    /// Whether `file_id` is currently in the sandbox cache.
    pub async fn check_exists(&self, file_id: &str) -> GradeResult<bool> {
        let url = self.url(&format!("files/{}", file_id));
        let response = self
            .http
            .head(&url)
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            StatusCode::BAD_REQUEST => Err(GradeError::InvalidRequest(file_id.to_string())),
            other => Err(GradeError::UnexpectedSandboxResponse(other.as_u16())),
        }
    }

    /// Submit a run. Any HTTP answer is returned as a [`SandboxReply`]; only
    /// transport failures are errors.
    pub async fn submit(&self, spec: &RunSpec) -> GradeResult<SandboxReply> {
        let url = self.url("runs");
        debug!(
            language = %spec.language_id,
            files = spec.file_list.len(),
            source_size = spec.source_code.len(),
            "Submitting run"
        );

        let response = self
            .http
            .post(&url)
            .header(ACCEPT, "application/json")
            .json(&RunRequest { run_spec: spec })
            .send()
            .await
            .map_err(transport_error)?;

        let status = SandboxStatus::from_http(response.status().as_u16());
        let body = match status {
            SandboxStatus::Completed => response.bytes().await.map_err(transport_error)?.to_vec(),
            // Only useful for diagnostics
            _ => response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .unwrap_or_default(),
        };

        info!(status = status.as_str(), body_size = body.len(), "Sandbox answered run");
        Ok(SandboxReply { status, body })
    }

    /// `[[name, version], ...]` as reported by the sandbox.
    pub async fn languages(&self) -> GradeResult<Vec<(String, String)>> {
        let response = self
            .http
            .get(self.url("languages"))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::OK => {
                let body = response.bytes().await.map_err(transport_error)?;
                serde_json::from_slice(&body)
                    .map_err(|e| GradeError::MalformedSandboxOutput(e.to_string()))
            }
            other => Err(GradeError::UnexpectedSandboxResponse(other.as_u16())),
        }
    }
}

fn transport_error(err: reqwest::Error) -> GradeError {
    if err.is_timeout() {
        GradeError::SandboxUnreachable(format!("request timed out: {}", err))
    } else {
        GradeError::SandboxUnreachable(err.to_string())
    }
}
