// Client for the external trace/annotation service

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct TraceRequest {
    post_id: String,
}

#[derive(Debug, Deserialize)]
struct TraceResponse {
    trace: String,
}

#[derive(Debug, Clone)]
pub struct TraceClient {
    base_url: String,
    http: reqwest::Client,
}

impl TraceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build trace HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Ask the service for the trace of a submission.
    pub async fn trace(&self, submission_id: &Uuid) -> Result<String> {
        let url = format!("{}/trace", self.base_url);
        debug!(submission_id = %submission_id, url = %url, "Requesting trace");

        let response = self
            .http
            .post(&url)
            .json(&TraceRequest {
                post_id: submission_id.to_string(),
            })
            .send()
            .await
            .context("Trace service unreachable")?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            bail!("Trace service returned {}: {}", status.as_u16(), body);
        }

        let parsed: TraceResponse = response
            .json()
            .await
            .context("Malformed trace response")?;
        Ok(parsed.trace)
    }
}
