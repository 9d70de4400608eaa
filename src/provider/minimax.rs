//! Asynchronous video backend: submit returns a task id, status is polled,
//! and the finished file is resolved through a separate retrieve call.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::SiroccoError;
use crate::provider::{
    DispatchMode, GenerationRequest, PollReport, ProviderAdapter, SubmitOutcome,
};
use crate::task::{Artifact, MediaKind};

const SUBMIT_URL: &str = "https://api.minimax.io/v1/video_generation";
const QUERY_URL: &str = "https://api.minimax.io/v1/query/video_generation";
const RETRIEVE_URL: &str = "https://api.minimax.io/v1/files/retrieve";

pub struct MinimaxVideoAdapter {
    client: Client,
    api_key: String,
}

impl std::fmt::Debug for MinimaxVideoAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinimaxVideoAdapter")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Deserialize)]
struct BaseResp {
    status_code: i64,
    #[serde(default)]
    status_msg: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    task_id: Option<String>,
    base_resp: BaseResp,
}

#[derive(Deserialize)]
struct QueryResponse {
    status: Option<String>,
    file_id: Option<String>,
    base_resp: BaseResp,
}

#[derive(Deserialize)]
struct RetrieveResponse {
    file: Option<RetrievedFile>,
}

#[derive(Deserialize)]
struct RetrievedFile {
    download_url: Option<String>,
}

/// Parse the submit response to extract the external task id.
pub fn parse_submit_response(body: &[u8]) -> Result<String, SiroccoError> {
    let parsed: SubmitResponse = serde_json::from_slice(body)
        .map_err(|e| SiroccoError::SchemaParse(format!("MiniMax submit response: {e}")))?;
    if parsed.base_resp.status_code != 0 {
        return Err(SiroccoError::SubmissionFailed {
            provider: "minimax".to_string(),
            message: parsed.base_resp.status_msg,
        });
    }
    parsed.task_id.ok_or_else(|| {
        SiroccoError::SchemaParse("MiniMax submit response missing 'task_id'".into())
    })
}

/// Parse a status query response into a poll report.
pub fn parse_status_response(body: &[u8]) -> Result<PollReport, SiroccoError> {
    let parsed: QueryResponse = serde_json::from_slice(body)
        .map_err(|e| SiroccoError::SchemaParse(format!("MiniMax status response: {e}")))?;

    match parsed.status.as_deref() {
        Some("Queueing" | "Preparing" | "Processing") => Ok(PollReport::InProgress),
        Some("Success") => Ok(PollReport::Done),
        Some("Fail") => {
            let msg = if parsed.base_resp.status_msg.is_empty() {
                "job failed".to_string()
            } else {
                parsed.base_resp.status_msg
            };
            Ok(PollReport::Failed(msg))
        }
        Some(other) => Ok(PollReport::Failed(format!("unknown status: {other}"))),
        None => Err(SiroccoError::SchemaParse(
            "MiniMax status response missing 'status'".into(),
        )),
    }
}

/// Extract the file id a finished job points at.
pub fn parse_file_id(body: &[u8]) -> Result<String, SiroccoError> {
    let parsed: QueryResponse = serde_json::from_slice(body)
        .map_err(|e| SiroccoError::SchemaParse(format!("MiniMax result query: {e}")))?;
    parsed.file_id.ok_or_else(|| {
        SiroccoError::SchemaParse("MiniMax result query missing 'file_id'".into())
    })
}

/// Extract the download URL from a file retrieve response.
pub fn parse_download_url(body: &[u8]) -> Result<String, SiroccoError> {
    let parsed: RetrieveResponse = serde_json::from_slice(body)
        .map_err(|e| SiroccoError::SchemaParse(format!("MiniMax file retrieve: {e}")))?;
    parsed.file.and_then(|f| f.download_url).ok_or_else(|| {
        SiroccoError::SchemaParse("MiniMax file retrieve missing 'download_url'".into())
    })
}

impl MinimaxVideoAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            api_key: api_key.into(),
        }
    }

    async fn get_bytes(
        &self,
        url: &str,
        query: &[(&str, &str)],
        what: &str,
    ) -> Result<Vec<u8>, SiroccoError> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(SiroccoError::Request)?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(SiroccoError::AuthFailed {
                provider: "minimax".to_string(),
                message: format!("HTTP {status}"),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SiroccoError::RateLimited {
                provider: "minimax".to_string(),
            });
        }
        if !status.is_success() {
            return Err(SiroccoError::Upstream {
                provider: "minimax".to_string(),
                message: format!("{what} failed with HTTP {status}"),
                status: Some(status.as_u16()),
            });
        }
        Ok(resp.bytes().await.map_err(SiroccoError::Request)?.to_vec())
    }
}

#[async_trait]
impl ProviderAdapter for MinimaxVideoAdapter {
    fn name(&self) -> &'static str {
        "minimax"
    }

    fn mode(&self) -> DispatchMode {
        DispatchMode::Asynchronous
    }

    async fn submit(&self, req: &GenerationRequest) -> Result<SubmitOutcome, SiroccoError> {
        let body = serde_json::json!({
            "model": req.model,
            "prompt": req.prompt,
        });

        let resp = self
            .client
            .post(SUBMIT_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(SiroccoError::Request)?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(SiroccoError::AuthFailed {
                provider: self.name().to_string(),
                message: format!("HTTP {status}"),
            });
        }
        if !status.is_success() {
            return Err(SiroccoError::SubmissionFailed {
                provider: self.name().to_string(),
                message: format!("HTTP {status}"),
            });
        }

        let body_bytes = resp.bytes().await.map_err(SiroccoError::Request)?;
        let external_task_id = parse_submit_response(&body_bytes)?;
        Ok(SubmitOutcome::Accepted { external_task_id })
    }

    async fn poll_status(&self, external_task_id: &str) -> Result<PollReport, SiroccoError> {
        let body = self
            .get_bytes(QUERY_URL, &[("task_id", external_task_id)], "status query")
            .await?;
        parse_status_response(&body)
    }

    async fn fetch_result(&self, external_task_id: &str) -> Result<Vec<Artifact>, SiroccoError> {
        let queried = self
            .get_bytes(QUERY_URL, &[("task_id", external_task_id)], "result query")
            .await?;
        let file_id = parse_file_id(&queried)?;

        let retrieved = self
            .get_bytes(
                RETRIEVE_URL,
                &[("file_id", file_id.as_str())],
                "file retrieve",
            )
            .await?;

        Ok(vec![Artifact {
            url: parse_download_url(&retrieved)?,
            kind: MediaKind::Video,
        }])
    }
}
