//! Synchronous image backend: one HTTP call returns hosted image URLs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::SiroccoError;
use crate::provider::{DispatchMode, GenerationRequest, ProviderAdapter, SubmitOutcome};
use crate::task::{Artifact, MediaKind};

const IMAGES_URL: &str = "https://api.openai.com/v1/images/generations";

/// Max time for one generation call. Image backends answer within this even
/// for batch requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct OpenAiImagesAdapter {
    client: Client,
    api_key: String,
}

impl std::fmt::Debug for OpenAiImagesAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiImagesAdapter")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Deserialize)]
struct ImagesResponse {
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    url: Option<String>,
}

impl OpenAiImagesAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(REQUEST_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiImagesAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn mode(&self) -> DispatchMode {
        DispatchMode::Synchronous
    }

    async fn submit(&self, req: &GenerationRequest) -> Result<SubmitOutcome, SiroccoError> {
        let body = serde_json::json!({
            "model": req.model,
            "prompt": req.prompt,
            "n": req.count.max(1),
        });

        let resp = self
            .client
            .post(IMAGES_URL)
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
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SiroccoError::RateLimited {
                provider: self.name().to_string(),
            });
        }
        if !status.is_success() {
            return Err(SiroccoError::SubmissionFailed {
                provider: self.name().to_string(),
                message: format!("HTTP {status}"),
            });
        }

        let body_bytes = resp.bytes().await.map_err(SiroccoError::Request)?;
        Ok(SubmitOutcome::Completed(parse_images_response(&body_bytes)?))
    }
}

/// Parse the generation response into artifact references.
pub fn parse_images_response(body: &[u8]) -> Result<Vec<Artifact>, SiroccoError> {
    let parsed: ImagesResponse = serde_json::from_slice(body)
        .map_err(|e| SiroccoError::SchemaParse(format!("OpenAI images response: {e}")))?;

    let artifacts: Vec<Artifact> = parsed
        .data
        .into_iter()
        .filter_map(|d| d.url)
        .map(|url| Artifact {
            url,
            kind: MediaKind::Image,
        })
        .collect();

    if artifacts.is_empty() {
        return Err(SiroccoError::SchemaParse(
            "OpenAI images response carried no URLs".into(),
        ));
    }

    Ok(artifacts)
}
