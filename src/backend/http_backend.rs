//! HTTP client for a remote image synthesis provider

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::backend::traits::{GenerationSettings, ImageSynthesizer};
use crate::config::SynthesizerConfig;
use crate::error::{AppError, Result};
use crate::response::base64;

/// Provider reached over HTTP at `{endpoint}/run/{model}`
pub struct HttpSynthesizer {
    name: String,
    client: Client,
    endpoint: String,
    model: String,
    api_token: Option<String>,
}

/// Request body sent to the provider
#[derive(Debug, Serialize)]
struct ApiRunRequest<'a> {
    prompt: &'a str,
    width: u32,
    height: u32,
    num_steps: u32,
    guidance: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
}

/// JSON response variants carrying base64 image data
#[derive(Debug, Deserialize)]
struct ApiRunResponse {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    result: Option<ApiRunResult>,
}

#[derive(Debug, Deserialize)]
struct ApiRunResult {
    #[serde(default)]
    image: Option<String>,
}

impl ApiRunResponse {
    fn into_image(self) -> Option<String> {
        self.image
            .or(self.b64_json)
            .or_else(|| self.result.and_then(|r| r.image))
    }
}

impl HttpSynthesizer {
    /// Create a new HTTP synthesizer from configuration
    pub fn new(config: &SynthesizerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: format!("http:{}", config.model),
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_token: config.api_token.clone().filter(|t| !t.is_empty()),
        })
    }

    fn run_url(&self) -> String {
        format!("{}/run/{}", self.endpoint, self.model)
    }
}

#[async_trait]
impl ImageSynthesizer for HttpSynthesizer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, prompt: &str, settings: &GenerationSettings) -> Result<Vec<u8>> {
        let url = self.run_url();
        debug!(provider = %self.name, url = %url, "Sending synthesis request");

        let body = ApiRunRequest {
            prompt,
            width: settings.width,
            height: settings.height,
            num_steps: settings.num_steps,
            guidance: settings.guidance,
            seed: settings.seed,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "Provider returned {}: {}",
                status, text
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            let parsed: ApiRunResponse = response
                .json()
                .await
                .map_err(|e| AppError::Upstream(format!("Failed to parse response: {}", e)))?;

            let encoded = parsed
                .into_image()
                .ok_or_else(|| AppError::Upstream("Response carried no image".to_string()))?;

            return base64::decode(&encoded)
                .map_err(|e| AppError::Upstream(format!("Invalid image payload: {}", e)));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(AppError::Upstream("Provider returned an empty image".to_string()));
        }

        debug!(provider = %self.name, size = bytes.len(), "Received image");
        Ok(bytes.to_vec())
    }
}
