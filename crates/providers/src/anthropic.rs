//! Anthropic messages API transport.

use crate::{VisionError, VisionRequest, VisionTransport};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const API_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct AnthropicVision {
    client: reqwest::Client,
    cfg: Arc<AnthropicConfig>,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

impl AnthropicVision {
    pub fn new(cfg: AnthropicConfig) -> Result<Self, VisionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(TOTAL_TIMEOUT)
            .build()
            .map_err(|e| VisionError::Network(e.to_string()))?;
        Ok(Self {
            client,
            cfg: Arc::new(cfg),
        })
    }

    /// Probe the credential with a minimal vision request.
    ///
    /// A rate-limited response still proves the key is accepted.
    pub async fn validate_key(&self, model: &str) -> Result<(), VisionError> {
        // 1x1 white JPEG, the smallest payload the endpoint accepts.
        const PROBE_JPEG_B64: &str = "/9j/4AAQSkZJRgABAQEAYABgAAD/2wBDAAgGBgcGBQgHBwcJCQgKDBQNDAsLDBkSEw8UHRofHh0aHBwgJC4nICIsIxwcKDcpLDAxNDQ0Hyc5PTgyPC4zNDL/wAALCAABAAEBAREA/8QAFAABAAAAAAAAAAAAAAAAAAAACf/EABQQAQAAAAAAAAAAAAAAAAAAAAD/2gAIAQEAAD8AVN//2Q==";
        let req = VisionRequest {
            model: model.to_string(),
            max_tokens: 10,
            temperature: 0.0,
            system: String::new(),
            image_base64: PROBE_JPEG_B64.to_string(),
            media_type: "image/jpeg",
            prompt: "test".to_string(),
        };
        match self.send(&req).await {
            Ok(_) => Ok(()),
            Err(VisionError::RateLimited { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait::async_trait]
impl VisionTransport for AnthropicVision {
    async fn send(&self, request: &VisionRequest) -> Result<String, VisionError> {
        let url = format!("{}/v1/messages", self.cfg.base_url);
        tracing::debug!(model = %request.model, "Sending vision request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.cfg.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&request.to_wire())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    VisionError::Network(format!("timeout or connect failure: {e}"))
                } else {
                    VisionError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        match status {
            200 => {
                let parsed: ApiResponse = response
                    .json()
                    .await
                    .map_err(|e| VisionError::Parse(e.to_string()))?;
                parsed
                    .content
                    .into_iter()
                    .find_map(|b| b.text)
                    .ok_or_else(|| VisionError::Parse("no content in API response".into()))
            }
            401 => Err(VisionError::Auth),
            404 => Err(VisionError::Config(request.model.clone())),
            429 => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                Err(VisionError::RateLimited { retry_after })
            }
            s => {
                let message = response.text().await.unwrap_or_default();
                let message = message.chars().take(200).collect();
                Err(VisionError::Server { status: s, message })
            }
        }
    }
}
