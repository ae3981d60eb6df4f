//! Provider abstractions for vision model APIs.

use serde::Serialize;
use thiserror::Error;

pub mod anthropic;

pub use anthropic::{AnthropicConfig, AnthropicVision};

/// Outcome taxonomy for a single vision API exchange.
///
/// The retry loop in the enrichment client switches on these variants rather
/// than on exception types: `Auth` and `Config` are permanent, `RateLimited`,
/// `Server` and `Network` are transient, `Parse` is terminal for the attempt.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("invalid API credential")]
    Auth,
    #[error("unknown model: {0}")]
    Config(String),
    #[error("rate limited by server")]
    RateLimited {
        /// Server-suggested delay in seconds, from the `retry-after` header.
        retry_after: Option<u64>,
    },
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed response: {0}")]
    Parse(String),
}

impl VisionError {
    /// Permanent errors are never worth a second attempt.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            VisionError::Auth | VisionError::Config(_) | VisionError::Parse(_)
        )
    }
}

/// A fully prepared request: one base64-encoded image plus a task prompt.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system: String,
    pub image_base64: String,
    pub media_type: &'static str,
    pub prompt: String,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: Vec<WireBlock<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock<'a> {
    Image { source: WireImageSource<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct WireImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'a str,
    data: &'a str,
}

impl VisionRequest {
    pub(crate) fn to_wire(&self) -> WireRequest<'_> {
        WireRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: &self.system,
            messages: vec![WireMessage {
                role: "user",
                content: vec![
                    WireBlock::Image {
                        source: WireImageSource {
                            kind: "base64",
                            media_type: self.media_type,
                            data: &self.image_base64,
                        },
                    },
                    WireBlock::Text { text: &self.prompt },
                ],
            }],
        }
    }
}

/// Transport seam for the enrichment client.
///
/// Returns the raw model text on success; the caller owns all parsing beyond
/// the envelope. Tests substitute scripted implementations for this trait.
#[async_trait::async_trait]
pub trait VisionTransport: Send + Sync {
    async fn send(&self, request: &VisionRequest) -> Result<String, VisionError>;
}
