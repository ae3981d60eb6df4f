//! Rate-limited enrichment client: descriptions and categorized tags from a
//! vision model, with shared admission control, bounded concurrency and
//! per-attempt retry classification.

use crate::queue::EnrichStatus;
use crate::ratelimit::{RetryDecision, RetryPolicy, SlidingWindow};
use crate::tags::TagCategory;
use crate::usage::{UsageSnapshot, UsageStats};
use base64::Engine as _;
use image::imageops::FilterType;
use providers::{VisionError, VisionRequest, VisionTransport};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

pub const COST_PER_IMAGE: f64 = 0.006;

const DESCRIBE_MAX_DIMENSION: u32 = 2048;
const TAG_MAX_DIMENSION: u32 = 1568;
const PREPARED_JPEG_QUALITY: u8 = 85;

const DESCRIBE_MAX_TOKENS: u32 = 300;
const DESCRIBE_TEMPERATURE: f32 = 0.3;
const TAG_MAX_TOKENS: u32 = 500;
const TAG_TEMPERATURE: f32 = 0.2;

const DEFAULT_MAX_CONCURRENT: usize = 5;
const DEFAULT_REQUESTS_PER_MINUTE: usize = 50;

const DESCRIBE_SYSTEM_PROMPT: &str = "\
You are an expert at writing alt text descriptions for editorial images.
Your descriptions should be:
- Concise yet informative (50-150 words)
- Focused on the main subject and context
- Descriptive of visual elements important for understanding
- Professional and appropriate for publication
- Avoiding redundant phrases like \"image of\" or \"picture showing\"

For editorial content, emphasize:
- People: their appearance, expressions, clothing, and actions
- Settings: location, atmosphere, and relevant background elements
- Products: key features, styling, and presentation
- Composition: how elements are arranged and what draws attention";

const TAG_SYSTEM_PROMPT: &str = "\
You are an expert image analyst specializing in editorial content tagging.
Your task is to analyze images and assign appropriate tags from predefined categories.

Guidelines:
- Analyze the visual content carefully and objectively
- Focus on what is clearly visible in the image
- Be conservative with tag assignments - only assign tags you're confident about
- Provide a confidence score between 0.1 and 1.0 for your overall assessment

Response format: Return ONLY a valid JSON object with this exact structure:
{
  \"tags\": {
    \"Category\": [\"tag1\", \"tag2\"]
  },
  \"confidence\": 0.85
}

Important:
- Only use tags from the provided category lists
- Omit categories that do not apply";

/// Outcome of one enrichment call (either mode).
#[derive(Debug, Clone)]
pub struct EnrichmentResult {
    pub text: Option<String>,
    pub tags: Vec<String>,
    pub tag_categories: BTreeMap<String, Vec<String>>,
    pub confidence: f64,
    pub status: EnrichStatus,
    pub error: Option<String>,
    pub generation_time: Duration,
    pub cost: f64,
    pub attempts: usize,
    pub retry_delays: Vec<Duration>,
    /// Raw model text, kept for tag-mode debugging.
    pub raw_response: Option<String>,
}

impl Default for EnrichmentResult {
    fn default() -> Self {
        Self {
            text: None,
            tags: Vec::new(),
            tag_categories: BTreeMap::new(),
            confidence: 0.0,
            status: EnrichStatus::Pending,
            error: None,
            generation_time: Duration::ZERO,
            cost: 0.0,
            attempts: 0,
            retry_delays: Vec::new(),
            raw_response: None,
        }
    }
}

impl EnrichmentResult {
    pub fn is_completed(&self) -> bool {
        self.status == EnrichStatus::Completed
    }

    fn fail(&mut self, message: impl Into<String>) {
        self.status = EnrichStatus::Error;
        self.error = Some(message.into());
    }
}

/// Per-image cost projection, shown before a batch commits.
pub fn estimate_batch_cost(num_images: usize) -> f64 {
    COST_PER_IMAGE * num_images as f64
}

pub struct EnrichmentClient {
    transport: Arc<dyn VisionTransport>,
    model: String,
    limiter: SlidingWindow,
    policy: RetryPolicy,
    semaphore: Semaphore,
    usage: UsageStats,
    categories: Vec<TagCategory>,
}

impl EnrichmentClient {
    pub fn new(transport: Arc<dyn VisionTransport>, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
            limiter: SlidingWindow::new(DEFAULT_REQUESTS_PER_MINUTE),
            policy: RetryPolicy::default(),
            semaphore: Semaphore::new(DEFAULT_MAX_CONCURRENT),
            usage: UsageStats::new(),
            categories: crate::tags::default_categories(),
        }
    }

    pub fn with_categories(mut self, categories: Vec<TagCategory>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_limits(mut self, requests_per_minute: usize, max_concurrent: usize) -> Self {
        self.limiter = SlidingWindow::new(requests_per_minute.max(1));
        self.semaphore = Semaphore::new(max_concurrent.max(1));
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn categories(&self) -> &[TagCategory] {
        &self.categories
    }

    pub fn usage_snapshot(&self) -> UsageSnapshot {
        self.usage.snapshot()
    }

    pub async fn requests_in_window(&self) -> usize {
        self.limiter.requests_in_window().await
    }

    /// Generate an editorial description for one image.
    pub async fn generate_description(
        &self,
        path: &Path,
        context: Option<&str>,
    ) -> EnrichmentResult {
        let start = Instant::now();
        let mut result = EnrichmentResult::default();

        let image_base64 = match prepare_image(path, DESCRIBE_MAX_DIMENSION).await {
            Ok(data) => data,
            Err(err) => {
                result.fail(format!("failed to encode image: {err:#}"));
                result.generation_time = start.elapsed();
                return result;
            }
        };

        let mut prompt = "Please write an alt text description for this image.".to_string();
        if let Some(ctx) = context {
            prompt.push_str(&format!(" Context: {ctx}"));
        }
        let request = VisionRequest {
            model: self.model.clone(),
            max_tokens: DESCRIBE_MAX_TOKENS,
            temperature: DESCRIBE_TEMPERATURE,
            system: DESCRIBE_SYSTEM_PROMPT.to_string(),
            image_base64,
            media_type: "image/jpeg",
            prompt,
        };

        if let Some(text) = self.exchange(&request, &mut result).await {
            result.text = Some(text.trim().to_string());
            result.status = EnrichStatus::Completed;
        }
        result.generation_time = start.elapsed();
        result
    }

    /// Assign categorized tags to one image. Requires at least one configured
    /// category.
    pub async fn generate_tags(&self, path: &Path, context: Option<&str>) -> EnrichmentResult {
        let start = Instant::now();
        let mut result = EnrichmentResult::default();

        if self.categories.is_empty() {
            result.fail("no tag categories configured");
            result.generation_time = start.elapsed();
            return result;
        }

        let image_base64 = match prepare_image(path, TAG_MAX_DIMENSION).await {
            Ok(data) => data,
            Err(err) => {
                result.fail(format!("failed to encode image: {err:#}"));
                result.generation_time = start.elapsed();
                return result;
            }
        };

        let request = VisionRequest {
            model: self.model.clone(),
            max_tokens: TAG_MAX_TOKENS,
            temperature: TAG_TEMPERATURE,
            system: TAG_SYSTEM_PROMPT.to_string(),
            image_base64,
            media_type: "image/jpeg",
            prompt: self.build_tag_prompt(context),
        };

        if let Some(text) = self.exchange(&request, &mut result).await {
            self.parse_tag_response(&text, &mut result);
        }
        result.generation_time = start.elapsed();
        result
    }

    fn build_tag_prompt(&self, context: Option<&str>) -> String {
        let mut parts =
            vec!["Analyze this image and assign appropriate tags from these categories:\n".to_string()];
        for category in &self.categories {
            parts.push(format!(
                "- {}: [{}]",
                category.name,
                category.predefined_tags.join(", ")
            ));
        }
        parts.push("\nOnly assign tags that clearly apply to the image content.".to_string());
        if let Some(ctx) = context {
            parts.push(format!("\nContext: {ctx}"));
        }
        parts.push("\nReturn the response as JSON following the specified format.".to_string());
        parts.join("\n")
    }

    /// One full request exchange under the concurrency gate: the retry loop
    /// runs inside a single semaphore permit so retries do not release and
    /// re-contend the slot.
    async fn exchange(
        &self,
        request: &VisionRequest,
        result: &mut EnrichmentResult,
    ) -> Option<String> {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                result.fail("client shut down");
                return None;
            }
        };

        let mut attempt = 0;
        loop {
            self.limiter.admit().await;
            result.attempts = attempt + 1;

            match self.transport.send(request).await {
                Ok(text) => {
                    self.usage.record(COST_PER_IMAGE);
                    result.cost = COST_PER_IMAGE;
                    return Some(text);
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "Vision request failed");
                    match self.policy.decide(&err, attempt) {
                        RetryDecision::RetryAfter(delay) => {
                            result.retry_delays.push(delay);
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        RetryDecision::Stop => {
                            result.status = match err {
                                VisionError::RateLimited { .. } => EnrichStatus::RateLimited,
                                _ => EnrichStatus::Error,
                            };
                            result.error = Some(err.to_string());
                            return None;
                        }
                    }
                }
            }
        }
    }

    /// Parse the tag-mode response: the JSON object may be wrapped in prose,
    /// so everything outside the first `{` and the last `}` is discarded.
    fn parse_tag_response(&self, text: &str, result: &mut EnrichmentResult) {
        result.raw_response = Some(text.to_string());

        let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
            result.fail("no JSON object in response");
            return;
        };
        let value: serde_json::Value = match serde_json::from_str(&text[start..=end]) {
            Ok(v) => v,
            Err(err) => {
                result.fail(format!("invalid JSON in response: {err}"));
                return;
            }
        };

        result.confidence = value
            .get("confidence")
            .and_then(serde_json::Value::as_f64)
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(0.5);

        let Some(tag_map) = value.get("tags").and_then(serde_json::Value::as_object) else {
            result.fail("response has no tags object");
            return;
        };

        for (category_name, raw_tags) in tag_map {
            // Unknown categories are dropped without complaint.
            let Some(category) = self
                .categories
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(category_name))
            else {
                continue;
            };
            let Some(raw_tags) = raw_tags.as_array() else {
                continue;
            };
            let mut valid = Vec::new();
            for raw in raw_tags {
                let Some(tag) = raw.as_str() else { continue };
                let tag = tag.trim().to_lowercase();
                if !tag.is_empty() && category.allows(&tag) && !result.tags.contains(&tag) {
                    result.tags.push(tag.clone());
                    valid.push(tag);
                }
            }
            if !valid.is_empty() {
                result.tag_categories.insert(category.name.clone(), valid);
            }
        }

        if result.tags.is_empty() {
            result.fail("no valid tags found");
        } else {
            result.status = EnrichStatus::Completed;
            tracing::debug!(
                tags = result.tags.len(),
                confidence = result.confidence,
                "Tags parsed"
            );
        }
    }
}

/// Decode, flatten to RGB, downscale the longest side and re-encode as a
/// base64 JPEG suitable for the API.
async fn prepare_image(path: &Path, max_dimension: u32) -> anyhow::Result<String> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || encode_image(&path, max_dimension))
        .await
        .map_err(|err| anyhow::anyhow!("image preparation task failed: {err}"))?
}

fn encode_image(path: &Path, max_dimension: u32) -> anyhow::Result<String> {
    use anyhow::Context;

    let img = image::open(path)
        .with_context(|| format!("failed to decode {}", path.display()))?;
    let img = if img.width().max(img.height()) > max_dimension {
        img.resize(max_dimension, max_dimension, FilterType::Lanczos3)
    } else {
        img
    };
    let rgb = img.to_rgb8();

    let mut buf = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buf);
    let mut encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, PREPARED_JPEG_QUALITY);
    encoder
        .encode_image(&rgb)
        .with_context(|| format!("failed to re-encode {}", path.display()))?;

    Ok(base64::engine::general_purpose::STANDARD.encode(&buf))
}
