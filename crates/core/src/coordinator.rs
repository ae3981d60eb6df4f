//! Batch coordinator: sequential image transforms followed by a concurrent,
//! rate-limited enrichment fan-out over the saved outputs.

use crate::client::EnrichmentClient;
use crate::extract::{Extraction, FallbackMethod, KeywordExtractor, SemanticExtractor};
use crate::processor::{self, OutputProfile};
use crate::queue::{EnrichStatus, ItemStatus, WorkItem, WorkQueue};
use anyhow::Context;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

type ProgressCallback = Box<dyn Fn(&BatchProgress) + Send + Sync>;
type ItemCallback = Box<dyn Fn(&WorkItem) + Send + Sync>;

/// Settings for one batch run.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub output_dir: PathBuf,
    pub profile: String,
    pub describe: bool,
    pub tags: bool,
    pub context: Option<String>,
    pub fallback: FallbackMethod,
    /// Tag results below this confidence are replaced by the fallback
    /// extractor's output.
    pub confidence_threshold: f64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            profile: "editorial_web".to_string(),
            describe: false,
            tags: false,
            context: None,
            fallback: FallbackMethod::default(),
            confidence_threshold: 0.7,
        }
    }
}

/// Snapshot reported to progress callbacks during the transform phase.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub current_index: usize,
    pub current_name: String,
    pub elapsed: Duration,
    pub average_item_time: Duration,
    pub estimated_remaining: Duration,
    pub cancelled: bool,
}

/// Final accounting for a batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_time: Duration,
    pub average_item_time: Duration,
    pub descriptions_generated: usize,
    pub descriptions_failed: usize,
    pub tags_applied: usize,
    pub tags_failed: usize,
    pub total_cost: f64,
    pub cancelled: bool,
}

/// Cooperative cancellation flag, checked at loop tops only; in-flight work
/// always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum FallbackExtractor {
    Keyword(KeywordExtractor),
    Semantic(SemanticExtractor),
}

impl FallbackExtractor {
    fn build(method: FallbackMethod) -> Self {
        match method {
            FallbackMethod::Keyword => Self::Keyword(KeywordExtractor::default()),
            FallbackMethod::Semantic => Self::Semantic(SemanticExtractor::default()),
        }
    }

    fn extract(&self, text: &str) -> Extraction {
        match self {
            Self::Keyword(e) => e.extract(text),
            Self::Semantic(e) => e.extract(text),
        }
    }
}

struct EnrichOutcome {
    index: usize,
    description: Option<crate::client::EnrichmentResult>,
    tags: Option<TagOutcome>,
    cost: f64,
    elapsed: Duration,
}

struct TagOutcome {
    status: EnrichStatus,
    tags: Vec<String>,
    by_category: std::collections::BTreeMap<String, Vec<String>>,
    error: Option<String>,
}

pub struct BatchCoordinator {
    queue: WorkQueue,
    client: Option<Arc<EnrichmentClient>>,
    cancel: CancelHandle,
    progress_callbacks: Vec<ProgressCallback>,
    item_callbacks: Vec<ItemCallback>,
}

impl Default for BatchCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchCoordinator {
    pub fn new() -> Self {
        Self {
            queue: WorkQueue::new(),
            client: None,
            cancel: CancelHandle::default(),
            progress_callbacks: Vec::new(),
            item_callbacks: Vec::new(),
        }
    }

    pub fn with_client(mut self, client: Arc<EnrichmentClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut WorkQueue {
        &mut self.queue
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn on_progress(&mut self, callback: impl Fn(&BatchProgress) + Send + Sync + 'static) {
        self.progress_callbacks.push(Box::new(callback));
    }

    pub fn on_item_complete(&mut self, callback: impl Fn(&WorkItem) + Send + Sync + 'static) {
        self.item_callbacks.push(Box::new(callback));
    }

    /// Run the whole batch. Batch-level problems (empty queue, unknown
    /// profile, unusable output directory, enrichment without a client) fail
    /// here before any item is touched; per-item failures never abort the run.
    pub async fn process_batch(&mut self, config: &ProcessConfig) -> anyhow::Result<BatchResult> {
        if self.queue.is_empty() {
            anyhow::bail!("queue is empty");
        }
        let profile = OutputProfile::by_name(&config.profile)
            .with_context(|| format!("unknown output profile '{}'", config.profile))?;
        std::fs::create_dir_all(&config.output_dir).with_context(|| {
            format!("cannot create output dir {}", config.output_dir.display())
        })?;
        if (config.describe || config.tags) && self.client.is_none() {
            anyhow::bail!("enrichment requested but no API client configured");
        }

        let start = Instant::now();
        self.queue.set_locked(true);
        let result = self.run_phases(config, &profile, start).await;
        self.queue.set_locked(false);
        result
    }

    async fn run_phases(
        &mut self,
        config: &ProcessConfig,
        profile: &OutputProfile,
        start: Instant,
    ) -> anyhow::Result<BatchResult> {
        let total = self.queue.len();
        let mut item_times: Vec<Duration> = Vec::new();

        // Phase 1: sequential transforms.
        for index in 0..total {
            if self.cancel.is_cancelled() {
                let item = &mut self.queue.items_mut()[index];
                if item.status == ItemStatus::Pending {
                    item.status = ItemStatus::Skipped;
                }
                let item = &self.queue.items()[index];
                for cb in &self.item_callbacks {
                    cb(item);
                }
                continue;
            }

            let (source, dest) = {
                let item = &mut self.queue.items_mut()[index];
                item.status = ItemStatus::Processing;
                let dest = profile.output_path(&item.source_path, &config.output_dir);
                item.output_path = Some(dest.clone());
                (item.source_path.clone(), dest)
            };

            let item_start = Instant::now();
            let profile_for_task = profile.clone();
            let transform = tokio::task::spawn_blocking(move || {
                processor::transform_and_save(&source, &dest, &profile_for_task)
            })
            .await;

            let item = &mut self.queue.items_mut()[index];
            item.processing_time = item_start.elapsed();
            match transform {
                Ok(Ok(bytes)) => {
                    item.status = ItemStatus::Completed;
                    tracing::info!(name = %item.file_name(), bytes, "Transform complete");
                }
                Ok(Err(err)) => {
                    item.status = ItemStatus::Failed;
                    item.error = Some(format!("{err:#}"));
                    tracing::warn!(name = %item.file_name(), error = %err, "Transform failed");
                }
                Err(err) => {
                    item.status = ItemStatus::Failed;
                    item.error = Some(format!("transform task failed: {err}"));
                }
            }
            item_times.push(item.processing_time);

            let progress = self.snapshot_progress(index, start, &item_times);
            for cb in &self.progress_callbacks {
                cb(&progress);
            }
            // Enrichment reports Completed items later; everything else is
            // final now.
            let item = &self.queue.items()[index];
            if (!config.describe && !config.tags) || item.status != ItemStatus::Completed {
                for cb in &self.item_callbacks {
                    cb(item);
                }
            }
        }

        // Phase 2: concurrent enrichment over the saved outputs.
        if config.describe || config.tags {
            if let Some(client) = self.client.clone() {
                self.run_enrichment(config, client).await;
            }
        }

        Ok(self.summarize(start, &item_times))
    }

    async fn run_enrichment(&mut self, config: &ProcessConfig, client: Arc<EnrichmentClient>) {
        let fallback = Arc::new(FallbackExtractor::build(config.fallback));
        let mut tasks: JoinSet<EnrichOutcome> = JoinSet::new();
        let mut task_owner: HashMap<tokio::task::Id, usize> = HashMap::new();

        for index in 0..self.queue.len() {
            if self.cancel.is_cancelled() {
                break;
            }
            let item = &self.queue.items()[index];
            if item.status != ItemStatus::Completed {
                continue;
            }
            let Some(output) = item.output_path.clone() else {
                continue;
            };

            let client = client.clone();
            let fallback = fallback.clone();
            let context = config.context.clone();
            let describe = config.describe;
            let want_tags = config.tags;
            let threshold = config.confidence_threshold;
            let cancel = self.cancel.clone();

            let handle = tasks.spawn(async move {
                enrich_one(
                    index, &client, &fallback, &output, context, describe, want_tags, threshold,
                    &cancel,
                )
                .await
            });
            task_owner.insert(handle.id(), index);
        }

        // In-flight tasks always finish; completion order is arbitrary.
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, outcome)) => {
                    task_owner.remove(&id);
                    self.apply_enrichment(outcome);
                }
                Err(err) => {
                    if let Some(index) = task_owner.remove(&err.id()) {
                        let item = &mut self.queue.items_mut()[index];
                        let message = format!("enrichment task failed: {err}");
                        if config.describe {
                            item.description_status = EnrichStatus::Error;
                            item.description_error = Some(message.clone());
                        }
                        if config.tags {
                            item.tag_status = EnrichStatus::Error;
                            item.tag_error = Some(message);
                        }
                        let item = &self.queue.items()[index];
                        for cb in &self.item_callbacks {
                            cb(item);
                        }
                    }
                }
            }
        }
    }

    fn apply_enrichment(&mut self, outcome: EnrichOutcome) {
        let item = &mut self.queue.items_mut()[outcome.index];
        item.enrichment_time = outcome.elapsed;
        item.api_cost += outcome.cost;

        if let Some(desc) = outcome.description {
            item.description_status = desc.status.normalized();
            item.description = desc.text;
            item.description_error = desc.error;
        }
        if let Some(tags) = outcome.tags {
            item.tag_status = tags.status.normalized();
            item.tags = tags.tags;
            item.tag_categories = tags.by_category;
            item.tag_error = tags.error;
        }

        let item = &self.queue.items()[outcome.index];
        for cb in &self.item_callbacks {
            cb(item);
        }
    }

    fn snapshot_progress(
        &self,
        current_index: usize,
        start: Instant,
        item_times: &[Duration],
    ) -> BatchProgress {
        let stats = self.queue.stats();
        let average = average_duration(item_times);
        let remaining = stats
            .total
            .saturating_sub(stats.completed + stats.failed + stats.skipped);
        BatchProgress {
            total: stats.total,
            completed: stats.completed,
            failed: stats.failed,
            skipped: stats.skipped,
            current_index,
            current_name: self.queue.items()[current_index].file_name(),
            elapsed: start.elapsed(),
            average_item_time: average,
            estimated_remaining: average * remaining as u32,
            cancelled: self.cancel.is_cancelled(),
        }
    }

    fn summarize(&self, start: Instant, item_times: &[Duration]) -> BatchResult {
        let stats = self.queue.stats();
        let mut result = BatchResult {
            completed: stats.completed,
            failed: stats.failed,
            skipped: stats.skipped,
            total_time: start.elapsed(),
            average_item_time: average_duration(item_times),
            cancelled: self.cancel.is_cancelled(),
            ..Default::default()
        };
        for item in self.queue.items() {
            result.total_cost += item.api_cost;
            match item.description_status {
                EnrichStatus::Completed => result.descriptions_generated += 1,
                EnrichStatus::Error | EnrichStatus::RateLimited => {
                    result.descriptions_failed += 1
                }
                _ => {}
            }
            match item.tag_status {
                EnrichStatus::Completed => result.tags_applied += 1,
                EnrichStatus::Error | EnrichStatus::RateLimited => result.tags_failed += 1,
                _ => {}
            }
        }
        result
    }
}

#[allow(clippy::too_many_arguments)]
async fn enrich_one(
    index: usize,
    client: &EnrichmentClient,
    fallback: &FallbackExtractor,
    output: &std::path::Path,
    context: Option<String>,
    describe: bool,
    want_tags: bool,
    threshold: f64,
    cancel: &CancelHandle,
) -> EnrichOutcome {
    let start = Instant::now();
    let mut cost = 0.0;
    let context = context.as_deref();

    // Spawned tasks may sit behind the semaphore for a while; re-check the
    // flag before each request so cancellation stops new API calls.
    let description = if describe && !cancel.is_cancelled() {
        let result = client.generate_description(output, context).await;
        cost += result.cost;
        Some(result)
    } else {
        None
    };

    let tags = if want_tags && !cancel.is_cancelled() {
        let primary = client.generate_tags(output, context).await;
        cost += primary.cost;

        if primary.is_completed() && primary.confidence >= threshold {
            Some(TagOutcome {
                status: EnrichStatus::Completed,
                tags: primary.tags,
                by_category: primary.tag_categories,
                error: None,
            })
        } else {
            // Low confidence is a policy signal, not an error: swap in the
            // local extractor, fed by whatever description text we have.
            let text = description
                .as_ref()
                .and_then(|d| d.text.clone())
                .unwrap_or_default();
            let extraction = fallback.extract(&text);
            if extraction.tags.is_empty() {
                Some(TagOutcome {
                    status: EnrichStatus::Error,
                    tags: Vec::new(),
                    by_category: Default::default(),
                    error: primary
                        .error
                        .or(Some("fallback extraction produced no tags".to_string())),
                })
            } else {
                tracing::info!(
                    method = extraction.method,
                    confidence = extraction.confidence,
                    "Tags from local fallback"
                );
                // Normalize into the configured vocabulary where possible.
                let (tags, by_category) =
                    match crate::tags::validate_tags(&extraction.tags, client.categories()) {
                        Ok(validated) if !validated.tags.is_empty() => {
                            (validated.tags, validated.by_category)
                        }
                        _ => (extraction.tags, extraction.by_category),
                    };
                Some(TagOutcome {
                    status: EnrichStatus::Completed,
                    tags,
                    by_category,
                    error: None,
                })
            }
        }
    } else {
        None
    };

    EnrichOutcome {
        index,
        description,
        tags,
        cost,
        elapsed: start.elapsed(),
    }
}

fn average_duration(times: &[Duration]) -> Duration {
    if times.is_empty() {
        return Duration::ZERO;
    }
    times.iter().sum::<Duration>() / times.len() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::{VisionError, VisionRequest, VisionTransport};
    use std::path::Path;
    use std::sync::Mutex;

    /// Routes by request shape instead of call order, so concurrent tasks
    /// cannot race over a scripted queue.
    struct RoutingTransport {
        describe: Result<String, VisionError>,
        tag: Result<String, VisionError>,
    }

    fn clone_outcome(r: &Result<String, VisionError>) -> Result<String, VisionError> {
        match r {
            Ok(s) => Ok(s.clone()),
            Err(VisionError::Auth) => Err(VisionError::Auth),
            Err(VisionError::Server { status, message }) => Err(VisionError::Server {
                status: *status,
                message: message.clone(),
            }),
            Err(other) => Err(VisionError::Network(other.to_string())),
        }
    }

    #[async_trait::async_trait]
    impl VisionTransport for RoutingTransport {
        async fn send(&self, request: &VisionRequest) -> Result<String, VisionError> {
            if request.prompt.contains("alt text description") {
                clone_outcome(&self.describe)
            } else {
                clone_outcome(&self.tag)
            }
        }
    }

    fn write_image(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        image::RgbImage::from_pixel(320, 200, image::Rgb([90, 120, 200]))
            .save(&path)
            .unwrap();
        path
    }

    fn enrichment_client(describe: &str, tag: &str) -> Arc<EnrichmentClient> {
        let transport = Arc::new(RoutingTransport {
            describe: Ok(describe.to_string()),
            tag: Ok(tag.to_string()),
        });
        Arc::new(EnrichmentClient::new(transport, "test-model"))
    }

    #[tokio::test]
    async fn empty_queue_is_a_batch_level_error() {
        let mut coordinator = BatchCoordinator::new();
        let err = coordinator
            .process_batch(&ProcessConfig::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("queue is empty"));
    }

    #[tokio::test]
    async fn unknown_profile_rejected_before_processing() {
        let dir = tempfile::tempdir().unwrap();
        let img = write_image(dir.path(), "a.jpg");
        let mut coordinator = BatchCoordinator::new();
        coordinator.queue_mut().add_image(&img);

        let config = ProcessConfig {
            output_dir: dir.path().join("out"),
            profile: "polaroid".to_string(),
            ..Default::default()
        };
        let err = coordinator.process_batch(&config).await.unwrap_err();
        assert!(err.to_string().contains("polaroid"));
        assert_eq!(coordinator.queue().items()[0].status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn enrichment_without_client_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let img = write_image(dir.path(), "a.jpg");
        let mut coordinator = BatchCoordinator::new();
        coordinator.queue_mut().add_image(&img);

        let config = ProcessConfig {
            output_dir: dir.path().join("out"),
            describe: true,
            ..Default::default()
        };
        assert!(coordinator.process_batch(&config).await.is_err());
    }

    #[tokio::test]
    async fn transform_only_batch_completes_all_items() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_image(dir.path(), "a.jpg");
        let b = write_image(dir.path(), "b.png");
        let mut coordinator = BatchCoordinator::new();
        coordinator.queue_mut().add_image(&a);
        coordinator.queue_mut().add_image(&b);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_cb = seen.clone();
        coordinator.on_item_complete(move |item| {
            seen_in_cb.lock().unwrap().push(item.file_name());
        });

        let config = ProcessConfig {
            output_dir: dir.path().join("out"),
            ..Default::default()
        };
        let result = coordinator.process_batch(&config).await.unwrap();
        assert_eq!(result.completed, 2);
        assert_eq!(result.failed + result.skipped, 0);
        assert!(!result.cancelled);
        assert!(result.average_item_time >= Duration::ZERO);
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert!(!coordinator.queue().is_locked());

        for item in coordinator.queue().items() {
            assert_eq!(item.status, ItemStatus::Completed);
            assert!(item.output_path.as_ref().unwrap().exists());
        }
    }

    #[tokio::test]
    async fn failed_transform_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_image(dir.path(), "good.jpg");
        let bad = dir.path().join("bad.jpg");
        std::fs::write(&bad, b"not an image").unwrap();

        let mut coordinator = BatchCoordinator::new();
        coordinator.queue_mut().add_image(&bad);
        coordinator.queue_mut().add_image(&good);

        let config = ProcessConfig {
            output_dir: dir.path().join("out"),
            ..Default::default()
        };
        let result = coordinator.process_batch(&config).await.unwrap();
        assert_eq!(result.completed, 1);
        assert_eq!(result.failed, 1);
        assert!(coordinator.queue().items()[0].error.is_some());
    }

    #[tokio::test]
    async fn cancel_mid_batch_skips_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = BatchCoordinator::new();
        for i in 0..4 {
            let img = write_image(dir.path(), &format!("img{i}.jpg"));
            coordinator.queue_mut().add_image(&img);
        }

        let handle = coordinator.cancel_handle();
        coordinator.on_progress(move |progress| {
            if progress.completed >= 1 {
                handle.cancel();
            }
        });

        let config = ProcessConfig {
            output_dir: dir.path().join("out"),
            ..Default::default()
        };
        let result = coordinator.process_batch(&config).await.unwrap();
        assert!(result.cancelled);
        assert!(result.completed >= 1);
        assert!(result.skipped >= 1);
        assert_eq!(
            result.completed + result.failed + result.skipped,
            coordinator.queue().len()
        );
    }

    #[tokio::test]
    async fn enrichment_fills_descriptions_and_tags() {
        let dir = tempfile::tempdir().unwrap();
        let img = write_image(dir.path(), "a.jpg");
        let client = enrichment_client(
            "A weathered red barn beside a quiet lake.",
            r#"{"tags": {"Content": ["building", "landscape"]}, "confidence": 0.9}"#,
        );
        let mut coordinator = BatchCoordinator::new().with_client(client);
        coordinator.queue_mut().add_image(&img);

        let config = ProcessConfig {
            output_dir: dir.path().join("out"),
            describe: true,
            tags: true,
            ..Default::default()
        };
        let result = coordinator.process_batch(&config).await.unwrap();
        assert_eq!(result.descriptions_generated, 1);
        assert_eq!(result.tags_applied, 1);
        assert!(result.total_cost > 0.0);

        let item = &coordinator.queue().items()[0];
        assert_eq!(item.description_status, EnrichStatus::Completed);
        assert_eq!(
            item.description.as_deref(),
            Some("A weathered red barn beside a quiet lake.")
        );
        assert_eq!(item.tags, vec!["building", "landscape"]);
        assert!(item.api_cost > 0.0);
    }

    #[tokio::test]
    async fn low_confidence_tags_swap_in_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let img = write_image(dir.path(), "a.jpg");
        let client = enrichment_client(
            "A red barn beside a quiet lake at sunset.",
            r#"{"tags": {"Content": ["food"]}, "confidence": 0.2}"#,
        );
        let mut coordinator = BatchCoordinator::new().with_client(client);
        coordinator.queue_mut().add_image(&img);

        let config = ProcessConfig {
            output_dir: dir.path().join("out"),
            describe: true,
            tags: true,
            confidence_threshold: 0.7,
            ..Default::default()
        };
        let result = coordinator.process_batch(&config).await.unwrap();
        assert_eq!(result.tags_applied, 1);

        let item = &coordinator.queue().items()[0];
        assert_eq!(item.tag_status, EnrichStatus::Completed);
        assert!(!item.tags.contains(&"food".to_string()));
        assert!(!item.tags.is_empty());
    }

    #[tokio::test]
    async fn description_failure_does_not_abort_batch() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_image(dir.path(), "a.jpg");
        let b = write_image(dir.path(), "b.jpg");
        let transport = Arc::new(RoutingTransport {
            describe: Err(VisionError::Auth),
            tag: Ok(String::new()),
        });
        let client = Arc::new(EnrichmentClient::new(transport, "test-model"));
        let mut coordinator = BatchCoordinator::new().with_client(client);
        coordinator.queue_mut().add_image(&a);
        coordinator.queue_mut().add_image(&b);

        let config = ProcessConfig {
            output_dir: dir.path().join("out"),
            describe: true,
            ..Default::default()
        };
        let result = coordinator.process_batch(&config).await.unwrap();
        assert_eq!(result.completed, 2);
        assert_eq!(result.descriptions_failed, 2);
        for item in coordinator.queue().items() {
            assert_eq!(item.description_status, EnrichStatus::Error);
            assert!(item.description_error.is_some());
        }
    }

    #[tokio::test]
    async fn item_callbacks_cover_failed_items_during_enrichment() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_image(dir.path(), "good.jpg");
        let bad = dir.path().join("bad.jpg");
        std::fs::write(&bad, b"not an image").unwrap();

        let client = enrichment_client(
            "A barn.",
            r#"{"tags": {"Content": ["building"]}, "confidence": 0.9}"#,
        );
        let mut coordinator = BatchCoordinator::new().with_client(client);
        coordinator.queue_mut().add_image(&bad);
        coordinator.queue_mut().add_image(&good);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_cb = seen.clone();
        coordinator.on_item_complete(move |item| {
            seen_in_cb.lock().unwrap().push(item.file_name());
        });

        let config = ProcessConfig {
            output_dir: dir.path().join("out"),
            describe: true,
            tags: true,
            ..Default::default()
        };
        let result = coordinator.process_batch(&config).await.unwrap();
        assert_eq!(result.failed, 1);

        // The failed item is final after phase 1; the completed item reports
        // once its enrichment lands. Both must be seen exactly once.
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&"bad.jpg".to_string()));
        assert!(seen.contains(&"good.jpg".to_string()));
    }

    #[derive(Default)]
    struct CountingTransport {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl VisionTransport for CountingTransport {
        async fn send(&self, _request: &VisionRequest) -> Result<String, VisionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("A barn.".to_string())
        }
    }

    #[tokio::test]
    async fn cancellation_stops_pending_enrichment_requests() {
        let dir = tempfile::tempdir().unwrap();
        let img = write_image(dir.path(), "a.jpg");
        let transport = Arc::new(CountingTransport::default());
        let client = Arc::new(EnrichmentClient::new(transport.clone(), "test-model"));
        let fallback = FallbackExtractor::build(FallbackMethod::Keyword);
        let cancel = CancelHandle::default();
        cancel.cancel();

        let outcome =
            enrich_one(0, &client, &fallback, &img, None, true, true, 0.7, &cancel).await;
        assert!(outcome.description.is_none());
        assert!(outcome.tags.is_none());
        assert_eq!(outcome.cost, 0.0);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    /// Fails the first two calls with retryable server errors, then recovers.
    struct FlakyTransport {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl VisionTransport for FlakyTransport {
        async fn send(&self, _request: &VisionRequest) -> Result<String, VisionError> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(VisionError::Server {
                    status: 500,
                    message: "internal error".to_string(),
                }),
                1 => Err(VisionError::Server {
                    status: 503,
                    message: "overloaded".to_string(),
                }),
                _ => Ok("A barn beside a lake.".to_string()),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_server_errors_recover_within_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FlakyTransport {
            calls: Default::default(),
        });
        let client = Arc::new(EnrichmentClient::new(transport.clone(), "test-model"));
        let mut coordinator = BatchCoordinator::new().with_client(client);
        for i in 0..3 {
            let img = write_image(dir.path(), &format!("img{i}.jpg"));
            coordinator.queue_mut().add_image(&img);
        }

        let config = ProcessConfig {
            output_dir: dir.path().join("out"),
            describe: true,
            ..Default::default()
        };
        let result = coordinator.process_batch(&config).await.unwrap();
        assert_eq!(result.completed, 3);
        assert_eq!(result.descriptions_generated, 3);
        assert_eq!(result.descriptions_failed, 0);
        // Three successes plus the two failed attempts that were retried.
        assert_eq!(transport.calls.load(Ordering::SeqCst), 5);
    }
}
