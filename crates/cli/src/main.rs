use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pixprep_core::client::{estimate_batch_cost, EnrichmentClient};
use pixprep_core::config;
use pixprep_core::coordinator::{BatchCoordinator, ProcessConfig};
use pixprep_core::extract::{FallbackMethod, KeywordExtractor, SemanticExtractor};
use pixprep_core::tags;
use providers::{AnthropicConfig, AnthropicVision};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Process {
            inputs,
            output,
            profile,
            recursive,
            describe,
            tags,
            context,
            categories,
            fallback,
            json,
        } => {
            run_process(
                cfg, inputs, output, profile, recursive, describe, tags, context, categories,
                fallback, json,
            )
            .await
        }
        Commands::Extract { text, method, json } => run_extract(&text, method, json),
        Commands::ValidateKey { model } => run_validate_key(cfg, model).await,
    }
}

#[derive(Parser)]
#[command(name = "pixprep")]
#[command(about = "Batch image processing with AI metadata enrichment", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Method {
    Keyword,
    Semantic,
}

impl From<Method> for FallbackMethod {
    fn from(m: Method) -> Self {
        match m {
            Method::Keyword => FallbackMethod::Keyword,
            Method::Semantic => FallbackMethod::Semantic,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Transform images to an output profile, optionally enriching them
    Process {
        /// Image files or folders to process
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
        /// Output profile (editorial_web|email|social|archive)
        #[arg(long, default_value = "editorial_web")]
        profile: String,
        /// Recurse into subfolders
        #[arg(long, default_value_t = false)]
        recursive: bool,
        /// Generate an editorial description per image
        #[arg(long, default_value_t = false)]
        describe: bool,
        /// Generate categorized tags per image
        #[arg(long, default_value_t = false)]
        tags: bool,
        /// Optional context passed to the vision model
        #[arg(long)]
        context: Option<String>,
        /// Tag category definitions (TOML)
        #[arg(long)]
        categories: Option<PathBuf>,
        /// Local extractor used when the API result is unusable
        #[arg(long, value_enum, default_value_t = Method::Keyword)]
        fallback: Method,
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Run the local tag extractors on a description text
    Extract {
        /// Description text to extract tags from
        text: String,
        /// Extraction method
        #[arg(long, value_enum, default_value_t = Method::Keyword)]
        method: Method,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Probe the configured API credential
    ValidateKey {
        /// Model to probe with (defaults to the configured model)
        #[arg(long)]
        model: Option<String>,
    },
}

#[allow(clippy::too_many_arguments)]
async fn run_process(
    cfg: config::AppConfig,
    inputs: Vec<PathBuf>,
    output: PathBuf,
    profile: String,
    recursive: bool,
    describe: bool,
    want_tags: bool,
    context: Option<String>,
    categories_path: Option<PathBuf>,
    fallback: Method,
    json: bool,
) -> Result<()> {
    let mut coordinator = BatchCoordinator::new();
    coordinator
        .queue_mut()
        .set_excludes(&cfg.output.exclude)
        .context("invalid exclude pattern in config")?;

    for input in &inputs {
        if input.is_dir() {
            coordinator.queue_mut().add_folder(input, recursive);
        } else {
            coordinator.queue_mut().add_image(input);
        }
    }
    let queued = coordinator.queue().len();
    if queued == 0 {
        anyhow::bail!("no compatible images found in the given inputs");
    }

    if describe || want_tags {
        let api_key = cfg
            .resolve_api_key()
            .context("no API key: set ANTHROPIC_API_KEY or api.api_key in the config")?;
        let transport = AnthropicVision::new(AnthropicConfig {
            api_key,
            base_url: cfg.api.base_url.clone(),
        })
        .map_err(|e| anyhow::anyhow!("failed to build API client: {e}"))?;

        let categories = match categories_path
            .as_deref()
            .or(cfg.enrichment.categories_path.as_deref().map(std::path::Path::new))
        {
            Some(path) => tags::load_categories(path)
                .with_context(|| format!("failed to load categories from {}", path.display()))?,
            None => tags::default_categories(),
        };

        let client = EnrichmentClient::new(Arc::new(transport), cfg.api.model.clone())
            .with_categories(categories)
            .with_limits(cfg.api.requests_per_minute, cfg.api.max_concurrent);
        coordinator = coordinator.with_client(Arc::new(client));

        let modes = usize::from(describe) + usize::from(want_tags);
        if !json {
            eprintln!(
                "Estimated enrichment cost: ${:.3}",
                estimate_batch_cost(queued * modes)
            );
        }
    }

    if !json {
        coordinator.on_progress(|progress| {
            eprintln!(
                "[{}/{}] {} (failed {}, skipped {})",
                progress.completed + progress.failed + progress.skipped,
                progress.total,
                progress.current_name,
                progress.failed,
                progress.skipped,
            );
        });
    }

    let process_config = ProcessConfig {
        output_dir: output,
        profile,
        describe,
        tags: want_tags,
        context: context.or(cfg.enrichment.context.clone()),
        fallback: fallback.into(),
        confidence_threshold: cfg.enrichment.confidence_threshold,
    };
    let result = coordinator.process_batch(&process_config).await?;

    if json {
        let items: Vec<serde_json::Value> = coordinator
            .queue()
            .items()
            .iter()
            .map(|item| {
                serde_json::json!({
                    "name": item.file_name(),
                    "status": item.status,
                    "output": item.output_path,
                    "error": item.error,
                    "description": item.description,
                    "tags": item.tags,
                    "tag_categories": item.tag_categories,
                    "cost": item.api_cost,
                })
            })
            .collect();
        let summary = serde_json::json!({
            "completed": result.completed,
            "failed": result.failed,
            "skipped": result.skipped,
            "cancelled": result.cancelled,
            "total_seconds": result.total_time.as_secs_f64(),
            "descriptions_generated": result.descriptions_generated,
            "descriptions_failed": result.descriptions_failed,
            "tags_applied": result.tags_applied,
            "tags_failed": result.tags_failed,
            "total_cost": result.total_cost,
            "items": items,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "processed {} images in {:.1}s: {} ok, {} failed, {} skipped",
            queued,
            result.total_time.as_secs_f64(),
            result.completed,
            result.failed,
            result.skipped,
        );
        if describe || want_tags {
            println!(
                "enrichment: {} descriptions, {} tag sets, ${:.3} spent",
                result.descriptions_generated, result.tags_applied, result.total_cost
            );
        }
        for item in coordinator.queue().items() {
            if let Some(error) = &item.error {
                println!("  {}: {error}", item.file_name());
            }
        }
    }
    Ok(())
}

fn run_extract(text: &str, method: Method, json: bool) -> Result<()> {
    let extraction = match method {
        Method::Keyword => KeywordExtractor::default().extract(text),
        Method::Semantic => SemanticExtractor::default().extract(text),
    };
    if json {
        let out = serde_json::json!({
            "tags": extraction.tags,
            "by_category": extraction.by_category,
            "confidence": extraction.confidence,
            "method": extraction.method,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("method: {}", extraction.method);
        println!("confidence: {:.2}", extraction.confidence);
        if extraction.by_category.is_empty() {
            println!("tags: {}", extraction.tags.join(", "));
        } else {
            for (category, tags) in &extraction.by_category {
                println!("{category}: {}", tags.join(", "));
            }
        }
    }
    Ok(())
}

async fn run_validate_key(cfg: config::AppConfig, model: Option<String>) -> Result<()> {
    let api_key = cfg
        .resolve_api_key()
        .context("no API key: set ANTHROPIC_API_KEY or api.api_key in the config")?;
    let transport = AnthropicVision::new(AnthropicConfig {
        api_key,
        base_url: cfg.api.base_url.clone(),
    })
    .map_err(|e| anyhow::anyhow!("failed to build API client: {e}"))?;

    let model = model.unwrap_or_else(|| cfg.api.model.clone());
    transport
        .validate_key(&model)
        .await
        .map_err(|e| anyhow::anyhow!("API key validation failed: {e}"))?;
    println!("API key is valid");
    Ok(())
}
