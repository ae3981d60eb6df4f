use serde::{Deserialize, Serialize};

use crate::extract::FallbackMethod;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Falls back to the ANTHROPIC_API_KEY environment variable.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default)]
    pub describe: bool,
    #[serde(default)]
    pub tags: bool,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub categories_path: Option<String>,
    #[serde(default)]
    pub fallback: FallbackMethod,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

fn default_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_requests_per_minute() -> usize {
    50
}

fn default_max_concurrent() -> usize {
    5
}

fn default_profile() -> String {
    "editorial_web".to_string()
}

fn default_confidence_threshold() -> f64 {
    0.7
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: default_base_url(),
            requests_per_minute: default_requests_per_minute(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            exclude: Vec::new(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            describe: false,
            tags: false,
            context: None,
            categories_path: None,
            fallback: FallbackMethod::default(),
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

impl AppConfig {
    /// Credential resolution order: config file, then environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api
            .api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = load(None).unwrap();
        assert_eq!(cfg.api.requests_per_minute, 50);
        assert_eq!(cfg.api.max_concurrent, 5);
        assert_eq!(cfg.output.profile, "editorial_web");
        assert!(!cfg.enrichment.describe);
        assert_eq!(cfg.enrichment.fallback, FallbackMethod::Keyword);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixprep.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[api]\nrequests_per_minute = 10\n\n[output]\nprofile = \"email\"\n\n[enrichment]\ndescribe = true\nfallback = \"semantic\"\n"
        )
        .unwrap();

        let cfg = load(path.to_str()).unwrap();
        assert_eq!(cfg.api.requests_per_minute, 10);
        assert_eq!(cfg.output.profile, "email");
        assert!(cfg.enrichment.describe);
        assert_eq!(cfg.enrichment.fallback, FallbackMethod::Semantic);
        // untouched sections keep defaults
        assert_eq!(cfg.api.max_concurrent, 5);
    }
}
