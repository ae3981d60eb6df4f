//! Local heuristic tag extraction from description text.
//!
//! Both extractors run without network access and at near-zero cost; the
//! coordinator uses them when the vision API is disabled, unavailable, or
//! returns a low-confidence result.

use std::collections::BTreeMap;

pub mod keyword;
pub mod semantic;

pub use keyword::KeywordExtractor;
pub use semantic::SemanticExtractor;

/// Which heuristic the coordinator should fall back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMethod {
    Keyword,
    Semantic,
}

impl Default for FallbackMethod {
    fn default() -> Self {
        FallbackMethod::Keyword
    }
}

/// Tags derived from a description string, with a confidence estimate.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub tags: Vec<String>,
    pub by_category: BTreeMap<String, Vec<String>>,
    /// Normalized [0,1] quality estimate.
    pub confidence: f64,
    /// "keyword_matching", "semantic_analysis", "fallback_heuristics",
    /// or "empty_input".
    pub method: &'static str,
}

impl Extraction {
    pub fn empty() -> Self {
        Self {
            method: "empty_input",
            ..Default::default()
        }
    }
}
