//! Keyword-pattern extraction: fixed trigger-keyword tables per predefined
//! tag, compiled once into case-insensitive whole-word regexes.

use super::Extraction;
use regex::{Regex, RegexBuilder};

const DEFAULT_MAX_TAGS_PER_CATEGORY: usize = 3;
const FALLBACK_CONFIDENCE: f64 = 0.3;

struct TagPattern {
    tag: &'static str,
    pattern: Regex,
}

struct CategoryPatterns {
    category: &'static str,
    tags: Vec<TagPattern>,
}

pub struct KeywordExtractor {
    categories: Vec<CategoryPatterns>,
    max_tags_per_category: usize,
}

/// (tag, trigger keywords) tables for each category.
fn keyword_tables() -> Vec<(&'static str, Vec<(&'static str, Vec<&'static str>)>)> {
    vec![
        (
            "Content",
            vec![
                ("person", vec![
                    "person", "people", "individual", "man", "woman", "child", "children",
                    "adult", "teenager", "elderly", "senior", "boy", "girl", "human",
                    "portrait", "face", "facial", "headshot", "figure", "silhouette",
                ]),
                ("building", vec![
                    "building", "architecture", "structure", "house", "home", "office",
                    "skyscraper", "tower", "bridge", "construction", "facade", "exterior",
                    "interior", "room", "venue", "establishment", "facility",
                ]),
                ("landscape", vec![
                    "landscape", "scenery", "nature", "outdoors", "outdoor", "mountains",
                    "hills", "trees", "forest", "park", "garden", "field", "countryside",
                    "natural", "environment", "scenic", "vista", "horizon", "sky",
                    "lake", "river", "sunset", "sunrise",
                ]),
                ("food", vec![
                    "food", "meal", "dish", "cuisine", "restaurant", "kitchen", "cooking",
                    "dining", "plate", "bowl", "drink", "beverage", "coffee", "tea",
                    "culinary", "chef", "ingredient", "recipe",
                ]),
                ("technology", vec![
                    "technology", "tech", "computer", "device", "digital", "electronic",
                    "smartphone", "laptop", "tablet", "screen", "monitor", "keyboard",
                    "software", "app", "interface", "high-tech",
                ]),
                ("object", vec![
                    "object", "item", "product", "tool", "equipment", "accessory",
                    "furniture", "decoration", "artwork", "sculpture", "craft",
                    "handmade", "antique", "collectible", "barn", "shed", "vehicle",
                ]),
            ],
        ),
        (
            "Style",
            vec![
                ("portrait", vec![
                    "portrait", "headshot", "tight shot", "intimate", "detailed view",
                ]),
                ("wide-shot", vec![
                    "wide shot", "wide-shot", "full body", "establishing", "panoramic",
                    "expansive", "broad view", "overview",
                ]),
                ("close-up", vec![
                    "close-up", "closeup", "macro", "magnified", "intimate detail", "zoom",
                ]),
                ("black-white", vec![
                    "black and white", "black-and-white", "monochrome", "grayscale", "noir",
                ]),
                ("color", vec![
                    "colorful", "vibrant", "vivid", "saturated", "multicolored", "chromatic",
                ]),
                ("vintage", vec![
                    "vintage", "retro", "old-fashioned", "nostalgic", "period", "timeless",
                ]),
                ("modern", vec![
                    "modern", "contemporary", "sleek", "minimalist", "stylish", "sophisticated",
                ]),
            ],
        ),
        (
            "Usage",
            vec![
                ("hero-image", vec![
                    "banner", "header", "main image", "featured", "prominent", "showcase",
                ]),
                ("thumbnail", vec![
                    "thumbnail", "preview", "icon", "miniature", "condensed",
                ]),
                ("gallery", vec![
                    "gallery", "collection", "series", "portfolio", "exhibition",
                ]),
                ("article", vec![
                    "article", "story", "editorial", "journalism", "magazine", "newspaper", "blog",
                ]),
                ("social-media", vec![
                    "social media", "social-media", "instagram", "facebook", "viral", "post", "feed",
                ]),
                ("print", vec![
                    "print", "printing", "brochure", "flyer", "poster", "advertisement",
                ]),
            ],
        ),
        (
            "Editorial",
            vec![
                ("news", vec![
                    "news", "breaking", "current events", "reporter", "press", "bulletin",
                ]),
                ("feature", vec![
                    "feature", "in-depth", "profile", "spotlight", "special report",
                ]),
                ("opinion", vec![
                    "opinion", "commentary", "perspective", "viewpoint", "critique",
                ]),
                ("review", vec![
                    "review", "rating", "evaluation", "assessment", "recommendation",
                ]),
                ("interview", vec![
                    "interview", "conversation", "dialogue", "q&a", "discussion",
                ]),
                ("analysis", vec![
                    "analysis", "analytical", "study", "investigation", "deep dive", "breakdown",
                ]),
            ],
        ),
    ]
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TAGS_PER_CATEGORY)
    }
}

impl KeywordExtractor {
    pub fn new(max_tags_per_category: usize) -> Self {
        let categories = keyword_tables()
            .into_iter()
            .map(|(category, tags)| CategoryPatterns {
                category,
                tags: tags
                    .into_iter()
                    .map(|(tag, keywords)| TagPattern {
                        tag,
                        pattern: compile_keywords(&keywords),
                    })
                    .collect(),
            })
            .collect();
        Self {
            categories,
            max_tags_per_category,
        }
    }

    pub fn extract(&self, text: &str) -> Extraction {
        let text = text.trim();
        if text.is_empty() {
            return Extraction::empty();
        }

        let mut out = Extraction {
            method: "keyword_matching",
            ..Default::default()
        };
        let mut total_matches = 0usize;

        for category in &self.categories {
            let mut category_tags = Vec::new();
            for tp in &category.tags {
                let matches = tp.pattern.find_iter(text).count();
                if matches > 0 {
                    category_tags.push(tp.tag.to_string());
                    total_matches += matches;
                    if category_tags.len() >= self.max_tags_per_category {
                        break;
                    }
                }
            }
            if !category_tags.is_empty() {
                out.tags.extend(category_tags.iter().cloned());
                out.by_category
                    .insert(category.category.to_string(), category_tags);
            }
        }

        out.confidence = confidence(text, total_matches, out.tags.len());

        if out.tags.len() < 2 {
            let fallback = coarse_fallback(text);
            if !fallback.tags.is_empty() {
                return fallback;
            }
        }
        out
    }
}

fn compile_keywords(keywords: &[&str]) -> Regex {
    let alternation = keywords
        .iter()
        .map(|kw| regex::escape(kw))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&format!(r"\b(?:{alternation})\b"))
        .case_insensitive(true)
        .build()
        .expect("keyword tables compile")
}

/// Weighted blend: tag count (saturating near 5), keyword density per 100
/// characters (saturating near 2%), and text length (saturating near 200).
fn confidence(text: &str, total_matches: usize, tag_count: usize) -> f64 {
    if tag_count == 0 {
        return 0.0;
    }
    let tag_score = (tag_count as f64 / 5.0).min(1.0);
    let density = (total_matches as f64 / text.len().max(1) as f64) * 100.0;
    let density_score = (density / 2.0).min(1.0);
    let length_score = (text.len() as f64 / 200.0).min(1.0);
    (tag_score * 0.5 + density_score * 0.3 + length_score * 0.2).min(1.0)
}

/// Simple substring tier used when pattern matching finds too little.
fn coarse_fallback(text: &str) -> Extraction {
    let lower = text.to_lowercase();
    let mut tags = Vec::new();

    if ["person", "people"].iter().any(|w| lower.contains(w)) {
        tags.push("person".to_string());
    }
    if ["building", "house"].iter().any(|w| lower.contains(w)) {
        tags.push("building".to_string());
    }
    if ["landscape", "nature"].iter().any(|w| lower.contains(w)) {
        tags.push("landscape".to_string());
    }
    if tags.is_empty() {
        tags.push("object".to_string());
    }

    let mut out = Extraction {
        confidence: FALLBACK_CONFIDENCE,
        method: "fallback_heuristics",
        ..Default::default()
    };
    out.by_category.insert("Content".to_string(), tags.clone());
    out.tags = tags;
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_result() {
        let ex = KeywordExtractor::default();
        let out = ex.extract("");
        assert!(out.tags.is_empty());
        assert_eq!(out.confidence, 0.0);
        assert_eq!(out.method, "empty_input");

        let out = ex.extract("   \n  ");
        assert_eq!(out.method, "empty_input");
    }

    #[test]
    fn barn_and_lake_description_matches_landscape_terms() {
        let ex = KeywordExtractor::default();
        let out = ex.extract("A red barn beside a quiet lake at sunset");
        assert!(!out.tags.is_empty());
        assert!(out.confidence > 0.0);
        // "barn" triggers object, "lake"/"sunset" trigger landscape.
        assert!(out.tags.iter().any(|t| t == "object" || t == "landscape"));
    }

    #[test]
    fn rich_editorial_text_hits_multiple_categories() {
        let ex = KeywordExtractor::default();
        let out = ex.extract(
            "A woman in a modern office reviews a magazine article on her laptop, \
             photographed as a vibrant close-up for the feature story.",
        );
        assert!(out.by_category.contains_key("Content"));
        assert!(out.by_category.contains_key("Style"));
        assert!(out.by_category.contains_key("Usage"));
        assert!(out.confidence > 0.3);
        assert_eq!(out.method, "keyword_matching");
    }

    #[test]
    fn per_category_cap_respected() {
        let ex = KeywordExtractor::new(1);
        // Triggers two Content tags (person, building) and two Style tags
        // (portrait, vintage); the cap keeps one of each.
        let out = ex.extract("A vintage portrait of a person standing before a building.");
        assert_eq!(out.method, "keyword_matching");
        assert_eq!(out.by_category.get("Content").map(Vec::len), Some(1));
        assert_eq!(out.by_category.get("Style").map(Vec::len), Some(1));
    }

    #[test]
    fn sparse_text_falls_back_to_coarse_tier() {
        let ex = KeywordExtractor::default();
        let out = ex.extract("Something unremarkable without trigger words");
        assert_eq!(out.method, "fallback_heuristics");
        assert_eq!(out.tags, vec!["object".to_string()]);
        assert!((out.confidence - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn whole_word_matching_avoids_substrings() {
        let ex = KeywordExtractor::default();
        // "mankind" must not trigger the "man" keyword, and the coarse tier
        // must not treat it as a person either.
        let out = ex.extract("mankind chartreuse xylophone");
        assert!(!out.tags.contains(&"person".to_string()));
        assert_eq!(out.tags, vec!["object".to_string()]);
    }

    #[test]
    fn coarse_tier_limits_itself_to_its_own_terms() {
        let ex = KeywordExtractor::default();
        // "scenery" is a pattern-tier keyword only; without a whole-word
        // match elsewhere the coarse tier must not resurrect it.
        let out = ex.extract("outdoorsy vibes");
        assert_eq!(out.method, "fallback_heuristics");
        assert_eq!(out.tags, vec!["object".to_string()]);
    }
}
