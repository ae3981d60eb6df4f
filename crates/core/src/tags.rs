//! Tag categories and validation.
//!
//! Categories form a closed vocabulary that AI-returned tags are validated
//! against. They can be loaded from a TOML file or fall back to the built-in
//! editorial set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const MAX_TAGS_PER_IMAGE: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagCategory {
    pub name: String,
    /// Display hint only; the core never interprets it.
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub max_tags: Option<usize>,
    #[serde(default)]
    pub predefined_tags: Vec<String>,
    #[serde(default = "default_true")]
    pub allow_custom: bool,
}

fn default_color() -> String {
    "#007AFF".to_string()
}

fn default_true() -> bool {
    true
}

impl TagCategory {
    /// Case-insensitive membership in the predefined list.
    pub fn allows(&self, tag: &str) -> bool {
        self.predefined_tags
            .iter()
            .any(|t| t.eq_ignore_ascii_case(tag))
    }
}

#[derive(Debug, Deserialize)]
struct CategoryFile {
    #[serde(default)]
    categories: Vec<TagCategory>,
}

/// Load categories from a TOML file with a `[[categories]]` table array.
pub fn load_categories(path: &Path) -> anyhow::Result<Vec<TagCategory>> {
    let content = fs::read_to_string(path)?;
    let parsed: CategoryFile = toml::from_str(&content)?;
    Ok(parsed.categories)
}

/// The built-in editorial vocabulary.
pub fn default_categories() -> Vec<TagCategory> {
    let mk = |name: &str, color: &str, description: &str, tags: &[&str]| TagCategory {
        name: name.to_string(),
        color: color.to_string(),
        description: description.to_string(),
        required: false,
        max_tags: None,
        predefined_tags: tags.iter().map(|t| t.to_string()).collect(),
        allow_custom: true,
    };
    vec![
        mk(
            "Content",
            "#28a745",
            "Describes what is in the image",
            &["person", "people", "building", "landscape", "object", "food", "technology"],
        ),
        mk(
            "Style",
            "#ffc107",
            "Visual style and composition",
            &["portrait", "wide-shot", "close-up", "black-white", "color", "vintage", "modern"],
        ),
        mk(
            "Usage",
            "#17a2b8",
            "Intended use or context",
            &["hero-image", "thumbnail", "gallery", "article", "social-media", "print"],
        ),
        mk(
            "Editorial",
            "#dc3545",
            "Editorial context and classification",
            &["news", "feature", "opinion", "review", "interview", "breaking", "analysis"],
        ),
    ]
}

/// Outcome of validating a tag list against the configured categories.
#[derive(Debug, Clone, Default)]
pub struct ValidatedTags {
    /// Ordered, deduplicated, lowercase.
    pub tags: Vec<String>,
    pub by_category: BTreeMap<String, Vec<String>>,
    pub rejected: Vec<String>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TagValidationError {
    #[error("too many tags: {0} > {1}")]
    TooMany(usize, usize),
    #[error("too many tags for category '{0}': {1} > {2}")]
    CategoryOverflow(String, usize, usize),
    #[error("required category '{0}' has no tags")]
    MissingRequired(String),
}

/// Normalize and validate tags against category rules.
///
/// Tags are trimmed, lowercased and deduplicated in first-seen order. A tag
/// lands in the first category whose predefined list contains it; otherwise
/// in the first category permitting custom tags; otherwise it is rejected
/// (not an error).
pub fn validate_tags(
    tags: &[String],
    categories: &[TagCategory],
) -> Result<ValidatedTags, TagValidationError> {
    let mut out = ValidatedTags::default();
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();

    for raw in tags {
        let tag = raw.trim().to_lowercase();
        if tag.is_empty() || out.tags.contains(&tag) {
            continue;
        }

        let home = categories
            .iter()
            .find(|c| c.allows(&tag))
            .or_else(|| categories.iter().find(|c| c.allow_custom));

        let Some(category) = home else {
            out.rejected.push(tag);
            continue;
        };

        let count = counts.entry(category.name.as_str()).or_insert(0);
        *count += 1;
        if let Some(cap) = category.max_tags {
            if *count > cap {
                return Err(TagValidationError::CategoryOverflow(
                    category.name.clone(),
                    *count,
                    cap,
                ));
            }
        }

        out.by_category
            .entry(category.name.clone())
            .or_default()
            .push(tag.clone());
        out.tags.push(tag);
    }

    if out.tags.len() > MAX_TAGS_PER_IMAGE {
        return Err(TagValidationError::TooMany(out.tags.len(), MAX_TAGS_PER_IMAGE));
    }

    for category in categories {
        if category.required && !out.by_category.contains_key(&category.name) {
            return Err(TagValidationError::MissingRequired(category.name.clone()));
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cats() -> Vec<TagCategory> {
        default_categories()
    }

    #[test]
    fn case_variants_collapse_to_one_tag() {
        let input = vec![
            "Person".to_string(),
            " person ".to_string(),
            "PERSON".to_string(),
        ];
        let out = validate_tags(&input, &cats()).unwrap();
        assert_eq!(out.tags, vec!["person".to_string()]);
        assert_eq!(out.by_category["Content"], vec!["person".to_string()]);
    }

    #[test]
    fn tags_keep_first_seen_order() {
        let input = vec![
            "portrait".to_string(),
            "news".to_string(),
            "portrait".to_string(),
            "person".to_string(),
        ];
        let out = validate_tags(&input, &cats()).unwrap();
        assert_eq!(out.tags, vec!["portrait", "news", "person"]);
    }

    #[test]
    fn category_cap_enforced() {
        let mut categories = cats();
        categories[0].max_tags = Some(1);
        categories[0].allow_custom = false;
        for c in &mut categories[1..] {
            c.allow_custom = false;
        }
        let input = vec!["person".to_string(), "building".to_string()];
        let err = validate_tags(&input, &categories).unwrap_err();
        assert_eq!(
            err,
            TagValidationError::CategoryOverflow("Content".into(), 2, 1)
        );
    }

    #[test]
    fn required_category_must_be_populated() {
        let mut categories = cats();
        categories[3].required = true; // Editorial
        let input = vec!["person".to_string()];
        let err = validate_tags(&input, &categories).unwrap_err();
        assert_eq!(err, TagValidationError::MissingRequired("Editorial".into()));
    }

    #[test]
    fn unknown_tags_rejected_when_custom_disallowed() {
        let mut categories = cats();
        for c in &mut categories {
            c.allow_custom = false;
        }
        let input = vec!["zeppelin".to_string(), "person".to_string()];
        let out = validate_tags(&input, &categories).unwrap();
        assert_eq!(out.tags, vec!["person".to_string()]);
        assert_eq!(out.rejected, vec!["zeppelin".to_string()]);
    }

    #[test]
    fn category_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("categories.toml");
        std::fs::write(
            &path,
            r#"
[[categories]]
name = "Content"
predefined_tags = ["person", "building"]
allow_custom = false

[[categories]]
name = "Mood"
description = "Overall feel"
required = true
max_tags = 2
predefined_tags = ["calm", "tense"]
"#,
        )
        .unwrap();
        let loaded = load_categories(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name, "Content");
        assert!(!loaded[0].allow_custom);
        assert_eq!(loaded[1].max_tags, Some(2));
        assert!(loaded[1].required);
        assert_eq!(loaded[1].color, "#007AFF");
    }
}
