//! Scored semantic extraction: candidate generation, quality scoring,
//! filtering, and diversity-aware selection over a description string.

use super::Extraction;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

const DEFAULT_MAX_TAGS: usize = 10;
const MIN_SCORE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum TagType {
    Descriptive,
    Technical,
    Entity,
    Contextual,
}

impl TagType {
    fn multiplier(self) -> f64 {
        match self {
            TagType::Descriptive => 1.2,
            TagType::Technical => 1.1,
            TagType::Entity => 1.0,
            TagType::Contextual => 0.9,
        }
    }

    fn cap(self) -> usize {
        match self {
            TagType::Descriptive => 4,
            TagType::Technical => 3,
            TagType::Entity => 3,
            TagType::Contextual => 2,
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    text: String,
    score: f64,
    tag_type: TagType,
}

pub struct SemanticExtractor {
    max_tags: usize,
    stop_words: HashSet<&'static str>,
    concrete_objects: HashSet<&'static str>,
    quality_patterns: Vec<Regex>,
    low_quality_patterns: Vec<Regex>,
    descriptive_phrases: Vec<Regex>,
    specific_phrases: Vec<Regex>,
    technical_type: Vec<Regex>,
    descriptive_type: Vec<Regex>,
    contextual_type: Vec<Regex>,
    entity_type: Vec<Regex>,
    hyphenated: Regex,
}

const STOP_WORDS: &[&str] = &[
    // Articles and determiners
    "a", "an", "the", "this", "that", "these", "those",
    // Prepositions
    "in", "on", "at", "by", "for", "with", "from", "to", "of", "as", "into",
    // Conjunctions
    "and", "or", "but", "so", "yet", "nor",
    // Pronouns
    "he", "she", "it", "they", "them", "his", "her", "its", "their",
    // Verbs that carry no content
    "is", "are", "was", "were", "being", "been", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might",
    "can", "must", "shall",
    // Photography filler
    "image", "picture", "photo", "photograph", "shot", "view", "scene",
    "shows", "showing", "depicts", "depicting", "features", "featuring",
    "contains", "containing", "includes", "including", "capture", "frame",
    "composition", "visual", "angle", "perspective", "displays", "presents",
    "illustrates",
    // Overly generic
    "thing", "things", "stuff", "item", "items", "something", "anything",
    "everything", "nothing", "one", "two", "three", "some", "many", "few",
    "more", "most", "less", "least", "all", "any", "each", "every",
    // Non-descriptive adjectives
    "good", "bad", "nice", "great", "big", "small", "large", "little",
    "old", "new", "young", "long", "short", "high", "low", "first", "last",
];

const CONCRETE_OBJECTS: &[&str] = &[
    // Buildings
    "barn", "shed", "garage", "cabin", "house", "church", "warehouse", "factory",
    "office", "store", "shop", "restaurant", "cafe", "library", "school", "hospital",
    "tower", "castle", "bridge", "stadium", "theater", "museum", "gallery", "hotel",
    // Vehicles
    "car", "truck", "bus", "bike", "van", "suv", "sedan", "coupe", "wagon",
    "motorcycle", "scooter", "bicycle", "boat", "ship", "plane", "helicopter",
    "train", "subway", "tram", "taxi", "ambulance",
    // Nature
    "tree", "lake", "hill", "field", "rock", "path", "river", "mountain",
    "forest", "beach", "ocean", "pond", "stream", "valley", "cliff", "canyon",
    "flower", "grass", "bush", "garden", "park", "meadow", "desert", "island",
    // Furniture
    "desk", "chair", "table", "bed", "sofa", "shelf", "lamp", "cabinet",
    "dresser", "couch", "bench", "stool", "bookcase", "wardrobe", "nightstand",
    "mirror", "painting", "clock", "vase", "plant", "cushion",
    // Animals
    "dog", "cat", "horse", "cow", "bird", "sheep", "pig", "chicken",
    "duck", "goose", "rabbit", "deer", "bear", "fox", "wolf", "lion",
    "elephant", "giraffe", "zebra", "tiger", "monkey", "fish", "shark", "whale",
    // Food
    "bread", "cake", "pizza", "burger", "sandwich", "salad", "soup", "pasta",
    "rice", "meat", "beef", "fruit", "apple", "banana",
    "orange", "grape", "berry", "vegetable", "carrot", "potato", "onion", "tomato",
    // Tools
    "hammer", "saw", "drill", "wrench", "screwdriver", "pliers", "knife", "scissors",
    "shovel", "rake", "ladder", "bucket", "brush", "pen", "pencil",
    "computer", "phone", "camera", "keyboard", "mouse", "screen", "monitor", "printer",
];

const GENERIC_BLACKLIST: &[&str] = &["image", "photo", "picture", "view", "scene"];

fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("static patterns compile"))
        .collect()
}

impl Default for SemanticExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TAGS)
    }
}

impl SemanticExtractor {
    pub fn new(max_tags: usize) -> Self {
        Self {
            max_tags,
            stop_words: STOP_WORDS.iter().copied().collect(),
            concrete_objects: CONCRETE_OBJECTS.iter().copied().collect(),
            quality_patterns: compile_all(&[
                // Materials and textures
                r"\b(?:wood|wooden|metal|metallic|glass|plastic|fabric|leather|stone|concrete|brick|ceramic|porcelain)\b",
                // Specific colors
                r"\b(?:crimson|azure|emerald|golden|silver|bronze|ivory|ebony|turquoise|burgundy|navy|maroon)\b",
                // Professional vocabulary
                r"\b(?:professional|executive|corporate|editorial|commercial|studio|documentary|journalistic)\b",
                // Actions and poses
                r"\b(?:sitting|standing|walking|running|laughing|smiling|concentrating|presenting|demonstrating)\b",
                // Settings
                r"\b(?:office|workspace|studio|conference|meeting|restaurant|cafe|kitchen|bedroom|living)\b",
                // Lighting
                r"\b(?:natural|artificial|dramatic|soft|harsh|golden|ambient|directional|diffused|backlighting)\b",
                // Composition
                r"\b(?:close-up|wide-shot|portrait|landscape|overhead|aerial|macro|telephoto|panoramic)\b",
                // Mood
                r"\b(?:confident|serious|cheerful|contemplative|focused|relaxed|energetic|peaceful|dynamic)\b",
                // Style
                r"\b(?:modern|contemporary|vintage|classic|minimalist|elegant|rustic|industrial|artistic)\b",
                // Concrete buildings
                r"\b(?:barn|shed|garage|cabin|house|church|warehouse|factory|library|school|hospital)\b",
                // Vehicles
                r"\b(?:car|truck|bus|bike|van|suv|sedan|motorcycle|bicycle|boat|ship|plane|helicopter|train)\b",
                // Natural features
                r"\b(?:tree|lake|hill|field|rock|path|river|mountain|forest|beach|ocean|pond|stream|valley|flower|garden)\b",
            ]),
            low_quality_patterns: compile_all(&[
                r"\b(?:good|bad|nice|big|small|pretty|ugly|normal|regular|usual|common)\b",
                r"\b(?:thing|stuff|something|anything|everything|nothing|area|place|space|part)\b",
                r"\b(?:very|quite|rather|somewhat|really|actually|basically|generally)\b",
            ]),
            descriptive_phrases: compile_all(&[
                r"\b(?:natural|artificial|bright|dark|soft|hard|smooth|rough)\s+\w+\b",
                r"\b(?:business|professional|casual|formal)\s+\w+\b",
                r"\b\w+\s+(?:background|lighting|environment|setting|style|design)\b",
                r"\b(?:conference|meeting|dining|living|work)\s+\w+\b",
            ]),
            specific_phrases: compile_all(&[
                r"\b(?:shallow|deep)\s+depth\s+(?:of\s+)?field\b",
                r"\b(?:natural|artificial|studio)\s+\w+\s+lighting\b",
                r"\b(?:professional|business|corporate)\s+\w+\s+\w+\b",
            ]),
            technical_type: compile_all(&[
                r"\b(?:close-up|wide-shot|macro|telephoto|portrait|landscape)\b",
                r"\b(?:lighting|exposure|focus|depth|angle|composition)\b",
                r"\b(?:natural|artificial|studio|ambient)\s+light\b",
            ]),
            descriptive_type: compile_all(&[
                r"\b(?:wearing|dressed|holding|sitting|standing)\b",
                r"\b\w+(?:ed|ing)\b",
                r"\b(?:confident|serious|cheerful|professional)\b",
            ]),
            contextual_type: compile_all(&[
                r"\b(?:office|studio|outdoor|indoor|background)\b",
                r"\b(?:meeting|conference|interview|presentation)\b",
            ]),
            entity_type: compile_all(&[
                r"\b(?:person|people|man|woman|child|executive|professional)\b",
                r"\b(?:building|room|desk|chair|computer|device)\b",
            ]),
            hyphenated: Regex::new(r"\b\w+(?:-\w+)+\b").expect("static pattern compiles"),
        }
    }

    pub fn extract(&self, text: &str) -> Extraction {
        if text.trim().is_empty() {
            return Extraction::empty();
        }

        let candidates = self.candidate_terms(text);
        let scored = self.score(candidates, text);
        let filtered = self.filter(scored);
        let selected = self.select(filtered);
        let confidence = self.confidence(&selected, text);

        Extraction {
            tags: selected.iter().map(|c| c.text.clone()).collect(),
            by_category: BTreeMap::new(),
            confidence,
            method: "semantic_analysis",
        }
    }

    fn candidate_terms(&self, text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        // Keep hyphens and apostrophes, drop other punctuation.
        let cleaned: String = lower
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() || c == '-' || c == '\'' {
                    c
                } else {
                    ' '
                }
            })
            .collect();

        let mut candidates: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let push = |candidates: &mut Vec<String>, seen: &mut HashSet<String>, term: String| {
            if seen.insert(term.clone()) {
                candidates.push(term);
            }
        };

        // Single meaningful words.
        for word in cleaned.split_whitespace() {
            let word = word.trim_matches(|c| c == '-' || c == '\'');
            if word.len() >= 3
                && !self.stop_words.contains(word)
                && word.chars().all(|c| c.is_alphabetic())
            {
                push(&mut candidates, &mut seen, word.to_string());
            }
        }

        // Hyphenated compounds.
        for m in self.hyphenated.find_iter(&cleaned) {
            if m.as_str().len() >= 5 {
                push(&mut candidates, &mut seen, m.as_str().to_string());
            }
        }

        // Two- and three-word phrases over the stop-word-filtered stream.
        let words: Vec<&str> = cleaned
            .split_whitespace()
            .filter(|w| !self.stop_words.contains(*w) && w.len() >= 3)
            .collect();
        for pair in words.windows(2) {
            let phrase = format!("{} {}", pair[0], pair[1]);
            if self.descriptive_phrases.iter().any(|p| p.is_match(&phrase)) {
                push(&mut candidates, &mut seen, phrase);
            }
        }
        for triple in words.windows(3) {
            let phrase = format!("{} {} {}", triple[0], triple[1], triple[2]);
            if self.specific_phrases.iter().any(|p| p.is_match(&phrase)) {
                push(&mut candidates, &mut seen, phrase);
            }
        }

        candidates
    }

    fn score(&self, candidates: Vec<String>, text: &str) -> Vec<Candidate> {
        let text_lower = text.to_lowercase();
        candidates
            .into_iter()
            .map(|candidate| {
                let mut score = 1.0f64;

                let is_concrete = self.concrete_objects.contains(candidate.as_str());
                if is_concrete {
                    score += 0.8;
                } else if candidate.contains(' ')
                    && candidate
                        .split(' ')
                        .any(|w| self.concrete_objects.contains(w))
                {
                    score += 0.6;
                }

                // Specificity by length; concrete objects keep short names.
                if candidate.len() >= 8 {
                    score += 0.3;
                } else if candidate.len() <= 4 && !is_concrete {
                    score -= 0.2;
                }

                for pattern in &self.quality_patterns {
                    if pattern.is_match(&candidate) {
                        score += 0.4;
                    }
                }
                for pattern in &self.low_quality_patterns {
                    if pattern.is_match(&candidate) {
                        score -= 0.5;
                    }
                }

                if candidate.contains('-') || candidate.contains(' ') {
                    score += 0.1;
                }

                // Repetition in the source text.
                let occurrences = text_lower.matches(candidate.as_str()).count();
                if occurrences > 1 {
                    score += 0.1 * (occurrences - 1) as f64;
                }

                let tag_type = self.classify(&candidate);
                score *= tag_type.multiplier();

                Candidate {
                    text: candidate,
                    score: score.max(0.1),
                    tag_type,
                }
            })
            .collect()
    }

    fn classify(&self, term: &str) -> TagType {
        if self.technical_type.iter().any(|p| p.is_match(term)) {
            TagType::Technical
        } else if self.descriptive_type.iter().any(|p| p.is_match(term)) {
            TagType::Descriptive
        } else if self.contextual_type.iter().any(|p| p.is_match(term)) {
            TagType::Contextual
        } else if self.entity_type.iter().any(|p| p.is_match(term)) {
            TagType::Entity
        } else {
            TagType::Descriptive
        }
    }

    fn filter(&self, scored: Vec<Candidate>) -> Vec<Candidate> {
        scored
            .into_iter()
            .filter(|c| {
                c.score >= MIN_SCORE
                    && c.text.len() >= 3
                    && c.text.len() <= 50
                    && !GENERIC_BLACKLIST.contains(&c.text.as_str())
                    && !c.text.chars().all(|ch| ch.is_ascii_digit())
            })
            .collect()
    }

    fn select(&self, mut filtered: Vec<Candidate>) -> Vec<Candidate> {
        filtered.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let mut selected: Vec<Candidate> = Vec::new();
        let mut type_counts: BTreeMap<TagType, usize> = BTreeMap::new();

        for candidate in &filtered {
            let count = type_counts.entry(candidate.tag_type).or_insert(0);
            if *count < candidate.tag_type.cap() {
                *count += 1;
                selected.push(candidate.clone());
                if selected.len() >= self.max_tags {
                    break;
                }
            }
        }

        // Top up with the highest remaining scores when the caps leave room.
        if selected.len() < self.max_tags {
            let chosen: HashSet<&str> = selected.iter().map(|c| c.text.as_str()).collect();
            let extra: Vec<Candidate> = filtered
                .iter()
                .filter(|c| !chosen.contains(c.text.as_str()))
                .take(self.max_tags - selected.len())
                .cloned()
                .collect();
            selected.extend(extra);
        }

        selected.truncate(self.max_tags);
        selected
    }

    /// Blend of average score, tag count (saturating near 6), text length
    /// (saturating near 150 chars), and type diversity (up to 3 types).
    fn confidence(&self, selected: &[Candidate], text: &str) -> f64 {
        if selected.is_empty() {
            return 0.0;
        }
        let avg = selected.iter().map(|c| c.score).sum::<f64>() / selected.len() as f64;
        let count_factor = (selected.len() as f64 / 6.0).min(1.0);
        let length_factor = (text.len() as f64 / 150.0).min(1.0);
        let unique_types = selected
            .iter()
            .map(|c| c.tag_type)
            .collect::<HashSet<_>>()
            .len();
        let diversity = (unique_types as f64 / 3.0).min(1.0);
        (avg * 0.4 + count_factor * 0.3 + length_factor * 0.2 + diversity * 0.1).min(1.0)
    }
}
