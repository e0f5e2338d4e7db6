//! Default [`MetadataDeriver`]: regex heuristics over dataflow descriptions.
//!
//! Upstream descriptions are free text written by statisticians, usually in
//! French, with sections such as:
//!
//! ```text
//! Périodicité : annuelle & mensuelle - (révision en mars)
//! Mots-clés : commerce extérieur, importations, exportations - Source : ...
//! ```
//!
//! The heuristics pull keywords and update frequency out of those sections, and
//! turn titles and keywords into tags the catalog will accept unchanged.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::models::Frequency;
use crate::traits::{DerivedMetadata, MetadataDeriver};

/// Shortest tag the catalog keeps.
pub const MIN_TAG_LEN: usize = 3;
/// Longest tag the catalog keeps.
pub const MAX_TAG_LEN: usize = 96;

// Tried in order; the first that matches wins.
static KEYWORD_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?m)[Mm]ots-cl[ée]s\s?:?\s*(.*?)\s*-",
        r"(?m)[Mm]ots-cl[ée]s\s?:?\s*(.*?)\s*<",
        r"(?m)[Mm]ots-cl[ée]s\s?:?\s*(.*?)$",
        r"(?m)[Kk]eywords:?\s*(.*?)\s*-",
        r"(?m)[Kk]eywords:?\s*(.*?)\s*<",
        r"(?m)[Kk]eywords:?\s*(.*?)$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid keyword regex"))
    .collect()
});

static FREQUENCY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?m)[Pp][ée]riodicit[éey]\s?:?\s+(.*?)\s+[-(].",
        r"(?m)[Pp][ée]riodicit[éey]\s?:?\s+(.*?)$",
        r"(?m)[Ff]r[ée]quenc[ey]\s?:?\s+(.*?)\s+[-(].",
        r"(?m)[Ff]r[ée]quenc[ey]\s?:?\s+(.*?)$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid frequency regex"))
    .collect()
});

static KEYWORD_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[:;.]").expect("valid regex"));
static KEYWORD_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s']").expect("valid regex"));
static ELIDED_ARTICLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z]+'").expect("valid regex"));
static DROPPED_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.']").expect("valid regex"));
static DASHED_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[/()]+").expect("valid regex"));
static REPEATED_DASHES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--+").expect("valid regex"));

/// Language of the upstream texts, selecting the stop word list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    French,
    #[default]
    English,
    German,
}

impl Language {
    /// Maps a language code (`fr`, `en`, `de`); anything else falls back to English.
    pub fn from_code(code: &str) -> Self {
        match code.to_lowercase().as_str() {
            "fr" => Language::French,
            "de" => Language::German,
            _ => Language::English,
        }
    }

    fn stop_words(self) -> &'static [&'static str] {
        match self {
            Language::French => FRENCH_STOP_WORDS,
            Language::English => ENGLISH_STOP_WORDS,
            Language::German => GERMAN_STOP_WORDS,
        }
    }
}

const FRENCH_STOP_WORDS: &[&str] = &[
    "a", "à", "afin", "ainsi", "au", "aux", "avec", "ce", "ces", "cet", "cette", "comme",
    "d", "dans", "de", "des", "du", "elle", "en", "entre", "est", "et", "eux", "il", "ils",
    "l", "la", "le", "les", "leur", "leurs", "lui", "mais", "même", "ne", "ni", "nos",
    "notre", "ou", "où", "par", "pas", "pour", "qu", "que", "qui", "sa", "sans", "se",
    "selon", "ses", "son", "sont", "sous", "sur", "ta", "tous", "tout", "toute", "toutes",
    "un", "une", "vers", "y",
];

const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "all", "an", "and", "any", "are", "as", "at", "be",
    "been", "before", "between", "both", "but", "by", "during", "each", "for", "from",
    "has", "have", "how", "in", "into", "is", "it", "its", "more", "most", "no", "nor",
    "not", "of", "on", "only", "or", "other", "over", "per", "same", "so", "such", "than",
    "that", "the", "their", "then", "there", "these", "this", "those", "through", "to",
    "under", "until", "up", "very", "was", "were", "what", "when", "where", "which",
    "while", "who", "with", "within",
];

const GERMAN_STOP_WORDS: &[&str] = &[
    "aber", "als", "am", "an", "auch", "auf", "aus", "bei", "bis", "das", "dem", "den",
    "der", "des", "die", "durch", "ein", "eine", "einem", "einen", "einer", "eines", "es",
    "für", "gegen", "im", "in", "ist", "mit", "nach", "nicht", "noch", "oder", "ohne",
    "pro", "sich", "sind", "über", "um", "und", "unter", "vom", "von", "vor", "zu", "zum",
    "zur", "zwischen",
];

/// Maps one frequency word (French or English) to a catalog frequency.
fn parse_frequency_word(word: &str) -> Option<Frequency> {
    let frequency = match word {
        "mensuelle" | "mensuel" | "monthly" => Frequency::Monthly,
        "bimestrielle" | "bimestriel" | "bimonthly" => Frequency::Bimonthly,
        "trimestrielle" | "trimestriel" | "quarterly" => Frequency::Quarterly,
        "trois fois par an" | "three times a year" | "threetimesayear" => {
            Frequency::ThreeTimesAYear
        }
        "semestrielle" | "semestriel" | "bi-annuelle" | "biannuelle" | "bi-annuel"
        | "biannuel" | "semiannual" => Frequency::Semiannual,
        "annuelle" | "anuelle" | "annuel" | "révision annuelle" | "yearly" | "annual" => {
            Frequency::Annual
        }
        "biennale" | "biennal" | "biénale" | "bisannuelle" | "bisannuel" | "biennial" => {
            Frequency::Biennial
        }
        "triennale" | "triennal" | "triennial" => Frequency::Triennial,
        "quinquennale" | "quinquennal" | "quinquennial" => Frequency::Quinquennial,
        "variable" | "irregular" => Frequency::Irregular,
        "unknown" => Frequency::Unknown,
        _ => return None,
    };
    Some(frequency)
}

/// Regex and stop-word based [`MetadataDeriver`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptionHeuristics {
    language: Language,
}

impl DescriptionHeuristics {
    pub fn new(language: Language) -> Self {
        Self { language }
    }

    /// Raw keyword section of a description, lowercased.
    pub fn keyword_section(description: &str) -> Option<String> {
        KEYWORD_PATTERNS.iter().find_map(|re| {
            re.captures(description)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_lowercase())
        })
    }

    /// Keywords of a description, one tag-shaped token each.
    pub fn keywords(description: &str) -> Vec<String> {
        let Some(section) = Self::keyword_section(description) else {
            tracing::debug!("No keywords section in description");
            return Vec::new();
        };

        let mut keywords: Vec<String> = Vec::new();
        for raw in section.split(',') {
            let cleaned = KEYWORD_PUNCTUATION.replace_all(raw, "");
            let keyword = KEYWORD_SEPARATORS
                .replace_all(cleaned.trim(), "-")
                .into_owned();
            if !keyword.is_empty() && !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
        keywords
    }

    /// Update frequency stated in a description.
    ///
    /// Several values (`annuelle & mensuelle`, `annuelle et trimestrielle`) resolve
    /// to the longest period. Unrecognized values count as unknown.
    pub fn frequency(description: &str) -> Frequency {
        let Some(section) = FREQUENCY_PATTERNS.iter().find_map(|re| {
            re.captures(description)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_lowercase())
        }) else {
            tracing::debug!("No frequency section in description");
            return Frequency::Unknown;
        };

        let values: Vec<&str> = if section.contains('&') {
            section.split('&').collect()
        } else {
            section.split(" et ").collect()
        };

        Frequency::fold_longest(values.into_iter().map(str::trim).map(|value| {
            parse_frequency_word(value).unwrap_or_else(|| {
                tracing::debug!(value, "Unknown frequency");
                Frequency::Unknown
            })
        }))
    }

    fn is_stop_word(&self, word: &str) -> bool {
        self.language.stop_words().contains(&word)
    }
}

impl MetadataDeriver for DescriptionHeuristics {
    fn derive(&self, description: &str) -> DerivedMetadata {
        DerivedMetadata {
            keywords: Self::keywords(description),
            frequency: Self::frequency(description),
        }
    }

    /// Lowercased title words minus stop words, deduplicated, in title order.
    fn title_tags(&self, title: &str) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        let lowered = title.to_lowercase();
        let words = lowered
            .split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '-'))
            .map(|w| w.trim_matches('-'))
            .filter(|w| !w.is_empty());

        for word in words {
            let bare = word.rsplit('\'').next().unwrap_or(word);
            if self.is_stop_word(word) || self.is_stop_word(bare) {
                continue;
            }
            if !tags.iter().any(|t| t == word) {
                tags.push(word.to_string());
            }
        }
        tags
    }

    /// Brings a tag to the shape the catalog stores, so local and remote tags compare equal.
    ///
    /// ```
    /// use odsync_core::heuristics::DescriptionHeuristics;
    /// use odsync_core::traits::MetadataDeriver;
    ///
    /// let h = DescriptionHeuristics::default();
    /// assert_eq!(h.normalize_tag("l'économie").as_deref(), Some("economie"));
    /// assert_eq!(h.normalize_tag("R&D (private)").as_deref(), Some("r-and-d -private-"));
    /// assert_eq!(h.normalize_tag("ab"), None);
    /// ```
    fn normalize_tag(&self, tag: &str) -> Option<String> {
        let stripped: String = tag
            .nfd()
            .filter(|c| !('\u{0300}'..='\u{036f}').contains(c))
            .collect::<String>()
            .to_lowercase();

        let tag = ELIDED_ARTICLE.replace(&stripped, "");
        let tag = DROPPED_CHARS.replace_all(&tag, "");
        let tag = DASHED_CHARS.replace_all(&tag, "-");
        let tag = tag.replace('&', "-and-");
        let tag = REPEATED_DASHES.replace_all(&tag, "-").into_owned();

        let len = tag.chars().count();
        (MIN_TAG_LEN..=MAX_TAG_LEN).contains(&len).then_some(tag)
    }
}
