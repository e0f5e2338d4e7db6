//! Topic extraction from the upstream facet tree.
//!
//! Facet paths look like `"2|Economy#ECO#|Trade"`: a numeric sort key, then
//! `|`-separated segments, each optionally carrying a `#…#` category marker.
//! Only leaves of that tree become datasets; branches are taxonomy.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::FacetBucket;

/// Hierarchy delimiter used in facet paths.
pub const PATH_DELIMITER: char = '|';

/// Separator used in human readable labels.
pub const LABEL_SEPARATOR: &str = " - ";

static SORT_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\|").expect("valid sort prefix regex"));

static CATEGORY_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#.+?#").expect("valid category marker regex"));

/// A facet bucket annotated with its position in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNode {
    /// Raw facet path; this is the topic identifier and the join key.
    pub path: String,
    /// Path without its numeric sort key.
    pub canonical: String,
    /// Number of delimiters in the raw path.
    pub depth: usize,
    /// Number of other buckets below this one.
    pub child_count: usize,
}

impl TopicNode {
    pub fn is_leaf(&self) -> bool {
        self.child_count == 0
    }

    pub fn label(&self) -> String {
        topic_label(&self.path)
    }
}

/// Strips the leading numeric sort key from a facet path.
///
/// ```
/// use odsync_core::topic::canonical_path;
///
/// assert_eq!(canonical_path("3|A|B|C"), "A|B|C");
/// assert_eq!(canonical_path("A|B"), "A|B");
/// ```
pub fn canonical_path(path: &str) -> &str {
    match SORT_PREFIX.find(path) {
        Some(m) => &path[m.end()..],
        None => path,
    }
}

/// Converts a topic id into a human readable label.
///
/// ```
/// use odsync_core::topic::topic_label;
///
/// assert_eq!(topic_label("42|Economy#tag#|Trade"), "Economy - Trade");
/// ```
pub fn topic_label(path: &str) -> String {
    let without_prefix = canonical_path(path);
    CATEGORY_MARKER
        .replace_all(without_prefix, "")
        .replace(PATH_DELIMITER, LABEL_SEPARATOR)
}

/// True if `candidate` is strictly prefixed by `ancestor`.
///
/// This is a plain string prefix, not a segment match: `"A|BC"` counts as a
/// descendant of `"A|B"`, so `"A|B"` is not a leaf when both exist.
fn descends_from(candidate: &str, ancestor: &str) -> bool {
    candidate != ancestor && candidate.starts_with(ancestor)
}

/// Annotates every bucket with its depth and number of descendants.
///
/// Child counting runs against the full bucket list, duplicates included: two raw
/// paths with the same canonical form are evaluated independently, and neither
/// counts as a child of the other.
pub fn annotate_topics(buckets: &[FacetBucket]) -> Vec<TopicNode> {
    let canonicals: Vec<&str> = buckets.iter().map(|b| canonical_path(&b.val)).collect();

    buckets
        .iter()
        .zip(&canonicals)
        .map(|(bucket, canonical)| {
            let child_count = canonicals
                .iter()
                .filter(|other| descends_from(other, canonical))
                .count();
            TopicNode {
                path: bucket.val.clone(),
                canonical: (*canonical).to_string(),
                depth: bucket.val.matches(PATH_DELIMITER).count(),
                child_count,
            }
        })
        .collect()
}

/// Returns the set of leaf topic ids.
pub fn extract_leaf_topics(buckets: &[FacetBucket]) -> BTreeSet<String> {
    annotate_topics(buckets)
        .into_iter()
        .filter(TopicNode::is_leaf)
        .map(|node| node.path)
        .collect()
}
