//! Domain models for both sides of the synchronization.
//!
//! Upstream types mirror the .Stat Data Explorer search service, destination types
//! mirror the udata catalog API. Field names follow the wire formats so the client
//! crate can (de)serialize them directly.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AppError;

// =============================================================================
// Upstream
// =============================================================================

/// A single bucket of the upstream facet tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetBucket {
    /// Hierarchical topic path, e.g. `"2|Economy#ECO#|Trade"`.
    pub val: String,
    /// Number of dataflows indexed under this bucket.
    #[serde(default)]
    pub count: u64,
}

/// Buckets of one facet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Facet {
    #[serde(default)]
    pub buckets: Vec<FacetBucket>,
}

/// Response of the upstream `/api/config` endpoint, restricted to what we use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FacetTree {
    #[serde(default)]
    pub facets: std::collections::HashMap<String, Facet>,
}

impl FacetTree {
    /// Returns the buckets of the given facet.
    ///
    /// A missing facet or an empty bucket list is a malformed response: an empty
    /// topic set would otherwise be read as "every dataset was removed upstream".
    pub fn buckets(&self, facet_key: &str) -> Result<&[FacetBucket], AppError> {
        let facet = self.facets.get(facet_key).ok_or_else(|| {
            AppError::MalformedUpstream(format!("facet '{}' missing from response", facet_key))
        })?;
        if facet.buckets.is_empty() {
            return Err(AppError::MalformedUpstream(format!(
                "facet '{}' has no buckets",
                facet_key
            )));
        }
        Ok(&facet.buckets)
    }
}

/// An upstream dataflow: one resource of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataflow {
    pub dataflow_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

// =============================================================================
// Frequency
// =============================================================================

/// Update frequency of a dataset, using the destination's vocabulary.
///
/// Variants are declared from most to least frequent so that the derived ordering
/// can pick the longest period among several candidates. `Irregular` is kept apart:
/// it never wins over an explicit period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Frequency {
    #[default]
    Unknown,
    Monthly,
    Bimonthly,
    Quarterly,
    ThreeTimesAYear,
    Semiannual,
    Annual,
    Biennial,
    Triennial,
    Quinquennial,
    Irregular,
}

impl Frequency {
    /// Rank used when several frequencies compete; higher wins.
    fn rank(self) -> i8 {
        match self {
            Frequency::Irregular => -1,
            Frequency::Unknown => 0,
            Frequency::Monthly => 1,
            Frequency::Bimonthly => 2,
            Frequency::Quarterly => 3,
            Frequency::ThreeTimesAYear => 4,
            Frequency::Semiannual => 5,
            Frequency::Annual => 6,
            Frequency::Biennial => 7,
            Frequency::Triennial => 8,
            Frequency::Quinquennial => 9,
        }
    }

    /// Returns whichever of the two has the longer period.
    ///
    /// ```
    /// use odsync_core::Frequency;
    ///
    /// assert_eq!(Frequency::Monthly.longest_period(Frequency::Annual), Frequency::Annual);
    /// assert_eq!(Frequency::Unknown.longest_period(Frequency::Irregular), Frequency::Unknown);
    /// ```
    pub fn longest_period(self, other: Frequency) -> Frequency {
        if self.rank() >= other.rank() { self } else { other }
    }

    /// Folds a list of frequencies, starting from `Unknown`.
    pub fn fold_longest(frequencies: impl IntoIterator<Item = Frequency>) -> Frequency {
        frequencies
            .into_iter()
            .fold(Frequency::Unknown, Frequency::longest_period)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Unknown => "unknown",
            Frequency::Monthly => "monthly",
            Frequency::Bimonthly => "bimonthly",
            Frequency::Quarterly => "quarterly",
            Frequency::ThreeTimesAYear => "threeTimesAYear",
            Frequency::Semiannual => "semiannual",
            Frequency::Annual => "annual",
            Frequency::Biennial => "biennial",
            Frequency::Triennial => "triennial",
            Frequency::Quinquennial => "quinquennial",
            Frequency::Irregular => "irregular",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            Frequency::Unknown,
            Frequency::Monthly,
            Frequency::Bimonthly,
            Frequency::Quarterly,
            Frequency::ThreeTimesAYear,
            Frequency::Semiannual,
            Frequency::Annual,
            Frequency::Biennial,
            Frequency::Triennial,
            Frequency::Quinquennial,
            Frequency::Irregular,
        ];
        all.into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| AppError::Generic(format!("Unknown frequency: '{}'", s)))
    }
}

// =============================================================================
// Destination
// =============================================================================

/// A resource attached to a destination dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationResource {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub format: Option<String>,
}

impl DestinationResource {
    pub fn format(&self) -> &str {
        self.format.as_deref().unwrap_or_default()
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }
}

/// A dataset record as returned by the destination catalog.
///
/// `frequency` stays a raw string: the catalog may hold values this tool never
/// writes, and those must compare as "different", not fail to parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationDataset {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub extras: Map<String, Value>,
    #[serde(default)]
    pub resources: Vec<DestinationResource>,
    /// Public landing page of the dataset.
    #[serde(default)]
    pub page: Option<String>,
}

impl DestinationDataset {
    /// Returns the upstream topic id stored under the join key, if any.
    pub fn external_id(&self, join_key: &str) -> Option<&str> {
        self.extras.get(join_key).and_then(Value::as_str)
    }

    pub fn tag_set(&self) -> BTreeSet<&str> {
        self.tags.iter().map(String::as_str).collect()
    }

    /// Resources of the given format, the only ones this tool owns.
    pub fn managed_resources<'a>(
        &'a self,
        managed_format: &'a str,
    ) -> impl Iterator<Item = &'a DestinationResource> + 'a {
        self.resources
            .iter()
            .filter(move |r| r.format() == managed_format)
    }
}

/// The upstream-derived view of one resource, keyed by `url` when joined.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceProjection {
    pub title: String,
    pub description: String,
    pub url: String,
}

impl From<&DestinationResource> for ResourceProjection {
    fn from(resource: &DestinationResource) -> Self {
        Self {
            title: resource.title.clone(),
            description: resource.description().to_string(),
            url: resource.url.clone(),
        }
    }
}

/// Payload for creating a remote (link) resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResource {
    pub title: String,
    pub description: String,
    pub url: String,
    pub format: String,
    pub filetype: String,
    pub filesize: u64,
    #[serde(rename = "type")]
    pub resource_type: String,
}

impl NewResource {
    /// A remote link resource of the given format.
    pub fn remote(projection: &ResourceProjection, format: &str) -> Self {
        Self {
            title: projection.title.clone(),
            description: projection.description.clone(),
            url: projection.url.clone(),
            format: format.to_string(),
            filetype: "remote".to_string(),
            filesize: 0,
            resource_type: "main".to_string(),
        }
    }
}

/// Partial update of a resource. Only title and description are ever changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUpdate {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialCoverage {
    pub geom: Option<Value>,
    pub granularity: String,
    pub zones: Vec<String>,
}

/// Payload for creating a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDatasetPayload {
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    pub organization: OrganizationRef,
    pub tags: Vec<String>,
    pub frequency: Frequency,
    /// Carries the join key back to the upstream topic.
    pub extras: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spatial: Option<SpatialCoverage>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub resources: Vec<NewResource>,
}

/// Partial update of a dataset.
///
/// The catalog wipes tags missing from an update payload, so `tags` is mandatory
/// and always carries the complete set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<Frequency>,
}

impl DatasetUpdate {
    /// An update that only restates the full tag set.
    pub fn tags(tags: Vec<String>) -> Self {
        Self {
            title: None,
            description: None,
            tags,
            frequency: None,
        }
    }
}
