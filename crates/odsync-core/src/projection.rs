//! Upstream projection: what a destination dataset should look like for a topic.
//!
//! A [`TopicProjection`] is computed from the topic id and its dataflows, and is
//! the single source of both the create payload and the drift comparison.

use serde_json::{Map, Value};

use crate::config::{DatasetSettings, SyncConfig};
use crate::description::DescriptionRenderer;
use crate::error::AppError;
use crate::models::{
    Dataflow, Frequency, NewDatasetPayload, NewResource, OrganizationRef, ResourceProjection,
    SpatialCoverage,
};
use crate::topic::topic_label;
use crate::traits::MetadataDeriver;

/// The expected destination state of one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicProjection {
    /// Raw facet path; stored under the join key.
    pub topic_id: String,
    /// Dataset title.
    pub label: String,
    pub keywords: Vec<String>,
    /// Normalized title and keyword tags, then the sentinel tags.
    pub tags: Vec<String>,
    pub frequency: Frequency,
    pub resources: Vec<ResourceProjection>,
    pub description: String,
}

impl TopicProjection {
    /// Builds the create payload for this topic.
    pub fn to_new_dataset(
        &self,
        defaults: &DatasetDefaults,
        config: &SyncConfig,
    ) -> NewDatasetPayload {
        let mut extras = Map::new();
        extras.insert(
            config.join_key_field.clone(),
            Value::String(self.topic_id.clone()),
        );

        NewDatasetPayload {
            title: self.label.clone(),
            description: self.description.clone(),
            license: defaults.license.clone(),
            organization: OrganizationRef {
                id: defaults.organization_id.clone(),
            },
            tags: self.tags.clone(),
            frequency: self.frequency,
            extras,
            spatial: defaults.spatial.clone(),
            resources: self
                .resources
                .iter()
                .map(|r| NewResource::remote(r, &config.managed_format))
                .collect(),
        }
    }
}

/// Static fields of every created dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetDefaults {
    pub organization_id: String,
    pub license: Option<String>,
    pub spatial: Option<SpatialCoverage>,
}

impl DatasetDefaults {
    pub fn new(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            license: None,
            spatial: None,
        }
    }

    /// Defaults from the `[dataset]` settings section.
    pub fn from_settings(organization_id: impl Into<String>, settings: &DatasetSettings) -> Self {
        let spatial = settings
            .spatial_granularity
            .as_ref()
            .map(|granularity| SpatialCoverage {
                geom: None,
                granularity: granularity.clone(),
                zones: settings.spatial_zones.clone(),
            });
        Self {
            organization_id: organization_id.into(),
            license: settings.license.clone(),
            spatial,
        }
    }

    pub fn with_license(mut self, license: Option<String>) -> Self {
        self.license = license;
        self
    }
}

/// Turns a topic and its dataflows into a [`TopicProjection`].
#[derive(Debug, Clone)]
pub struct Projector<M: MetadataDeriver> {
    deriver: M,
    renderer: DescriptionRenderer,
    dataflow_url_prefix: String,
    sentinel_tags: Vec<String>,
}

impl<M: MetadataDeriver> Projector<M> {
    /// # Arguments
    ///
    /// * `dataflow_url_prefix` - Public page prefix; a resource URL is the prefix plus the dataflow id
    /// * `sentinel_tags` - Tags every managed dataset carries, see [`SyncConfig::sentinel_tags`]
    pub fn new(
        deriver: M,
        renderer: DescriptionRenderer,
        dataflow_url_prefix: impl Into<String>,
        sentinel_tags: Vec<String>,
    ) -> Self {
        Self {
            deriver,
            renderer,
            dataflow_url_prefix: dataflow_url_prefix.into(),
            sentinel_tags,
        }
    }

    pub fn resource_url(&self, dataflow_id: &str) -> String {
        format!("{}{}", self.dataflow_url_prefix, dataflow_id)
    }

    /// Projects a topic. Fails only if the description template fails to render.
    pub fn project(
        &self,
        topic_id: &str,
        dataflows: &[Dataflow],
    ) -> Result<TopicProjection, AppError> {
        let label = topic_label(topic_id);

        let mut keywords: Vec<String> = Vec::new();
        let mut frequencies = Vec::with_capacity(dataflows.len());
        for dataflow in dataflows {
            let derived = self.deriver.derive(&dataflow.description);
            for keyword in derived.keywords {
                if !keywords.contains(&keyword) {
                    keywords.push(keyword);
                }
            }
            frequencies.push(derived.frequency);
        }

        let resources: Vec<ResourceProjection> = dataflows
            .iter()
            .map(|df| ResourceProjection {
                title: df.name.clone(),
                description: df.description.clone(),
                url: self.resource_url(&df.dataflow_id),
            })
            .collect();

        let titles: Vec<String> = resources.iter().map(|r| r.title.clone()).collect();
        let description = self.renderer.render(&label, &titles)?;
        let tags = self.tags(&label, &keywords);

        Ok(TopicProjection {
            topic_id: topic_id.to_string(),
            label,
            keywords,
            tags,
            frequency: Frequency::fold_longest(frequencies),
            resources,
            description,
        })
    }

    /// Title tags and keywords, normalized and deduplicated, then the sentinel tags.
    fn tags(&self, label: &str, keywords: &[String]) -> Vec<String> {
        let candidates = self
            .deriver
            .title_tags(label)
            .into_iter()
            .chain(keywords.iter().cloned());

        let mut tags: Vec<String> = Vec::new();
        for tag in candidates.filter_map(|t| self.deriver.normalize_tag(&t)) {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        for sentinel in &self.sentinel_tags {
            if !tags.contains(sentinel) {
                tags.push(sentinel.clone());
            }
        }
        tags
    }
}
