//! Field-level comparison of a destination dataset with its upstream projection.

use std::collections::BTreeSet;

use crate::models::{DatasetUpdate, DestinationDataset, DestinationResource, Frequency};
use crate::projection::TopicProjection;
use crate::resources::resources_equal;

/// Which parts of a dataset diverge from upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatasetDrift {
    pub title: bool,
    pub tags: bool,
    pub frequency: bool,
    pub resources: bool,
}

impl DatasetDrift {
    pub fn is_clean(&self) -> bool {
        !(self.title || self.tags || self.frequency || self.resources)
    }

    /// Names of the drifted fields, for logging.
    pub fn fields(&self) -> Vec<&'static str> {
        [
            (self.title, "title"),
            (self.tags, "tags"),
            (self.frequency, "frequency"),
            (self.resources, "resources"),
        ]
        .into_iter()
        .filter_map(|(drifted, name)| drifted.then_some(name))
        .collect()
    }

    /// The single consolidated update for this drift, if any.
    ///
    /// Tags are always sent in full, since the catalog drops tags missing from an
    /// update. A resource drift also refreshes the description and frequency, which
    /// are both derived from the resources.
    pub fn to_update(&self, projection: &TopicProjection) -> Option<DatasetUpdate> {
        if self.is_clean() {
            return None;
        }

        let mut update = DatasetUpdate::tags(projection.tags.clone());
        if self.title {
            update.title = Some(projection.label.clone());
        }
        if self.resources {
            update.description = Some(projection.description.clone());
        }
        if self.resources || self.frequency {
            update.frequency = Some(projection.frequency);
        }
        Some(update)
    }
}

/// Compares a destination dataset with the upstream projection of its topic.
///
/// Only resources of `managed_format` are compared. A dataset without a
/// frequency is treated as `unknown`.
pub fn compare_dataset(
    dataset: &DestinationDataset,
    projection: &TopicProjection,
    managed_format: &str,
) -> DatasetDrift {
    let remote_tags = dataset.tag_set();
    let local_tags: BTreeSet<&str> = projection.tags.iter().map(String::as_str).collect();

    let remote_frequency = dataset
        .frequency
        .as_deref()
        .unwrap_or(Frequency::Unknown.as_str());

    let managed: Vec<&DestinationResource> = dataset.managed_resources(managed_format).collect();

    DatasetDrift {
        title: dataset.title != projection.label,
        tags: remote_tags != local_tags,
        frequency: remote_frequency != projection.frequency.as_str(),
        resources: !resources_equal(&managed, &projection.resources),
    }
}
