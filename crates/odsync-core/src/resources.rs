//! Nested diff between a dataset's managed resources and its upstream dataflows.
//!
//! Resources are joined on `url`. Only resources of the managed format take part;
//! the caller filters the destination side before calling in here.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::models::{Dataflow, DestinationResource, ResourceProjection};

/// A destination resource whose title or description must change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePatch {
    pub resource_id: String,
    pub target: ResourceProjection,
}

/// Operations bringing one dataset's resources in line with upstream.
///
/// Apply order: `delete`, then `add`, then `update`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceChangeSet {
    /// Destination resources whose URL is gone upstream, or duplicates of a kept URL.
    pub delete: Vec<DestinationResource>,
    /// Upstream resources with no destination counterpart.
    pub add: Vec<ResourceProjection>,
    /// Matched URLs whose title or description differ.
    pub update: Vec<ResourcePatch>,
}

impl ResourceChangeSet {
    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.add.is_empty() && self.update.is_empty()
    }

    /// Number of resource calls needed to apply this change set.
    pub fn len(&self) -> usize {
        self.delete.len() + self.add.len() + self.update.len()
    }

    pub fn delete_urls(&self) -> Vec<&str> {
        self.delete.iter().map(|r| r.url.as_str()).collect()
    }

    pub fn add_urls(&self) -> Vec<&str> {
        self.add.iter().map(|r| r.url.as_str()).collect()
    }

    pub fn update_urls(&self) -> Vec<&str> {
        self.update.iter().map(|p| p.target.url.as_str()).collect()
    }
}

/// Computes the URL-keyed diff.
///
/// If upstream lists a URL twice, the first occurrence wins. If the destination
/// holds a URL twice, the first resource is kept and the others are deleted.
pub fn diff_resources(
    destination: &[&DestinationResource],
    upstream: &[ResourceProjection],
) -> ResourceChangeSet {
    let mut wanted: BTreeMap<&str, &ResourceProjection> = BTreeMap::new();
    for projection in upstream {
        wanted.entry(projection.url.as_str()).or_insert(projection);
    }

    let mut existing: BTreeMap<&str, &DestinationResource> = BTreeMap::new();
    let mut changes = ResourceChangeSet::default();

    for &resource in destination {
        if existing.contains_key(resource.url.as_str()) {
            changes.delete.push(resource.clone());
        } else {
            existing.insert(resource.url.as_str(), resource);
        }
    }

    for (url, resource) in &existing {
        match wanted.get(url) {
            None => changes.delete.push((*resource).clone()),
            Some(target) => {
                if resource.title != target.title || resource.description() != target.description
                {
                    changes.update.push(ResourcePatch {
                        resource_id: resource.id.clone(),
                        target: (*target).clone(),
                    });
                }
            }
        }
    }

    changes.add = wanted
        .iter()
        .filter(|(url, _)| !existing.contains_key(*url))
        .map(|(_, projection)| ResourceProjection::clone(projection))
        .collect();

    changes.delete.sort_by(|a, b| a.url.cmp(&b.url).then_with(|| a.id.cmp(&b.id)));
    changes
}

/// Unordered equality of destination and upstream resources.
///
/// Equal iff both sides have the same number of resources and every upstream URL
/// exists on the destination with the same title and description.
pub fn resources_equal(
    destination: &[&DestinationResource],
    upstream: &[ResourceProjection],
) -> bool {
    if destination.len() != upstream.len() {
        return false;
    }
    upstream.iter().all(|wanted| {
        let mut matches = destination
            .iter()
            .filter(|r| r.url == wanted.url)
            .peekable();
        matches.peek().is_some()
            && matches.all(|r| r.title == wanted.title && r.description() == wanted.description)
    })
}

/// Resource ids in display order: title ascending, then format descending.
///
/// With equal titles this puts the `html` link ahead of the `csv` upload.
pub fn order_resources(resources: &[DestinationResource]) -> Vec<String> {
    let mut sorted: Vec<&DestinationResource> = resources.iter().collect();
    sorted.sort_by(|a, b| match a.title.cmp(&b.title) {
        Ordering::Equal => b.format().cmp(a.format()),
        other => other,
    });
    sorted.into_iter().map(|r| r.id.clone()).collect()
}

/// Dataflows without an uploaded export: no resource of `format` carries the
/// dataflow's name as its title.
pub fn missing_uploads<'a>(
    resources: &[DestinationResource],
    dataflows: &'a [Dataflow],
    format: &str,
) -> Vec<&'a Dataflow> {
    dataflows
        .iter()
        .filter(|dataflow| {
            !resources
                .iter()
                .any(|r| r.format() == format && r.title == dataflow.name)
        })
        .collect()
}
