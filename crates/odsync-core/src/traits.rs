//! Trait definitions for the collaborators of the reconciliation engine.
//!
//! The engine never talks HTTP itself. It reads topics through an
//! [`UpstreamSource`], mutates the catalog through a [`DestinationCatalog`] and
//! derives keywords, tags and frequency through a [`MetadataDeriver`]. The client
//! crate provides the real implementations; tests use in-memory mocks.
//!
//! Every call returns an explicit `Result`: an empty `Ok` means "nothing there",
//! an `Err` means the call failed.
//!
//! # Example
//!
//! ```
//! use odsync_core::traits::UpstreamSource;
//! use odsync_core::{AppError, topic};
//!
//! async fn leaf_count<U: UpstreamSource>(upstream: &U, facet: &str) -> Result<usize, AppError> {
//!     let tree = upstream.fetch_facet_tree().await?;
//!     Ok(topic::extract_leaf_topics(tree.buckets(facet)?).len())
//! }
//! ```

use std::future::Future;

use crate::error::AppError;
use crate::models::{
    Dataflow, DatasetUpdate, DestinationDataset, FacetTree, Frequency, NewDatasetPayload,
    NewResource, ResourceUpdate,
};

/// Read access to the upstream statistical catalog.
pub trait UpstreamSource: Send + Sync + Clone {
    /// Fetches the facet configuration holding the topic tree.
    fn fetch_facet_tree(&self) -> impl Future<Output = Result<FacetTree, AppError>> + Send;

    /// Fetches the dataflows filed under a topic.
    ///
    /// A topic the caller may not see yields `Ok(vec![])`, not an error.
    fn fetch_topic_resources(
        &self,
        topic: &str,
    ) -> impl Future<Output = Result<Vec<Dataflow>, AppError>> + Send;

    /// Downloads the observations of a dataflow as CSV.
    fn fetch_csv(
        &self,
        dataflow_id: &str,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Read/write access to the destination open-data catalog.
pub trait DestinationCatalog: Send + Sync + Clone {
    /// Lists every dataset carrying the sync tag within the organization.
    fn list_managed_datasets(
        &self,
    ) -> impl Future<Output = Result<Vec<DestinationDataset>, AppError>> + Send;

    /// Lists every dataset of the organization, managed or not.
    fn list_organization_datasets(
        &self,
    ) -> impl Future<Output = Result<Vec<DestinationDataset>, AppError>> + Send;

    fn get_dataset(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<DestinationDataset, AppError>> + Send;

    /// Creates a dataset and returns its id.
    fn create_dataset(
        &self,
        payload: &NewDatasetPayload,
    ) -> impl Future<Output = Result<String, AppError>> + Send;

    fn update_dataset(
        &self,
        id: &str,
        update: &DatasetUpdate,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn delete_dataset(&self, id: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Attaches a resource to a dataset and returns the resource id.
    fn create_resource(
        &self,
        dataset_id: &str,
        resource: &NewResource,
    ) -> impl Future<Output = Result<String, AppError>> + Send;

    fn update_resource(
        &self,
        dataset_id: &str,
        resource_id: &str,
        update: &ResourceUpdate,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn delete_resource(
        &self,
        dataset_id: &str,
        resource_id: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Sets the display order of a dataset's resources.
    ///
    /// # Arguments
    ///
    /// * `resource_ids` - Every resource id of the dataset, in the wanted order
    fn reorder_resources(
        &self,
        dataset_id: &str,
        resource_ids: &[String],
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Uploads a file as a new resource and returns the resource id.
    fn upload_csv(
        &self,
        dataset_id: &str,
        filename: &str,
        content: String,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Metadata extracted from a free-text dataflow description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedMetadata {
    pub keywords: Vec<String>,
    /// Falls back to [`Frequency::Unknown`] when nothing is recognized.
    pub frequency: Frequency,
}

/// Derives tags, keywords and update frequency from upstream text.
pub trait MetadataDeriver: Send + Sync + Clone {
    /// Extracts keywords and frequency from a description.
    fn derive(&self, description: &str) -> DerivedMetadata;

    /// Candidate tags from a title.
    fn title_tags(&self, title: &str) -> Vec<String>;

    /// Normalizes a raw tag, or rejects it.
    fn normalize_tag(&self, tag: &str) -> Option<String>;
}
