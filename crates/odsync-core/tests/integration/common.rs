//! Test utilities and mock implementations for integration tests.
//!
//! Provides an in-memory upstream and an in-memory catalog that records every
//! mutating call.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use odsync_core::error::ApiErrorDetails;
use odsync_core::models::{Facet, FacetBucket};
use odsync_core::{
    AppError, Dataflow, DatasetDefaults, DatasetUpdate, DescriptionHeuristics,
    DescriptionRenderer, DestinationCatalog, DestinationDataset, DestinationResource, FacetTree,
    Language, NewDatasetPayload, NewResource, Projector, ReconcileService, ResourceUpdate,
    SyncConfig, UpstreamSource,
};
use serde_json::{Map, Value};

pub const MAIN_FACET: &str = "topics";
pub const URL_PREFIX: &str = "https://stat.example.org/?df=";
pub const SYNC_TAG: &str = "dotstat-sync";

fn server_error(endpoint: &str) -> AppError {
    AppError::Api(ApiErrorDetails::new(500, endpoint, "Internal Server Error"))
}

fn not_found(endpoint: &str) -> AppError {
    AppError::Api(ApiErrorDetails::new(404, endpoint, "Not Found"))
}

pub fn dataflow(id: &str, name: &str, description: &str) -> Dataflow {
    Dataflow {
        dataflow_id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
    }
}

// =============================================================================
// MockUpstream
// =============================================================================

/// Upstream with a fixed facet tree and dataflows per topic.
#[derive(Clone, Default)]
pub struct MockUpstream {
    buckets: Vec<FacetBucket>,
    dataflows: HashMap<String, Vec<Dataflow>>,
    failing: HashSet<String>,
    failing_csv: HashSet<String>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a bucket with no dataflows of its own (an inner node).
    pub fn with_branch(mut self, path: &str) -> Self {
        self.buckets.push(FacetBucket {
            val: path.to_string(),
            count: 0,
        });
        self
    }

    pub fn with_topic(mut self, path: &str, dataflows: Vec<Dataflow>) -> Self {
        self.buckets.push(FacetBucket {
            val: path.to_string(),
            count: dataflows.len() as u64,
        });
        self.dataflows.insert(path.to_string(), dataflows);
        self
    }

    /// Makes the dataflow search for `path` fail.
    pub fn with_failing_topic(mut self, path: &str) -> Self {
        self.failing.insert(path.to_string());
        self
    }

    /// Makes the CSV export of `dataflow_id` fail.
    pub fn with_failing_csv(mut self, dataflow_id: &str) -> Self {
        self.failing_csv.insert(dataflow_id.to_string());
        self
    }
}

impl UpstreamSource for MockUpstream {
    async fn fetch_facet_tree(&self) -> Result<FacetTree, AppError> {
        let mut facets = HashMap::new();
        facets.insert(
            MAIN_FACET.to_string(),
            Facet {
                buckets: self.buckets.clone(),
            },
        );
        Ok(FacetTree { facets })
    }

    async fn fetch_topic_resources(&self, topic: &str) -> Result<Vec<Dataflow>, AppError> {
        if self.failing.contains(topic) {
            return Err(server_error("/api/search"));
        }
        Ok(self.dataflows.get(topic).cloned().unwrap_or_default())
    }

    async fn fetch_csv(&self, dataflow_id: &str) -> Result<String, AppError> {
        if self.failing_csv.contains(dataflow_id) {
            return Err(AppError::NetworkError("csv export down".to_string()));
        }
        Ok(format!("DATAFLOW,OBS_VALUE\n{},1\n", dataflow_id))
    }
}

// =============================================================================
// MockCatalog
// =============================================================================

/// A mutating call received by the mock catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateDataset(String),
    UpdateDataset(String, DatasetUpdate),
    DeleteDataset(String),
    CreateResource(String, String),
    UpdateResource(String, String),
    DeleteResource(String, String),
    Reorder(String, Vec<String>),
    UploadCsv(String, String),
}

#[derive(Default)]
struct CatalogState {
    datasets: BTreeMap<String, DestinationDataset>,
    calls: Vec<Call>,
    next_id: usize,
    failing_titles: HashSet<String>,
}

impl CatalogState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }
}

/// In-memory catalog. Clones share state.
#[derive(Clone, Default)]
pub struct MockCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, dataset: DestinationDataset) {
        let mut state = self.state.lock().unwrap();
        state.datasets.insert(dataset.id.clone(), dataset);
    }

    /// Makes dataset creation fail for the given title.
    pub fn fail_create(&self, title: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_titles
            .insert(title.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().datasets.len()
    }

    pub fn get(&self, id: &str) -> Option<DestinationDataset> {
        self.state.lock().unwrap().datasets.get(id).cloned()
    }

    pub fn find_by_topic(&self, topic: &str) -> Option<DestinationDataset> {
        self.state
            .lock()
            .unwrap()
            .datasets
            .values()
            .find(|d| d.external_id("dotstat_id") == Some(topic))
            .cloned()
    }

    /// Applies `f` to the stored dataset of a topic, bypassing the call log.
    pub fn edit_topic(&self, topic: &str, f: impl FnOnce(&mut DestinationDataset)) {
        let mut state = self.state.lock().unwrap();
        let dataset = state
            .datasets
            .values_mut()
            .find(|d| d.external_id("dotstat_id") == Some(topic))
            .expect("dataset for topic");
        f(dataset);
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

/// A dataset as if created by an earlier pass.
pub fn managed_dataset(id: &str, topic: &str, title: &str) -> DestinationDataset {
    let mut extras = Map::new();
    extras.insert("dotstat_id".to_string(), Value::String(topic.to_string()));
    DestinationDataset {
        id: id.to_string(),
        title: title.to_string(),
        tags: vec![SYNC_TAG.to_string()],
        frequency: None,
        extras,
        resources: Vec::new(),
        page: None,
    }
}

impl DestinationCatalog for MockCatalog {
    async fn list_managed_datasets(&self) -> Result<Vec<DestinationDataset>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .datasets
            .values()
            .filter(|d| d.tags.iter().any(|t| t == SYNC_TAG))
            .cloned()
            .collect())
    }

    async fn list_organization_datasets(&self) -> Result<Vec<DestinationDataset>, AppError> {
        Ok(self.state.lock().unwrap().datasets.values().cloned().collect())
    }

    async fn get_dataset(&self, id: &str) -> Result<DestinationDataset, AppError> {
        self.get(id).ok_or_else(|| not_found("/datasets/"))
    }

    async fn create_dataset(&self, payload: &NewDatasetPayload) -> Result<String, AppError> {
        self.record(Call::CreateDataset(payload.title.clone()));
        let mut state = self.state.lock().unwrap();
        if state.failing_titles.contains(&payload.title) {
            return Err(server_error("/datasets/"));
        }

        let id = state.next_id("ds");
        let mut resources = Vec::new();
        for resource in &payload.resources {
            resources.push(DestinationResource {
                id: state.next_id("res"),
                title: resource.title.clone(),
                description: Some(resource.description.clone()),
                url: resource.url.clone(),
                format: Some(resource.format.clone()),
            });
        }
        let dataset = DestinationDataset {
            id: id.clone(),
            title: payload.title.clone(),
            tags: payload.tags.clone(),
            frequency: Some(payload.frequency.as_str().to_string()),
            extras: payload.extras.clone(),
            resources,
            page: None,
        };
        state.datasets.insert(id.clone(), dataset);
        Ok(id)
    }

    async fn update_dataset(&self, id: &str, update: &DatasetUpdate) -> Result<(), AppError> {
        self.record(Call::UpdateDataset(id.to_string(), update.clone()));
        let mut state = self.state.lock().unwrap();
        let dataset = state
            .datasets
            .get_mut(id)
            .ok_or_else(|| not_found("/datasets/"))?;
        if let Some(title) = &update.title {
            dataset.title = title.clone();
        }
        if let Some(frequency) = update.frequency {
            dataset.frequency = Some(frequency.as_str().to_string());
        }
        dataset.tags = update.tags.clone();
        Ok(())
    }

    async fn delete_dataset(&self, id: &str) -> Result<(), AppError> {
        self.record(Call::DeleteDataset(id.to_string()));
        self.state
            .lock()
            .unwrap()
            .datasets
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found("/datasets/"))
    }

    async fn create_resource(
        &self,
        dataset_id: &str,
        resource: &NewResource,
    ) -> Result<String, AppError> {
        self.record(Call::CreateResource(
            dataset_id.to_string(),
            resource.url.clone(),
        ));
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("res");
        let dataset = state
            .datasets
            .get_mut(dataset_id)
            .ok_or_else(|| not_found("/datasets/"))?;
        dataset.resources.push(DestinationResource {
            id: id.clone(),
            title: resource.title.clone(),
            description: Some(resource.description.clone()),
            url: resource.url.clone(),
            format: Some(resource.format.clone()),
        });
        Ok(id)
    }

    async fn update_resource(
        &self,
        dataset_id: &str,
        resource_id: &str,
        update: &ResourceUpdate,
    ) -> Result<(), AppError> {
        self.record(Call::UpdateResource(
            dataset_id.to_string(),
            resource_id.to_string(),
        ));
        let mut state = self.state.lock().unwrap();
        let resource = state
            .datasets
            .get_mut(dataset_id)
            .and_then(|d| d.resources.iter_mut().find(|r| r.id == resource_id))
            .ok_or_else(|| not_found("/resources/"))?;
        resource.title = update.title.clone();
        resource.description = Some(update.description.clone());
        Ok(())
    }

    async fn delete_resource(&self, dataset_id: &str, resource_id: &str) -> Result<(), AppError> {
        self.record(Call::DeleteResource(
            dataset_id.to_string(),
            resource_id.to_string(),
        ));
        let mut state = self.state.lock().unwrap();
        let dataset = state
            .datasets
            .get_mut(dataset_id)
            .ok_or_else(|| not_found("/datasets/"))?;
        dataset.resources.retain(|r| r.id != resource_id);
        Ok(())
    }

    async fn reorder_resources(
        &self,
        dataset_id: &str,
        resource_ids: &[String],
    ) -> Result<(), AppError> {
        self.record(Call::Reorder(dataset_id.to_string(), resource_ids.to_vec()));
        let mut state = self.state.lock().unwrap();
        let dataset = state
            .datasets
            .get_mut(dataset_id)
            .ok_or_else(|| not_found("/datasets/"))?;
        dataset.resources.sort_by_key(|r| {
            resource_ids
                .iter()
                .position(|id| *id == r.id)
                .unwrap_or(usize::MAX)
        });
        Ok(())
    }

    async fn upload_csv(
        &self,
        dataset_id: &str,
        filename: &str,
        _content: String,
    ) -> Result<String, AppError> {
        self.record(Call::UploadCsv(dataset_id.to_string(), filename.to_string()));
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("res");
        let dataset = state
            .datasets
            .get_mut(dataset_id)
            .ok_or_else(|| not_found("/datasets/"))?;
        dataset.resources.push(DestinationResource {
            id: id.clone(),
            title: filename.to_string(),
            description: None,
            url: format!("https://catalog.example.org/{}/{}", dataset_id, filename),
            format: Some("csv".to_string()),
        });
        Ok(id)
    }
}

// =============================================================================
// Service construction
// =============================================================================

pub type TestService = ReconcileService<MockUpstream, MockCatalog, DescriptionHeuristics>;

/// Sequential config, so call logs are deterministic.
pub fn test_config() -> SyncConfig {
    SyncConfig::default().with_concurrency(1)
}

pub fn service(upstream: MockUpstream, catalog: MockCatalog, config: SyncConfig) -> TestService {
    let projector = Projector::new(
        DescriptionHeuristics::new(Language::French),
        DescriptionRenderer::new().unwrap(),
        URL_PREFIX,
        config.sentinel_tags(),
    );
    ReconcileService::new(
        upstream,
        catalog,
        projector,
        MAIN_FACET,
        DatasetDefaults::new("org-1"),
    )
    .with_config(config)
}

/// Two leaf topics below one branch, plus a standalone leaf.
pub fn sample_upstream() -> MockUpstream {
    MockUpstream::new()
        .with_branch("0|Économie#ECO#")
        .with_topic(
            "1|Économie#ECO#|Commerce",
            vec![
                dataflow(
                    "DF_EXP",
                    "Exportations",
                    "Périodicité : mensuelle - (x)\nMots-clés : exportations, commerce",
                ),
                dataflow(
                    "DF_IMP",
                    "Importations",
                    "Périodicité : annuelle - (x)\nMots-clés : importations",
                ),
            ],
        )
        .with_topic(
            "1|Économie#ECO#|Prix",
            vec![dataflow("DF_PRI", "Indice des prix", "Mots-clés : prix")],
        )
        .with_topic("0|Population", Vec::new())
}
