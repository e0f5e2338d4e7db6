//! Reconciliation service: one pass bringing the catalog in line with upstream.
//!
//! # Phases
//!
//! 1. Read the upstream topic tree and the managed destination datasets. A failure
//!    here is fatal.
//! 2. Compute the [`ChangeSet`] and apply the mass-deletion gate. Nothing has been
//!    mutated yet.
//! 3. Delete stale datasets.
//! 4. Fetch the dataflows of every topic to add or update and project them.
//! 5. Create, then update.
//!
//! Phases are strictly sequential; items within a phase run concurrently up to
//! [`SyncConfig::concurrency`].
//!
//! Every item runs inside its own error boundary: a failure is reported, recorded
//! in the [`SyncReport`] and the pass moves on. A failed item is not retried within
//! the pass; the next pass will pick it up again.
//!
//! # Cancellation
//!
//! [`ReconcileService::run_cancellable`] stops dispatching new items once the token
//! is cancelled. In-flight items finish; undispatched ones are counted as skipped.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::changeset::{AtomicSyncStats, ChangeSet, Operation, PlanCounts, SyncOutcome, SyncStats};
use crate::compare::compare_dataset;
use crate::config::{ResourceStrategy, SyncConfig};
use crate::error::AppError;
use crate::models::{
    Dataflow, DestinationDataset, DestinationResource, NewResource, ResourceUpdate,
};
use crate::progress::{ProgressReporter, SyncEvent};
use crate::projection::{DatasetDefaults, Projector, TopicProjection};
use crate::resources::{diff_resources, missing_uploads, order_resources};
use crate::topic::{TopicNode, annotate_topics};
use crate::traits::{DestinationCatalog, MetadataDeriver, UpstreamSource};

/// Format of the uploaded CSV resources.
pub const CSV_FORMAT: &str = "csv";

/// One item that failed during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub operation: Operation,
    pub topic: String,
    pub error: String,
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub plan: PlanCounts,
    pub stats: SyncStats,
    pub failures: Vec<ItemFailure>,
    pub cancelled: bool,
    /// No mutating call was issued; `stats` counts what would have happened.
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// True if every planned item went through.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

/// Both sides of a pass, read and diffed.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub topics: BTreeSet<String>,
    /// Managed datasets keyed by the topic id stored under the join key.
    pub existing: BTreeMap<String, DestinationDataset>,
    pub changes: ChangeSet,
}

struct TopicData {
    projection: TopicProjection,
    dataflows: Vec<Dataflow>,
}

/// Per-pass state shared by the concurrently running items.
struct RunContext<'a, R> {
    reporter: &'a R,
    cancel: &'a CancellationToken,
    stats: AtomicSyncStats,
    failures: Mutex<Vec<ItemFailure>>,
}

impl<'a, R: ProgressReporter> RunContext<'a, R> {
    fn new(reporter: &'a R, cancel: &'a CancellationToken) -> Self {
        Self {
            reporter,
            cancel,
            stats: AtomicSyncStats::new(),
            failures: Mutex::new(Vec::new()),
        }
    }

    fn fail(&self, operation: Operation, topic: &str, error: &AppError) {
        let message = error.to_string();
        self.reporter.report(SyncEvent::ItemFailed {
            operation,
            topic,
            error: &message,
        });
        self.stats.record(SyncOutcome::Failed);
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(ItemFailure {
                operation,
                topic: topic.to_string(),
                error: message,
            });
        }
    }

    /// Runs one item inside its error boundary. `work` is not polled once the
    /// pass is cancelled.
    async fn guard(
        &self,
        operation: Operation,
        topic: &str,
        work: impl Future<Output = Result<SyncOutcome, AppError>>,
    ) {
        if self.cancel.is_cancelled() {
            self.stats.record(SyncOutcome::Skipped);
            return;
        }
        match work.await {
            Ok(outcome) => self.stats.record(outcome),
            Err(e) => self.fail(operation, topic, &e),
        }
    }

    fn into_failures(self) -> Vec<ItemFailure> {
        self.failures
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Reconciliation service, generic over its collaborators.
///
/// ```ignore
/// let service = ReconcileService::new(dotstat, udata, projector, "topics", defaults)
///     .with_config(SyncConfig::default().with_dry_run(true));
/// let report = service.run(&TracingReporter).await?;
/// ```
pub struct ReconcileService<U, D, M>
where
    U: UpstreamSource,
    D: DestinationCatalog,
    M: MetadataDeriver,
{
    upstream: U,
    destination: D,
    projector: Projector<M>,
    main_facet: String,
    defaults: DatasetDefaults,
    config: SyncConfig,
}

impl<U, D, M> ReconcileService<U, D, M>
where
    U: UpstreamSource,
    D: DestinationCatalog,
    M: MetadataDeriver,
{
    /// # Arguments
    ///
    /// * `main_facet` - Key of the upstream facet holding the topic tree
    /// * `defaults` - Organization, license and spatial coverage of created datasets
    pub fn new(
        upstream: U,
        destination: D,
        projector: Projector<M>,
        main_facet: impl Into<String>,
        defaults: DatasetDefaults,
    ) -> Self {
        Self {
            upstream,
            destination,
            projector,
            main_facet: main_facet.into(),
            defaults,
            config: SyncConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // =========================================================================
    // Read side
    // =========================================================================

    /// Leaf topics of the upstream facet tree.
    pub async fn leaf_topics(&self) -> Result<Vec<TopicNode>, AppError> {
        let tree = self.upstream.fetch_facet_tree().await?;
        let buckets = tree.buckets(&self.main_facet)?;
        Ok(annotate_topics(buckets)
            .into_iter()
            .filter(TopicNode::is_leaf)
            .collect())
    }

    /// Managed datasets keyed by their upstream topic id.
    ///
    /// Datasets without a join key cannot be matched and are ignored. If two
    /// datasets carry the same topic id, the first one listed is kept.
    pub async fn list_existing(&self) -> Result<BTreeMap<String, DestinationDataset>, AppError> {
        let join_key = &self.config.join_key_field;
        let mut existing = BTreeMap::new();

        for dataset in self.destination.list_managed_datasets().await? {
            let Some(topic) = dataset.external_id(join_key).map(str::to_string) else {
                tracing::warn!(dataset_id = %dataset.id, join_key, "Managed dataset without join key, ignoring");
                continue;
            };
            match existing.entry(topic) {
                Entry::Vacant(slot) => {
                    slot.insert(dataset);
                }
                Entry::Occupied(slot) => {
                    tracing::warn!(
                        topic = %slot.key(),
                        kept = %slot.get().id,
                        ignored = %dataset.id,
                        "Two datasets share a topic id"
                    );
                }
            }
        }
        Ok(existing)
    }

    /// Reads both sides and computes the change set. Mutates nothing.
    pub async fn plan(&self) -> Result<SyncPlan, AppError> {
        let topics: BTreeSet<String> = self
            .leaf_topics()
            .await?
            .into_iter()
            .map(|node| node.path)
            .collect();
        let existing = self.list_existing().await?;
        let existing_ids: BTreeSet<String> = existing.keys().cloned().collect();
        let changes = ChangeSet::compute(&topics, &existing_ids);

        Ok(SyncPlan {
            topics,
            existing,
            changes,
        })
    }

    /// Organization datasets not managed by the sync.
    pub async fn list_unmanaged(&self) -> Result<Vec<DestinationDataset>, AppError> {
        let sync_tag = &self.config.sync_tag;
        Ok(self
            .destination
            .list_organization_datasets()
            .await?
            .into_iter()
            .filter(|dataset| !dataset.tags.iter().any(|t| t == sync_tag))
            .collect())
    }

    // =========================================================================
    // Reconciliation pass
    // =========================================================================

    /// Runs one pass.
    pub async fn run<R: ProgressReporter>(&self, reporter: &R) -> Result<SyncReport, AppError> {
        self.run_cancellable(reporter, CancellationToken::new()).await
    }

    /// Runs one pass, stopping dispatch when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Only fatal conditions are returned as `Err`: unreadable topic tree or
    /// destination list, malformed facet response, or a plan refused by the
    /// mass-deletion gate. Item failures end up in [`SyncReport::failures`].
    pub async fn run_cancellable<R: ProgressReporter>(
        &self,
        reporter: &R,
        cancel: CancellationToken,
    ) -> Result<SyncReport, AppError> {
        let started_at = Utc::now();

        let plan = self.plan().await?;
        reporter.report(SyncEvent::TopicsExtracted {
            count: plan.topics.len(),
        });
        reporter.report(SyncEvent::DatasetsListed {
            count: plan.existing.len(),
        });
        let counts = plan.changes.counts();
        reporter.report(SyncEvent::PlanComputed { counts });

        plan.changes
            .check_mass_deletion(self.config.mass_delete_threshold)?;

        let ctx = RunContext::new(reporter, &cancel);
        let concurrency = self.config.concurrency.max(1);

        stream::iter(&plan.changes.to_delete)
            .map(|topic| {
                let dataset_id = plan.existing.get(topic).map(|d| d.id.as_str());
                ctx.guard(
                    Operation::Delete,
                    topic,
                    self.delete_dataset(&ctx, topic, dataset_id),
                )
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<()>>()
            .await;

        let topic_data = self.fetch_topic_data(&ctx, &plan).await;

        let adds: Vec<(&String, &TopicData)> = plan
            .changes
            .to_add
            .iter()
            .filter_map(|topic| topic_data.get(topic).map(|data| (topic, data)))
            .collect();
        stream::iter(adds)
            .map(|(topic, data)| {
                ctx.guard(
                    Operation::Create,
                    topic,
                    self.create_dataset(&ctx, topic, data),
                )
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<()>>()
            .await;

        let updates: Vec<(&String, &TopicData)> = plan
            .changes
            .to_update
            .iter()
            .filter_map(|topic| topic_data.get(topic).map(|data| (topic, data)))
            .collect();
        stream::iter(updates)
            .map(|(topic, data)| {
                ctx.guard(
                    Operation::Update,
                    topic,
                    self.update_dataset(&ctx, topic, data, &plan),
                )
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<()>>()
            .await;

        let stats = ctx.stats.to_stats();
        let cancelled = cancel.is_cancelled();
        if cancelled {
            reporter.report(SyncEvent::Cancelled {
                skipped: stats.skipped,
            });
        }
        reporter.report(SyncEvent::Completed { stats: &stats });

        Ok(SyncReport {
            plan: counts,
            stats,
            failures: ctx.into_failures(),
            cancelled,
            dry_run: self.config.dry_run,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Deletes every managed dataset.
    pub async fn purge<R: ProgressReporter>(
        &self,
        reporter: &R,
        cancel: CancellationToken,
    ) -> Result<SyncStats, AppError> {
        let datasets = self.destination.list_managed_datasets().await?;
        reporter.report(SyncEvent::DatasetsListed {
            count: datasets.len(),
        });

        let ctx = RunContext::new(reporter, &cancel);
        let join_key = &self.config.join_key_field;

        stream::iter(&datasets)
            .map(|dataset| {
                let topic = dataset
                    .external_id(join_key)
                    .unwrap_or(dataset.id.as_str());
                ctx.guard(
                    Operation::Delete,
                    topic,
                    self.delete_dataset(&ctx, topic, Some(dataset.id.as_str())),
                )
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<()>>()
            .await;

        let stats = ctx.stats.to_stats();
        if cancel.is_cancelled() {
            reporter.report(SyncEvent::Cancelled {
                skipped: stats.skipped,
            });
        }
        reporter.report(SyncEvent::Completed { stats: &stats });
        Ok(stats)
    }

    // =========================================================================
    // Items
    // =========================================================================

    /// Fetches and projects every topic to add or update.
    ///
    /// Topics whose fetch fails are recorded as failed and left out of the map.
    async fn fetch_topic_data<R: ProgressReporter>(
        &self,
        ctx: &RunContext<'_, R>,
        plan: &SyncPlan,
    ) -> HashMap<String, TopicData> {
        let wanted = plan.changes.to_add.iter().chain(&plan.changes.to_update);

        stream::iter(wanted)
            .map(|topic| async move {
                if ctx.cancel.is_cancelled() {
                    ctx.stats.record(SyncOutcome::Skipped);
                    return None;
                }

                let fetched = async {
                    let dataflows = self.upstream.fetch_topic_resources(topic).await?;
                    let projection = self.projector.project(topic, &dataflows)?;
                    Ok::<_, AppError>(TopicData {
                        projection,
                        dataflows,
                    })
                }
                .await;

                match fetched {
                    Ok(data) => Some((topic.clone(), data)),
                    Err(e) => {
                        ctx.fail(Operation::FetchTopic, topic, &e);
                        None
                    }
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .filter_map(|entry| async move { entry })
            .collect()
            .await
    }

    async fn delete_dataset<R: ProgressReporter>(
        &self,
        ctx: &RunContext<'_, R>,
        topic: &str,
        dataset_id: Option<&str>,
    ) -> Result<SyncOutcome, AppError> {
        let dataset_id = dataset_id.ok_or_else(|| AppError::DatasetNotFound(topic.to_string()))?;

        if self.config.dry_run {
            ctx.reporter.report(SyncEvent::DryRun {
                operation: Operation::Delete,
                topic,
            });
            return Ok(SyncOutcome::Deleted);
        }

        self.destination.delete_dataset(dataset_id).await?;
        ctx.reporter
            .report(SyncEvent::DatasetDeleted { topic, dataset_id });
        Ok(SyncOutcome::Deleted)
    }

    async fn create_dataset<R: ProgressReporter>(
        &self,
        ctx: &RunContext<'_, R>,
        topic: &str,
        data: &TopicData,
    ) -> Result<SyncOutcome, AppError> {
        if self.config.dry_run {
            ctx.reporter.report(SyncEvent::DryRun {
                operation: Operation::Create,
                topic,
            });
            return Ok(SyncOutcome::Created);
        }

        let payload = data.projection.to_new_dataset(&self.defaults, &self.config);
        let dataset_id = self.destination.create_dataset(&payload).await?;
        ctx.reporter.report(SyncEvent::DatasetCreated {
            topic,
            dataset_id: &dataset_id,
        });

        if self.config.enable_csv_sync {
            self.sync_csv(ctx, &dataset_id, &data.dataflows).await?;
        }
        Ok(SyncOutcome::Created)
    }

    async fn update_dataset<R: ProgressReporter>(
        &self,
        ctx: &RunContext<'_, R>,
        topic: &str,
        data: &TopicData,
        plan: &SyncPlan,
    ) -> Result<SyncOutcome, AppError> {
        let listed = plan
            .existing
            .get(topic)
            .ok_or_else(|| AppError::DatasetNotFound(topic.to_string()))?;
        let dataset = self.destination.get_dataset(&listed.id).await?;

        let drift = compare_dataset(&dataset, &data.projection, &self.config.managed_format);
        let update = drift.to_update(&data.projection);
        // An earlier pass may have created the dataset but failed its CSV uploads.
        let csv_missing = self.config.enable_csv_sync
            && !missing_uploads(&dataset.resources, &data.dataflows, CSV_FORMAT).is_empty();
        if update.is_none() && !csv_missing {
            return Ok(SyncOutcome::Unchanged);
        }

        let mut fields = drift.fields();
        if csv_missing {
            fields.push("csv");
        }
        ctx.reporter.report(SyncEvent::DriftDetected {
            topic,
            dataset_id: &dataset.id,
            fields: &fields,
        });

        if self.config.dry_run {
            ctx.reporter.report(SyncEvent::DryRun {
                operation: Operation::Update,
                topic,
            });
            return Ok(SyncOutcome::Updated);
        }

        if drift.resources {
            self.apply_resources(&dataset, &data.projection).await?;
        }
        if let Some(update) = &update {
            self.destination.update_dataset(&dataset.id, update).await?;
        }
        if self.config.enable_csv_sync && (drift.resources || csv_missing) {
            self.sync_csv(ctx, &dataset.id, &data.dataflows).await?;
        }

        ctx.reporter.report(SyncEvent::DatasetUpdated {
            topic,
            dataset_id: &dataset.id,
        });
        Ok(SyncOutcome::Updated)
    }

    /// Applies the resource strategy. Calls are sequential: deletes, adds, updates.
    async fn apply_resources(
        &self,
        dataset: &DestinationDataset,
        projection: &TopicProjection,
    ) -> Result<(), AppError> {
        let format = &self.config.managed_format;

        match self.config.resource_strategy {
            ResourceStrategy::UrlDiff => {
                let managed: Vec<&DestinationResource> =
                    dataset.managed_resources(format).collect();
                let changes = diff_resources(&managed, &projection.resources);
                tracing::debug!(
                    dataset_id = %dataset.id,
                    delete = changes.delete.len(),
                    add = changes.add.len(),
                    update = changes.update.len(),
                    "Applying resource changes"
                );

                for resource in &changes.delete {
                    self.destination
                        .delete_resource(&dataset.id, &resource.id)
                        .await?;
                }
                for resource in &changes.add {
                    self.destination
                        .create_resource(&dataset.id, &NewResource::remote(resource, format))
                        .await?;
                }
                for patch in &changes.update {
                    let update = ResourceUpdate {
                        title: patch.target.title.clone(),
                        description: patch.target.description.clone(),
                    };
                    self.destination
                        .update_resource(&dataset.id, &patch.resource_id, &update)
                        .await?;
                }
            }
            ResourceStrategy::FullReplace => {
                for resource in &dataset.resources {
                    self.destination
                        .delete_resource(&dataset.id, &resource.id)
                        .await?;
                }
                for resource in &projection.resources {
                    self.destination
                        .create_resource(&dataset.id, &NewResource::remote(resource, format))
                        .await?;
                }
                self.reorder(&dataset.id).await?;
            }
        }
        Ok(())
    }

    /// Refreshes the CSV upload of every dataflow, then reorders the resources.
    ///
    /// Earlier uploads of the same dataflow are removed first, so repeated passes
    /// do not pile up copies.
    async fn sync_csv<R: ProgressReporter>(
        &self,
        ctx: &RunContext<'_, R>,
        dataset_id: &str,
        dataflows: &[Dataflow],
    ) -> Result<(), AppError> {
        if dataflows.is_empty() {
            return Ok(());
        }

        let current = self.destination.get_dataset(dataset_id).await?;

        for dataflow in dataflows {
            let content = self.upstream.fetch_csv(&dataflow.dataflow_id).await?;
            let filename = format!("{}.csv", dataflow.dataflow_id);

            let stale = current.resources.iter().filter(|r| {
                r.format() == CSV_FORMAT && (r.title == dataflow.name || r.title == filename)
            });
            for resource in stale {
                self.destination
                    .delete_resource(dataset_id, &resource.id)
                    .await?;
            }

            let resource_id = self
                .destination
                .upload_csv(dataset_id, &filename, content)
                .await?;
            let update = ResourceUpdate {
                title: dataflow.name.clone(),
                description: dataflow.description.clone(),
            };
            self.destination
                .update_resource(dataset_id, &resource_id, &update)
                .await?;

            ctx.reporter.report(SyncEvent::CsvUploaded {
                dataset_id,
                dataflow_id: &dataflow.dataflow_id,
            });
        }

        self.reorder(dataset_id).await
    }

    /// Sorts a dataset's resources by title, then format descending.
    async fn reorder(&self, dataset_id: &str) -> Result<(), AppError> {
        let refreshed = self.destination.get_dataset(dataset_id).await?;
        let order = order_resources(&refreshed.resources);
        self.destination
            .reorder_resources(dataset_id, &order)
            .await
    }
}
