//! Progress reporting for reconciliation passes.
//!
//! The engine emits [`SyncEvent`]s; frontends decide what to do with them. The
//! CLI uses [`TracingReporter`], tests use [`SilentReporter`].

use tracing::{debug, info, warn};

use crate::changeset::{Operation, PlanCounts, SyncStats};

/// Events emitted during a reconciliation pass.
#[derive(Debug, Clone)]
pub enum SyncEvent<'a> {
    /// Upstream leaf topics were extracted.
    TopicsExtracted { count: usize },
    /// Managed destination datasets were listed.
    DatasetsListed { count: usize },
    /// The change set passed the safety gate.
    PlanComputed { counts: PlanCounts },
    /// One operation on one topic failed; the run continues.
    ItemFailed {
        operation: Operation,
        topic: &'a str,
        error: &'a str,
    },
    DatasetDeleted { topic: &'a str, dataset_id: &'a str },
    DatasetCreated { topic: &'a str, dataset_id: &'a str },
    /// A matched dataset diverges from upstream.
    DriftDetected {
        topic: &'a str,
        dataset_id: &'a str,
        fields: &'a [&'static str],
    },
    DatasetUpdated { topic: &'a str, dataset_id: &'a str },
    /// The CSV side-channel refreshed a dataflow upload.
    CsvUploaded {
        dataset_id: &'a str,
        dataflow_id: &'a str,
    },
    /// A mutating call was skipped because of dry-run mode.
    DryRun {
        operation: Operation,
        topic: &'a str,
    },
    /// Cancellation was requested; undispatched items are skipped.
    Cancelled { skipped: usize },
    /// The pass is over.
    Completed { stats: &'a SyncStats },
}

/// Trait for reporting reconciliation progress.
pub trait ProgressReporter: Send + Sync {
    /// Called when a sync event occurs.
    ///
    /// The default implementation does nothing (silent mode).
    fn report(&self, event: SyncEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Tracing-based reporter for CLI logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: SyncEvent<'_>) {
        match event {
            SyncEvent::TopicsExtracted { count } => {
                info!(count, "Leaf topics found upstream");
            }
            SyncEvent::DatasetsListed { count } => {
                info!(count, "Managed datasets found in catalog");
            }
            SyncEvent::PlanComputed { counts } => {
                info!("{} to be deleted", counts.to_delete);
                info!("{} to be added", counts.to_add);
                info!("{} check for updates", counts.to_update);
            }
            SyncEvent::ItemFailed {
                operation,
                topic,
                error,
            } => match operation {
                Operation::Delete => warn!(topic, error, "Deletion failed"),
                _ => warn!(%operation, topic, error, "Operation failed"),
            },
            SyncEvent::DatasetDeleted { topic, dataset_id } => {
                info!(topic, dataset_id, "Deletion succeeded");
            }
            SyncEvent::DatasetCreated { topic, dataset_id } => {
                info!(topic, dataset_id, "Dataset created");
            }
            SyncEvent::DriftDetected {
                topic,
                dataset_id,
                fields,
            } => {
                info!(topic, dataset_id, fields = ?fields, "Dataset differs from upstream");
            }
            SyncEvent::DatasetUpdated { topic, dataset_id } => {
                debug!(topic, dataset_id, "Dataset updated");
            }
            SyncEvent::CsvUploaded {
                dataset_id,
                dataflow_id,
            } => {
                debug!(dataset_id, dataflow_id, "CSV uploaded");
            }
            SyncEvent::DryRun { operation, topic } => {
                info!(%operation, topic, "Dry run, skipping");
            }
            SyncEvent::Cancelled { skipped } => {
                warn!(skipped, "Sync cancelled");
            }
            SyncEvent::Completed { stats } => {
                info!(
                    created = stats.created,
                    updated = stats.updated,
                    unchanged = stats.unchanged,
                    deleted = stats.deleted,
                    failed = stats.failed,
                    skipped = stats.skipped,
                    "Sync complete"
                );
            }
        }
    }
}
