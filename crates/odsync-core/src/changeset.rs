//! Set reconciliation between upstream topics and destination records.
//!
//! This module is pure: it only operates on id sets that were already fetched.
//! It also hosts the run statistics, which are tallied per phase.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::AppError;

/// Partition of `topics ∪ destination ids` into what to add, update and delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub to_add: BTreeSet<String>,
    pub to_update: BTreeSet<String>,
    pub to_delete: BTreeSet<String>,
}

impl ChangeSet {
    /// Computes the three-way diff.
    ///
    /// ```
    /// use std::collections::BTreeSet;
    /// use odsync_core::ChangeSet;
    ///
    /// let topics: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
    /// let existing: BTreeSet<String> = ["b", "c"].iter().map(|s| s.to_string()).collect();
    /// let plan = ChangeSet::compute(&topics, &existing);
    ///
    /// assert!(plan.to_add.contains("a"));
    /// assert!(plan.to_update.contains("b"));
    /// assert!(plan.to_delete.contains("c"));
    /// ```
    pub fn compute(topic_ids: &BTreeSet<String>, destination_ids: &BTreeSet<String>) -> Self {
        Self {
            to_add: topic_ids.difference(destination_ids).cloned().collect(),
            to_update: topic_ids.intersection(destination_ids).cloned().collect(),
            to_delete: destination_ids.difference(topic_ids).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Number of ids across all three partitions.
    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_update.len() + self.to_delete.len()
    }

    /// Refuses plans that would only delete, and delete a lot.
    ///
    /// An empty or truncated upstream response looks exactly like "everything was
    /// removed upstream"; this check stops the run before any delete is issued.
    pub fn check_mass_deletion(&self, threshold: usize) -> Result<(), AppError> {
        if self.to_add.is_empty() && self.to_update.is_empty() && self.to_delete.len() > threshold
        {
            return Err(AppError::MassDeletion {
                count: self.to_delete.len(),
                threshold,
            });
        }
        Ok(())
    }

    pub fn counts(&self) -> PlanCounts {
        PlanCounts {
            to_delete: self.to_delete.len(),
            to_add: self.to_add.len(),
            to_update: self.to_update.len(),
        }
    }
}

/// Sizes of a [`ChangeSet`], for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanCounts {
    pub to_delete: usize,
    pub to_add: usize,
    pub to_update: usize,
}

/// Operation applied to one top-level item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
    FetchTopic,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::FetchTopic => "fetch-topic",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of processing one top-level item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Dataset matched upstream, nothing sent
    Unchanged,
    /// At least one field or resource was changed
    Updated,
    /// New dataset created
    Created,
    /// Dataset removed from the catalog
    Deleted,
    /// The item's operation failed; retried on the next run
    Failed,
    /// The item was not dispatched (cancellation)
    Skipped,
}

/// Statistics for a reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub unchanged: usize,
    pub updated: usize,
    pub created: usize,
    pub deleted: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Unchanged => self.unchanged += 1,
            SyncOutcome::Updated => self.updated += 1,
            SyncOutcome::Created => self.created += 1,
            SyncOutcome::Deleted => self.deleted += 1,
            SyncOutcome::Failed => self.failed += 1,
            SyncOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.successful() + self.failed + self.skipped
    }

    pub fn successful(&self) -> usize {
        self.unchanged + self.updated + self.created + self.deleted
    }

    /// Number of mutations that went through.
    pub fn changes(&self) -> usize {
        self.updated + self.created + self.deleted
    }
}

/// Lock-free counterpart of [`SyncStats`] for concurrently processed items.
#[derive(Debug, Default)]
pub struct AtomicSyncStats {
    unchanged: AtomicUsize,
    updated: AtomicUsize,
    created: AtomicUsize,
    deleted: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl AtomicSyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: SyncOutcome) {
        let counter = match outcome {
            SyncOutcome::Unchanged => &self.unchanged,
            SyncOutcome::Updated => &self.updated,
            SyncOutcome::Created => &self.created,
            SyncOutcome::Deleted => &self.deleted,
            SyncOutcome::Failed => &self.failed,
            SyncOutcome::Skipped => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn to_stats(&self) -> SyncStats {
        SyncStats {
            unchanged: self.unchanged.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}
