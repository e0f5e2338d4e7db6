//! odsync core - Reconciliation engine for a .Stat to udata catalog mirror.
//!
//! This crate holds everything that does not talk HTTP:
//!
//! - **Topic extraction**: [`topic`] turns the upstream facet tree into leaf topics
//! - **Planning**: [`ChangeSet`] partitions topics into add, update and delete, with
//!   the mass-deletion gate
//! - **Projection**: [`Projector`] derives the expected dataset (title, tags,
//!   frequency, resources, description) of a topic
//! - **Comparison**: [`compare_dataset`] and [`diff_resources`] detect drift
//! - **Services**: [`ReconcileService`] runs a full pass
//! - **Traits**: [`UpstreamSource`], [`DestinationCatalog`], [`MetadataDeriver`] for
//!   dependency injection
//! - **Progress reporting**: [`ProgressReporter`] trait for decoupled logging
//!
//! # Example
//!
//! ```ignore
//! use odsync_core::{ReconcileService, SyncConfig, TracingReporter};
//!
//! let service = ReconcileService::new(dotstat, udata, projector, "topics", defaults)
//!     .with_config(SyncConfig::default());
//! let report = service.run(&TracingReporter).await?;
//! println!("{} created, {} failed", report.stats.created, report.stats.failed);
//! ```

pub mod changeset;
pub mod compare;
pub mod config;
pub mod description;
pub mod error;
pub mod heuristics;
pub mod models;
pub mod progress;
pub mod projection;
pub mod reconcile;
pub mod resources;
pub mod throttle;
pub mod topic;
pub mod traits;

// Configuration
pub use config::{
    DatasetSettings, HttpConfig, ResourceStrategy, SyncConfig, SyncSettings, ThrottleConfig,
    default_settings_path, load_sync_settings,
};

// Error handling
pub use error::{ApiErrorKind, AppError};

// Domain models
pub use models::{
    Dataflow, DatasetUpdate, DestinationDataset, DestinationResource, FacetTree, Frequency,
    NewDatasetPayload, NewResource, ResourceProjection, ResourceUpdate,
};

// Planning and statistics
pub use changeset::{
    AtomicSyncStats, ChangeSet, Operation, PlanCounts, SyncOutcome, SyncStats,
};

// Comparison
pub use compare::{DatasetDrift, compare_dataset};
pub use resources::{ResourceChangeSet, diff_resources, missing_uploads, order_resources};

// Projection
pub use description::DescriptionRenderer;
pub use heuristics::{DescriptionHeuristics, Language};
pub use projection::{DatasetDefaults, Projector, TopicProjection};

// Progress reporting
pub use progress::{ProgressReporter, SilentReporter, SyncEvent, TracingReporter};

// Traits for dependency injection
pub use traits::{DestinationCatalog, MetadataDeriver, UpstreamSource};

// Services
pub use reconcile::{ItemFailure, ReconcileService, SyncPlan, SyncReport};
pub use throttle::Throttle;
