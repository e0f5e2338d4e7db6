//! Configuration types for the reconciliation engine and its clients.
//!
//! Endpoints and secrets come from the command line / environment; engine tuning
//! lives in an optional `sync.toml`:
//!
//! ```toml
//! [reconcile]
//! mass_delete_threshold = 100
//! resource_strategy = "url-diff"
//!
//! [throttle]
//! calls = 10
//! window_ms = 1000
//!
//! [http]
//! timeout_secs = 30
//!
//! [dataset]
//! license = "cc-by"
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

// =============================================================================
// Engine configuration
// =============================================================================

/// How the resources of a matched dataset are brought in line with upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceStrategy {
    /// URL-keyed diff: only the differing resources are touched.
    #[default]
    UrlDiff,
    /// Delete every resource, re-create all upstream ones, then reorder.
    FullReplace,
}

impl fmt::Display for ResourceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UrlDiff => write!(f, "url-diff"),
            Self::FullReplace => write!(f, "full-replace"),
        }
    }
}

impl FromStr for ResourceStrategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "url-diff" => Ok(Self::UrlDiff),
            "full-replace" => Ok(Self::FullReplace),
            _ => Err(AppError::ConfigError(format!(
                "Unknown resource strategy: '{}'. Valid options: url-diff, full-replace",
                s
            ))),
        }
    }
}

/// Reconciliation pass configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Above this many deletions, a delete-only plan aborts the run.
    pub mass_delete_threshold: usize,
    /// Key of the destination `extras` entry holding the upstream topic id.
    pub join_key_field: String,
    /// Resource format owned by the sync; other formats are left alone.
    pub managed_format: String,
    /// Tag marking a dataset as managed by the sync.
    pub sync_tag: String,
    /// Tags appended to every managed dataset.
    pub extra_tags: Vec<String>,
    /// Upload the CSV of every dataflow next to its link resource.
    pub enable_csv_sync: bool,
    pub resource_strategy: ResourceStrategy,
    /// Plan and log, but issue no mutating call.
    pub dry_run: bool,
    /// Number of items processed concurrently within a phase.
    pub concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mass_delete_threshold: 100,
            join_key_field: "dotstat_id".to_string(),
            managed_format: "html".to_string(),
            sync_tag: "dotstat-sync".to_string(),
            extra_tags: vec!["statistics".to_string(), "statistiques".to_string()],
            enable_csv_sync: false,
            resource_strategy: ResourceStrategy::UrlDiff,
            dry_run: false,
            concurrency: 8,
        }
    }
}

impl SyncConfig {
    pub fn with_sync_tag(mut self, tag: impl Into<String>) -> Self {
        self.sync_tag = tag.into();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_csv_sync(mut self, enabled: bool) -> Self {
        self.enable_csv_sync = enabled;
        self
    }

    pub fn with_resource_strategy(mut self, strategy: ResourceStrategy) -> Self {
        self.resource_strategy = strategy;
        self
    }

    pub fn with_mass_delete_threshold(mut self, threshold: usize) -> Self {
        self.mass_delete_threshold = threshold;
        self
    }

    /// Sets the concurrency, never below one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// The sentinel tags every managed dataset carries: sync tag first, then extras.
    pub fn sentinel_tags(&self) -> Vec<String> {
        std::iter::once(self.sync_tag.clone())
            .chain(self.extra_tags.iter().cloned())
            .collect()
    }
}

// =============================================================================
// Throttle and HTTP configuration
// =============================================================================

/// Call budget shared by every outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Calls allowed per window.
    pub calls: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            calls: 10,
            window_ms: 1000,
        }
    }
}

impl ThrottleConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// HTTP client configuration for external API calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

/// `[http]` section of the settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        let defaults = HttpConfig::default();
        Self {
            timeout_secs: defaults.timeout.as_secs(),
            max_retries: defaults.max_retries,
            retry_base_delay_ms: defaults.retry_base_delay.as_millis() as u64,
        }
    }
}

impl From<HttpSettings> for HttpConfig {
    fn from(settings: HttpSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.timeout_secs),
            max_retries: settings.max_retries,
            retry_base_delay: Duration::from_millis(settings.retry_base_delay_ms),
        }
    }
}

// =============================================================================
// Dataset settings
// =============================================================================

/// Static metadata attached to every created dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSettings {
    /// License id; omitted from the payload when unset.
    pub license: Option<String>,
    /// Spatial granularity, e.g. `country`.
    pub spatial_granularity: Option<String>,
    /// Spatial zones, e.g. `["country:lu"]`.
    pub spatial_zones: Vec<String>,
    /// Handlebars template for dataset descriptions; the built-in one is used when unset.
    pub description_template: Option<PathBuf>,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            license: None,
            spatial_granularity: Some("country".to_string()),
            spatial_zones: vec!["country:lu".to_string()],
            description_template: None,
        }
    }
}

// =============================================================================
// Settings file (sync.toml)
// =============================================================================

/// Root of the `sync.toml` settings file. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub reconcile: SyncConfig,
    pub throttle: ThrottleConfig,
    pub http: HttpSettings,
    pub dataset: DatasetSettings,
}

/// Default settings file name.
pub const SETTINGS_FILE_NAME: &str = "sync.toml";

/// Returns the default configuration directory: `~/.config/odsync/`.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("odsync"))
}

/// Returns the default settings path: `~/.config/odsync/sync.toml`.
pub fn default_settings_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join(SETTINGS_FILE_NAME))
}

/// Load engine settings from a TOML file.
///
/// # Returns
/// * `Ok(settings)` - Parsed settings, or defaults when the default file is absent
/// * `Err(e)` - An explicit path does not exist, or the file is invalid
pub fn load_sync_settings(path: Option<PathBuf>) -> Result<SyncSettings, AppError> {
    let explicit = path.is_some();
    let Some(settings_path) = path.or_else(default_settings_path) else {
        return Ok(SyncSettings::default());
    };

    if !settings_path.exists() {
        if explicit {
            return Err(AppError::ConfigError(format!(
                "Settings file not found: {}",
                settings_path.display()
            )));
        }
        tracing::debug!(path = %settings_path.display(), "No settings file, using defaults");
        return Ok(SyncSettings::default());
    }

    read_settings(&settings_path)
}

fn read_settings(path: &Path) -> Result<SyncSettings, AppError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AppError::ConfigError(format!(
            "Failed to read settings file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let settings: SyncSettings = toml::from_str(&content).map_err(|e| {
        AppError::ConfigError(format!("Invalid TOML in '{}': {}", path.display(), e))
    })?;

    if settings.throttle.calls == 0 || settings.throttle.window_ms == 0 {
        return Err(AppError::ConfigError(
            "[throttle] calls and window_ms must be greater than zero".to_string(),
        ));
    }

    Ok(settings)
}
