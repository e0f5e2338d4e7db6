use std::path::PathBuf;
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use odsync_core::ResourceStrategy;

static VERSION_INFO: LazyLock<String> = LazyLock::new(|| {
    let version = env!("CARGO_PKG_VERSION");

    let commit = option_env!("VERGEN_GIT_SHA")
        .map(|s| s.chars().take(7).collect::<String>())
        .unwrap_or_else(|| "unknown".to_string());

    let built = option_env!("VERGEN_BUILD_DATE").unwrap_or("unknown");
    let target = option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown");
    let rustc = option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown");

    format!("{version}\ncommit: {commit}\nbuilt: {built}\ntarget: {target}\nrustc: {rustc}")
});

pub fn version_info() -> &'static str {
    &VERSION_INFO
}

/// CLI configuration parsed from command line arguments and environment variables.
///
/// A `.env` file in the working directory is loaded first.
#[derive(Parser, Debug)]
#[command(name = "odsync")]
#[command(
    author,
    version = version_info(),
    about = "Mirror .Stat topics as datasets of a udata open data catalog"
)]
#[command(after_help = "Examples:
  odsync sync --dry-run
  odsync sync --csv-sync --strategy full-replace
  odsync topics
  odsync list-unmanaged > manual.csv
  odsync purge --yes

Engine tuning (throttle, retries, thresholds) is read from ~/.config/odsync/sync.toml
when present, or from the file given with --settings.")]
pub struct Config {
    /// .Stat Data Explorer base URL
    #[arg(long, env = "DOTSTAT_URL")]
    pub dotstat_url: String,

    /// Language of the .Stat metadata
    #[arg(long, env = "DOTSTAT_LANG", default_value = "fr")]
    pub dotstat_lang: String,

    /// .Stat datasource id
    #[arg(long, env = "DOTSTAT_DATASOURCE_ID")]
    pub dotstat_datasource_id: String,

    /// Facet holding the topic tree
    #[arg(long, env = "DOTSTAT_MAIN_FACET")]
    pub dotstat_main_facet: String,

    /// .Stat search tenant
    #[arg(long, env = "DOTSTAT_TENANT", default_value = "default")]
    pub dotstat_tenant: String,

    /// Public page prefix of a dataflow; the dataflow id is appended
    #[arg(long, env = "DOTSTAT_DATAFLOW_URL_PREFIX")]
    pub dotstat_dataflow_url_prefix: String,

    /// SDMX agency of the dataflows, used for CSV exports
    #[arg(long, env = "DOTSTAT_AGENCY", default_value = "LU1")]
    pub dotstat_agency: String,

    /// udata API root, e.g. https://data.public.lu/api/1
    #[arg(long, env = "ODP_URL")]
    pub odp_url: String,

    /// udata API key
    #[arg(long, env = "ODP_API_KEY", hide_env_values = true)]
    pub odp_api_key: String,

    /// udata organization owning the managed datasets
    #[arg(long, env = "ODP_ORG_ID")]
    pub odp_org_id: String,

    /// Tag marking managed datasets (overrides the settings file)
    #[arg(long, env = "SYNC_TAG")]
    pub sync_tag: Option<String>,

    /// License of created datasets (overrides the settings file)
    #[arg(long, env = "LICENSE")]
    pub license: Option<String>,

    /// Custom path to the sync.toml settings file
    #[arg(long, global = true, value_name = "PATH")]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one reconciliation pass
    #[command(after_help = "Examples:
  odsync sync                          # Reconcile with settings defaults
  odsync sync --dry-run                # Log the plan and drift, change nothing
  odsync sync --strategy full-replace  # Recreate resources of drifted datasets")]
    Sync {
        /// Plan and log, but issue no mutating call
        #[arg(long)]
        dry_run: bool,

        /// Upload the CSV export of every dataflow
        #[arg(long)]
        csv_sync: bool,

        /// Resource strategy: url-diff or full-replace
        #[arg(long, value_name = "STRATEGY")]
        strategy: Option<ResourceStrategy>,
    },
    /// Print the upstream leaf topics and their labels
    Topics,
    /// Print `Title;URL` for organization datasets not managed by the sync
    ListUnmanaged,
    /// Delete every managed dataset
    Purge {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}
