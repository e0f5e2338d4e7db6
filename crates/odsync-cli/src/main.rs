mod config;

use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::Parser;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::{Command, Config};
use odsync_client::{DotStatClient, DotStatConfig, HttpExecutor, UdataClient, UdataConfig};
use odsync_core::{
    AppError, DatasetDefaults, DescriptionHeuristics, DescriptionRenderer, HttpConfig, Language,
    Projector, ReconcileService, SyncReport, SyncSettings, Throttle, TracingReporter,
    load_sync_settings,
};

type Service = ReconcileService<DotStatClient, UdataClient, DescriptionHeuristics>;

/// Exit status of a pass interrupted by Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = Config::parse();

    match run(config).await {
        Ok(code) => code,
        Err(err) => {
            match err.downcast_ref::<AppError>() {
                Some(app) => error!("{}", app.user_message()),
                None => error!("{:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<ExitCode> {
    let settings =
        load_sync_settings(config.settings.clone()).context("Failed to load sync settings")?;
    let service = build_service(&config, &settings)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, letting in-flight calls finish");
            on_signal.cancel();
        }
    });

    match config.command {
        Command::Sync { .. } => {
            info!(
                dry_run = service.config().dry_run,
                csv_sync = service.config().enable_csv_sync,
                strategy = %service.config().resource_strategy,
                "Starting sync"
            );
            let report = service.run_cancellable(&TracingReporter, cancel).await?;
            print_sync_summary(&report);
            if report.cancelled {
                return Ok(ExitCode::from(EXIT_INTERRUPTED));
            }
        }
        Command::Topics => {
            for topic in service.leaf_topics().await? {
                println!("{}\t{}", topic.path, topic.label());
            }
        }
        Command::ListUnmanaged => {
            for dataset in service.list_unmanaged().await? {
                println!(
                    "{};{}",
                    dataset.title,
                    dataset.page.as_deref().unwrap_or_default()
                );
            }
        }
        Command::Purge { yes } => {
            if !yes {
                bail!("Purge deletes every managed dataset; pass --yes to confirm");
            }
            let stats = service.purge(&TracingReporter, cancel.clone()).await?;
            info!(deleted = stats.deleted, failed = stats.failed, "Purge finished");
            if cancel.is_cancelled() {
                return Ok(ExitCode::from(EXIT_INTERRUPTED));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Wires the HTTP clients, projector and engine configuration from CLI
/// arguments layered over the settings file.
fn build_service(config: &Config, settings: &SyncSettings) -> anyhow::Result<Service> {
    let mut sync_config = settings.reconcile.clone();
    if let Some(tag) = &config.sync_tag {
        sync_config = sync_config.with_sync_tag(tag);
    }
    if let Command::Sync {
        dry_run,
        csv_sync,
        strategy,
    } = &config.command
    {
        if *dry_run {
            sync_config = sync_config.with_dry_run(true);
        }
        if *csv_sync {
            sync_config = sync_config.with_csv_sync(true);
        }
        if let Some(strategy) = strategy {
            sync_config = sync_config.with_resource_strategy(*strategy);
        }
    }

    let http = HttpExecutor::new(
        HttpConfig::from(settings.http),
        Throttle::from_config(&settings.throttle),
    )?;

    let dotstat = DotStatClient::new(
        http.clone(),
        DotStatConfig {
            base_url: config.dotstat_url.clone(),
            lang: config.dotstat_lang.clone(),
            datasource_id: config.dotstat_datasource_id.clone(),
            main_facet: config.dotstat_main_facet.clone(),
            tenant: config.dotstat_tenant.clone(),
            agency: config.dotstat_agency.clone(),
        },
    )?;

    let udata = UdataClient::new(
        http,
        UdataConfig::new(
            &config.odp_url,
            &config.odp_api_key,
            &config.odp_org_id,
            &sync_config.sync_tag,
        ),
    )?;

    let renderer = match &settings.dataset.description_template {
        Some(path) => DescriptionRenderer::from_file(path)?,
        None => DescriptionRenderer::new()?,
    };
    let projector = Projector::new(
        DescriptionHeuristics::new(Language::from_code(&config.dotstat_lang)),
        renderer,
        &config.dotstat_dataflow_url_prefix,
        sync_config.sentinel_tags(),
    );

    let mut defaults = DatasetDefaults::from_settings(&config.odp_org_id, &settings.dataset);
    if config.license.is_some() {
        defaults = defaults.with_license(config.license.clone());
    }

    Ok(
        ReconcileService::new(dotstat, udata, projector, &config.dotstat_main_facet, defaults)
            .with_config(sync_config),
    )
}

fn print_sync_summary(report: &SyncReport) {
    let stats = &report.stats;
    info!("");
    info!("═══════════════════════════════════════════════════════");
    if report.dry_run {
        info!("SYNC COMPLETE (dry run, nothing was changed)");
    } else {
        info!("SYNC COMPLETE");
    }
    info!("═══════════════════════════════════════════════════════");
    info!(
        "Plan: {} to delete, {} to add, {} to check",
        report.plan.to_delete, report.plan.to_add, report.plan.to_update
    );
    info!("  = Unchanged: {}", stats.unchanged);
    info!("  ↑ Updated:   {}", stats.updated);
    info!("  + Created:   {}", stats.created);
    info!("  - Deleted:   {}", stats.deleted);
    info!("  ✗ Failed:    {}", stats.failed);
    if stats.skipped > 0 {
        info!("  ⊘ Skipped:   {}", stats.skipped);
    }
    info!("───────────────────────────────────────────────────────");
    info!("  Total:       {}", stats.total());
    info!("  Successful:  {}", stats.successful());
    info!("  Duration:    {}s", report.duration().num_seconds());
    info!("═══════════════════════════════════════════════════════");

    for failure in &report.failures {
        warn!(
            operation = %failure.operation,
            topic = %failure.topic,
            "  ✗ {}",
            failure.error
        );
    }
}
