//! Integration tests for ReconcileService.

use crate::integration::common::{
    Call, MockCatalog, MockUpstream, URL_PREFIX, dataflow, managed_dataset, sample_upstream,
    service, test_config,
};
use odsync_core::{AppError, Operation, ResourceStrategy, SilentReporter};
use tokio_util::sync::CancellationToken;

const COMMERCE: &str = "1|Économie#ECO#|Commerce";
const PRIX: &str = "1|Économie#ECO#|Prix";
const POPULATION: &str = "0|Population";

/// Runs a first pass so the catalog mirrors `sample_upstream()`, then clears the log.
async fn synced_catalog() -> MockCatalog {
    let catalog = MockCatalog::new();
    service(sample_upstream(), catalog.clone(), test_config())
        .run(&SilentReporter)
        .await
        .unwrap();
    catalog.clear_calls();
    catalog
}

#[tokio::test]
async fn test_first_run_creates_every_leaf_topic() {
    let catalog = MockCatalog::new();
    let service = service(sample_upstream(), catalog.clone(), test_config());

    let report = service.run(&SilentReporter).await.unwrap();

    assert_eq!(report.plan.to_add, 3);
    assert_eq!(report.stats.created, 3);
    assert_eq!(report.stats.failed, 0);
    assert!(report.is_complete());
    assert_eq!(catalog.len(), 3, "the branch bucket must not become a dataset");

    let commerce = catalog.find_by_topic(COMMERCE).unwrap();
    assert_eq!(commerce.title, "Économie - Commerce");
    assert_eq!(commerce.frequency.as_deref(), Some("annual"));
    assert_eq!(commerce.resources.len(), 2);
    assert_eq!(
        commerce.resources[0].url,
        format!("{}DF_EXP", URL_PREFIX)
    );
    assert!(commerce.tags.contains(&"dotstat-sync".to_string()));
    assert!(commerce.tags.contains(&"exportations".to_string()));
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let catalog = synced_catalog().await;

    let report = service(sample_upstream(), catalog.clone(), test_config())
        .run(&SilentReporter)
        .await
        .unwrap();

    assert_eq!(report.plan.to_update, 3);
    assert_eq!(report.stats.unchanged, 3);
    assert_eq!(report.stats.changes(), 0);
    assert!(catalog.calls().is_empty(), "calls: {:?}", catalog.calls());
}

#[tokio::test]
async fn test_topics_gone_upstream_are_deleted() {
    let catalog = synced_catalog().await;
    catalog.insert(managed_dataset("old-1", "0|Ancien thème", "Ancien thème"));

    let report = service(sample_upstream(), catalog.clone(), test_config())
        .run(&SilentReporter)
        .await
        .unwrap();

    assert_eq!(report.plan.to_delete, 1);
    assert_eq!(report.stats.deleted, 1);
    assert_eq!(catalog.calls(), vec![Call::DeleteDataset("old-1".to_string())]);
    assert!(catalog.get("old-1").is_none());
}

#[tokio::test]
async fn test_unmanaged_datasets_are_never_touched() {
    let catalog = synced_catalog().await;
    let mut manual = managed_dataset("manual-1", "0|Ancien thème", "Hand made");
    manual.tags = vec!["environment".to_string()];
    catalog.insert(manual);

    let report = service(sample_upstream(), catalog.clone(), test_config())
        .run(&SilentReporter)
        .await
        .unwrap();

    assert_eq!(report.plan.to_delete, 0);
    assert!(catalog.get("manual-1").is_some());
}

#[tokio::test]
async fn test_malformed_facet_aborts_before_any_call() {
    let catalog = MockCatalog::new();
    catalog.insert(managed_dataset("ds-a", "0|A", "A"));

    let result = service(MockUpstream::new(), catalog.clone(), test_config())
        .run(&SilentReporter)
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, AppError::MalformedUpstream(_)));
    assert!(err.is_fatal());
    assert!(catalog.calls().is_empty());
    assert_eq!(catalog.len(), 1);
}

#[tokio::test]
async fn test_create_failure_is_isolated() {
    let catalog = MockCatalog::new();
    catalog.fail_create("Population");

    let report = service(sample_upstream(), catalog.clone(), test_config())
        .run(&SilentReporter)
        .await
        .unwrap();

    assert_eq!(report.stats.created, 2);
    assert_eq!(report.stats.failed, 1);
    assert!(!report.is_complete());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].operation, Operation::Create);
    assert_eq!(report.failures[0].topic, POPULATION);
    assert!(report.failures[0].error.contains("500"));
    assert!(catalog.find_by_topic(COMMERCE).is_some());
}

#[tokio::test]
async fn test_fetch_failure_skips_only_that_topic() {
    let catalog = synced_catalog().await;
    catalog.edit_topic(PRIX, |d| d.title = "Stale".to_string());
    catalog.edit_topic(COMMERCE, |d| d.title = "Stale".to_string());

    let upstream = sample_upstream().with_failing_topic(PRIX);
    let report = service(upstream, catalog.clone(), test_config())
        .run(&SilentReporter)
        .await
        .unwrap();

    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.updated, 1);
    assert_eq!(report.failures[0].operation, Operation::FetchTopic);
    assert_eq!(report.failures[0].topic, PRIX);
    assert_eq!(catalog.find_by_topic(PRIX).unwrap().title, "Stale");
    assert_eq!(
        catalog.find_by_topic(COMMERCE).unwrap().title,
        "Économie - Commerce"
    );
}

#[tokio::test]
async fn test_deletes_run_before_topic_fetch() {
    let catalog = synced_catalog().await;
    catalog.insert(managed_dataset("old-1", "0|Ancien thème", "Ancien thème"));
    catalog.edit_topic(COMMERCE, |d| d.title = "Stale".to_string());

    let upstream = sample_upstream().with_failing_topic(PRIX);
    let report = service(upstream, catalog.clone(), test_config())
        .run(&SilentReporter)
        .await
        .unwrap();

    // A failing topic fetch neither blocks nor precedes the delete phase.
    assert_eq!(report.stats.deleted, 1);
    assert_eq!(report.failures[0].operation, Operation::FetchTopic);
    let calls = catalog.calls();
    assert_eq!(calls[0], Call::DeleteDataset("old-1".to_string()));
    assert!(matches!(calls.last(), Some(Call::UpdateDataset(..))));
}

#[tokio::test]
async fn test_title_drift_sends_full_tag_set() {
    let catalog = synced_catalog().await;
    let expected_tags = catalog.find_by_topic(COMMERCE).unwrap().tags;
    catalog.edit_topic(COMMERCE, |d| d.title = "Old title".to_string());

    let report = service(sample_upstream(), catalog.clone(), test_config())
        .run(&SilentReporter)
        .await
        .unwrap();

    assert_eq!(report.stats.updated, 1);
    assert_eq!(report.stats.unchanged, 2);

    let calls = catalog.calls();
    assert_eq!(calls.len(), 1, "calls: {:?}", calls);
    let Call::UpdateDataset(_, update) = &calls[0] else {
        panic!("expected a dataset update, got {:?}", calls[0]);
    };
    assert_eq!(update.title.as_deref(), Some("Économie - Commerce"));
    assert_eq!(update.tags, expected_tags);
    assert_eq!(update.description, None);
    assert_eq!(update.frequency, None);
}

#[tokio::test]
async fn test_resource_drift_applies_delete_add_update_in_order() {
    let catalog = synced_catalog().await;
    let dataset = catalog.find_by_topic(COMMERCE).unwrap();
    let imp_id = dataset
        .resources
        .iter()
        .find(|r| r.title == "Importations")
        .unwrap()
        .id
        .clone();
    let exp_id = dataset
        .resources
        .iter()
        .find(|r| r.title == "Exportations")
        .unwrap()
        .id
        .clone();

    let upstream = MockUpstream::new()
        .with_branch("0|Économie#ECO#")
        .with_topic(
            COMMERCE,
            vec![
                dataflow(
                    "DF_EXP",
                    "Exportations de biens",
                    "Périodicité : mensuelle - (x)\nMots-clés : exportations, commerce",
                ),
                dataflow("DF_BAL", "Balance commerciale", "Mots-clés : commerce"),
            ],
        )
        .with_topic(
            PRIX,
            vec![dataflow("DF_PRI", "Indice des prix", "Mots-clés : prix")],
        )
        .with_topic(POPULATION, Vec::new());

    let report = service(upstream, catalog.clone(), test_config())
        .run(&SilentReporter)
        .await
        .unwrap();
    assert_eq!(report.stats.updated, 1);

    let calls = catalog.calls();
    assert_eq!(calls.len(), 4, "calls: {:?}", calls);
    assert_eq!(calls[0], Call::DeleteResource(dataset.id.clone(), imp_id));
    assert_eq!(
        calls[1],
        Call::CreateResource(dataset.id.clone(), format!("{}DF_BAL", URL_PREFIX))
    );
    assert_eq!(calls[2], Call::UpdateResource(dataset.id.clone(), exp_id));
    let Call::UpdateDataset(_, update) = &calls[3] else {
        panic!("expected the dataset update last, got {:?}", calls[3]);
    };
    assert!(update.description.as_deref().unwrap().contains("Balance commerciale"));
    assert_eq!(update.frequency.map(|f| f.as_str()), Some("monthly"));

    // The catalog now matches; a further pass is a no-op.
    catalog.clear_calls();
    let upstream_again = MockUpstream::new()
        .with_branch("0|Économie#ECO#")
        .with_topic(
            COMMERCE,
            vec![
                dataflow(
                    "DF_EXP",
                    "Exportations de biens",
                    "Périodicité : mensuelle - (x)\nMots-clés : exportations, commerce",
                ),
                dataflow("DF_BAL", "Balance commerciale", "Mots-clés : commerce"),
            ],
        )
        .with_topic(
            PRIX,
            vec![dataflow("DF_PRI", "Indice des prix", "Mots-clés : prix")],
        )
        .with_topic(POPULATION, Vec::new());
    service(upstream_again, catalog.clone(), test_config())
        .run(&SilentReporter)
        .await
        .unwrap();
    assert!(catalog.calls().is_empty(), "calls: {:?}", catalog.calls());
}

#[tokio::test]
async fn test_full_replace_strategy_recreates_and_reorders() {
    let catalog = synced_catalog().await;
    catalog.edit_topic(COMMERCE, |d| {
        d.resources[0].description = Some("Edited by hand".to_string());
    });
    let dataset_id = catalog.find_by_topic(COMMERCE).unwrap().id;

    let config = test_config().with_resource_strategy(ResourceStrategy::FullReplace);
    service(sample_upstream(), catalog.clone(), config)
        .run(&SilentReporter)
        .await
        .unwrap();

    let calls = catalog.calls();
    let kinds: Vec<&str> = calls
        .iter()
        .map(|c| match c {
            Call::DeleteResource(..) => "delete",
            Call::CreateResource(..) => "create",
            Call::Reorder(..) => "reorder",
            Call::UpdateDataset(..) => "update",
            _ => "other",
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["delete", "delete", "create", "create", "reorder", "update"]
    );

    let titles: Vec<String> = catalog
        .get(&dataset_id)
        .unwrap()
        .resources
        .into_iter()
        .map(|r| r.title)
        .collect();
    assert_eq!(titles, vec!["Exportations", "Importations"]);
}

#[tokio::test]
async fn test_csv_sync_uploads_and_orders_resources() {
    let catalog = MockCatalog::new();
    let upstream = MockUpstream::new().with_topic(
        "0|Commerce",
        vec![
            dataflow("DF_B", "B table", ""),
            dataflow("DF_A", "A table", ""),
        ],
    );

    let config = test_config().with_csv_sync(true);
    let report = service(upstream.clone(), catalog.clone(), config.clone())
        .run(&SilentReporter)
        .await
        .unwrap();
    assert_eq!(report.stats.created, 1);

    let dataset = catalog.find_by_topic("0|Commerce").unwrap();
    let uploads: Vec<String> = catalog
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::UploadCsv(_, filename) => Some(filename),
            _ => None,
        })
        .collect();
    assert_eq!(uploads, vec!["DF_B.csv", "DF_A.csv"]);

    let order: Vec<(String, String)> = dataset
        .resources
        .iter()
        .map(|r| (r.title.clone(), r.format().to_string()))
        .collect();
    assert_eq!(
        order,
        vec![
            ("A table".to_string(), "html".to_string()),
            ("A table".to_string(), "csv".to_string()),
            ("B table".to_string(), "html".to_string()),
            ("B table".to_string(), "csv".to_string()),
        ]
    );

    // CSV uploads are not managed resources, so they cause no drift.
    catalog.clear_calls();
    service(upstream, catalog.clone(), config)
        .run(&SilentReporter)
        .await
        .unwrap();
    assert!(catalog.calls().is_empty(), "calls: {:?}", catalog.calls());
}

#[tokio::test]
async fn test_csv_refresh_replaces_previous_upload() {
    let catalog = MockCatalog::new();
    let config = test_config().with_csv_sync(true);
    let first = MockUpstream::new().with_topic("0|Commerce", vec![dataflow("DF_A", "A table", "")]);
    service(first, catalog.clone(), config.clone())
        .run(&SilentReporter)
        .await
        .unwrap();

    let second = MockUpstream::new().with_topic(
        "0|Commerce",
        vec![dataflow("DF_A", "A table", "Now described")],
    );
    service(second, catalog.clone(), config)
        .run(&SilentReporter)
        .await
        .unwrap();

    let dataset = catalog.find_by_topic("0|Commerce").unwrap();
    let csv_count = dataset.resources.iter().filter(|r| r.format() == "csv").count();
    assert_eq!(csv_count, 1);
}

#[tokio::test]
async fn test_failed_csv_upload_is_retried_next_pass() {
    let catalog = MockCatalog::new();
    let config = test_config().with_csv_sync(true);
    let flows = vec![
        dataflow("DF_A", "A table", ""),
        dataflow("DF_B", "B table", ""),
    ];
    let csv_titles = |catalog: &MockCatalog| -> Vec<String> {
        let mut titles: Vec<String> = catalog
            .find_by_topic("0|Commerce")
            .unwrap()
            .resources
            .into_iter()
            .filter(|r| r.format() == "csv")
            .map(|r| r.title)
            .collect();
        titles.sort();
        titles
    };

    let broken = MockUpstream::new()
        .with_topic("0|Commerce", flows.clone())
        .with_failing_csv("DF_A");
    let report = service(broken, catalog.clone(), config.clone())
        .run(&SilentReporter)
        .await
        .unwrap();
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.failures[0].operation, Operation::Create);
    assert_eq!(catalog.len(), 1, "the dataset itself was created");
    assert!(csv_titles(&catalog).is_empty());

    // Core fields are clean, but the missing exports still get uploaded.
    catalog.clear_calls();
    let healthy = MockUpstream::new().with_topic("0|Commerce", flows);
    let report = service(healthy.clone(), catalog.clone(), config.clone())
        .run(&SilentReporter)
        .await
        .unwrap();
    assert_eq!(report.stats.updated, 1);
    assert!(report.is_complete());
    assert_eq!(csv_titles(&catalog), vec!["A table", "B table"]);
    assert!(
        !catalog
            .calls()
            .iter()
            .any(|c| matches!(c, Call::UpdateDataset(..))),
        "no metadata drift, so no dataset update"
    );

    catalog.clear_calls();
    let report = service(healthy, catalog.clone(), config)
        .run(&SilentReporter)
        .await
        .unwrap();
    assert_eq!(report.stats.unchanged, 1);
    assert!(catalog.calls().is_empty(), "calls: {:?}", catalog.calls());
}

#[tokio::test]
async fn test_dry_run_issues_no_mutating_call() {
    let catalog = MockCatalog::new();
    catalog.insert(managed_dataset("old-1", "0|Ancien thème", "Ancien thème"));

    let config = test_config().with_dry_run(true);
    let report = service(sample_upstream(), catalog.clone(), config)
        .run(&SilentReporter)
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.stats.created, 3);
    assert_eq!(report.stats.deleted, 1);
    assert!(catalog.calls().is_empty());
    assert_eq!(catalog.len(), 1);
}

#[tokio::test]
async fn test_cancelled_run_dispatches_nothing() {
    let catalog = MockCatalog::new();
    catalog.insert(managed_dataset("old-1", "0|Ancien thème", "Ancien thème"));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = service(sample_upstream(), catalog.clone(), test_config())
        .run_cancellable(&SilentReporter, cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(!report.is_complete());
    assert_eq!(report.stats.skipped, 4);
    assert!(catalog.calls().is_empty());
}

#[tokio::test]
async fn test_dataset_without_join_key_is_ignored() {
    let catalog = MockCatalog::new();
    let mut orphan = managed_dataset("orphan", "x", "Orphan");
    orphan.extras.clear();
    catalog.insert(orphan);

    let service = service(sample_upstream(), catalog.clone(), test_config());
    let plan = service.plan().await.unwrap();

    assert!(plan.existing.is_empty());
    assert!(plan.changes.to_delete.is_empty());
    assert_eq!(plan.changes.to_add.len(), 3);
}

#[tokio::test]
async fn test_duplicate_join_key_keeps_first_dataset() {
    let catalog = MockCatalog::new();
    catalog.insert(managed_dataset("a-first", POPULATION, "Population"));
    catalog.insert(managed_dataset("b-second", POPULATION, "Population"));

    let plan = service(sample_upstream(), catalog, test_config())
        .plan()
        .await
        .unwrap();

    assert_eq!(plan.existing[POPULATION].id, "a-first");
}

#[tokio::test]
async fn test_purge_and_list_unmanaged() {
    let catalog = synced_catalog().await;
    let mut manual = managed_dataset("manual-1", "none", "Hand made");
    manual.tags = vec!["environment".to_string()];
    catalog.insert(manual);

    let service = service(sample_upstream(), catalog.clone(), test_config());

    let unmanaged = service.list_unmanaged().await.unwrap();
    assert_eq!(unmanaged.len(), 1);
    assert_eq!(unmanaged[0].id, "manual-1");

    let stats = service
        .purge(&SilentReporter, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.deleted, 3);
    assert_eq!(catalog.len(), 1);
    assert!(catalog.get("manual-1").is_some());
}
