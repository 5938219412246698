//! End-to-end tests of the sync orchestrator and schema bootstrapper
//! against the in-memory mock.

use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use vendsync_engine::{
    bootstrap, catalog_schema, Auth, BootstrapConfig, DestinationConfig, EnsureOutcome,
    ExistingPolicy, Method, MockHttpClient, RequestClient, RetryConfig, SourceConfig, SyncConfig,
    SyncError, SyncOrchestrator,
};

fn sync_config() -> SyncConfig {
    SyncConfig::new(
        SourceConfig::new("appBase", "pat").with_api_url(MockHttpClient::SOURCE_URL),
        DestinationConfig::new(MockHttpClient::DESTINATION_URL, "tok", "zgovend"),
    )
    .with_read_retry(RetryConfig::no_delay(4))
    .with_write_retry(RetryConfig::no_delay(2))
}

fn product(id: &str, sku: &str, name: &str) -> Value {
    json!({
        "id": id,
        "createdTime": "2024-01-01T00:00:00.000Z",
        "fields": {"商品編號": sku, "商品名稱": name, "售價": 30},
    })
}

fn machine(id: &str, fields: Value) -> Value {
    json!({"id": id, "createdTime": "2024-02-01T00:00:00.000Z", "fields": fields})
}

/// A source base with products, machines and both reference tables, and a
/// destination already holding one product with id 500.
fn catalog_mock() -> Arc<MockHttpClient> {
    let mock = Arc::new(MockHttpClient::new());
    mock.add_source_table(
        "商品",
        "商品名稱",
        vec![
            product("recP1", "A100", "Cola"),
            product("recP2", "A100", "Cola (dup)"),
            product("recP3", "B200", "Tea"),
        ],
    );
    mock.add_source_table(
        "販賣機",
        "機號",
        vec![
            machine(
                "recV1",
                json!({
                    "機號": "VM-001",
                    "型號": ["recM1"],
                    "所在門市": ["recS1"],
                    "最後心跳": ["2024-05-30T10:00:00.000Z"],
                }),
            ),
            machine("recV2", json!({"機號": "VM-002", "型號": ["recMissing"]})),
        ],
    );
    mock.add_source_table(
        "型號",
        "名稱",
        vec![json!({"id": "recM1", "fields": {"名稱": "VM-200"}})],
    );
    mock.add_source_table(
        "門市",
        "店名",
        vec![json!({"id": "recS1", "fields": {"店名": "Xinyi", "地址": "No. 7", "店號": "S01"}})],
    );

    mock.seed_destination_rows("products", vec![json!({"id": 500, "sku": "LEGACY"})]);
    mock.seed_destination_rows("machines", vec![]);
    mock.seed_destination_rows("operators", vec![]);
    mock
}

fn find<'a>(rows: &'a [Value], key: &str, value: &str) -> Option<&'a Value> {
    rows.iter().find(|r| r[key] == json!(value))
}

#[test]
fn duplicate_sku_scenario_and_rerun() {
    let mock = catalog_mock();
    let orchestrator = SyncOrchestrator::new(sync_config(), Arc::clone(&mock)).unwrap();

    let first = orchestrator.run().unwrap();
    let products = first.entity("products");
    assert_eq!(products.created, 2);
    assert_eq!(products.skipped_duplicate, 1);
    assert_eq!(products.skipped_existing, 0);

    let rows = mock.destination_rows("products");
    let a100 = find(&rows, "sku", "A100").unwrap();
    assert_eq!(a100["id"], json!(501));
    assert_eq!(a100["name"], json!("Cola"));
    assert_eq!(find(&rows, "sku", "B200").unwrap()["id"], json!(502));

    let second = orchestrator.run().unwrap();
    let products = second.entity("products");
    assert_eq!(products.created, 0);
    assert_eq!(products.skipped_existing, 3);
    assert_eq!(second.total_created(), 0);
    assert_eq!(mock.destination_rows("products").len(), rows.len());
}

#[test]
fn idempotent_rerun_creates_nothing() {
    let mock = catalog_mock();
    let orchestrator = SyncOrchestrator::new(sync_config(), Arc::clone(&mock)).unwrap();

    orchestrator.run().unwrap();
    let products = mock.destination_rows("products").len();
    let machines = mock.destination_rows("machines").len();

    mock.clear_requests();
    let second = orchestrator.run().unwrap();
    assert_eq!(second.total_created(), 0);
    assert_eq!(mock.count_method(Method::Post), 0);
    assert_eq!(mock.destination_rows("products").len(), products);
    assert_eq!(mock.destination_rows("machines").len(), machines);
}

#[test]
fn natural_keys_stay_unique_across_runs() {
    let mock = catalog_mock();
    let orchestrator = SyncOrchestrator::new(sync_config(), Arc::clone(&mock)).unwrap();
    for _ in 0..3 {
        orchestrator.run().unwrap();
    }

    for (table, key) in [("products", "sku"), ("machines", "code")] {
        let rows = mock.destination_rows(table);
        let keys: HashSet<_> = rows.iter().map(|r| r[key].to_string()).collect();
        assert_eq!(keys.len(), rows.len(), "duplicate keys in {table}");
    }
}

#[test]
fn machine_without_heartbeat_scenario() {
    let mock = catalog_mock();
    SyncOrchestrator::new(sync_config(), Arc::clone(&mock))
        .unwrap()
        .run()
        .unwrap();

    let rows = mock.destination_rows("machines");
    let live = find(&rows, "code", "VM-001").unwrap();
    assert_eq!(live["status"], json!("active"));
    assert_eq!(live["type"], json!("VM-200"));
    assert_eq!(live["area"], json!("Xinyi"));
    assert_eq!(live["last_sync_at"], json!("2024-05-30T10:00:00.000Z"));

    let idle = find(&rows, "code", "VM-002").unwrap();
    assert_eq!(idle["status"], json!("inactive"));
    let idle = idle.as_object().unwrap();
    assert!(!idle.contains_key("last_sync_at"));
    assert!(!idle.contains_key("type"));
    assert!(!idle.contains_key("area"));
    assert_eq!(idle["updated_at"], json!("2024-02-01T00:00:00.000Z"));
}

#[test]
fn surrogate_ids_increase_above_existing_max() {
    let mock = catalog_mock();
    SyncOrchestrator::new(sync_config(), Arc::clone(&mock))
        .unwrap()
        .run()
        .unwrap();

    let created: Vec<u64> = mock
        .destination_rows("products")
        .iter()
        .filter(|r| r["sku"] != json!("LEGACY"))
        .filter_map(|r| r["id"].as_u64())
        .collect();
    assert!(created.iter().all(|id| *id > 500));
    assert!(created.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn operator_link_toggle() {
    let mock = catalog_mock();
    SyncOrchestrator::new(
        sync_config().with_operator_code("acme").with_operator_link(true),
        Arc::clone(&mock),
    )
    .unwrap()
    .run()
    .unwrap();

    let operator_id = mock.destination_rows("operators")[0]["id"].clone();
    for row in mock.destination_rows("machines") {
        assert_eq!(row["operator_id"], json!("acme"));
        assert_eq!(row["operator_link"], json!([operator_id]));
    }

    let mock = catalog_mock();
    SyncOrchestrator::new(sync_config(), Arc::clone(&mock))
        .unwrap()
        .run()
        .unwrap();
    for row in mock.destination_rows("products") {
        assert!(row.get("operator_link").is_none());
    }
}

#[test]
fn dry_run_reads_but_never_writes() {
    let mock = catalog_mock();
    let summary = SyncOrchestrator::new(sync_config().with_dry_run(true), Arc::clone(&mock))
        .unwrap()
        .run()
        .unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.entity("products").created, 2);
    assert_eq!(summary.entity("machines").created, 2);
    assert_eq!(mock.count_method(Method::Post), 0);
    assert!(mock.count_method(Method::Get) > 0);
    assert_eq!(mock.destination_rows("products").len(), 1);
}

#[test]
fn upsert_policy_propagates_source_edits() {
    let mock = catalog_mock();
    let orchestrator = SyncOrchestrator::new(
        sync_config().with_existing_policy(ExistingPolicy::UpsertWithDiff),
        Arc::clone(&mock),
    )
    .unwrap();
    orchestrator.run().unwrap();

    mock.add_source_table(
        "商品",
        "商品名稱",
        vec![
            product("recP1", "A100", "Cola Classic"),
            product("recP3", "B200", "Tea"),
        ],
    );
    let second = orchestrator.run().unwrap();
    let products = second.entity("products");
    assert_eq!(products.updated, 1);
    assert_eq!(products.skipped_existing, 1);
    assert_eq!(products.created, 0);

    let rows = mock.destination_rows("products");
    assert_eq!(find(&rows, "sku", "A100").unwrap()["name"], json!("Cola Classic"));
    assert_eq!(mock.count_method(Method::Patch), 1);
}

#[test]
fn write_failure_aborts_and_rerun_recovers() {
    let mock = catalog_mock();
    let orchestrator = SyncOrchestrator::new(sync_config(), Arc::clone(&mock)).unwrap();

    // both attempts of the operator insert fail
    mock.fail_next(Some(Method::Post), 2, Some(500));
    let err = orchestrator.run().unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert_eq!(mock.count_method(Method::Post), 2);
    assert!(mock.destination_rows("operators").is_empty());
    assert_eq!(mock.destination_rows("products").len(), 1);

    let summary = orchestrator.run().unwrap();
    assert_eq!(summary.entity("products").created, 2);
    assert_eq!(mock.destination_rows("operators").len(), 1);
    assert_eq!(mock.destination_rows("products").len(), 3);
}

#[test]
fn read_retry_exhaustion_surfaces_after_bound() {
    let mock = catalog_mock();
    mock.fail_always(Some(Method::Get), None);

    let err = SyncOrchestrator::new(sync_config(), Arc::clone(&mock))
        .unwrap()
        .run()
        .unwrap_err();

    assert!(matches!(err, SyncError::RequestFailed { attempts: 4, .. }));
    assert_eq!(mock.request_count(), 4);
}

#[test]
fn write_retry_exhaustion_surfaces_after_bound() {
    let mock = Arc::new(MockHttpClient::new());
    mock.seed_destination_rows("products", vec![]);
    mock.fail_always(Some(Method::Post), Some(503));

    let client = RequestClient::new(Arc::clone(&mock), Auth::XcToken("tok".into()))
        .with_retry(RetryConfig::no_delay(4), RetryConfig::no_delay(3));
    let url = format!("{}/api/v1/db/data/v1/p/products", MockHttpClient::DESTINATION_URL);
    let err = client.post(&url, &json!({"sku": "A"})).unwrap_err();

    assert!(matches!(err, SyncError::RequestFailed { attempts: 3, .. }));
    assert_eq!(mock.count_method(Method::Post), 3);
}

#[test]
fn schema_bootstrap_fixed_point() {
    let mock = Arc::new(MockHttpClient::new());
    let config = BootstrapConfig::new(DestinationConfig::new(
        MockHttpClient::DESTINATION_URL,
        "tok",
        "p_catalog",
    ))
    .with_retry(RetryConfig::no_delay(4), RetryConfig::no_delay(2));
    let schema = catalog_schema();

    let first = bootstrap(&config, Arc::clone(&mock), &schema).unwrap();
    assert!(first.outcomes().all(|o| o == EnsureOutcome::Created));
    assert_eq!(mock.schema_tables().len(), 6);

    mock.clear_requests();
    let second = bootstrap(&config, Arc::clone(&mock), &schema).unwrap();
    assert!(second.outcomes().all(|o| o == EnsureOutcome::Exists));
    assert_eq!(mock.count_method(Method::Post), 0);
    assert_eq!(second.links.len(), 7);
}

#[test]
fn schema_bootstrap_dry_run_mutates_nothing() {
    let mock = Arc::new(MockHttpClient::new());
    let config = BootstrapConfig::new(DestinationConfig::new(
        MockHttpClient::DESTINATION_URL,
        "tok",
        "p_catalog",
    ))
    .with_dry_run(true);

    let report = bootstrap(&config, Arc::clone(&mock), &catalog_schema()).unwrap();
    assert!(report.tables.values().all(|o| *o == EnsureOutcome::Created));
    assert!(report.id_pk.values().all(|o| *o == EnsureOutcome::Missing));
    assert!(mock.schema_tables().is_empty());
    assert_eq!(mock.count_method(Method::Post), 0);
}
