use async_trait::async_trait;
use billing_sync::{
    errors::{SyncError, SyncResult},
    models::{
        AccessMode, CopySummary, PayerLocation, RunParams, RunReport, TaskResult, TaskStatus,
    },
    services::{
        DownstreamTrigger, MaterializationRequest, Orchestrator, PayerDirectory, SyncSettings,
        WatermarkConnector, WatermarkStore, memory_store::InMemoryObjectStore,
    },
};
use chrono::{DateTime, TimeZone, Utc};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use uuid::Uuid;

const STAGING: &str = "staging";
const PAYER_A: &str = "111111111111";
const PAYER_B: &str = "222222222222";
const DEST_A: &str =
    "aws_az_analytics_application_refresh/analytics/uat/year=2025/month=6/payer-111111111111/";

#[derive(Default)]
struct RecordingTrigger {
    fail: bool,
    requests: Mutex<Vec<MaterializationRequest>>,
}

impl RecordingTrigger {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl DownstreamTrigger for RecordingTrigger {
    async fn materialize(&self, request: &MaterializationRequest) -> SyncResult<()> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            Err(SyncError::Downstream("external table creation failed".into()))
        } else {
            Ok(())
        }
    }
}

struct MapWatermarks(HashMap<String, DateTime<Utc>>);

#[async_trait]
impl WatermarkStore for MapWatermarks {
    async fn get_last_processed(&mut self, payer_id: &str) -> SyncResult<Option<DateTime<Utc>>> {
        Ok(self.0.get(payer_id).copied())
    }

    async fn close(self: Box<Self>) {}
}

struct Warehouse {
    watermarks: HashMap<String, DateTime<Utc>>,
    reachable: bool,
}

#[async_trait]
impl WatermarkConnector for Warehouse {
    async fn connect(&self) -> SyncResult<Box<dyn WatermarkStore>> {
        if self.reachable {
            Ok(Box::new(MapWatermarks(self.watermarks.clone())))
        } else {
            Err(SyncError::WatermarkUnavailable("connection refused".into()))
        }
    }
}

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, day, 0, 0, 0).unwrap()
}

fn directory() -> Arc<PayerDirectory> {
    Arc::new(PayerDirectory::new(
        "uat",
        vec![
            PayerLocation::new(PAYER_A, "src-a", "a/export/data", AccessMode::CrossAccount),
            PayerLocation::new(PAYER_B, "src-b", "b/export/data", AccessMode::CrossAccount),
        ],
        vec![PayerLocation::new(
            PAYER_A,
            "src-a-fallback",
            "a/export/data",
            AccessMode::SameAccount,
        )],
    ))
}

/// Three June files for payer A, one for payer B.
fn seeded_store() -> Arc<InMemoryObjectStore> {
    let store = Arc::new(InMemoryObjectStore::new());
    for (i, day) in [1, 2, 3].into_iter().enumerate() {
        store.put_object(
            "src-a",
            &format!("a/export/data/BILLING_PERIOD=2025-06/part-{i}.parquet"),
            format!("payer-a-{i}"),
            at(day),
        );
    }
    store.put_object(
        "src-b",
        "b/export/data/BILLING_PERIOD=2025-06/part-0.parquet",
        "payer-b-0",
        at(2),
    );
    store
}

fn params(payers: &[&str]) -> RunParams {
    RunParams::new(
        2025,
        6,
        payers.iter().map(|p| p.to_string()).collect(),
        7,
        "uat",
        "analytics",
    )
    .unwrap()
}

fn orchestrator(
    store: Arc<InMemoryObjectStore>,
    warehouse: Option<Warehouse>,
    trigger: Arc<RecordingTrigger>,
) -> Orchestrator {
    Orchestrator::new(
        SyncSettings::new(STAGING, "INTEGRATION"),
        store,
        directory(),
        warehouse.map(|w| Arc::new(w) as Arc<dyn WatermarkConnector>),
        trigger,
    )
}

fn staged(store: &InMemoryObjectStore) -> Vec<String> {
    store.keys(STAGING)
}

#[tokio::test]
async fn scenario_a_new_files_are_copied_and_materialized() {
    let store = seeded_store();
    let trigger = Arc::new(RecordingTrigger::default());

    let result = orchestrator(store.clone(), None, trigger.clone())
        .run(&params(&[PAYER_A]))
        .await;

    assert_eq!(result.status, TaskStatus::Success);
    assert_eq!(result.copy_summary, CopySummary { success: 3, failed: 0, total: 3 });
    assert!(result.failed_payers.is_empty());
    assert_eq!(
        staged(&store),
        (0..3)
            .map(|i| format!("{DEST_A}part-{i}.parquet"))
            .collect::<Vec<_>>()
    );

    let requests = trigger.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].payer_ids, vec![PAYER_A]);
    assert_eq!(requests[0].table_name, "analytics_application_table_2025_6");

    let report = RunReport::from_result(Uuid::new_v4(), &params(&[PAYER_A]), &result);
    assert_eq!(report.exit_code, 0);
}

#[tokio::test]
async fn scenario_b_empty_prefix_is_up_to_date() {
    let store = Arc::new(InMemoryObjectStore::new());
    let trigger = Arc::new(RecordingTrigger::default());

    let result = orchestrator(store.clone(), None, trigger.clone())
        .run(&params(&[PAYER_A]))
        .await;

    assert_eq!(result, TaskResult::up_to_date(Vec::new()));
    assert_eq!(store.copy_calls(), 0);
    assert_eq!(store.delete_requests(), 0);
    assert_eq!(trigger.calls(), 0);
}

#[tokio::test]
async fn scenario_c_missing_config_fails_only_that_payer() {
    let store = seeded_store();
    let trigger = Arc::new(RecordingTrigger::default());

    let result = orchestrator(store, None, trigger.clone())
        .run(&params(&[PAYER_B, "999999999999"]))
        .await;

    assert_eq!(result.status, TaskStatus::Success);
    assert_eq!(result.failed_payers, vec!["999999999999"]);
    assert_eq!(result.copied_payers, vec![PAYER_B]);
    assert_eq!(result.copy_summary, CopySummary { success: 1, failed: 0, total: 1 });
    assert_eq!(trigger.calls(), 1);
}

#[tokio::test]
async fn scenario_d_copy_failure_fails_run_without_trigger() {
    let store = seeded_store();
    store.fail_copy("a/export/data/BILLING_PERIOD=2025-06/part-1.parquet");
    let trigger = Arc::new(RecordingTrigger::default());

    let result = orchestrator(store, None, trigger.clone())
        .run(&params(&[PAYER_A]))
        .await;

    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.copy_summary, CopySummary { success: 2, failed: 1, total: 3 });
    assert_eq!(trigger.calls(), 0);
    assert_eq!(result.status.exit_code(), 1);
}

#[tokio::test]
async fn duplicate_payers_behave_like_unique_ones() {
    let dup_store = seeded_store();
    let dup = orchestrator(dup_store.clone(), None, Arc::new(RecordingTrigger::default()))
        .run(&params(&[PAYER_A, PAYER_A, PAYER_B]))
        .await;

    let unique_store = seeded_store();
    let unique = orchestrator(unique_store.clone(), None, Arc::new(RecordingTrigger::default()))
        .run(&params(&[PAYER_A, PAYER_B]))
        .await;

    assert_eq!(dup, unique);
    assert_eq!(dup.copy_summary.total, 4);
    assert_eq!(staged(&dup_store), staged(&unique_store));
}

#[tokio::test]
async fn watermark_skips_seen_files_and_unreachable_store_copies_all() {
    let watermarks = HashMap::from([(PAYER_A.to_string(), at(2))]);

    let store = seeded_store();
    let filtered = orchestrator(
        store.clone(),
        Some(Warehouse {
            watermarks: watermarks.clone(),
            reachable: true,
        }),
        Arc::new(RecordingTrigger::default()),
    )
    .run(&params(&[PAYER_A]))
    .await;
    assert_eq!(filtered.copy_summary.total, 1);
    assert_eq!(staged(&store), vec![format!("{DEST_A}part-2.parquet")]);

    let store = seeded_store();
    let unfiltered = orchestrator(
        store.clone(),
        Some(Warehouse {
            watermarks,
            reachable: false,
        }),
        Arc::new(RecordingTrigger::default()),
    )
    .run(&params(&[PAYER_A]))
    .await;
    assert_eq!(unfiltered.status, TaskStatus::Success);
    assert_eq!(unfiltered.copy_summary.total, 3);
}

#[tokio::test]
async fn all_payers_up_to_date_never_copies() {
    let watermarks = HashMap::from([
        (PAYER_A.to_string(), at(30)),
        (PAYER_B.to_string(), at(30)),
    ]);
    let store = seeded_store();
    let trigger = Arc::new(RecordingTrigger::default());

    let result = orchestrator(
        store.clone(),
        Some(Warehouse {
            watermarks,
            reachable: true,
        }),
        trigger.clone(),
    )
    .run(&params(&[PAYER_A, PAYER_B]))
    .await;

    assert_eq!(result.status, TaskStatus::UpToDate);
    assert_eq!(store.copy_calls(), 0);
    assert_eq!(trigger.calls(), 0);
}

#[tokio::test]
async fn trigger_failure_fails_run_with_clean_copy_summary() {
    let trigger = Arc::new(RecordingTrigger::failing());
    let result = orchestrator(seeded_store(), None, trigger.clone())
        .run(&params(&[PAYER_A]))
        .await;

    assert_eq!(trigger.calls(), 1);
    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.copy_summary.failed, 0);
    assert_eq!(result.copy_summary.success, 3);
}

#[tokio::test]
async fn denied_primary_bucket_copies_from_fallback() {
    let store = seeded_store();
    store.deny_bucket("src-a");
    store.put_object(
        "src-a-fallback",
        "a/export/data/BILLING_PERIOD=2025-06/part-9.parquet",
        "from-fallback",
        at(4),
    );

    let result = orchestrator(store.clone(), None, Arc::new(RecordingTrigger::default()))
        .run(&params(&[PAYER_A]))
        .await;

    assert_eq!(result.status, TaskStatus::Success);
    assert_eq!(staged(&store), vec![format!("{DEST_A}part-9.parquet")]);
    assert_eq!(
        store.get_object(STAGING, &format!("{DEST_A}part-9.parquet")).unwrap(),
        "from-fallback"
    );
}

#[tokio::test]
async fn rerun_is_idempotent_and_clears_stale_files() {
    let store = seeded_store();
    store.put_object(STAGING, &format!("{DEST_A}stale.parquet"), "stale", at(1));

    let first = orchestrator(store.clone(), None, Arc::new(RecordingTrigger::default()))
        .run(&params(&[PAYER_A]))
        .await;
    let after_first: Vec<_> = staged(&store)
        .into_iter()
        .map(|k| (store.get_object(STAGING, &k).unwrap(), k))
        .collect();

    let second = orchestrator(store.clone(), None, Arc::new(RecordingTrigger::default()))
        .run(&params(&[PAYER_A]))
        .await;
    let after_second: Vec<_> = staged(&store)
        .into_iter()
        .map(|k| (store.get_object(STAGING, &k).unwrap(), k))
        .collect();

    assert_eq!(first, second);
    assert_eq!(after_first, after_second);
    assert_eq!(after_first.len(), 3);
    assert!(!staged(&store).iter().any(|k| k.ends_with("stale.parquet")));
}

#[tokio::test]
async fn failed_cleanup_skips_payer_but_keeps_others() {
    let store = seeded_store();
    store.fail_delete(STAGING, DEST_A);
    let trigger = Arc::new(RecordingTrigger::default());

    let result = orchestrator(store, None, trigger.clone())
        .run(&params(&[PAYER_A, PAYER_B]))
        .await;

    assert_eq!(result.status, TaskStatus::Success);
    assert_eq!(result.skipped_payers, vec![PAYER_A]);
    assert_eq!(result.copied_payers, vec![PAYER_B]);
    assert_eq!(trigger.requests.lock().unwrap()[0].payer_ids, vec![PAYER_B]);
}
