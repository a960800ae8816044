use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use fantasy_slots::db::SqliteSlotStore;
use fantasy_slots::{Mode, Resolver, Slot, SlotStore, StoreError};
use tempfile::TempDir;

fn t(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap() + chrono::Duration::seconds(offset_secs)
}

async fn create_test_store() -> (SqliteSlotStore, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("slots.db").display());
    let store = SqliteSlotStore::connect_or_create(&url).await.unwrap();
    store.migrate().await.unwrap();
    (store, dir)
}

#[tokio::test]
async fn test_slot_round_trips_through_sqlite() {
    let (store, _dir) = create_test_store().await;

    let mut slot = Slot::new("WK", "Wicket Keeper", t(0)).with_id("wk-1");
    slot.min_select = 1;
    slot.max_select = 2;
    slot.description = Some("Exactly one keeper".to_string());
    slot.requirements = Some(serde_json::json!({"roles": ["keeper"]}));
    store.insert_slot(&slot).await.unwrap();

    let loaded = store.find_all().await.unwrap();
    assert_eq!(loaded, vec![slot]);
}

#[tokio::test]
async fn test_delete_removes_row() {
    let (store, _dir) = create_test_store().await;
    store.insert_slot(&Slot::new("GK", "Goalkeeper", t(0)).with_id("1")).await.unwrap();
    store.insert_slot(&Slot::new("DEF", "Defender", t(1)).with_id("2")).await.unwrap();

    store.delete("1").await.unwrap();

    let ids: Vec<String> = store.find_all().await.unwrap().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["2"]);
}

#[tokio::test]
async fn test_delete_missing_row_is_not_found() {
    let (store, _dir) = create_test_store().await;
    let err = store.delete("ghost").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { ref id } if id == "ghost"));
}

#[tokio::test]
async fn test_connect_to_missing_database_fails() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("absent.db").display());

    let err = SqliteSlotStore::connect(&url).await.err().unwrap();
    assert!(matches!(err, StoreError::Connection(_)));
}

#[tokio::test]
async fn test_corrupt_row_fails_load() {
    let (store, _dir) = create_test_store().await;
    sqlx::query(
        r#"INSERT INTO slots (id, code, name, created_at, updated_at)
           VALUES ('bad', 'GK', 'Goalkeeper', 'not a date', 'not a date')"#,
    )
    .execute(store.pool())
    .await
    .unwrap();

    let err = store.find_all().await.unwrap_err();
    assert!(matches!(err, StoreError::Corrupt { ref id, .. } if id == "bad"));
}

#[tokio::test]
async fn test_cleanup_against_sqlite() {
    let (store, _dir) = create_test_store().await;
    for slot in [
        Slot::new("GK", "Goalkeeper", t(0)).with_id("1"),
        Slot::new("gk", "Goalkeeper", t(60)).with_id("2"),
        Slot::new("DEF", "Defender", t(120)).with_id("3"),
        Slot::new(" def ", "Defender", t(180)).with_id("4"),
    ] {
        store.insert_slot(&slot).await.unwrap();
    }
    let store = Arc::new(store);

    let report = Resolver::builder()
        .mode(Mode::Apply)
        .concurrency(2)
        .build()
        .run(Arc::clone(&store))
        .await
        .unwrap();

    assert_eq!(report.deleted, vec!["4", "2"]);
    let mut ids: Vec<String> = store.find_all().await.unwrap().into_iter().map(|s| s.id).collect();
    ids.sort();
    assert_eq!(ids, vec!["1", "3"]);

    let rerun = Resolver::builder()
        .mode(Mode::Apply)
        .build()
        .run(store)
        .await
        .unwrap();
    assert_eq!(rerun.duplicate_groups(), 0);
}
