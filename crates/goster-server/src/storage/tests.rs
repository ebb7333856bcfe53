#![allow(clippy::unwrap_used)]

use super::*;

fn pending_meta(name: &str, serial: &str, mac: &str) -> DeviceMetadata {
    DeviceMetadata {
        name: name.into(),
        serial_number: serial.into(),
        mac_address: mac.into(),
        hw_version: "hw1".into(),
        sw_version: "sw1".into(),
        config_version: "cfg1".into(),
        token: None,
        auth_status: AuthStatus::Pending,
        created_at: 0,
    }
}

async fn store_with_device(uuid: &str) -> Database {
    let db = Database::open_in_memory().await.unwrap();
    db.init_device(uuid, &pending_meta("Sensor-A", "SN-1", "AA:BB"))
        .await
        .unwrap();
    db
}

#[tokio::test]
async fn init_and_load_roundtrip() {
    let db = store_with_device("dev-1").await;

    let meta = db.load_config("dev-1").await.unwrap();
    assert_eq!(meta.name, "Sensor-A");
    assert_eq!(meta.serial_number, "SN-1");
    assert_eq!(meta.auth_status, AuthStatus::Pending);
    assert!(meta.token.is_none());
    assert!(meta.created_at > 0);
}

#[tokio::test]
async fn init_duplicate_uuid_fails() {
    let db = store_with_device("dev-1").await;

    let result = db
        .init_device("dev-1", &pending_meta("Sensor-B", "SN-2", "CC:DD"))
        .await;
    assert!(matches!(result, Err(DatabaseError::Query(_))));
}

#[tokio::test]
async fn load_missing_device_is_not_found() {
    let db = Database::open_in_memory().await.unwrap();
    assert!(matches!(
        db.load_config("nope").await,
        Err(DatabaseError::NotFound(_))
    ));
}

#[tokio::test]
async fn save_metadata_updates_status_and_token() {
    let db = store_with_device("dev-1").await;

    let mut meta = db.load_config("dev-1").await.unwrap();
    meta.auth_status = AuthStatus::Authenticated;
    meta.token = Some("gt_abc".into());
    db.save_metadata("dev-1", &meta).await.unwrap();

    let (uuid, status) = db.get_device_by_token("gt_abc").await.unwrap();
    assert_eq!(uuid, "dev-1");
    assert_eq!(status, AuthStatus::Authenticated);
}

#[tokio::test]
async fn token_unique_index_rejects_second_holder() {
    let db = store_with_device("dev-1").await;
    db.init_device("dev-2", &pending_meta("Sensor-B", "SN-2", "CC:DD"))
        .await
        .unwrap();

    db.update_token("dev-1", Some("gt_shared")).await.unwrap();
    let second = db.update_token("dev-2", Some("gt_shared")).await;
    assert!(matches!(second, Err(DatabaseError::Query(_))));

    // The first holder still resolves.
    let (uuid, _) = db.get_device_by_token("gt_shared").await.unwrap();
    assert_eq!(uuid, "dev-1");
}

#[tokio::test]
async fn cleared_tokens_do_not_collide() {
    let db = store_with_device("dev-1").await;
    db.init_device("dev-2", &pending_meta("Sensor-B", "SN-2", "CC:DD"))
        .await
        .unwrap();

    // NULL tokens are exempt from the unique index.
    db.update_token("dev-1", None).await.unwrap();
    db.update_token("dev-2", None).await.unwrap();

    assert!(matches!(
        db.get_device_by_token("gt_anything").await,
        Err(DatabaseError::NotFound(_))
    ));
}

#[tokio::test]
async fn metrics_batch_and_query() {
    let db = store_with_device("dev-1").await;

    let points: Vec<MetricPoint> = (0..5)
        .map(|i| MetricPoint {
            timestamp_ms: 1_000 + i * 100,
            value: i as f32,
            kind: 1,
        })
        .collect();
    db.batch_append_metrics("dev-1", &points).await.unwrap();

    let got = db.query_metrics("dev-1", 1_000, 1_400).await.unwrap();
    assert_eq!(got, points);

    // Range bounds are inclusive and trim both ends.
    let inner = db.query_metrics("dev-1", 1_100, 1_300).await.unwrap();
    assert_eq!(inner.len(), 3);
    assert_eq!(inner[0].timestamp_ms, 1_100);
}

#[tokio::test]
async fn destroy_device_cascades() {
    let db = store_with_device("dev-1").await;
    db.append_metric(
        "dev-1",
        &MetricPoint {
            timestamp_ms: 1,
            value: 1.0,
            kind: 0,
        },
    )
    .await
    .unwrap();
    db.write_log("dev-1", "INFO", "hello").await.unwrap();

    db.destroy_device("dev-1").await.unwrap();

    assert!(matches!(
        db.load_config("dev-1").await,
        Err(DatabaseError::NotFound(_))
    ));
    assert!(db.query_metrics("dev-1", 0, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn list_devices_pages_in_insert_order() {
    let db = Database::open_in_memory().await.unwrap();
    for i in 0..5 {
        db.init_device(
            &format!("dev-{i}"),
            &pending_meta(&format!("S{i}"), &format!("SN-{i}"), "AA"),
        )
        .await
        .unwrap();
    }

    let first = db.list_devices(0, 3).await.unwrap();
    assert_eq!(first.len(), 3);

    let second = db.list_devices(1, 3).await.unwrap();
    assert_eq!(second.len(), 2);
}
