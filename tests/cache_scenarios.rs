//! End-to-end behaviour of the cache through its public API, on every tier

use std::sync::Arc;
use std::time::Duration;

use api_cache::storage::KeyValueStore;
use api_cache::{
    BackendKind, CacheConfig, CacheManager, ManualClock, Params, ReadOptions, WriteOptions,
};
use serde_json::{json, Value};
use tempfile::TempDir;

const START: u64 = 1_700_000_000_000;

const ALL_TIERS: [BackendKind; 3] = [
    BackendKind::DurableStructured,
    BackendKind::DurableKeyValue,
    BackendKind::Volatile,
];

fn manager_for(dir: &TempDir, kind: BackendKind) -> (CacheManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START));
    let config = CacheConfig::default()
        .with_storage_root(dir.path())
        .with_tiers(vec![kind]);
    (CacheManager::with_clock(config, clock.clone()), clock)
}

#[tokio::test]
async fn institute_classes_expire_after_thirty_minutes() {
    for kind in ALL_TIERS {
        let dir = TempDir::new().unwrap();
        let (cache, clock) = manager_for(&dir, kind);
        assert_eq!(cache.initialize().await, kind);

        let params = Params::new().with("page", 1).with("limit", 50);
        cache
            .write(
                "/institute-classes",
                &params,
                &json!({"id": "x"}),
                WriteOptions::new().with_ttl_minutes(30),
            )
            .await;

        let fresh: Option<Value> = cache
            .read("/institute-classes", &params, ReadOptions::new().with_ttl_minutes(30))
            .await;
        assert_eq!(fresh, Some(json!({"id": "x"})), "{} fresh read", kind);

        clock.advance(Duration::from_secs(31 * 60));
        let stale: Option<Value> = cache
            .read("/institute-classes", &params, ReadOptions::new().with_ttl_minutes(30))
            .await;
        assert_eq!(stale, None, "{} stale read", kind);
        assert_eq!(cache.stats().await.count, 0, "{} count after expiry", kind);
    }
}

#[tokio::test]
async fn round_trip_preserves_payload_shapes() {
    let payloads = [
        json!(null),
        json!(42),
        json!("text with \"quotes\" and ünïcode"),
        json!([1, {"nested": [true, false]}]),
        json!({"users": [{"id": 1, "roles": ["admin"]}], "total": 1}),
    ];

    for kind in ALL_TIERS {
        let dir = TempDir::new().unwrap();
        let (cache, _) = manager_for(&dir, kind);

        for (i, payload) in payloads.iter().enumerate() {
            let params = Params::new().with("i", i as u64);
            cache.write("/homework", &params, payload, WriteOptions::new()).await;
            let back: Option<Value> = cache
                .read("/homework", &params, ReadOptions::new().with_ttl_minutes(1))
                .await;
            assert_eq!(back.as_ref(), Some(payload), "{} payload {}", kind, i);
        }
        assert_eq!(cache.stats().await.count, payloads.len(), "{}", kind);
    }
}

#[tokio::test]
async fn parameter_order_does_not_split_entries() {
    let dir = TempDir::new().unwrap();
    let (cache, _) = manager_for(&dir, BackendKind::Volatile);

    let written = Params::new().with("page", 1).with("limit", 50);
    let reordered = Params::new().with("limit", 50).with("page", 1);
    cache.write("/exams", &written, &"exams", WriteOptions::new()).await;

    let read: Option<String> = cache.read("/exams", &reordered, ReadOptions::new()).await;
    assert_eq!(read, Some("exams".to_string()));
}

#[tokio::test]
async fn scoped_and_global_invalidation() {
    for kind in ALL_TIERS {
        let dir = TempDir::new().unwrap();
        let (cache, _) = manager_for(&dir, kind);
        let p = Params::new();

        cache.write("/users/7/payments", &p, &"u7", WriteOptions::new()).await;
        cache.write("/users/8/payments", &p, &"u8", WriteOptions::new()).await;
        cache.write("/transport", &p, &"routes", WriteOptions::new()).await;

        cache.invalidate_user_scope("7").await;
        assert_eq!(
            cache.read::<String>("/users/7/payments", &p, ReadOptions::new()).await,
            None,
            "{}",
            kind
        );
        assert_eq!(
            cache.read::<String>("/users/8/payments", &p, ReadOptions::new()).await,
            Some("u8".to_string()),
            "{}",
            kind
        );
        assert_eq!(
            cache.read::<String>("/transport", &p, ReadOptions::new()).await,
            Some("routes".to_string()),
            "{}",
            kind
        );

        cache.invalidate_all().await;
        assert_eq!(cache.stats().await.count, 0, "{}", kind);
        assert_eq!(
            cache.read::<String>("/users/8/payments", &p, ReadOptions::new()).await,
            None,
            "{}",
            kind
        );
    }
}

#[tokio::test]
async fn clearing_key_value_tier_keeps_foreign_data() {
    let dir = TempDir::new().unwrap();
    let (cache, _) = manager_for(&dir, BackendKind::DurableKeyValue);
    let config = cache.config().clone();

    let shared = KeyValueStore::open(config.key_value_path(), "unrelated_", u64::MAX);
    shared
        .set_item("session_user", "{\"id\":7}".to_string())
        .await
        .unwrap();

    cache.write("/lectures", &Params::new(), &[1, 2, 3], WriteOptions::new()).await;
    cache.invalidate_all().await;

    assert_eq!(
        shared.get_item("session_user").await.unwrap(),
        Some("{\"id\":7}".to_string())
    );
    assert_eq!(cache.stats().await.count, 0);
}

#[tokio::test]
async fn durable_tiers_survive_a_new_manager() {
    for kind in [BackendKind::DurableStructured, BackendKind::DurableKeyValue] {
        let dir = TempDir::new().unwrap();
        {
            let (cache, _) = manager_for(&dir, kind);
            cache.write("/classes", &Params::new(), &"persisted", WriteOptions::new()).await;
            cache.dispose().await;
        }

        let (cache, _) = manager_for(&dir, kind);
        let read: Option<String> = cache.read("/classes", &Params::new(), ReadOptions::new()).await;
        assert_eq!(read, Some("persisted".to_string()), "{}", kind);
    }
}

#[tokio::test]
async fn fallback_reports_the_tier_in_use() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig::default().with_storage_root(dir.path());
    std::fs::write(config.structured_dir(), b"not a directory").unwrap();

    let cache = CacheManager::new(config.clone());
    assert_eq!(cache.stats().await.backend_kind, BackendKind::DurableKeyValue);

    std::fs::create_dir(dir.path().join("second")).unwrap();
    let config = config.with_storage_root(dir.path().join("second"));
    std::fs::write(config.structured_dir(), b"not a directory").unwrap();
    std::fs::create_dir(config.key_value_path()).unwrap();

    let cache = CacheManager::new(config);
    assert_eq!(cache.stats().await.backend_kind, BackendKind::Volatile);

    // The volatile fallback is fully functional
    cache.write("/a", &Params::new(), &1, WriteOptions::new()).await;
    assert_eq!(cache.read::<i32>("/a", &Params::new(), ReadOptions::new()).await, Some(1));
}

#[tokio::test]
async fn unreadable_entry_file_keeps_structured_tier() {
    let dir = TempDir::new().unwrap();
    let (cache, _) = manager_for(&dir, BackendKind::DurableStructured);
    cache.write("/lectures", &Params::new(), &"l", WriteOptions::new()).await;
    cache.dispose().await;

    let junk = CacheConfig::default()
        .with_storage_root(dir.path())
        .structured_dir()
        .join("entries")
        .join("junk.json");
    std::fs::write(&junk, [0xff, 0xfe, 0x00]).unwrap();

    let (cache, _) = manager_for(&dir, BackendKind::DurableStructured);
    assert_eq!(cache.initialize().await, BackendKind::DurableStructured);
    assert_eq!(
        cache.read::<String>("/lectures", &Params::new(), ReadOptions::new()).await,
        Some("l".to_string())
    );
}

#[tokio::test]
async fn concurrent_first_use_probes_once() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(CacheManager::new(
        CacheConfig::default().with_storage_root(dir.path()),
    ));

    let mut handles = Vec::new();
    for i in 0..8u32 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            let params = Params::new().with("i", i);
            cache.write("/concurrent", &params, &i, WriteOptions::new()).await;
            cache.read::<u32>("/concurrent", &params, ReadOptions::new()).await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), Some(i as u32));
    }
    assert_eq!(cache.backend_kind(), Some(BackendKind::DurableStructured));
    assert_eq!(cache.stats().await.count, 8);
}
