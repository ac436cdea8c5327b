use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use medroute::cache::{CacheConfig, Clock, KeyClass, ResultCache, SqliteCacheStore};

const DAY_MS: i64 = 86_400_000;

struct ManualClock(AtomicI64);

impl ManualClock {
    fn advance_days(&self, days: i64) {
        self.0.fetch_add(days * DAY_MS, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

fn on_disk_cache(dir: &tempfile::TempDir, clock: Arc<ManualClock>) -> ResultCache {
    let store = SqliteCacheStore::open_path(&dir.path().join("cache.db")).unwrap();
    ResultCache::new(Arc::new(store)).with_clock(clock)
}

#[test]
fn entries_live_until_their_ttl() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock(AtomicI64::new(1_700_000_000_000)));
    let cache = on_disk_cache(&dir, clock.clone());

    let payload = serde_json::json!({"title": "Hypertension in adults", "id": "NG136"});
    cache.set(KeyClass::Guideline, "Hypertension", &payload, Some(3));

    // Key normalization: case and surrounding whitespace do not matter.
    assert_eq!(cache.get(KeyClass::Guideline, "  hypertension "), Some(payload.clone()));
    // Different class, different entry.
    assert_eq!(cache.get(KeyClass::DrugSearch, "hypertension"), None);

    clock.advance_days(2);
    assert_eq!(cache.get(KeyClass::Guideline, "hypertension"), Some(payload));
    assert_eq!(cache.stats().total_hits, 2);

    clock.advance_days(1);
    assert_eq!(cache.get(KeyClass::Guideline, "hypertension"), None);
    assert_eq!(cache.stats().entries, 0);
}

#[test]
fn sweep_removes_only_expired_entries() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock(AtomicI64::new(0)));
    let cache = on_disk_cache(&dir, clock.clone());

    cache.set(KeyClass::DrugSearch, "amoxicillin", &serde_json::json!([1]), Some(1));
    cache.set(KeyClass::DrugDetail, "bnf-amoxicillin", &serde_json::json!({}), Some(10));

    clock.advance_days(2);
    assert_eq!(cache.sweep_expired(), 1);
    assert_eq!(cache.stats().entries, 1);
    assert!(cache.get(KeyClass::DrugDetail, "bnf-amoxicillin").is_some());
}

#[test]
fn entries_survive_reopening_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock(AtomicI64::new(0)));

    on_disk_cache(&dir, clock.clone()).set(
        KeyClass::Geolocation,
        "203.0.113.7",
        &serde_json::json!("GB"),
        None,
    );

    let reopened = on_disk_cache(&dir, clock);
    assert_eq!(
        reopened.get(KeyClass::Geolocation, "203.0.113.7"),
        Some(serde_json::json!("GB"))
    );
}

#[test]
fn unavailable_store_degrades_to_misses() {
    let dir = tempfile::tempdir().unwrap();
    // A directory where the database file should be.
    let blocked = dir.path().join("cache.db");
    std::fs::create_dir_all(&blocked).unwrap();

    let config = CacheConfig {
        path: Some(blocked),
        ..CacheConfig::default()
    };
    let cache = ResultCache::from_config(&config);

    assert!(!cache.is_available());
    cache.set(KeyClass::Guideline, "asthma", &serde_json::json!("x"), None);
    assert_eq!(cache.get(KeyClass::Guideline, "asthma"), None);
    assert_eq!(cache.sweep_expired(), 0);
}
