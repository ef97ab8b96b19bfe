use aura_daemon::advisory::{bucket, fingerprint, Action, AdvisoryCache, Recommendation};
use aura_daemon::classifier::Category;
use aura_daemon::scanner::ProcessRecord;
use std::time::{Duration, Instant};

fn process(name: &str, cpu: f64, mem: f64) -> ProcessRecord {
    ProcessRecord {
        pid: 4242,
        name: name.to_string(),
        user: "alice".to_string(),
        cpu_percent: cpu,
        memory_percent: mem,
        category: Category::User,
        ..Default::default()
    }
}

fn keep(name: &str) -> Recommendation {
    Recommendation::new(&process(name, 0.0, 0.0), Action::Keep, 0.9, "fine")
}

#[test]
fn test_hit_after_put() {
    let cache = AdvisoryCache::new(4, Duration::from_secs(60));
    assert!(cache.get("a").is_none());
    cache.put("a", keep("a"));

    let hit = cache.get("a").unwrap();
    assert_eq!(hit.name, "a");
    assert!(hit.from_cache);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);
}

#[test]
fn test_capacity_evicts_least_recently_used() {
    let cache = AdvisoryCache::new(3, Duration::from_secs(60));
    for key in ["a", "b", "c", "d"] {
        cache.put(key, keep(key));
        assert!(cache.size() <= 3);
    }
    assert_eq!(cache.size(), 3);
    assert!(cache.get("a").is_none());
    assert!(cache.get("b").is_some());
    assert!(cache.get("c").is_some());
    assert!(cache.get("d").is_some());
}

#[test]
fn test_touched_entry_survives_eviction() {
    let cache = AdvisoryCache::new(3, Duration::from_secs(60));
    cache.put("a", keep("a"));
    cache.put("b", keep("b"));
    cache.put("c", keep("c"));
    assert!(cache.get("a").is_some());

    cache.put("d", keep("d"));
    assert!(cache.get("a").is_some());
    assert!(cache.get("b").is_none());
}

#[test]
fn test_update_existing_key_does_not_evict() {
    let cache = AdvisoryCache::new(2, Duration::from_secs(60));
    cache.put("a", keep("a"));
    cache.put("b", keep("b"));
    cache.put("a", keep("a2"));
    assert_eq!(cache.size(), 2);
    assert_eq!(cache.get("a").unwrap().name, "a2");
    assert!(cache.get("b").is_some());
}

#[test]
fn test_ttl_expiry_removes_entry() {
    let cache = AdvisoryCache::new(4, Duration::from_secs(10));
    let start = Instant::now();
    cache.put_at("a", keep("a"), start);
    cache.put_at("b", keep("b"), start);

    assert!(cache.get_at("a", start + Duration::from_secs(5)).is_some());
    assert!(cache.get_at("a", start + Duration::from_secs(11)).is_none());
    assert_eq!(cache.size(), 1);
}

#[test]
fn test_ttl_expiry_in_real_time() {
    let cache = AdvisoryCache::new(4, Duration::from_millis(20));
    cache.put("a", keep("a"));
    assert!(cache.get("a").is_some());
    std::thread::sleep(Duration::from_millis(50));
    assert!(cache.get("a").is_none());
    assert_eq!(cache.size(), 0);
}

#[test]
fn test_zero_capacity_stores_nothing() {
    let cache = AdvisoryCache::new(0, Duration::from_secs(60));
    cache.put("a", keep("a"));
    assert_eq!(cache.size(), 0);
    assert!(cache.get("a").is_none());
}

#[test]
fn test_clear() {
    let cache = AdvisoryCache::new(4, Duration::from_secs(60));
    cache.put("a", keep("a"));
    cache.put("b", keep("b"));
    cache.clear();
    assert_eq!(cache.size(), 0);
    assert!(cache.get("a").is_none());
    // Slots are usable again after a clear.
    cache.put("c", keep("c"));
    assert!(cache.get("c").is_some());
}

#[test]
fn test_bucket_rounds_down() {
    assert_eq!(bucket(0.0), 0);
    assert_eq!(bucket(4.9), 0);
    assert_eq!(bucket(5.0), 5);
    assert_eq!(bucket(87.3), 85);
    assert_eq!(bucket(100.0), 100);
}

#[test]
fn test_fingerprint_stable_within_bucket() {
    let a = fingerprint(&process("stress", 81.0, 12.0));
    let b = fingerprint(&process("stress", 84.9, 14.2));
    assert_eq!(a, b);
    assert_eq!(a.len(), 16);

    let mut other_pid = process("stress", 82.0, 11.0);
    other_pid.pid = 1;
    assert_eq!(fingerprint(&other_pid), a);
}

#[test]
fn test_fingerprint_differs_on_identity() {
    let base = fingerprint(&process("stress", 81.0, 12.0));
    assert_ne!(fingerprint(&process("stress-ng", 81.0, 12.0)), base);
    assert_ne!(fingerprint(&process("stress", 86.0, 12.0)), base);

    let mut system = process("stress", 81.0, 12.0);
    system.category = Category::System;
    assert_ne!(fingerprint(&system), base);
}
