use aura_daemon::classifier::{Category, Classifier};
use aura_daemon::collector::{ProcessTable, RawProcess, SystemCounters};
use aura_daemon::safety::SafetyManager;
use aura_daemon::scanner::{cpu_percent, Scanner};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone, Default)]
struct FakeTable {
    processes: Arc<Mutex<Vec<RawProcess>>>,
    fail: Arc<Mutex<bool>>,
}

impl FakeTable {
    fn set(&self, processes: Vec<RawProcess>) {
        *self.processes.lock().unwrap() = processes;
    }

    fn update(&self, pid: u32, f: impl FnOnce(&mut RawProcess)) {
        let mut processes = self.processes.lock().unwrap();
        if let Some(p) = processes.iter_mut().find(|p| p.pid == pid) {
            f(p);
        }
    }
}

impl ProcessTable for FakeTable {
    fn list_pids(&self) -> io::Result<Vec<u32>> {
        if *self.fail.lock().unwrap() {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "no proc"));
        }
        Ok(self.processes.lock().unwrap().iter().map(|p| p.pid).collect())
    }

    fn read_process(&self, pid: u32) -> Option<RawProcess> {
        self.processes
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.pid == pid && !p.name.is_empty())
            .cloned()
    }

    fn system_counters(&self) -> SystemCounters {
        SystemCounters {
            mem_total_kb: 1024 * 1024,
            mem_available_kb: 512 * 1024,
            load_avg: [1.0, 0.5, 0.25],
            uptime_secs: 100.0,
            boot_time: 1_700_000_000,
        }
    }

    fn clock_ticks(&self) -> u64 {
        100
    }

    fn user_name(&self, uid: u32) -> Option<String> {
        let users: HashMap<u32, &str> = [(0, "root"), (1000, "alice")].into_iter().collect();
        users.get(&uid).map(|s| s.to_string())
    }
}

fn raw(pid: u32, name: &str, uid: u32) -> RawProcess {
    RawProcess {
        pid,
        ppid: 1,
        name: name.to_string(),
        state: 'S',
        utime: 1000,
        stime: 500,
        start_ticks: 2000,
        uid,
        rss_kb: 102_400,
        cmdline: format!("/usr/bin/{}", name),
        ..Default::default()
    }
}

fn scanner(table: &FakeTable) -> Scanner<FakeTable> {
    Scanner::new(table.clone(), Classifier::new(["sshd"]))
}

#[test]
fn test_cpu_formula() {
    assert_eq!(cpu_percent(200, 100, 2.0), 100.0);
    assert_eq!(cpu_percent(50, 100, 1.0), 50.0);
    assert_eq!(cpu_percent(200, 0, 2.0), 0.0);
    assert_eq!(cpu_percent(200, 100, 0.0), 0.0);
}

#[test]
fn test_first_scan_reports_zero_cpu() {
    let table = FakeTable::default();
    table.set(vec![raw(100, "worker", 1000)]);
    let mut scanner = scanner(&table);

    let snapshot = scanner.scan().unwrap();
    assert_eq!(snapshot.seq, 1);
    let p = snapshot.find(100).unwrap();
    assert_eq!(p.cpu_percent, 0.0);
    assert_eq!(p.cpu_trend, None);
    assert_eq!(p.user, "alice");
    assert_eq!(p.category, Category::User);
    assert_eq!(p.memory_mb, 100.0);
    assert!((p.memory_percent - 9.765625).abs() < 1e-9);
    assert_eq!(p.start_time, 1_700_000_000 + 20);
}

#[test]
fn test_cpu_from_tick_delta_over_elapsed_time() {
    let table = FakeTable::default();
    table.set(vec![raw(100, "worker", 1000)]);
    let mut scanner = scanner(&table);

    let t0 = Instant::now();
    scanner.scan_at(t0).unwrap();
    table.update(100, |p| {
        p.utime += 100;
        p.stime += 100;
    });
    let snapshot = scanner.scan_at(t0 + Duration::from_secs(2)).unwrap();

    let p = snapshot.find(100).unwrap();
    assert!((p.cpu_percent - 100.0).abs() < 1e-9);
    assert_eq!(p.cpu_trend, Some(p.cpu_percent));
    assert_eq!(p.memory_trend, Some(0.0));
    assert!((snapshot.metrics.total_cpu - 100.0).abs() < 1e-9);
}

#[test]
fn test_pid_reuse_resets_cpu_baseline() {
    let table = FakeTable::default();
    table.set(vec![raw(100, "worker", 1000)]);
    let mut scanner = scanner(&table);

    let t0 = Instant::now();
    scanner.scan_at(t0).unwrap();
    table.update(100, |p| {
        p.start_ticks += 1;
        p.utime += 500;
    });
    let snapshot = scanner.scan_at(t0 + Duration::from_secs(1)).unwrap();
    let p = snapshot.find(100).unwrap();
    assert_eq!(p.cpu_percent, 0.0);
    assert_eq!(p.cpu_trend, None);
}

#[test]
fn test_counter_regression_saturates() {
    let table = FakeTable::default();
    table.set(vec![raw(100, "worker", 1000)]);
    let mut scanner = scanner(&table);

    let t0 = Instant::now();
    scanner.scan_at(t0).unwrap();
    table.update(100, |p| p.utime = 0);
    let snapshot = scanner.scan_at(t0 + Duration::from_secs(1)).unwrap();
    assert_eq!(snapshot.find(100).unwrap().cpu_percent, 0.0);
}

#[test]
fn test_sorted_by_cpu_descending() {
    let table = FakeTable::default();
    table.set(vec![raw(1, "init", 0), raw(100, "idle", 1000), raw(200, "busy", 1000), raw(300, "mid", 1000)]);
    let mut scanner = scanner(&table);

    let t0 = Instant::now();
    scanner.scan_at(t0).unwrap();
    table.update(200, |p| p.utime += 90);
    table.update(300, |p| p.utime += 40);
    let snapshot = scanner.scan_at(t0 + Duration::from_secs(1)).unwrap();

    let order: Vec<u32> = snapshot.processes.iter().take(2).map(|p| p.pid).collect();
    assert_eq!(order, vec![200, 300]);
    assert!(snapshot
        .processes
        .windows(2)
        .all(|w| w[0].cpu_percent >= w[1].cpu_percent));
}

#[test]
fn test_classification_and_fallbacks() {
    let table = FakeTable::default();
    let mut kthread = raw(50, "kworker/0:1", 0);
    kthread.ppid = 2;
    kthread.cmdline.clear();
    let mut unknown_user = raw(60, "app", 4242);
    unknown_user.ppid = 1;
    table.set(vec![raw(1, "init", 0), kthread, raw(40, "sshd", 0), raw(45, "agent", 0), unknown_user]);
    let mut scanner = scanner(&table);

    let snapshot = scanner.scan().unwrap();
    assert_eq!(snapshot.find(1).unwrap().category, Category::Kernel);
    let k = snapshot.find(50).unwrap();
    assert_eq!(k.category, Category::Kernel);
    assert_eq!(k.cmdline, "[kworker/0:1]");
    assert_eq!(snapshot.find(40).unwrap().category, Category::Essential);
    assert_eq!(snapshot.find(45).unwrap().category, Category::System);
    let u = snapshot.find(60).unwrap();
    assert_eq!(u.category, Category::User);
    assert_eq!(u.user, "4242");
}

#[test]
fn test_runtime_protection_changes_reach_classification() {
    let table = FakeTable::default();
    table.set(vec![raw(100, "pulseaudio", 1000), raw(200, "postgres", 1000)]);
    let safety = SafetyManager::new(["pulseaudio"], ["systemd"], 1);
    let mut scanner = Scanner::new(table.clone(), Classifier::with_protected(safety.protected_set()));

    let snapshot = scanner.scan().unwrap();
    assert_eq!(snapshot.find(100).unwrap().category, Category::Essential);
    assert_eq!(snapshot.find(200).unwrap().category, Category::User);

    assert!(safety.remove_protected("pulseaudio"));
    assert!(safety.add_protected("postgres"));

    let snapshot = scanner.scan().unwrap();
    let pulse = snapshot.find(100).unwrap();
    assert_eq!(pulse.category, Category::User);
    assert!(!safety.needs_confirmation(pulse));
    let postgres = snapshot.find(200).unwrap();
    assert_eq!(postgres.category, Category::Essential);
    assert!(safety.needs_confirmation(postgres));
}

#[test]
fn test_unreadable_process_is_skipped() {
    let table = FakeTable::default();
    // An empty name makes the fake table report the entry as unreadable.
    table.set(vec![raw(100, "worker", 1000), raw(101, "", 1000)]);
    let mut scanner = scanner(&table);

    let snapshot = scanner.scan().unwrap();
    assert_eq!(snapshot.processes.len(), 1);
    assert_eq!(snapshot.metrics.process_count, 1);
}

#[test]
fn test_system_metrics() {
    let table = FakeTable::default();
    table.set(vec![raw(100, "worker", 1000)]);
    let mut scanner = scanner(&table);

    let metrics = scanner.scan().unwrap().metrics.clone();
    assert_eq!(metrics.memory_total_mb, 1024.0);
    assert_eq!(metrics.memory_free_mb, 512.0);
    assert_eq!(metrics.memory_used_mb, 512.0);
    assert_eq!(metrics.memory_percent, 50.0);
    assert_eq!(metrics.load_avg, [1.0, 0.5, 0.25]);
    assert_eq!(metrics.uptime_secs, 100.0);
}

#[test]
fn test_enumeration_failure_keeps_previous_snapshot() {
    let table = FakeTable::default();
    table.set(vec![raw(100, "worker", 1000)]);
    let mut scanner = scanner(&table);
    scanner.scan().unwrap();

    *table.fail.lock().unwrap() = true;
    assert!(scanner.scan().is_err());
    assert_eq!(scanner.latest().seq, 1);

    *table.fail.lock().unwrap() = false;
    assert_eq!(scanner.scan().unwrap().seq, 2);
}

#[test]
fn test_subscribers_see_latest_snapshot() {
    let table = FakeTable::default();
    table.set(vec![raw(100, "worker", 1000)]);
    let mut scanner = scanner(&table);
    let rx = scanner.subscribe();
    assert_eq!(rx.borrow().seq, 0);

    scanner.scan().unwrap();
    scanner.scan().unwrap();
    assert_eq!(rx.borrow().seq, 2);
    assert!(rx.has_changed().unwrap());
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let table = FakeTable::default();
    table.set(vec![raw(100, "worker", 1000)]);
    let scanner = scanner(&table);
    let mut rx = scanner.subscribe();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let handle = tokio::spawn(scanner.run(Duration::from_millis(10), shutdown_rx));
    rx.changed().await.unwrap();
    assert!(rx.borrow_and_update().seq >= 1);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
