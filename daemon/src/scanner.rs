//! Periodic process-table scanning with delta-based CPU accounting.
//!
//! The scanner owns the previous-scan samples and is the only writer of the
//! published [`Snapshot`]. Each scan is computed off to the side and then
//! swapped into a `watch` channel in one step, so subscribers only ever see
//! complete snapshots.

use crate::classifier::{Category, Classifier};
use crate::collector::ProcessTable;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// One process as of a scan. Replaced wholesale on every scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub ppid: u32,
    pub name: String,
    pub cmdline: String,
    pub user: String,
    pub uid: u32,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_mb: f64,
    pub io_read_bytes: u64,
    pub io_write_bytes: u64,
    pub state: char,
    /// Unix time the process started.
    pub start_time: u64,
    /// Change since the previous scan of this pid; `None` on first sight.
    pub cpu_trend: Option<f64>,
    pub memory_trend: Option<f64>,
    pub category: Category,
}

/// System-wide metrics at scan time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemMetrics {
    /// Sum of the per-process CPU percentages of this scan.
    pub total_cpu: f64,
    pub memory_percent: f64,
    pub memory_total_mb: f64,
    pub memory_used_mb: f64,
    pub memory_free_mb: f64,
    pub load_avg: [f64; 3],
    pub process_count: usize,
    pub uptime_secs: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    /// Starts at 1; 0 is the empty snapshot published before the first scan.
    pub seq: u64,
    pub timestamp: u64,
    /// Sorted by CPU percent, descending.
    pub processes: Vec<ProcessRecord>,
    pub metrics: SystemMetrics,
}

impl Snapshot {
    pub fn find(&self, pid: u32) -> Option<&ProcessRecord> {
        self.processes.iter().find(|p| p.pid == pid)
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to enumerate process table: {0}")]
    Enumerate(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    utime: u64,
    stime: u64,
    start_ticks: u64,
    at: Instant,
    cpu_percent: f64,
    memory_percent: f64,
}

/// CPU percent from a tick delta over wall-clock elapsed time.
pub fn cpu_percent(delta_ticks: u64, clock_ticks: u64, elapsed_secs: f64) -> f64 {
    if clock_ticks == 0 || elapsed_secs <= 0.0 {
        return 0.0;
    }
    (delta_ticks as f64 / clock_ticks as f64) / elapsed_secs * 100.0
}

pub struct Scanner<T: ProcessTable> {
    table: T,
    classifier: Classifier,
    samples: HashMap<u32, Sample>,
    seq: u64,
    tx: watch::Sender<Arc<Snapshot>>,
}

impl<T: ProcessTable> Scanner<T> {
    pub fn new(table: T, classifier: Classifier) -> Self {
        let (tx, _) = watch::channel(Arc::new(Snapshot::default()));
        Self {
            table,
            classifier,
            samples: HashMap::new(),
            seq: 0,
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Arc<Snapshot> {
        self.tx.borrow().clone()
    }

    pub fn scan(&mut self) -> Result<Arc<Snapshot>, ScanError> {
        self.scan_at(Instant::now())
    }

    /// Scan as of `now`. CPU is measured against the wall-clock time since
    /// the previous scan of each pid, not the nominal interval.
    pub fn scan_at(&mut self, now: Instant) -> Result<Arc<Snapshot>, ScanError> {
        let pids = self.table.list_pids()?;
        let clock_ticks = self.table.clock_ticks();
        let counters = self.table.system_counters();
        let mem_total_mb = counters.mem_total_kb as f64 / 1024.0;

        let mut processes = Vec::with_capacity(pids.len());
        let mut samples = HashMap::with_capacity(pids.len());

        for pid in pids {
            let Some(raw) = self.table.read_process(pid) else {
                continue;
            };

            // A differing start time means the pid was reused.
            let prev = self
                .samples
                .get(&pid)
                .filter(|s| s.start_ticks == raw.start_ticks)
                .copied();

            let memory_mb = raw.rss_kb as f64 / 1024.0;
            let memory_percent = if mem_total_mb > 0.0 {
                memory_mb / mem_total_mb * 100.0
            } else {
                0.0
            };

            let cpu = match prev {
                Some(p) => {
                    let delta = raw.utime.saturating_sub(p.utime) + raw.stime.saturating_sub(p.stime);
                    let elapsed = now.saturating_duration_since(p.at).as_secs_f64();
                    cpu_percent(delta, clock_ticks, elapsed)
                }
                None => 0.0,
            };

            let cmdline = if raw.cmdline.is_empty() {
                format!("[{}]", raw.name)
            } else {
                raw.cmdline
            };

            let mut record = ProcessRecord {
                pid,
                ppid: raw.ppid,
                user: self
                    .table
                    .user_name(raw.uid)
                    .unwrap_or_else(|| raw.uid.to_string()),
                name: raw.name,
                cmdline,
                uid: raw.uid,
                cpu_percent: cpu,
                memory_percent,
                memory_mb,
                io_read_bytes: raw.io_read_bytes,
                io_write_bytes: raw.io_write_bytes,
                state: raw.state,
                start_time: counters.boot_time + raw.start_ticks / clock_ticks.max(1),
                cpu_trend: prev.map(|p| cpu - p.cpu_percent),
                memory_trend: prev.map(|p| memory_percent - p.memory_percent),
                category: Category::User,
            };
            record.category = self.classifier.classify(&record);

            samples.insert(
                pid,
                Sample {
                    utime: raw.utime,
                    stime: raw.stime,
                    start_ticks: raw.start_ticks,
                    at: now,
                    cpu_percent: cpu,
                    memory_percent,
                },
            );
            processes.push(record);
        }

        processes.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));

        let mem_free_mb = counters.mem_available_kb as f64 / 1024.0;
        let metrics = SystemMetrics {
            total_cpu: processes.iter().map(|p| p.cpu_percent).sum(),
            memory_percent: if mem_total_mb > 0.0 {
                (mem_total_mb - mem_free_mb) / mem_total_mb * 100.0
            } else {
                0.0
            },
            memory_total_mb: mem_total_mb,
            memory_used_mb: (mem_total_mb - mem_free_mb).max(0.0),
            memory_free_mb: mem_free_mb,
            load_avg: counters.load_avg,
            process_count: processes.len(),
            uptime_secs: counters.uptime_secs,
        };

        // Exited pids drop out here.
        self.samples = samples;
        self.seq += 1;

        let snapshot = Arc::new(Snapshot {
            seq: self.seq,
            timestamp: unix_now(),
            processes,
            metrics,
        });
        self.tx.send_replace(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Scan every `interval` until `shutdown` flips to true or its sender
    /// goes away. The first scan runs immediately. Each scan runs on the
    /// blocking pool since it is hundreds of small `/proc` reads.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>)
    where
        T: 'static,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut scanner = self;

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            let joined = tokio::task::spawn_blocking(move || {
                let result = scanner.scan();
                (scanner, result)
            })
            .await;
            let result = match joined {
                Ok((returned, result)) => {
                    scanner = returned;
                    result
                }
                Err(e) => {
                    error!("Scan task failed: {}", e);
                    break;
                }
            };

            match result {
                Ok(snapshot) => debug!(
                    seq = snapshot.seq,
                    processes = snapshot.processes.len(),
                    total_cpu = snapshot.metrics.total_cpu,
                    "scan complete"
                ),
                Err(e) => warn!("Scan skipped: {}", e),
            }
        }
        info!("Scanner stopped");
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
