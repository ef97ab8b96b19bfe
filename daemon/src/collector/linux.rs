use super::{ProcessTable, RawProcess, SystemCounters};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::trace;

const DEFAULT_CLOCK_TICKS: u64 = 100;

pub struct LinuxProcTable {
    root: PathBuf,
    passwd: PathBuf,
    clock_ticks: u64,
    users: RwLock<UserCache>,
}

/// uid→name map plus the (mtime, size) of the passwd file it came from.
#[derive(Default)]
struct UserCache {
    names: HashMap<u32, String>,
    stamp: Option<(SystemTime, u64)>,
}

impl UserCache {
    fn load(path: &Path) -> Self {
        Self {
            stamp: passwd_stamp(path),
            names: load_passwd(path),
        }
    }
}

fn passwd_stamp(path: &Path) -> Option<(SystemTime, u64)> {
    let meta = fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

impl LinuxProcTable {
    pub fn new() -> Self {
        Self::with_root("/proc", "/etc/passwd")
    }

    /// Read from an alternative proc root and passwd file.
    pub fn with_root(root: impl Into<PathBuf>, passwd: impl Into<PathBuf>) -> Self {
        let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        let clock_ticks = if ticks > 0 { ticks as u64 } else { DEFAULT_CLOCK_TICKS };
        let passwd = passwd.into();
        Self {
            root: root.into(),
            users: RwLock::new(UserCache::load(&passwd)),
            passwd,
            clock_ticks,
        }
    }

    fn read(&self, pid: u32, file: &str) -> std::io::Result<String> {
        fs::read_to_string(self.root.join(pid.to_string()).join(file))
    }

    fn read_root(&self, file: &str) -> Option<String> {
        fs::read_to_string(self.root.join(file)).ok()
    }

    fn boot_time(&self) -> u64 {
        self.read_root("stat")
            .and_then(|stat| {
                stat.lines()
                    .find_map(|line| line.strip_prefix("btime "))
                    .and_then(|v| v.trim().parse().ok())
            })
            .unwrap_or(0)
    }
}

impl Default for LinuxProcTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for LinuxProcTable {
    fn list_pids(&self) -> std::io::Result<Vec<u32>> {
        let mut pids = Vec::new();
        for entry in fs::read_dir(&self.root)?.flatten() {
            if let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) {
                pids.push(pid);
            }
        }
        Ok(pids)
    }

    fn read_process(&self, pid: u32) -> Option<RawProcess> {
        let stat = match self.read(pid, "stat") {
            Ok(s) => s,
            Err(e) => {
                trace!(pid, error = %e, "stat unreadable, skipping");
                return None;
            }
        };
        let Some(mut process) = parse_stat(pid, &stat) else {
            trace!(pid, "malformed stat, skipping");
            return None;
        };

        let status = self.read(pid, "status").ok()?;
        let (uid, rss_kb) = parse_status(&status);
        process.uid = uid?;
        process.rss_kb = rss_kb;

        process.cmdline = self
            .read(pid, "cmdline")
            .map(|raw| raw.trim_end_matches('\0').replace('\0', " ").trim().to_string())
            .unwrap_or_default();

        // io needs ptrace access to the target; zero when denied.
        if let Ok(io) = self.read(pid, "io") {
            let (read, write) = parse_io(&io);
            process.io_read_bytes = read;
            process.io_write_bytes = write;
        }

        Some(process)
    }

    fn system_counters(&self) -> SystemCounters {
        let mut counters = SystemCounters {
            boot_time: self.boot_time(),
            ..Default::default()
        };

        if let Some(meminfo) = self.read_root("meminfo") {
            for line in meminfo.lines() {
                let mut fields = line.split_whitespace();
                let key = fields.next();
                let value = fields.next().and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
                match key {
                    Some("MemTotal:") => counters.mem_total_kb = value,
                    Some("MemAvailable:") => counters.mem_available_kb = value,
                    _ => {}
                }
            }
        }

        if let Some(loadavg) = self.read_root("loadavg") {
            for (slot, field) in counters.load_avg.iter_mut().zip(loadavg.split_whitespace()) {
                *slot = field.parse().unwrap_or(0.0);
            }
        }

        if let Some(uptime) = self.read_root("uptime") {
            counters.uptime_secs = uptime
                .split_whitespace()
                .next()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0);
        }

        counters
    }

    fn clock_ticks(&self) -> u64 {
        self.clock_ticks
    }

    fn user_name(&self, uid: u32) -> Option<String> {
        {
            let users = self.users.read();
            if let Some(name) = users.names.get(&uid) {
                return Some(name.clone());
            }
            // Unknown uids are common in containers; only reparse when the
            // file has changed since the last load.
            if users.stamp.is_some() && users.stamp == passwd_stamp(&self.passwd) {
                return None;
            }
        }
        let fresh = UserCache::load(&self.passwd);
        let name = fresh.names.get(&uid).cloned();
        *self.users.write() = fresh;
        name
    }
}

/// Parse `/proc/<pid>/stat`. The name sits between the first `(` and the
/// last `)` and may itself contain spaces or parentheses.
fn parse_stat(pid: u32, content: &str) -> Option<RawProcess> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    if close <= open {
        return None;
    }
    let name = content[open + 1..close].to_string();
    let fields: Vec<&str> = content.get(close + 1..)?.split_whitespace().collect();
    if fields.len() < 20 {
        return None;
    }

    Some(RawProcess {
        pid,
        name,
        state: fields[0].chars().next()?,
        ppid: fields[1].parse().ok()?,
        utime: fields[11].parse().ok()?,
        stime: fields[12].parse().ok()?,
        start_ticks: fields[19].parse().ok()?,
        ..Default::default()
    })
}

/// Returns (real uid, VmRSS in kB). Kernel threads have no VmRSS line.
fn parse_status(content: &str) -> (Option<u32>, u64) {
    let mut uid = None;
    let mut rss_kb = 0;
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let first = value.split_whitespace().next();
        match key.trim() {
            "Uid" => uid = first.and_then(|v| v.parse().ok()),
            "VmRSS" => rss_kb = first.and_then(|v| v.parse().ok()).unwrap_or(0),
            _ => {}
        }
    }
    (uid, rss_kb)
}

fn parse_io(content: &str) -> (u64, u64) {
    let mut read = 0;
    let mut write = 0;
    for line in content.lines() {
        if let Some((key, value)) = line.split_once(':') {
            let value = value.trim().parse().unwrap_or(0);
            match key.trim() {
                "read_bytes" => read = value,
                "write_bytes" => write = value,
                _ => {}
            }
        }
    }
    (read, write)
}

fn load_passwd(path: &Path) -> HashMap<u32, String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter_map(|line| {
            let mut fields = line.split(':');
            let name = fields.next()?;
            let uid = fields.nth(1)?.parse().ok()?;
            Some((uid, name.to_string()))
        })
        .collect()
}
