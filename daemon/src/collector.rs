//! Process table access (reads /proc on Linux)

pub mod linux;

pub use linux::LinuxProcTable;

/// Raw per-process counters as read from the process table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawProcess {
    pub pid: u32,
    pub ppid: u32,
    pub name: String,
    pub state: char,
    /// User-mode CPU time in clock ticks.
    pub utime: u64,
    /// Kernel-mode CPU time in clock ticks.
    pub stime: u64,
    /// Start time in clock ticks after boot.
    pub start_ticks: u64,
    pub uid: u32,
    pub rss_kb: u64,
    /// NUL separators already replaced by spaces; empty for kernel threads.
    pub cmdline: String,
    pub io_read_bytes: u64,
    pub io_write_bytes: u64,
}

/// System-wide counters, read independently of the per-process loop.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemCounters {
    pub mem_total_kb: u64,
    pub mem_available_kb: u64,
    pub load_avg: [f64; 3],
    pub uptime_secs: f64,
    /// Unix time of boot (`btime`).
    pub boot_time: u64,
}

pub trait ProcessTable: Send + Sync {
    /// Enumerate the pids currently present in the table.
    fn list_pids(&self) -> std::io::Result<Vec<u32>>;

    /// Read one process. `None` means the entry vanished or was malformed.
    fn read_process(&self, pid: u32) -> Option<RawProcess>;

    fn system_counters(&self) -> SystemCounters;

    fn clock_ticks(&self) -> u64;

    fn user_name(&self, uid: u32) -> Option<String>;
}
