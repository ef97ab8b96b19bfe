//! Process termination with graceful-to-forceful escalation

use crate::deps::DependencyIndex;
use crate::safety::SafetyManager;
use crate::scanner::{ProcessRecord, Snapshot};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Liveness poll period during the graceful wait.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
}

impl Signal {
    fn raw(self) -> libc::c_int {
        match self {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Term => f.write_str("SIGTERM"),
            Signal::Kill => f.write_str("SIGKILL"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TerminateError {
    #[error("process {0} not found")]
    NotFound(u32),
    #[error("refusing to signal pid {0}")]
    InvalidPid(u32),
    #[error("termination blocked: {0}")]
    Blocked(String),
    #[error("failed to send {signal} to {pid}: {source}")]
    Signal {
        pid: u32,
        signal: Signal,
        #[source]
        source: io::Error,
    },
}

/// How a termination request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Exited within the timeout after the graceful signal.
    Exited,
    /// Outlived the timeout and was force-killed.
    Escalated,
    /// Force-killed without a graceful attempt.
    Killed,
    /// Shutdown interrupted the graceful wait; no forceful kill was sent.
    Abandoned,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Exited => "exited",
            Outcome::Escalated => "escalated",
            Outcome::Killed => "killed",
            Outcome::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// Result of one member of a tree termination.
#[derive(Debug)]
pub struct TreeStep {
    pub pid: u32,
    pub result: Result<Outcome, TerminateError>,
}

pub fn send_signal(pid: u32, signal: Signal) -> Result<(), TerminateError> {
    // 0 and anything that wraps negative would address process groups.
    if pid == 0 || pid > i32::MAX as u32 {
        return Err(TerminateError::InvalidPid(pid));
    }
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal.raw()) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Err(TerminateError::NotFound(pid))
    } else {
        Err(TerminateError::Signal {
            pid,
            signal,
            source: err,
        })
    }
}

/// True while the pid exists and is not a zombie awaiting reaping.
pub fn is_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc != 0 && io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH) {
        return false;
    }
    match fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rfind(')')
            .and_then(|i| stat[i + 1..].split_whitespace().next())
            .map_or(true, |state| state != "Z" && state != "X"),
        Err(_) => rc == 0,
    }
}

pub struct Terminator {
    safety: Arc<SafetyManager>,
    timeout: Duration,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Terminator {
    pub fn new(safety: Arc<SafetyManager>, timeout: Duration) -> Self {
        Self {
            safety,
            timeout,
            shutdown: None,
        }
    }

    /// Abandon graceful waits once `shutdown` turns true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send SIGTERM, poll until gone, escalate to SIGKILL after the timeout.
    /// With `force`, send SIGKILL and return immediately.
    pub async fn terminate(&self, pid: u32, force: bool) -> Result<Outcome, TerminateError> {
        if force {
            send_signal(pid, Signal::Kill)?;
            info!(pid, "Sent SIGKILL");
            return Ok(Outcome::Killed);
        }

        send_signal(pid, Signal::Term)?;
        debug!(pid, timeout_ms = self.timeout.as_millis() as u64, "Sent SIGTERM");

        let deadline = Instant::now() + self.timeout;
        let mut shutdown = self.shutdown.clone();
        loop {
            if !is_alive(pid) {
                info!(pid, "Process exited after SIGTERM");
                return Ok(Outcome::Exited);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let nap = POLL_INTERVAL.min(deadline - now);

            match shutdown.as_mut() {
                Some(rx) => {
                    if *rx.borrow() {
                        warn!(pid, "Shutdown during graceful wait, leaving process");
                        return Ok(Outcome::Abandoned);
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(nap) => {}
                        changed = rx.changed() => {
                            if changed.is_err() || *rx.borrow() {
                                warn!(pid, "Shutdown during graceful wait, leaving process");
                                return Ok(Outcome::Abandoned);
                            }
                        }
                    }
                }
                None => tokio::time::sleep(nap).await,
            }
        }

        match send_signal(pid, Signal::Kill) {
            Ok(()) => {
                warn!(pid, "Process outlived SIGTERM timeout, sent SIGKILL");
                Ok(Outcome::Escalated)
            }
            // Exited between the last poll and the kill.
            Err(TerminateError::NotFound(_)) => Ok(Outcome::Exited),
            Err(e) => Err(e),
        }
    }

    /// Check the safety gate, then terminate. Denials send no signal.
    pub async fn safe_terminate(
        &self,
        process: &ProcessRecord,
        force: bool,
    ) -> Result<Outcome, TerminateError> {
        let verdict = self.safety.validate_termination(process);
        if !verdict.allowed {
            info!(pid = process.pid, name = %process.name, reason = %verdict.reason, "Termination blocked");
            return Err(TerminateError::Blocked(verdict.reason));
        }
        self.terminate(process.pid, force).await
    }

    /// Terminate `root` and its descendants children-first.
    ///
    /// Every member is checked against the safety gate before any signal is
    /// sent. If one is denied the whole tree is refused, so a protected
    /// process is never killed or left without its parent. The walk stops at
    /// the first member that could not be terminated or was abandoned;
    /// members that already exited are skipped over.
    pub async fn safe_terminate_tree(
        &self,
        root: &ProcessRecord,
        snapshot: &Snapshot,
        force: bool,
    ) -> Result<Vec<TreeStep>, TerminateError> {
        let index = DependencyIndex::build(&snapshot.processes);
        let order = index.safe_termination_order(root.pid);

        let mut members = Vec::with_capacity(order.len());
        for pid in order {
            let record = if pid == root.pid {
                root
            } else {
                match snapshot.find(pid) {
                    Some(record) => record,
                    None => continue,
                }
            };
            let verdict = self.safety.validate_termination(record);
            if !verdict.allowed {
                info!(
                    root = root.pid,
                    pid,
                    reason = %verdict.reason,
                    "Tree termination refused"
                );
                let reason = if pid == root.pid {
                    verdict.reason
                } else {
                    format!("descendant {} of {}: {}", pid, root.pid, verdict.reason)
                };
                return Err(TerminateError::Blocked(reason));
            }
            members.push(record.pid);
        }

        let mut steps = Vec::with_capacity(members.len());
        for pid in members {
            let result = self.terminate(pid, force).await;
            let stop = match &result {
                Ok(Outcome::Abandoned) => true,
                Ok(_) | Err(TerminateError::NotFound(_)) => false,
                Err(_) => true,
            };
            steps.push(TreeStep { pid, result });
            if stop {
                warn!(root = root.pid, pid, "Tree termination stopped early");
                break;
            }
        }
        Ok(steps)
    }
}
