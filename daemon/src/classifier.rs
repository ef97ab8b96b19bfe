//! Process categorization

use crate::scanner::ProcessRecord;
use serde::{Deserialize, Serialize};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::fmt;

/// Pid of `kthreadd`, the parent of every kernel thread.
pub const KTHREADD_PID: u32 = 2;

/// Well-known system daemons, classified as System even when not run by root.
const SYSTEM_DAEMONS: &[&str] = &[
    "systemd",
    "init",
    "rsyslogd",
    "syslogd",
    "journald",
    "udevd",
    "dbus-daemon",
    "polkitd",
    "accounts-daemon",
    "cron",
    "atd",
    "acpid",
    "thermald",
    "irqbalance",
    "snapd",
    "packagekitd",
    "udisksd",
    "colord",
    "cupsd",
    "avahi-daemon",
    "bluetoothd",
    "wpa_supplicant",
    "dhclient",
    "NetworkManager",
    "ModemManager",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Kernel,
    Essential,
    System,
    #[default]
    User,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Kernel => "Kernel",
            Category::Essential => "Essential",
            Category::System => "System",
            Category::User => "User",
        };
        f.write_str(name)
    }
}

/// Protected process names behind a shared lock. Clones share the same set,
/// so the classifier and the safety gate see runtime edits together.
#[derive(Debug, Clone, Default)]
pub struct ProtectedNames(Arc<RwLock<HashSet<String>>>);

impl ProtectedNames {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(Arc::new(RwLock::new(names.into_iter().map(Into::into).collect())))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.read().contains(name)
    }

    pub fn insert(&self, name: String) -> bool {
        self.0.write().insert(name)
    }

    pub fn remove(&self, name: &str) -> bool {
        self.0.write().remove(name)
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.0.read().iter().cloned().collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Classifier {
    protected: ProtectedNames,
}

impl Classifier {
    pub fn new<I, S>(protected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_protected(ProtectedNames::new(protected))
    }

    /// Classify against a set shared with the safety gate.
    pub fn with_protected(protected: ProtectedNames) -> Self {
        Self { protected }
    }

    /// First matching rule wins: kernel, essential, system, user.
    pub fn classify(&self, process: &ProcessRecord) -> Category {
        if process.pid <= KTHREADD_PID || process.ppid == KTHREADD_PID {
            return Category::Kernel;
        }

        let cmdline = process.cmdline.as_str();
        if cmdline.is_empty() || (cmdline.starts_with('[') && cmdline.ends_with(']')) {
            return Category::Kernel;
        }

        if self.protected.contains(&process.name) {
            return Category::Essential;
        }

        if process.uid == 0 || SYSTEM_DAEMONS.contains(&process.name.as_str()) {
            return Category::System;
        }

        Category::User
    }
}
