//! Termination safety gate and consent policy

pub mod consent;

pub use consent::ConsentLevel;

use crate::classifier::{Category, ProtectedNames};
use crate::scanner::ProcessRecord;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::info;

/// Pids at or below this are never terminated.
pub const CRITICAL_PID_MAX: u32 = 2;

/// Outcome of a termination check. A denial is a normal result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: String,
}

impl Verdict {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: "termination allowed".to_string(),
        }
    }

    fn deny(reason: String) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

#[derive(Debug, Clone)]
struct Policy {
    never_terminate: HashSet<String>,
    consent: ConsentLevel,
}

pub struct SafetyManager {
    protected: ProtectedNames,
    policy: RwLock<Policy>,
}

impl SafetyManager {
    pub fn new<P, N, S>(protected: P, never_terminate: N, consent_level: i64) -> Self
    where
        P: IntoIterator<Item = S>,
        N: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            protected: ProtectedNames::new(protected),
            policy: RwLock::new(Policy {
                never_terminate: never_terminate.into_iter().map(Into::into).collect(),
                consent: ConsentLevel::clamped(consent_level),
            }),
        }
    }

    /// Handle on the live protected set. Updates made through this manager
    /// are visible to every holder.
    pub fn protected_set(&self) -> ProtectedNames {
        self.protected.clone()
    }

    fn denial(&self, process: &ProcessRecord) -> Option<String> {
        if process.pid <= CRITICAL_PID_MAX {
            return Some(format!("PID {} is a critical system process", process.pid));
        }
        if process.category == Category::Kernel {
            return Some(format!("process '{}' is a kernel thread", process.name));
        }

        if self.policy.read().never_terminate.contains(&process.name) {
            return Some(format!(
                "process '{}' is on the never-terminate list",
                process.name
            ));
        }
        if self.protected.contains(&process.name) {
            return Some(format!("process '{}' is protected", process.name));
        }
        None
    }

    pub fn is_protected(&self, process: &ProcessRecord) -> bool {
        self.denial(process).is_some()
    }

    pub fn validate_termination(&self, process: &ProcessRecord) -> Verdict {
        match self.denial(process) {
            Some(reason) => Verdict::deny(reason),
            None => Verdict::allow(),
        }
    }

    pub fn consent_level(&self) -> ConsentLevel {
        self.policy.read().consent
    }

    /// Set the consent level, clamped to 0..=3. Returns the level applied.
    pub fn set_consent_level(&self, level: i64) -> ConsentLevel {
        let consent = ConsentLevel::clamped(level);
        let previous = std::mem::replace(&mut self.policy.write().consent, consent);
        if previous != consent {
            info!(from = %previous, to = %consent, "Consent level changed");
        }
        consent
    }

    pub fn needs_confirmation(&self, process: &ProcessRecord) -> bool {
        self.consent_level().needs_confirmation(process.category)
    }

    pub fn is_monitor_only(&self) -> bool {
        self.consent_level() == ConsentLevel::MonitorOnly
    }

    /// Returns false if the name was already protected.
    pub fn add_protected(&self, name: impl Into<String>) -> bool {
        self.protected.insert(name.into())
    }

    pub fn remove_protected(&self, name: &str) -> bool {
        self.protected.remove(name)
    }

    pub fn protected_names(&self) -> BTreeSet<String> {
        self.protected.names()
    }

    pub fn never_terminate_names(&self) -> BTreeSet<String> {
        self.policy.read().never_terminate.iter().cloned().collect()
    }
}
