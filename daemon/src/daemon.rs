//! Daemon state: reviews each published snapshot and serves the control socket.

use crate::advisory::{Action, AdvisoryCache, CachedAdvisor, Recommendation};
use crate::audit::AuditLog;
use crate::classifier::Category;
use crate::config::Config;
use crate::deps::DependencyIndex;
use crate::executor::{Outcome, TerminateError, Terminator};
use crate::notifier::Notifier;
use crate::protocol::{ConfirmationData, Request, Response, StatusData, TerminationData};
use crate::safety::SafetyManager;
use crate::scanner::{ProcessRecord, Snapshot};
use crate::socket::RequestHandler;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{error, info, warn};

/// Thresholds the review applies before asking for advice.
#[derive(Debug, Clone)]
pub struct ReviewSettings {
    pub enabled: bool,
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
    pub confidence_threshold: f64,
    pub history_size: usize,
}

impl ReviewSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.advisory.enabled,
            cpu_threshold: config.monitoring.cpu_threshold,
            memory_threshold: config.monitoring.memory_threshold,
            confidence_threshold: config.advisory.confidence_threshold,
            history_size: config.monitoring.history_size,
        }
    }
}

/// Counts from reviewing one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReviewSummary {
    pub evaluated: usize,
    pub terminated: usize,
    pub awaiting_confirmation: usize,
    pub suppressed: usize,
    pub failed: usize,
}

pub struct DaemonState {
    snapshots: watch::Receiver<Arc<Snapshot>>,
    safety: Arc<SafetyManager>,
    terminator: Terminator,
    advisor: CachedAdvisor,
    audit: Option<Mutex<AuditLog>>,
    notifier: Notifier,
    settings: ReviewSettings,
    decisions: RwLock<VecDeque<Recommendation>>,
    broadcast_tx: broadcast::Sender<String>,
}

impl DaemonState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: ReviewSettings,
        snapshots: watch::Receiver<Arc<Snapshot>>,
        safety: Arc<SafetyManager>,
        terminator: Terminator,
        advisor: CachedAdvisor,
        audit: Option<AuditLog>,
        notifier: Notifier,
        broadcast_tx: broadcast::Sender<String>,
    ) -> Self {
        Self {
            snapshots,
            safety,
            terminator,
            advisor,
            audit: audit.map(Mutex::new),
            notifier,
            decisions: RwLock::new(VecDeque::with_capacity(settings.history_size)),
            settings,
            broadcast_tx,
        }
    }

    pub fn latest(&self) -> Arc<Snapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn safety(&self) -> &Arc<SafetyManager> {
        &self.safety
    }

    pub fn cache(&self) -> &Arc<AdvisoryCache> {
        self.advisor.cache()
    }

    /// Most recent first.
    pub fn recent_decisions(&self, limit: usize) -> Vec<Recommendation> {
        self.decisions.read().iter().rev().take(limit).cloned().collect()
    }

    fn remember(&self, decision: &Recommendation) {
        if self.settings.history_size == 0 {
            return;
        }
        let mut decisions = self.decisions.write();
        while decisions.len() >= self.settings.history_size {
            decisions.pop_front();
        }
        decisions.push_back(decision.clone());
    }

    fn publish(&self, event: &Response) {
        if let Ok(json) = serde_json::to_string(event) {
            // No subscribers is fine.
            let _ = self.broadcast_tx.send(json);
        }
    }

    async fn audit<F>(&self, write: F)
    where
        F: FnOnce(&AuditLog) -> rusqlite::Result<i64>,
    {
        if let Some(audit) = &self.audit {
            let audit = audit.lock().await;
            if let Err(e) = write(&audit) {
                error!("Failed to write audit entry: {}", e);
            }
        }
    }

    /// Append a free-form event to the audit log, if one is open.
    pub async fn record_event(&self, event: &str, details: &str) {
        self.audit(|a| a.record_event(event, details)).await;
    }

    fn is_candidate(&self, process: &ProcessRecord) -> bool {
        process.category == Category::User
            && (process.cpu_percent >= self.settings.cpu_threshold
                || process.memory_percent >= self.settings.memory_threshold)
    }

    /// Ask for advice on every over-threshold user process and act on
    /// confident termination advice as the consent level allows.
    pub async fn review(&self, snapshot: &Snapshot) -> ReviewSummary {
        let mut summary = ReviewSummary::default();
        if !self.settings.enabled {
            return summary;
        }

        for process in snapshot.processes.iter().filter(|p| self.is_candidate(p)) {
            let decision = self.advisor.advise(process, &snapshot.metrics).await;
            summary.evaluated += 1;

            self.remember(&decision);
            self.audit(|a| a.record_decision(&decision)).await;
            self.publish(&Response::Decision {
                data: decision.clone(),
            });

            if decision.action != Action::Terminate
                || decision.confidence < self.settings.confidence_threshold
            {
                continue;
            }

            if self.safety.is_monitor_only() {
                info!(pid = process.pid, name = %process.name, "Monitor-only mode, not terminating");
                summary.suppressed += 1;
                continue;
            }

            if self.safety.needs_confirmation(process) {
                info!(pid = process.pid, name = %process.name, "Termination awaiting confirmation");
                self.notifier.send(
                    &format!("Aura: confirm termination of {}", process.name),
                    &format!("PID {} - {}", process.pid, decision.reason),
                );
                self.publish(&Response::ConfirmationRequired {
                    data: ConfirmationData {
                        pid: process.pid,
                        name: process.name.clone(),
                        category: process.category,
                        reason: decision.reason.clone(),
                        confidence: decision.confidence,
                    },
                });
                summary.awaiting_confirmation += 1;
                continue;
            }

            match self.terminator.safe_terminate(process, false).await {
                Ok(outcome) => {
                    self.on_terminated(process, outcome, &decision.reason).await;
                    summary.terminated += 1;
                }
                Err(e) => {
                    warn!(pid = process.pid, name = %process.name, "Termination failed: {}", e);
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    async fn on_terminated(&self, process: &ProcessRecord, outcome: Outcome, reason: &str) {
        if outcome == Outcome::Abandoned {
            return;
        }
        info!(pid = process.pid, name = %process.name, %outcome, "Process terminated");
        let details = format!("{} ({})", reason, outcome);
        self.audit(|a| a.record_termination(process.pid, &process.name, &details))
            .await;
        self.notifier.send(
            &format!("Aura: terminated {}", process.name),
            &format!("PID {} - {}", process.pid, reason),
        );
        self.publish(&Response::Terminated {
            data: TerminationData {
                pid: process.pid,
                name: process.name.clone(),
                outcome: outcome.to_string(),
            },
        });
    }

    fn status(&self) -> StatusData {
        let snapshot = self.latest();
        let consent = self.safety.consent_level();
        let cache = self.cache().stats();
        StatusData {
            scan_seq: snapshot.seq,
            process_count: snapshot.metrics.process_count,
            total_cpu: snapshot.metrics.total_cpu,
            memory_percent: snapshot.metrics.memory_percent,
            load_avg: snapshot.metrics.load_avg,
            consent_level: consent.as_u8(),
            consent: consent.description().to_string(),
            cache_entries: cache.entries,
            cache_hits: cache.hits,
            cache_misses: cache.misses,
        }
    }

    /// Operator-initiated kill; counts as confirmed but never runs in
    /// monitor-only mode.
    async fn kill(&self, pid: u32, force: bool, include_children: bool) -> Response {
        if self.safety.is_monitor_only() {
            return Response::error("monitor-only mode: terminations are disabled");
        }
        let snapshot = self.latest();
        let Some(process) = snapshot.find(pid) else {
            return Response::error(TerminateError::NotFound(pid));
        };

        if include_children {
            let steps = match self.terminator.safe_terminate_tree(process, &snapshot, force).await {
                Ok(steps) => steps,
                Err(e) => return Response::error(e),
            };
            let mut results = Vec::with_capacity(steps.len());
            for step in steps {
                match &step.result {
                    Ok(outcome) => {
                        if let Some(member) = snapshot.find(step.pid) {
                            self.on_terminated(member, *outcome, "operator request").await;
                        }
                        results.push(serde_json::json!({ "pid": step.pid, "outcome": outcome }));
                    }
                    Err(e) => {
                        results.push(serde_json::json!({ "pid": step.pid, "error": e.to_string() }))
                    }
                }
            }
            return Response::data(serde_json::json!({ "steps": results }));
        }

        match self.terminator.safe_terminate(process, force).await {
            Ok(outcome) => {
                self.on_terminated(process, outcome, "operator request").await;
                let orphans = DependencyIndex::build(&snapshot.processes)
                    .would_orphan(pid)
                    .to_vec();
                Response::data(serde_json::json!({
                    "success": true,
                    "outcome": outcome,
                    "orphaned": orphans,
                }))
            }
            Err(e) => Response::error(e),
        }
    }
}

#[async_trait::async_trait]
impl RequestHandler for DaemonState {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::ListProcesses { params } => {
                let snapshot = self.latest();
                let data: Vec<&ProcessRecord> = snapshot
                    .processes
                    .iter()
                    .filter(|p| params.category.map_or(true, |c| p.category == c))
                    .take(params.limit.unwrap_or(usize::MAX))
                    .collect();
                Response::data(serde_json::json!(data))
            }

            Request::GetStatus => Response::Status {
                data: self.status(),
            },

            Request::ValidateTermination { params } => {
                let snapshot = self.latest();
                match snapshot.find(params.pid) {
                    Some(process) => {
                        let verdict = self.safety.validate_termination(process);
                        Response::data(serde_json::json!({
                            "allowed": verdict.allowed,
                            "reason": verdict.reason,
                            "needs_confirmation": self.safety.needs_confirmation(process),
                        }))
                    }
                    None => Response::error(TerminateError::NotFound(params.pid)),
                }
            }

            Request::KillProcess { params } => {
                self.kill(params.pid, params.force, params.include_children)
                    .await
            }

            Request::GetConsent => {
                let level = self.safety.consent_level();
                Response::data(serde_json::json!({
                    "level": level.as_u8(),
                    "description": level.description(),
                }))
            }

            Request::SetConsent { params } => {
                let level = self.safety.set_consent_level(params.level);
                let details = format!("consent level set to {}", level);
                self.record_event("consent_change", &details).await;
                Response::data(serde_json::json!({
                    "level": level.as_u8(),
                    "description": level.description(),
                }))
            }

            Request::AddProtected { params } => {
                let added = self.safety.add_protected(params.name);
                Response::data(serde_json::json!({ "success": true, "changed": added }))
            }

            Request::RemoveProtected { params } => {
                let removed = self.safety.remove_protected(&params.name);
                Response::data(serde_json::json!({ "success": true, "changed": removed }))
            }

            Request::GetDecisions { params } => {
                let limit = params.limit.unwrap_or(50) as usize;
                Response::data(serde_json::json!(self.recent_decisions(limit)))
            }

            Request::GetAudit { params } => match &self.audit {
                Some(audit) => {
                    let audit = audit.lock().await;
                    match audit.recent(params.limit.unwrap_or(50), None) {
                        Ok(entries) => Response::data(serde_json::json!(entries)),
                        Err(e) => Response::error(e),
                    }
                }
                None => Response::error("audit log disabled"),
            },

            Request::ClearCache => {
                self.cache().clear();
                Response::success()
            }
        }
    }
}

/// Review every new snapshot until shutdown.
pub async fn decision_loop(
    state: Arc<DaemonState>,
    mut snapshots: watch::Receiver<Arc<Snapshot>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                let summary = state.review(&snapshot).await;
                if summary.evaluated > 0 {
                    info!(
                        seq = snapshot.seq,
                        evaluated = summary.evaluated,
                        terminated = summary.terminated,
                        awaiting = summary.awaiting_confirmation,
                        "Review complete"
                    );
                }
                state.publish(&Response::Status { data: state.status() });
            }
        }
    }
    info!("Decision loop stopped");
}
