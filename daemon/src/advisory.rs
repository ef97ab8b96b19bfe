//! Termination advice and its fingerprint-keyed memoization

pub mod cache;

pub use cache::{AdvisoryCache, CacheStats};

use crate::classifier::Category;
use crate::scanner::{unix_now, ProcessRecord, SystemMetrics};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Width of the CPU/memory buckets used in fingerprints, in percent.
pub const BUCKET_WIDTH: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Terminate,
    Keep,
    Notify,
    Throttle,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Terminate => "terminate",
            Action::Keep => "keep",
            Action::Notify => "notify",
            Action::Throttle => "throttle",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub pid: u32,
    pub name: String,
    pub action: Action,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub reason: String,
    /// 0.0 to 1.0
    pub risk_score: f64,
    pub savings_watt: f64,
    pub timestamp: u64,
    #[serde(default)]
    pub from_cache: bool,
}

impl Recommendation {
    pub fn new(process: &ProcessRecord, action: Action, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            pid: process.pid,
            name: process.name.clone(),
            action,
            confidence,
            reason: reason.into(),
            risk_score: 0.0,
            savings_watt: 0.0,
            timestamp: unix_now(),
            from_cache: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum AdvisoryError {
    #[error("advisory engine unavailable: {0}")]
    Unavailable(String),
    #[error("invalid advisory response: {0}")]
    InvalidResponse(String),
}

/// External advisory engine.
#[async_trait::async_trait]
pub trait Advisor: Send + Sync {
    async fn evaluate(
        &self,
        process: &ProcessRecord,
        metrics: &SystemMetrics,
    ) -> Result<Recommendation, AdvisoryError>;
}

/// Round down to the nearest bucket boundary.
pub fn bucket(value: f64) -> i64 {
    ((value / BUCKET_WIDTH).floor() as i64) * BUCKET_WIDTH as i64
}

/// Key summarizing a process's identity and coarse resource profile, so
/// small CPU/memory fluctuations map to the same cache entry.
pub fn fingerprint(process: &ProcessRecord) -> String {
    let raw = format!(
        "{}|{}|{}|{}|{}",
        process.name,
        process.user,
        bucket(process.cpu_percent),
        bucket(process.memory_percent),
        process.category,
    );
    let digest = Sha256::digest(raw.as_bytes());
    hex::encode(&digest[..8])
}

/// Consults the cache before the engine and stores fresh answers.
pub struct CachedAdvisor {
    inner: Arc<dyn Advisor>,
    cache: Arc<AdvisoryCache>,
}

impl CachedAdvisor {
    pub fn new(inner: Arc<dyn Advisor>, cache: Arc<AdvisoryCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Arc<AdvisoryCache> {
        &self.cache
    }

    /// Never fails: engine errors become an uncached "keep".
    pub async fn advise(&self, process: &ProcessRecord, metrics: &SystemMetrics) -> Recommendation {
        let key = fingerprint(process);
        if let Some(mut cached) = self.cache.get(&key) {
            debug!(pid = process.pid, fingerprint = %key, "advisory cache hit");
            // Same fingerprint, possibly a different instance.
            cached.pid = process.pid;
            return cached;
        }

        match self.inner.evaluate(process, metrics).await {
            Ok(recommendation) => {
                self.cache.put(key, recommendation.clone());
                recommendation
            }
            Err(e) => {
                warn!(pid = process.pid, name = %process.name, "Advisory failed: {}", e);
                Recommendation::new(
                    process,
                    Action::Keep,
                    0.0,
                    format!("advisory unavailable ({}), defaulting to keep", e),
                )
            }
        }
    }
}

/// Local stand-in for an external engine: recommends terminating user
/// processes over the CPU or memory threshold.
#[derive(Debug, Clone)]
pub struct ThresholdAdvisor {
    cpu_threshold: f64,
    memory_threshold: f64,
}

impl ThresholdAdvisor {
    pub fn new(cpu_threshold: f64, memory_threshold: f64) -> Self {
        Self {
            cpu_threshold,
            memory_threshold,
        }
    }
}

#[async_trait::async_trait]
impl Advisor for ThresholdAdvisor {
    async fn evaluate(
        &self,
        process: &ProcessRecord,
        metrics: &SystemMetrics,
    ) -> Result<Recommendation, AdvisoryError> {
        if process.category != Category::User {
            return Ok(Recommendation::new(
                process,
                Action::Keep,
                1.0,
                format!("{} process", process.category),
            ));
        }

        let cpu_ratio = if self.cpu_threshold > 0.0 {
            process.cpu_percent / self.cpu_threshold
        } else {
            0.0
        };
        let mem_ratio = if self.memory_threshold > 0.0 {
            process.memory_percent / self.memory_threshold
        } else {
            0.0
        };
        let ratio = cpu_ratio.max(mem_ratio);

        if ratio < 1.0 {
            return Ok(Recommendation::new(process, Action::Keep, 1.0 - ratio, "within thresholds"));
        }

        // Rising usage under a loaded system is more convincing.
        let rising = process.cpu_trend.unwrap_or(0.0) > 0.0 || process.memory_trend.unwrap_or(0.0) > 0.0;
        let pressure = metrics.memory_percent >= self.memory_threshold;
        let mut confidence: f64 = 0.6 + 0.2 * (ratio - 1.0).min(1.0);
        if rising {
            confidence += 0.1;
        }
        if pressure {
            confidence += 0.1;
        }

        let mut recommendation = Recommendation::new(
            process,
            Action::Terminate,
            confidence.min(1.0),
            format!(
                "cpu {:.1}% / mem {:.1}% over thresholds ({:.0}% / {:.0}%)",
                process.cpu_percent, process.memory_percent, self.cpu_threshold, self.memory_threshold
            ),
        );
        recommendation.risk_score = if process.uid == 0 { 0.8 } else { 0.3 };
        Ok(recommendation)
    }
}
