//! IPC protocol definitions (JSON messages)

use crate::advisory::Recommendation;
use crate::classifier::Category;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Ping,
    ListProcesses {
        #[serde(default)]
        params: ListProcessesParams,
    },
    GetStatus,
    ValidateTermination { params: PidParams },
    KillProcess { params: KillProcessParams },
    GetConsent,
    SetConsent { params: SetConsentParams },
    AddProtected { params: NameParams },
    RemoveProtected { params: NameParams },
    GetDecisions {
        #[serde(default)]
        params: LimitParams,
    },
    GetAudit {
        #[serde(default)]
        params: LimitParams,
    },
    ClearCache,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListProcessesParams {
    pub limit: Option<usize>,
    pub category: Option<Category>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidParams {
    pub pid: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillProcessParams {
    pub pid: u32,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub include_children: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetConsentParams {
    pub level: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameParams {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitParams {
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong,
    Response { id: Option<String>, data: serde_json::Value },
    Status { data: StatusData },
    Decision { data: Recommendation },
    ConfirmationRequired { data: ConfirmationData },
    Terminated { data: TerminationData },
}

impl Response {
    pub fn data(data: serde_json::Value) -> Self {
        Response::Response { id: None, data }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::data(serde_json::json!({ "error": message.to_string() }))
    }

    pub fn success() -> Self {
        Self::data(serde_json::json!({ "success": true }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusData {
    pub scan_seq: u64,
    pub process_count: usize,
    pub total_cpu: f64,
    pub memory_percent: f64,
    pub load_avg: [f64; 3],
    pub consent_level: u8,
    pub consent: String,
    pub cache_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationData {
    pub pid: u32,
    pub name: String,
    pub category: Category,
    pub reason: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminationData {
    pub pid: u32,
    pub name: String,
    pub outcome: String,
}
