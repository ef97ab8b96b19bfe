//! Append-only SQLite audit trail

use crate::advisory::Recommendation;
use crate::scanner::unix_now;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;

pub struct AuditLog {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: i64,
    pub event: String,
    pub pid: Option<u32>,
    pub name: Option<String>,
    pub action: Option<String>,
    pub confidence: Option<f64>,
    pub details: String,
}

impl AuditLog {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(include_str!("../schema.sql"))
    }

    pub fn record_decision(&self, decision: &Recommendation) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO audit (timestamp, event, pid, name, action, confidence, details)
             VALUES (?1, 'decision', ?2, ?3, ?4, ?5, ?6)",
            params![
                unix_now() as i64,
                decision.pid,
                decision.name,
                decision.action.to_string(),
                decision.confidence,
                decision.reason,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn record_termination(&self, pid: u32, name: &str, details: &str) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO audit (timestamp, event, pid, name, action, details)
             VALUES (?1, 'termination', ?2, ?3, 'terminate', ?4)",
            params![unix_now() as i64, pid, name, details],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn record_event(&self, event: &str, details: &str) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO audit (timestamp, event, details) VALUES (?1, ?2, ?3)",
            params![unix_now() as i64, event, details],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Newest first.
    pub fn recent(&self, limit: u32, event: Option<&str>) -> rusqlite::Result<Vec<AuditEntry>> {
        const COLUMNS: &str = "SELECT id, timestamp, event, pid, name, action, confidence, details FROM audit";
        match event {
            Some(event) => {
                let mut stmt = self.conn.prepare(&format!(
                    "{COLUMNS} WHERE event = ?1 ORDER BY id DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![event, limit], Self::map_entry)?;
                rows.collect()
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("{COLUMNS} ORDER BY id DESC LIMIT ?1"))?;
                let rows = stmt.query_map(params![limit], Self::map_entry)?;
                rows.collect()
            }
        }
    }

    fn map_entry(row: &rusqlite::Row) -> rusqlite::Result<AuditEntry> {
        Ok(AuditEntry {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            event: row.get(2)?,
            pid: row.get(3)?,
            name: row.get(4)?,
            action: row.get(5)?,
            confidence: row.get(6)?,
            details: row.get(7)?,
        })
    }

    /// Drop entries older than `days`. Returns the number removed.
    pub fn cleanup_older_than(&self, days: u32) -> rusqlite::Result<usize> {
        let cutoff = unix_now() as i64 - i64::from(days) * 86400;
        self.conn
            .execute("DELETE FROM audit WHERE timestamp < ?1", params![cutoff])
    }
}
