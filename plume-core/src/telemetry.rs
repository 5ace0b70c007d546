use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Which stage of an automation flow failed; drives the user-facing guidance
/// on whether the fix is "log in again", "get a fresh link", or "retry".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureStage {
    Login,
    Resolution,
    Verification,
    Navigation,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureContext {
    pub timestamp: DateTime<Utc>,
    pub platform: String,
    pub stage: FailureStage,
    pub target: Option<String>,
    pub error_message: String,
    pub attempt: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolutionContext {
    pub timestamp: DateTime<Utc>,
    pub platform: String,
    pub target: String,
    pub strategy: String,
    pub strategy_index: usize,
    pub duration_ms: i64,
}

/// JSONL failure log plus a SQLite metrics database. Diagnostics only; no
/// control flow reads it back.
#[derive(Debug)]
pub struct AutomationTelemetry {
    log: Mutex<File>,
    db_path: PathBuf,
    flags: OpenFlags,
}

impl AutomationTelemetry {
    pub fn new(
        log_path: impl AsRef<Path>,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, TelemetryError> {
        let log_path = log_path.as_ref().to_path_buf();
        if let Some(parent) = log_path.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            create_dir_all(parent)?;
        }
        let telemetry = Self {
            log: Mutex::new(file),
            db_path,
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        };
        telemetry.initialize_db()?;
        Ok(telemetry)
    }

    fn initialize_db(&self) -> Result<(), TelemetryError> {
        let conn = self.open_db()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS automation_failures (
                ts DATETIME DEFAULT CURRENT_TIMESTAMP,
                platform TEXT,
                stage TEXT,
                target TEXT,
                error_message TEXT,
                attempt INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_automation_failures_ts ON automation_failures(ts DESC);
            CREATE TABLE IF NOT EXISTS resolutions (
                ts DATETIME DEFAULT CURRENT_TIMESTAMP,
                platform TEXT,
                target TEXT,
                strategy TEXT,
                strategy_index INTEGER,
                duration_ms INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_resolutions_ts ON resolutions(ts DESC);
            CREATE TABLE IF NOT EXISTS login_flows (
                ts DATETIME DEFAULT CURRENT_TIMESTAMP,
                platform TEXT,
                outcome TEXT,
                interactive INTEGER,
                duration_ms INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_login_flows_ts ON login_flows(ts DESC);",
        )?;
        Ok(())
    }

    fn open_db(&self) -> Result<Connection, TelemetryError> {
        Ok(Connection::open_with_flags(&self.db_path, self.flags)?)
    }

    pub fn record_failure(&self, failure: &FailureContext) -> Result<(), TelemetryError> {
        let json = serde_json::to_string(failure)?;
        if let Ok(mut guard) = self.log.lock() {
            writeln!(guard, "{json}")?;
            guard.flush()?;
        }
        let conn = self.open_db()?;
        conn.execute(
            "INSERT INTO automation_failures (platform, stage, target, error_message, attempt)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                failure.platform,
                format!("{:?}", failure.stage),
                failure.target.clone().unwrap_or_default(),
                failure.error_message,
                failure.attempt as i64,
            ],
        )?;
        Ok(())
    }

    /// Records which strategy+step a resolution succeeded through.
    pub fn record_resolution(&self, resolution: &ResolutionContext) -> Result<(), TelemetryError> {
        let conn = self.open_db()?;
        conn.execute(
            "INSERT INTO resolutions (platform, target, strategy, strategy_index, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                resolution.platform,
                resolution.target,
                resolution.strategy,
                resolution.strategy_index as i64,
                resolution.duration_ms,
            ],
        )?;
        Ok(())
    }

    pub fn record_login(
        &self,
        platform: &str,
        outcome: &str,
        interactive: bool,
        duration_ms: i64,
    ) -> Result<(), TelemetryError> {
        let conn = self.open_db()?;
        conn.execute(
            "INSERT INTO login_flows (platform, outcome, interactive, duration_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                platform,
                outcome,
                if interactive { 1 } else { 0 },
                duration_ms
            ],
        )?;
        Ok(())
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }
}
