use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use super::record::SessionRecord;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Per-platform session persistence. One JSON file per platform plus a `.bak`
/// of the previous valid record. Unreadable state degrades to `None`; the
/// system recovers by re-login, never by refusing to start.
#[derive(Debug, Clone)]
pub struct SessionStore {
    base_dir: PathBuf,
    backup_enabled: bool,
}

impl SessionStore {
    pub fn new<P: AsRef<Path>>(base_dir: P, backup_enabled: bool) -> StoreResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            backup_enabled,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn primary_path(&self, platform_id: &str) -> PathBuf {
        self.base_dir.join(format!("{platform_id}.json"))
    }

    fn backup_path(&self, platform_id: &str) -> PathBuf {
        self.base_dir.join(format!("{platform_id}.json.bak"))
    }

    fn temp_path(&self, platform_id: &str) -> PathBuf {
        self.base_dir.join(format!("{platform_id}.json.tmp"))
    }

    /// Loads the newest readable record. A corrupt primary falls back to the
    /// backup; the recovered backup is promoted back to primary so the next
    /// load is cheap again.
    pub fn load(&self, platform_id: &str) -> StoreResult<Option<SessionRecord>> {
        let primary = self.primary_path(platform_id);
        match read_record(&primary) {
            Ok(Some(record)) => return Ok(Some(record)),
            Ok(None) => {}
            Err(err) => {
                warn!(platform = platform_id, error = %err, "session file unreadable, trying backup");
            }
        }

        let backup = self.backup_path(platform_id);
        match read_record(&backup) {
            Ok(Some(record)) => {
                debug!(platform = platform_id, "restored session from backup");
                if let Err(err) = self.write_atomic(platform_id, &record) {
                    warn!(platform = platform_id, error = %err, "failed to promote backup to primary");
                }
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                warn!(platform = platform_id, error = %err, "backup unreadable, treating as absent");
                Ok(None)
            }
        }
    }

    /// Write-temp-then-rename so a crash mid-save never leaves a truncated
    /// primary. The previous valid primary becomes the backup first.
    pub fn save(&self, platform_id: &str, record: &SessionRecord) -> StoreResult<()> {
        let primary = self.primary_path(platform_id);
        if self.backup_enabled && primary.exists() && read_record(&primary).is_ok() {
            let backup = self.backup_path(platform_id);
            if let Err(err) = std::fs::rename(&primary, &backup) {
                warn!(platform = platform_id, error = %err, "failed to rotate session backup");
            }
        }
        self.write_atomic(platform_id, record)
    }

    pub fn invalidate(&self, platform_id: &str) -> StoreResult<()> {
        for path in [
            self.primary_path(platform_id),
            self.backup_path(platform_id),
            self.temp_path(platform_id),
        ] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn write_atomic(&self, platform_id: &str, record: &SessionRecord) -> StoreResult<()> {
        let temp = self.temp_path(platform_id);
        let json = serde_json::to_vec_pretty(record)?;
        std::fs::write(&temp, json)?;
        std::fs::rename(&temp, self.primary_path(platform_id))?;
        Ok(())
    }
}

fn read_record(path: &Path) -> StoreResult<Option<SessionRecord>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let record = serde_json::from_slice(&bytes)?;
    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(platform: &str) -> SessionRecord {
        let mut record = SessionRecord::new(platform, 42);
        record.account_hint = Some("tester".into());
        record
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path(), true).unwrap();
        let rec = record("rednote");
        store.save("rednote", &rec).unwrap();
        let loaded = store.load("rednote").unwrap().unwrap();
        assert_eq!(loaded, rec);
    }

    #[test]
    fn missing_record_is_none() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path(), true).unwrap();
        assert!(store.load("rednote").unwrap().is_none());
    }

    #[test]
    fn corrupt_primary_falls_back_to_backup() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path(), true).unwrap();
        let first = record("rednote");
        store.save("rednote", &first).unwrap();
        let mut second = record("rednote");
        second.account_hint = Some("newer".into());
        store.save("rednote", &second).unwrap();

        // Clobber the primary; the previous save is sitting in the backup slot.
        std::fs::write(dir.path().join("rednote.json"), b"{ not json").unwrap();

        let loaded = store.load("rednote").unwrap().unwrap();
        assert_eq!(loaded.account_hint.as_deref(), Some("tester"));

        // The recovered backup was promoted: the primary is readable again.
        let again = store.load("rednote").unwrap().unwrap();
        assert_eq!(again, loaded);
    }

    #[test]
    fn corrupt_primary_and_backup_is_none_not_error() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path(), true).unwrap();
        std::fs::write(dir.path().join("rednote.json"), b"garbage").unwrap();
        std::fs::write(dir.path().join("rednote.json.bak"), b"more garbage").unwrap();
        assert!(store.load("rednote").unwrap().is_none());
    }

    #[test]
    fn invalidate_removes_both_slots() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path(), true).unwrap();
        store.save("rednote", &record("rednote")).unwrap();
        store.save("rednote", &record("rednote")).unwrap();
        assert!(dir.path().join("rednote.json.bak").exists());
        store.invalidate("rednote").unwrap();
        assert!(store.load("rednote").unwrap().is_none());
        assert!(!dir.path().join("rednote.json.bak").exists());
    }

    #[test]
    fn expiry_is_age_based() {
        let mut rec = record("rednote");
        assert!(!rec.is_expired(30));
        rec.created_at = chrono::Utc::now() - chrono::Duration::days(31);
        assert!(rec.is_expired(30));
    }
}
