use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::debug;

use crate::error::VaultError;

const SQLITE_SIDECAR_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

pub struct Utils {}

impl Utils {
    pub const SNAPSHOT_ID_FORMAT: &'static str = "%Y%m%d_%H%M%S";

    /// Snapshot ids sort lexicographically in creation order.
    pub fn snapshot_id(now: &DateTime<Local>) -> String {
        now.format(Self::SNAPSHOT_ID_FORMAT).to_string()
    }

    /// Quotes an SQLite identifier, doubling any embedded quote characters.
    pub fn quote_ident(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    pub fn is_db_file_name(name: &str) -> bool {
        Path::new(name)
            .extension()
            .is_some_and(|ext| ext == "db")
    }

    /// Paths of the WAL, shared-memory and rollback-journal files SQLite keeps next to `db`.
    pub fn sqlite_sidecars(db: &Path) -> Vec<PathBuf> {
        SQLITE_SIDECAR_SUFFIXES
            .iter()
            .map(|suffix| {
                let mut name = db.as_os_str().to_owned();
                name.push(suffix);
                PathBuf::from(name)
            })
            .collect()
    }

    /// Removes sidecar files left by a previous connection so a replaced database file is
    /// not paired with a journal written against different contents.
    pub fn remove_sqlite_sidecars(db: &Path) -> Result<(), VaultError> {
        for sidecar in Self::sqlite_sidecars(db) {
            match fs::remove_file(&sidecar) {
                Ok(()) => debug!("Removed stale {}", sidecar.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_id_format_sorts() {
        let earlier = Local.with_ymd_and_hms(2025, 1, 15, 9, 5, 7).single().unwrap();
        let later = Local.with_ymd_and_hms(2025, 1, 15, 10, 30, 0).single().unwrap();

        assert_eq!(Utils::snapshot_id(&earlier), "20250115_090507");
        assert!(Utils::snapshot_id(&earlier) < Utils::snapshot_id(&later));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(Utils::quote_ident("patients"), "\"patients\"");
        assert_eq!(Utils::quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_is_db_file_name() {
        assert!(Utils::is_db_file_name("patient_cms.db"));
        assert!(!Utils::is_db_file_name("UPPER.DB"));
        assert!(!Utils::is_db_file_name("datasheet.Db"));
        assert!(!Utils::is_db_file_name("config.yaml"));
        assert!(!Utils::is_db_file_name("db"));
        assert!(!Utils::is_db_file_name("patient_cms.db-journal"));
    }

    #[test]
    fn test_remove_sqlite_sidecars() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("patient_cms.db");
        fs::write(&db, b"db").unwrap();
        fs::write(dir.path().join("patient_cms.db-wal"), b"wal").unwrap();
        fs::write(dir.path().join("patient_cms.db-journal"), b"journal").unwrap();
        fs::write(dir.path().join("report_tracker.db-wal"), b"other").unwrap();

        Utils::remove_sqlite_sidecars(&db).unwrap();

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["patient_cms.db", "report_tracker.db-wal"]);

        // Nothing left to remove is fine
        Utils::remove_sqlite_sidecars(&db).unwrap();
    }
}
