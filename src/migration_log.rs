use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::{error, info, warn};
use strum::Display;

use crate::error::VaultError;

pub const LOG_FILE_NAME: &str = "migration.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LogLevel {
    #[strum(serialize = "INFO")]
    Info,
    #[strum(serialize = "WARNING")]
    Warning,
    #[strum(serialize = "ERROR")]
    Error,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn format_line(&self) -> String {
        format!(
            "[{}] [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level,
            self.message
        )
    }
}

/// Append-only record of one orchestrator run. Every entry is mirrored to the process
/// logger as it is recorded. Saving consumes the log, so a persisted log can no longer
/// change.
#[derive(Debug, Default)]
pub struct MigrationLog {
    entries: Vec<LogEntry>,
}

impl MigrationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.record(LogLevel::Info, message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.record(LogLevel::Warning, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.record(LogLevel::Error, message.into());
    }

    fn record(&mut self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => info!("{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }
        self.entries.push(LogEntry {
            timestamp: Local::now(),
            level,
            message,
        });
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.entries.iter().filter(|e| e.level == level).count()
    }

    pub fn render(&self) -> String {
        let lines: Vec<String> = self.entries.iter().map(LogEntry::format_line).collect();
        lines.join("\n")
    }

    /// Saves the log as `migration.log` inside a snapshot directory.
    pub fn save(self, dir: &Path) -> Result<PathBuf, VaultError> {
        self.save_as(&dir.join(LOG_FILE_NAME))
    }

    pub fn save_as(self, path: &Path) -> Result<PathBuf, VaultError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.render())?;
        info!("Log saved to {}", path.display());
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_levels_display() {
        assert_eq!(LogLevel::Info.to_string(), "INFO");
        assert_eq!(LogLevel::Warning.to_string(), "WARNING");
        assert_eq!(LogLevel::Error.to_string(), "ERROR");
    }

    #[test]
    fn test_entries_are_ordered_and_counted() {
        let mut log = MigrationLog::new();
        log.info("Starting database backup...");
        log.warn("Table 'reports' not found in report_tracker.db");
        log.error("Rename failed");
        log.info("done");

        let rendered = log.render();
        let messages: Vec<&str> = rendered
            .lines()
            .map(|line| line.splitn(3, "] ").nth(2).unwrap())
            .collect();
        assert_eq!(
            messages,
            vec![
                "Starting database backup...",
                "Table 'reports' not found in report_tracker.db",
                "Rename failed",
                "done"
            ]
        );
        assert_eq!(log.count(LogLevel::Info), 2);
        assert_eq!(log.count(LogLevel::Warning), 1);
        assert_eq!(log.count(LogLevel::Error), 1);
    }

    #[test]
    fn test_save_writes_formatted_lines() {
        let dir = TempDir::new().unwrap();
        let mut log = MigrationLog::new();
        log.info("first");
        log.error("second");

        let path = log.save(&dir.path().join("20250115_103000")).unwrap();
        assert!(path.ends_with("20250115_103000/migration.log"));

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] [INFO] first"));
        assert!(lines[1].ends_with("] [ERROR] second"));
    }

    #[test]
    fn test_save_as_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let mut log = MigrationLog::new();
        log.info("Rollback complete");

        let target = dir.path().join("backups").join("logs").join("20250115_103000-rollback.log");
        let path = log.save_as(&target).unwrap();
        assert_eq!(path, target);
        assert!(fs::read_to_string(&path).unwrap().ends_with("] [INFO] Rollback complete"));
    }
}
