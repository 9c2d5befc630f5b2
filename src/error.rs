use rusqlite::Error as RusqliteError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Schema not found: {0}")]
    SchemaNotFound(String), // Table or column absent when expected

    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("Invalid archive: {0}")]
    ArchiveInvalid(String),

    #[error("I/O error: {0}")]
    IoFailure(#[from] io::Error), // Converts io::Error into VaultError automatically

    #[error("Migration verification failed for {failed} of {total} column rename(s)")]
    PartialMigrationFailure { failed: usize, total: usize },

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError), // Converts rusqlite::Error automatically

    #[error("Archive error: {0}")]
    ArchiveError(#[from] zip::result::ZipError),

    #[error("Configuration file error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Manifest error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Settings error: {0}")]
    SettingsError(#[from] Box<figment::Error>),

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors
}
