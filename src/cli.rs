use std::path::{Path, PathBuf};

use clap::Parser;
use dialoguer::Confirm;
use log::info;

use crate::backup::{BackupManager, FileOutcome};
use crate::config::{Config, PathOverrides};
use crate::error::VaultError;
use crate::orchestrator::{MigrationOrchestrator, RunMode};
use crate::restore::{ArchiveSummary, AssumeYes, RestoreConfirmation, RestoreManager, RestoreOutcome};

#[derive(Parser, Debug)]
#[command(
    name = "clinic-vault",
    version,
    about = "Clinic Vault: schema migration, backup and restore for clinic databases"
)]
pub struct Cli {
    /// Create a backup and stop (no migration)
    #[arg(long = "backup-only", group = "mode")]
    pub backup_only: bool,

    /// Check whether the migration has been applied, without changing anything
    #[arg(long = "verify", group = "mode")]
    pub verify: bool,

    /// Restore database files from the most recent backup
    #[arg(long = "rollback", group = "mode")]
    pub rollback: bool,

    /// Archive databases, configuration and logos into a snapshot
    #[arg(long = "snapshot", group = "mode")]
    pub snapshot: bool,

    /// Restore databases, configuration and logos from a snapshot archive
    #[arg(long = "restore", value_name = "ARCHIVE", group = "mode")]
    pub restore: Option<PathBuf>,

    /// Migrate even if the databases already look migrated (migrate mode only)
    #[arg(long = "force", conflicts_with = "mode")]
    pub force: bool,

    /// Restore without asking for confirmation (requires --restore)
    #[arg(long = "yes", short = 'y', requires = "restore")]
    pub yes: bool,

    /// Database directory (default: the application's data folder)
    #[arg(long = "db-dir", value_name = "PATH")]
    pub db_dir: Option<PathBuf>,

    /// Application configuration file (YAML)
    #[arg(long = "config-file", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Directory that relative logo paths in the configuration resolve against
    #[arg(long = "assets-dir", value_name = "PATH")]
    pub assets_dir: Option<PathBuf>,

    /// Engine settings file (TOML)
    #[arg(long = "settings", value_name = "PATH")]
    pub settings: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Run(RunMode),
    Snapshot,
    Restore { archive: PathBuf, assume_yes: bool },
}

impl Cli {
    pub fn action(&self) -> Action {
        if let Some(archive) = &self.restore {
            return Action::Restore {
                archive: archive.clone(),
                assume_yes: self.yes,
            };
        }
        if self.snapshot {
            Action::Snapshot
        } else if self.backup_only {
            Action::Run(RunMode::BackupOnly)
        } else if self.verify {
            Action::Run(RunMode::VerifyOnly)
        } else if self.rollback {
            Action::Run(RunMode::Rollback)
        } else {
            Action::Run(RunMode::Migrate { force: self.force })
        }
    }

    pub fn path_overrides(&self) -> PathOverrides {
        PathOverrides {
            db_dir: self.db_dir.clone(),
            config_file: self.config_file.clone(),
            assets_dir: self.assets_dir.clone(),
        }
    }

    pub fn load_config(&self) -> Result<Config, VaultError> {
        Config::load(self.settings.as_deref(), &self.path_overrides())
    }

    pub fn execute(&self, config: &Config) -> Result<(), VaultError> {
        let paths = config.engine_paths();
        info!("Database directory: {}", paths.db_dir.display());

        match self.action() {
            Action::Run(mode) => {
                let report = MigrationOrchestrator::new(paths)
                    .with_logo_keys(config.branding.logo_keys.clone())
                    .run(mode);

                for line in report.summary_lines() {
                    println!("{}", line);
                }
                if let Some(snapshot) = &report.snapshot {
                    println!("Backup archive: {}", snapshot.archive_path.display());
                }

                let succeeded = report.succeeded();
                match report.failure {
                    Some(e) => Err(e),
                    None if succeeded => Ok(()),
                    None => Err(VaultError::Error(format!(
                        "Run ended in state {}",
                        report.final_state
                    ))),
                }
            }
            Action::Snapshot => {
                let report = BackupManager::new(paths)
                    .with_logo_keys(config.branding.logo_keys.clone())
                    .create_snapshot()?;

                for file in &report.files {
                    match &file.outcome {
                        FileOutcome::Copied => {}
                        FileOutcome::SkippedNotFound => {
                            println!("Not found: {} ({})", file.source.display(), file.kind)
                        }
                        FileOutcome::Failed(reason) => {
                            println!("Failed: {} ({}): {}", file.source.display(), file.kind, reason)
                        }
                    }
                }
                println!(
                    "Snapshot {} written to {} ({} file(s))",
                    report.snapshot_id,
                    report.archive_path.display(),
                    report.file_count
                );
                Ok(())
            }
            Action::Restore { archive, assume_yes } => {
                let manager = RestoreManager::new(paths).with_logo_keys(config.branding.logo_keys.clone());
                let outcome = if assume_yes {
                    manager.restore(&archive, &AssumeYes)?
                } else {
                    manager.restore(&archive, &PromptConfirmation)?
                };

                match outcome {
                    RestoreOutcome::Applied(report) => {
                        println!("Restored databases: {}", report.databases.join(", "));
                        if report.config_restored {
                            println!("Restored configuration file");
                        }
                        for logo in &report.logos {
                            println!("Restored logo: {}", logo.display());
                        }
                        if !report.rewired_keys.is_empty() {
                            println!("Updated settings: {}", report.rewired_keys.join(", "));
                        }
                        for warning in &report.warnings {
                            println!("Warning: {}", warning);
                        }
                        println!("Restore complete. Restart the application to load the restored data.");
                        Ok(())
                    }
                    RestoreOutcome::Rejected(reason) => {
                        Err(VaultError::Error(format!("Restore rejected: {}", reason)))
                    }
                    RestoreOutcome::Declined => Err(VaultError::Error("Restore cancelled".into())),
                }
            }
        }
    }
}

/// Asks on the terminal before a restore overwrites anything.
struct PromptConfirmation;

impl RestoreConfirmation for PromptConfirmation {
    fn confirm(&self, archive: &Path, summary: &ArchiveSummary) -> bool {
        println!("Archive: {}", archive.display());
        println!("  Databases: {}", summary.databases.join(", "));
        println!("  Configuration: {}", if summary.has_config { "yes" } else { "no" });
        if !summary.logos.is_empty() {
            println!("  Logos: {}", summary.logos.join(", "));
        }

        Confirm::new()
            .with_prompt("This will replace your current databases and settings. Continue?")
            .default(false)
            .interact()
            .unwrap_or(false)
    }
}
