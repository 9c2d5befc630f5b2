// Run States
// 1. NotStarted
//      - Migrate: probe the representative column rename. Already migrated and not forced -> Done
//        (nothing is written). Otherwise -> Checked
//      - BackupOnly -> stage a snapshot -> BackedUp
//      - VerifyOnly -> verify every column rename -> Verified
//      - Rollback -> copy databases from the latest snapshot -> RolledBack
// 2. Checked
//      - Stage a snapshot. No snapshot, or no database in it, aborts the run (Failed)
// 3. BackedUp
//      - Migrate: legacy file renames, then column renames grouped by file -> Migrating
//      - BackupOnly -> Done
// 4. Migrating
//      - Re-introspect every column rename. Any mismatch -> Failed, otherwise -> Verified
// 5. Verified -> Done
//
// Done, RolledBack and Failed are terminal. A run that staged a snapshot always ends by
// saving its log into the snapshot and archiving it, whether it succeeded or not. Any
// other run saves its log under backups/logs/<id>-<mode>.log.

use std::fmt;
use std::fs;
use std::mem;
use std::path::PathBuf;

use chrono::Local;
use log::{error, warn};
use strum::Display;

use crate::backup::{BackupManager, FileKind, FileOutcome, SnapshotReport, StagedSnapshot};
use crate::config::EnginePaths;
use crate::error::VaultError;
use crate::migration_log::{LogLevel, MigrationLog};
use crate::renamer::{ColumnRenamer, RenameOutcome};
use crate::schema::Introspector;
use crate::specs::{self, ColumnRenameSpec, DatabaseFileRename, COLUMN_RENAMES, FILE_RENAMES, IDEMPOTENCY_PROBE};
use crate::utils::Utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Migrate { force: bool },
    BackupOnly,
    VerifyOnly,
    Rollback,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Migrate { force: false } => write!(f, "migrate"),
            RunMode::Migrate { force: true } => write!(f, "migrate (forced)"),
            RunMode::BackupOnly => write!(f, "backup only"),
            RunMode::VerifyOnly => write!(f, "verify only"),
            RunMode::Rollback => write!(f, "rollback"),
        }
    }
}

impl RunMode {
    /// Short name used in run log file names.
    pub fn label(self) -> &'static str {
        match self {
            RunMode::Migrate { .. } => "migrate",
            RunMode::BackupOnly => "backup",
            RunMode::VerifyOnly => "verify",
            RunMode::Rollback => "rollback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MigrationState {
    NotStarted,
    Checked,
    BackedUp,
    Migrating,
    Verified,
    Done,
    RolledBack,
    Failed,
}

impl MigrationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MigrationState::Done | MigrationState::RolledBack | MigrationState::Failed
        )
    }
}

/// Where one column rename currently stands, read without writing anything.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SpecStatus {
    Pending,
    Migrated,
    Unavailable(String),
    Inconsistent(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Passed,
    Skipped(String),
    Failed(String),
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verification::Passed => write!(f, "passed"),
            Verification::Skipped(reason) => write!(f, "skipped ({})", reason),
            Verification::Failed(reason) => write!(f, "FAILED ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecResult {
    pub spec: ColumnRenameSpec,
    pub outcome: RenameOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub spec: ColumnRenameSpec,
    pub verification: Verification,
}

#[derive(Debug)]
pub struct RunReport {
    pub mode: RunMode,
    pub final_state: MigrationState,
    pub backed_up_files: usize,
    pub snapshot: Option<SnapshotReport>,
    pub file_renames: Vec<(DatabaseFileRename, RenameOutcome)>,
    pub spec_results: Vec<SpecResult>,
    pub verification: Vec<VerificationResult>,
    pub rolled_back: Vec<String>,
    pub failure: Option<VaultError>,
}

impl RunReport {
    fn new(mode: RunMode) -> Self {
        RunReport {
            mode,
            final_state: MigrationState::NotStarted,
            backed_up_files: 0,
            snapshot: None,
            file_renames: Vec::new(),
            spec_results: Vec::new(),
            verification: Vec::new(),
            rolled_back: Vec::new(),
            failure: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
            && matches!(
                self.final_state,
                MigrationState::Done | MigrationState::RolledBack
            )
    }

    pub fn count_outcomes(&self, pred: impl Fn(&RenameOutcome) -> bool) -> usize {
        self.spec_results.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn count_verifications(&self, pred: impl Fn(&Verification) -> bool) -> usize {
        self.verification.iter().filter(|r| pred(&r.verification)).count()
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![format!("Run: {}, final state: {}", self.mode, self.final_state)];

        if self.backed_up_files > 0 {
            lines.push(format!("Files backed up: {}", self.backed_up_files));
        }
        if !self.spec_results.is_empty() {
            lines.push(format!(
                "Column renames: {} applied, {} already applied, {} skipped, {} failed",
                self.count_outcomes(|o| *o == RenameOutcome::Applied),
                self.count_outcomes(|o| *o == RenameOutcome::AlreadyApplied),
                self.count_outcomes(|o| matches!(o, RenameOutcome::Skipped(_))),
                self.count_outcomes(|o| matches!(o, RenameOutcome::Failed(_))),
            ));
        }
        if !self.verification.is_empty() {
            lines.push(format!(
                "Verification: {} passed, {} skipped, {} failed",
                self.count_verifications(|v| *v == Verification::Passed),
                self.count_verifications(|v| matches!(v, Verification::Skipped(_))),
                self.count_verifications(|v| matches!(v, Verification::Failed(_))),
            ));
        }
        if !self.rolled_back.is_empty() {
            lines.push(format!("Databases restored: {}", self.rolled_back.join(", ")));
        }
        if let Some(failure) = &self.failure {
            lines.push(format!("Failure: {}", failure));
        }
        lines
    }
}

/// Mutable state carried through one run.
struct Run {
    state: MigrationState,
    report: RunReport,
    log: MigrationLog,
    staged: Option<StagedSnapshot>,
}

pub struct MigrationOrchestrator {
    paths: EnginePaths,
    backup: BackupManager,
    renamer: ColumnRenamer,
    specs: Vec<ColumnRenameSpec>,
    file_renames: Vec<DatabaseFileRename>,
    probe: ColumnRenameSpec,
}

impl MigrationOrchestrator {
    pub fn new(paths: EnginePaths) -> Self {
        MigrationOrchestrator {
            backup: BackupManager::new(paths.clone()),
            paths,
            renamer: ColumnRenamer::new(),
            specs: COLUMN_RENAMES.to_vec(),
            file_renames: FILE_RENAMES.to_vec(),
            probe: IDEMPOTENCY_PROBE,
        }
    }

    pub fn with_logo_keys(mut self, logo_keys: Vec<String>) -> Self {
        self.backup = BackupManager::new(self.paths.clone()).with_logo_keys(logo_keys);
        self
    }

    #[cfg(test)]
    fn with_renamer(mut self, renamer: ColumnRenamer) -> Self {
        self.renamer = renamer;
        self
    }

    pub fn run(&self, mode: RunMode) -> RunReport {
        let mut run = Run {
            state: MigrationState::NotStarted,
            report: RunReport::new(mode),
            log: MigrationLog::new(),
            staged: None,
        };
        run.log.info(format!(
            "Starting {} run against {}",
            mode,
            self.paths.db_dir.display()
        ));

        while !run.state.is_terminal() {
            match self.step(&mut run) {
                Ok(next) => run.state = next,
                Err(e) => {
                    run.log.error(format!("Run failed in state {}: {}", run.state, e));
                    run.report.failure = Some(e);
                    run.state = MigrationState::Failed;
                }
            }
        }
        run.report.final_state = run.state;

        self.finalize(&mut run);
        run.report
    }

    fn step(&self, run: &mut Run) -> Result<MigrationState, VaultError> {
        use MigrationState::*;

        match (run.state, run.report.mode) {
            (NotStarted, RunMode::Migrate { force }) => self.do_state_checking(run, force),
            (NotStarted, RunMode::BackupOnly) | (Checked, RunMode::Migrate { .. }) => {
                self.do_state_backing_up(run)
            }
            (BackedUp, RunMode::Migrate { .. }) => self.do_state_migrating(run),
            (NotStarted, RunMode::VerifyOnly) | (Migrating, RunMode::Migrate { .. }) => {
                self.do_state_verifying(run)
            }
            (NotStarted, RunMode::Rollback) => self.do_state_rolling_back(run),
            (BackedUp, RunMode::BackupOnly) | (Verified, _) => Ok(Done),
            (state, mode) => Err(VaultError::Error(format!(
                "Unexpected state {} for a {} run",
                state, mode
            ))),
        }
    }

    fn do_state_checking(&self, run: &mut Run, force: bool) -> Result<MigrationState, VaultError> {
        if self.status_of(&self.probe) != SpecStatus::Migrated {
            run.log.info("Migration needed");
            return Ok(MigrationState::Checked);
        }
        if force {
            run.log.warn("Database already migrated; continuing because the run is forced");
            return Ok(MigrationState::Checked);
        }

        run.log.info("Database already migrated; nothing to do");
        for spec in &self.specs {
            let outcome = match self.status_of(spec) {
                SpecStatus::Migrated => RenameOutcome::AlreadyApplied,
                SpecStatus::Pending => RenameOutcome::Skipped("not migrated; rerun with force".into()),
                SpecStatus::Unavailable(reason) | SpecStatus::Inconsistent(reason) => {
                    RenameOutcome::Skipped(reason)
                }
            };
            run.log.info(format!("{}: {}", spec, outcome));
            run.report.spec_results.push(SpecResult { spec: *spec, outcome });
        }
        Ok(MigrationState::Done)
    }

    fn do_state_backing_up(&self, run: &mut Run) -> Result<MigrationState, VaultError> {
        run.log.info("Creating backup");
        let staged = self.backup.stage_snapshot()?;

        if staged.copied_count(FileKind::Database) == 0 {
            if let Err(e) = fs::remove_dir_all(staged.dir()) {
                warn!("Could not remove empty snapshot {}: {}", staged.dir().display(), e);
            }
            return Err(VaultError::Error(format!(
                "No database files found in {}",
                self.paths.db_dir.display()
            )));
        }

        for file in staged.files() {
            match &file.outcome {
                FileOutcome::Copied => run.log.info(format!("Backed up: {}", file.name)),
                FileOutcome::SkippedNotFound => {
                    run.log.warn(format!("Not found, not backed up: {}", file.source.display()))
                }
                FileOutcome::Failed(reason) => {
                    run.log.warn(format!("Failed to back up {}: {}", file.name, reason))
                }
            }
        }

        run.report.backed_up_files = staged
            .files()
            .iter()
            .filter(|f| f.outcome == FileOutcome::Copied)
            .count();
        run.log.info(format!(
            "Backup staged as snapshot {} in {}",
            staged.id(),
            staged.dir().display()
        ));
        run.staged = Some(staged);
        Ok(MigrationState::BackedUp)
    }

    fn do_state_migrating(&self, run: &mut Run) -> Result<MigrationState, VaultError> {
        for rename in &self.file_renames {
            let outcome = self.rename_database_file(rename);
            let message = format!("{} -> {}: {}", rename.legacy_name, rename.current_name, outcome);
            match outcome {
                RenameOutcome::Failed(_) => run.log.error(message),
                _ => run.log.info(message),
            }
            run.report.file_renames.push((*rename, outcome));
        }

        for (file, group) in specs::group_by_file(&self.specs) {
            let db_path = self.paths.db_dir.join(file);
            if !db_path.is_file() {
                run.log.warn(format!("Database not found, skipping: {}", file));
                for spec in group {
                    run.report.spec_results.push(SpecResult {
                        spec,
                        outcome: RenameOutcome::Skipped("database file not found".into()),
                    });
                }
                continue;
            }

            run.log.info(format!("Migrating {}", file));
            for spec in group {
                let outcome = self
                    .renamer
                    .rename_column(&db_path, spec.table, spec.old_column, spec.new_column);
                let message = format!("{}: {}", spec, outcome);
                match outcome {
                    RenameOutcome::Failed(_) => run.log.error(message),
                    RenameOutcome::Skipped(_) => run.log.warn(message),
                    _ => run.log.info(message),
                }
                run.report.spec_results.push(SpecResult { spec, outcome });
            }
        }

        Ok(MigrationState::Migrating)
    }

    fn do_state_verifying(&self, run: &mut Run) -> Result<MigrationState, VaultError> {
        run.log.info("Verifying migration");

        for spec in &self.specs {
            let verification = match self.status_of(spec) {
                SpecStatus::Migrated => Verification::Passed,
                SpecStatus::Unavailable(reason) => Verification::Skipped(reason),
                SpecStatus::Pending => Verification::Failed(format!("{} still present", spec.old_column)),
                SpecStatus::Inconsistent(reason) => Verification::Failed(reason),
            };
            let message = format!("Verify {}: {}", spec, verification);
            match verification {
                Verification::Failed(_) => run.log.error(message),
                _ => run.log.info(message),
            }
            run.report.verification.push(VerificationResult {
                spec: *spec,
                verification,
            });
        }

        let failed = run
            .report
            .count_verifications(|v| matches!(v, Verification::Failed(_)));
        if failed > 0 {
            return Err(VaultError::PartialMigrationFailure {
                failed,
                total: self.specs.len(),
            });
        }
        Ok(MigrationState::Verified)
    }

    fn do_state_rolling_back(&self, run: &mut Run) -> Result<MigrationState, VaultError> {
        let location = self
            .backup
            .latest_snapshot()?
            .ok_or_else(|| VaultError::Error("No backup found to roll back to".into()))?;
        run.log.info(format!(
            "Rolling back from snapshot {} ({})",
            location.id(),
            location.path().display()
        ));

        let restored = self.backup.restore_databases_from(&location)?;
        if restored.is_empty() {
            return Err(VaultError::Error(format!(
                "Snapshot {} holds no database files",
                location.id()
            )));
        }
        run.report.rolled_back = restored;
        run.log.info("Rollback complete");
        Ok(MigrationState::RolledBack)
    }

    fn finalize(&self, run: &mut Run) {
        for line in run.report.summary_lines() {
            run.log.info(line);
        }
        let warnings = run.log.count(LogLevel::Warning);
        let errors = run.log.count(LogLevel::Error);
        run.log.info(format!("Log: {} warning(s), {} error(s)", warnings, errors));

        let log = mem::take(&mut run.log);
        let Some(staged) = run.staged.take() else {
            let path = self.run_log_path(run.report.mode);
            if let Err(e) = log.save_as(&path) {
                error!("Failed to save run log to {}: {}", path.display(), e);
            }
            return;
        };

        let archived = log
            .save(staged.dir())
            .and_then(|_| self.backup.archive(staged));

        match archived {
            Ok(snapshot) => run.report.snapshot = Some(snapshot),
            Err(e) => {
                error!("Failed to archive snapshot: {}", e);
                if run.report.failure.is_none() {
                    run.report.failure = Some(e);
                    run.report.final_state = MigrationState::Failed;
                }
            }
        }
    }

    fn run_log_path(&self, mode: RunMode) -> PathBuf {
        let dir = self.paths.run_logs_dir();
        let base = format!("{}-{}", Utils::snapshot_id(&Local::now()), mode.label());

        let mut candidate = dir.join(format!("{}.log", base));
        let mut n = 1;
        while candidate.exists() {
            candidate = dir.join(format!("{}_{}.log", base, n));
            n += 1;
        }
        candidate
    }

    fn rename_database_file(&self, rename: &DatabaseFileRename) -> RenameOutcome {
        let legacy = self.paths.db_dir.join(rename.legacy_name);
        let current = self.paths.db_dir.join(rename.current_name);

        if !legacy.is_file() {
            return RenameOutcome::Skipped("legacy file not found".into());
        }
        if current.exists() {
            return RenameOutcome::Skipped(format!("{} already exists", rename.current_name));
        }
        match fs::rename(&legacy, &current) {
            Ok(()) => RenameOutcome::Applied,
            Err(e) => RenameOutcome::Failed(e.to_string()),
        }
    }

    fn status_of(&self, spec: &ColumnRenameSpec) -> SpecStatus {
        let db_path = self.paths.db_dir.join(spec.db_file);
        if !db_path.is_file() {
            return SpecStatus::Unavailable("database file not found".into());
        }

        let schema = match Introspector::table_schema(&db_path, spec.table) {
            Ok(schema) => schema,
            Err(VaultError::SchemaNotFound(_)) => {
                return SpecStatus::Unavailable("table not found".into())
            }
            Err(e) => return SpecStatus::Inconsistent(e.to_string()),
        };

        match (schema.has_column(spec.old_column), schema.has_column(spec.new_column)) {
            (false, true) => SpecStatus::Migrated,
            (true, false) => SpecStatus::Pending,
            (true, true) => SpecStatus::Inconsistent("both old and new columns present".into()),
            (false, false) => SpecStatus::Inconsistent("neither old nor new column present".into()),
        }
    }
}
