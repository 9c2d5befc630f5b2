use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::archive::{Archive, CONFIG_ENTRY, LOGOS_PREFIX, MANIFEST_ENTRY};
use crate::config::{EnginePaths, DEFAULT_LOGO_KEYS};
use crate::error::VaultError;
use crate::hash::Hash;
use crate::migration_log::LOG_FILE_NAME;
use crate::utils::Utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FileKind {
    Database,
    Config,
    Logo,
    Log,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOutcome {
    Copied,
    SkippedNotFound,
    Failed(String),
}

/// One file the snapshot attempted to capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFile {
    /// Path inside the snapshot, e.g. `patient_cms.db` or `logos/brand.png`
    pub name: String,
    pub source: PathBuf,
    pub kind: FileKind,
    pub outcome: FileOutcome,
    pub size: Option<u64>,
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub snapshot_id: String,
    pub created_at: String,
    pub tool_version: String,
    pub files: Vec<SnapshotFile>,
}

impl SnapshotManifest {
    pub fn checksum_of(&self, name: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.name == name && f.outcome == FileOutcome::Copied)
            .and_then(|f| f.sha256.as_deref())
    }
}

/// A snapshot directory whose files are in place but which has not been archived yet.
#[derive(Debug)]
pub struct StagedSnapshot {
    id: String,
    dir: PathBuf,
    files: Vec<SnapshotFile>,
}

impl StagedSnapshot {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn files(&self) -> &[SnapshotFile] {
        &self.files
    }

    pub fn copied_count(&self, kind: FileKind) -> usize {
        self.files
            .iter()
            .filter(|f| f.kind == kind && f.outcome == FileOutcome::Copied)
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotReport {
    pub snapshot_id: String,
    pub archive_path: PathBuf,
    pub file_count: usize,
    pub files: Vec<SnapshotFile>,
}

/// Where a snapshot lives: still a raw directory, or already archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotLocation {
    Directory { id: String, path: PathBuf },
    Archive { id: String, path: PathBuf },
}

impl SnapshotLocation {
    pub fn id(&self) -> &str {
        match self {
            SnapshotLocation::Directory { id, .. } | SnapshotLocation::Archive { id, .. } => id,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            SnapshotLocation::Directory { path, .. } | SnapshotLocation::Archive { path, .. } => path,
        }
    }
}

pub struct BackupManager {
    paths: EnginePaths,
    logo_keys: Vec<String>,
}

impl BackupManager {
    pub fn new(paths: EnginePaths) -> Self {
        BackupManager {
            paths,
            logo_keys: DEFAULT_LOGO_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn with_logo_keys(mut self, logo_keys: Vec<String>) -> Self {
        self.logo_keys = logo_keys;
        self
    }

    pub fn create_snapshot(&self) -> Result<SnapshotReport, VaultError> {
        let staged = self.stage_snapshot()?;
        self.archive(staged)
    }

    /// Copies databases, configuration and referenced logos into a fresh snapshot
    /// directory. A failed database or configuration copy aborts the snapshot; the
    /// partially filled directory is left in place.
    pub fn stage_snapshot(&self) -> Result<StagedSnapshot, VaultError> {
        let backups_dir = self.paths.backups_dir();
        fs::create_dir_all(&backups_dir)?;

        let id = Self::unique_snapshot_id(&backups_dir);
        let dir = backups_dir.join(&id);
        fs::create_dir(&dir)?;
        info!("Staging snapshot {} in {}", id, dir.display());

        let mut files = Vec::new();

        for source in self.live_database_files()? {
            let name = file_name_of(&source);
            files.push(Self::copy_required(&source, &dir.join(&name), name, FileKind::Database)?);
        }
        if files.is_empty() {
            warn!("No database files found in {}", self.paths.db_dir.display());
        }

        if self.paths.config_file.is_file() {
            let copied_config = dir.join(CONFIG_ENTRY);
            files.push(Self::copy_required(
                &self.paths.config_file,
                &copied_config,
                CONFIG_ENTRY.to_owned(),
                FileKind::Config,
            )?);
            files.extend(self.stage_logos(&copied_config, &dir));
        } else {
            info!(
                "No configuration file at {}; snapshot holds databases only",
                self.paths.config_file.display()
            );
        }

        Ok(StagedSnapshot { id, dir, files })
    }

    /// Writes the manifest, compresses the staged directory into `<id>.zip` and removes
    /// the directory.
    pub fn archive(&self, mut staged: StagedSnapshot) -> Result<SnapshotReport, VaultError> {
        let log_path = staged.dir.join(LOG_FILE_NAME);
        if log_path.is_file() {
            staged.files.push(Self::describe(
                &log_path,
                LOG_FILE_NAME.to_owned(),
                FileKind::Log,
                &log_path,
            )?);
        }

        let manifest = SnapshotManifest {
            snapshot_id: staged.id.clone(),
            created_at: Local::now().to_rfc3339(),
            tool_version: env!("CARGO_PKG_VERSION").to_owned(),
            files: staged.files.clone(),
        };
        fs::write(
            staged.dir.join(MANIFEST_ENTRY),
            serde_json::to_string_pretty(&manifest)?,
        )?;

        let archive_path = self.paths.backups_dir().join(format!("{}.zip", staged.id));
        Archive::create_from_dir(&staged.dir, &archive_path)?;
        fs::remove_dir_all(&staged.dir)?;

        let file_count = staged
            .files
            .iter()
            .filter(|f| f.outcome == FileOutcome::Copied && f.kind != FileKind::Log)
            .count();
        info!(
            "Snapshot {} archived to {} ({} file(s))",
            staged.id,
            archive_path.display(),
            file_count
        );

        Ok(SnapshotReport {
            snapshot_id: staged.id,
            archive_path,
            file_count,
            files: staged.files,
        })
    }

    /// The most recent snapshot, by id, whether archived or still a raw directory.
    /// When both forms exist for one id the archive wins, since it is only renamed into
    /// place once complete.
    pub fn latest_snapshot(&self) -> Result<Option<SnapshotLocation>, VaultError> {
        let backups_dir = self.paths.backups_dir();
        if !backups_dir.is_dir() {
            return Ok(None);
        }

        let mut latest: Option<SnapshotLocation> = None;
        for entry in fs::read_dir(&backups_dir)? {
            let path = entry?.path();
            let name = file_name_of(&path);

            let location = if path.is_dir() {
                SnapshotLocation::Directory { id: name, path }
            } else if let Some(id) = name.strip_suffix(".zip") {
                SnapshotLocation::Archive {
                    id: id.to_owned(),
                    path,
                }
            } else {
                continue;
            };

            let Some(key) = snapshot_sort_key(location.id()) else {
                continue;
            };

            let replace = match &latest {
                None => true,
                Some(current) => {
                    let current_key = snapshot_sort_key(current.id());
                    Some(&key) > current_key.as_ref()
                        || (Some(&key) == current_key.as_ref()
                            && matches!(location, SnapshotLocation::Archive { .. }))
                }
            };
            if replace {
                latest = Some(location);
            }
        }

        Ok(latest)
    }

    /// Copies every root-level database file of a snapshot over the live database
    /// directory, dropping any WAL, shared-memory or journal file left beside it.
    /// Configuration and assets are left alone.
    pub fn restore_databases_from(&self, location: &SnapshotLocation) -> Result<Vec<String>, VaultError> {
        fs::create_dir_all(&self.paths.db_dir)?;
        let mut restored = Vec::new();

        match location {
            SnapshotLocation::Directory { path, .. } => {
                let mut sources: Vec<PathBuf> = fs::read_dir(path)?
                    .map(|e| e.map(|e| e.path()))
                    .collect::<Result<_, _>>()?;
                sources.retain(|p| p.is_file() && Utils::is_db_file_name(&file_name_of(p)));
                sources.sort();

                for source in sources {
                    let name = file_name_of(&source);
                    let dest = self.paths.db_dir.join(&name);
                    Utils::remove_sqlite_sidecars(&dest)?;
                    fs::copy(&source, &dest)?;
                    info!("Restored: {}", name);
                    restored.push(name);
                }
            }
            SnapshotLocation::Archive { path, .. } => {
                let mut archive = Archive::open(path)?;
                let names = Archive::entry_names(&archive);
                for name in Archive::root_db_entries(&names) {
                    let dest = self.paths.db_dir.join(&name);
                    Utils::remove_sqlite_sidecars(&dest)?;
                    Archive::extract_to(&mut archive, &name, &dest)?;
                    info!("Restored: {}", name);
                    restored.push(name);
                }
            }
        }

        Ok(restored)
    }

    fn live_database_files(&self) -> Result<Vec<PathBuf>, VaultError> {
        if !self.paths.db_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&self.paths.db_dir)?
            .map(|e| e.map(|e| e.path()))
            .collect::<Result<_, _>>()?;
        files.retain(|p| p.is_file() && Utils::is_db_file_name(&file_name_of(p)));
        files.sort();
        Ok(files)
    }

    fn stage_logos(&self, copied_config: &Path, dir: &Path) -> Vec<SnapshotFile> {
        let references = match read_logo_references(copied_config, &self.logo_keys) {
            Ok(references) => references,
            Err(e) => {
                warn!("Could not read logo references from configuration: {}", e);
                return Vec::new();
            }
        };

        let mut files: Vec<SnapshotFile> = Vec::new();
        for reference in references {
            let candidate = self.paths.assets_dir.join(&reference);
            let name = format!("{}{}", LOGOS_PREFIX, file_name_of(Path::new(&reference)));

            if files.iter().any(|f| f.source == candidate) {
                continue;
            }
            if !candidate.is_file() {
                info!("Logo '{}' not found; skipping", reference);
                files.push(SnapshotFile {
                    name,
                    source: candidate,
                    kind: FileKind::Logo,
                    outcome: FileOutcome::SkippedNotFound,
                    size: None,
                    sha256: None,
                });
                continue;
            }

            let dest = dir.join(&name);
            let copied = fs::create_dir_all(dir.join(LOGOS_PREFIX))
                .and_then(|_| fs::copy(&candidate, &dest))
                .map_err(VaultError::from)
                .and_then(|_| Self::describe(&dest, name.clone(), FileKind::Logo, &candidate));

            files.push(match copied {
                Ok(file) => file,
                Err(e) => {
                    warn!("Failed to back up logo '{}': {}", reference, e);
                    SnapshotFile {
                        name,
                        source: candidate,
                        kind: FileKind::Logo,
                        outcome: FileOutcome::Failed(e.to_string()),
                        size: None,
                        sha256: None,
                    }
                }
            });
        }
        files
    }

    fn copy_required(source: &Path, dest: &Path, name: String, kind: FileKind) -> Result<SnapshotFile, VaultError> {
        fs::copy(source, dest)?;
        let file = Self::describe(dest, name, kind, source)?;
        info!(
            "Backed up: {} (sha256 {})",
            file.name,
            file.sha256.as_deref().map(Hash::short_hash).unwrap_or("-")
        );
        Ok(file)
    }

    fn describe(copy: &Path, name: String, kind: FileKind, source: &Path) -> Result<SnapshotFile, VaultError> {
        Ok(SnapshotFile {
            name,
            source: source.to_path_buf(),
            kind,
            outcome: FileOutcome::Copied,
            size: Some(fs::metadata(copy)?.len()),
            sha256: Some(Hash::compute_sha2_hash(copy)?),
        })
    }

    fn unique_snapshot_id(backups_dir: &Path) -> String {
        let base = Utils::snapshot_id(&Local::now());
        let taken = |id: &str| {
            backups_dir.join(id).exists() || backups_dir.join(format!("{}.zip", id)).exists()
        };

        let mut candidate = base.clone();
        let mut n = 1;
        while taken(&candidate) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        candidate
    }
}

/// Logo values named by `keys` in a host YAML configuration, in key order. Empty and
/// non-string values are ignored.
pub fn read_logo_references(config_file: &Path, keys: &[String]) -> Result<Vec<String>, VaultError> {
    let text = fs::read_to_string(config_file)?;
    let value: serde_yaml::Value = serde_yaml::from_str(&text)?;

    Ok(keys
        .iter()
        .filter_map(|key| value.get(key.as_str()))
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .collect())
}

/// Orders snapshot ids by timestamp, then by collision suffix. Names that are not
/// snapshot ids yield `None`.
fn snapshot_sort_key(id: &str) -> Option<(NaiveDateTime, u32)> {
    let stamp = id.get(..15)?;
    let time = NaiveDateTime::parse_from_str(stamp, Utils::SNAPSHOT_ID_FORMAT).ok()?;
    let suffix = match &id[15..] {
        "" => 0,
        rest => rest.strip_prefix('_')?.parse().ok()?,
    };
    Some((time, suffix))
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
