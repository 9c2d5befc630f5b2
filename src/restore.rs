use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde_yaml::Value;

use crate::archive::{Archive, CONFIG_ENTRY, MANIFEST_ENTRY};
use crate::backup::SnapshotManifest;
use crate::config::{EnginePaths, DEFAULT_LOGO_KEYS};
use crate::error::VaultError;
use crate::hash::Hash;
use crate::utils::Utils;

/// What an archive would restore; shown to the operator before anything is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub databases: Vec<String>,
    pub has_config: bool,
    pub logos: Vec<String>,
}

/// Restore overwrites live data, so it only proceeds once the operator agrees.
pub trait RestoreConfirmation {
    fn confirm(&self, archive: &Path, summary: &ArchiveSummary) -> bool;
}

impl<F> RestoreConfirmation for F
where
    F: Fn(&Path, &ArchiveSummary) -> bool,
{
    fn confirm(&self, archive: &Path, summary: &ArchiveSummary) -> bool {
        self(archive, summary)
    }
}

/// Confirmation given up front, e.g. by a `--yes` flag.
pub struct AssumeYes;

impl RestoreConfirmation for AssumeYes {
    fn confirm(&self, _archive: &Path, _summary: &ArchiveSummary) -> bool {
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub databases: Vec<String>,
    pub config_restored: bool,
    pub logos: Vec<PathBuf>,
    pub rewired_keys: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Data was restored; the host application must be restarted.
    Applied(RestoreReport),
    Rejected(String),
    Declined,
}

pub struct RestoreManager {
    paths: EnginePaths,
    logo_keys: Vec<String>,
}

impl RestoreManager {
    pub fn new(paths: EnginePaths) -> Self {
        RestoreManager {
            paths,
            logo_keys: DEFAULT_LOGO_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn with_logo_keys(mut self, logo_keys: Vec<String>) -> Self {
        self.logo_keys = logo_keys;
        self
    }

    /// Restores databases, then configuration and logos, from a snapshot archive.
    ///
    /// Anything that fails before the first database is written is reported as
    /// `Rejected` and leaves the live system untouched. Once database extraction has
    /// begun, later failures are returned as errors and are not rolled back.
    pub fn restore(
        &self,
        archive_path: &Path,
        confirmation: &dyn RestoreConfirmation,
    ) -> Result<RestoreOutcome, VaultError> {
        let mut archive = match Archive::open(archive_path) {
            Ok(archive) => archive,
            Err(e) => return Ok(RestoreOutcome::Rejected(e.to_string())),
        };

        let names = Archive::entry_names(&archive);
        let databases = Archive::root_db_entries(&names);
        if databases.is_empty() {
            let e = VaultError::ArchiveInvalid("the backup does not contain any database files".into());
            return Ok(RestoreOutcome::Rejected(e.to_string()));
        }

        let logo_entries = Archive::logo_entries(&names);
        let summary = ArchiveSummary {
            databases: databases.clone(),
            has_config: names.iter().any(|n| n == CONFIG_ENTRY),
            logos: logo_entries.iter().map(|(_, file)| file.clone()).collect(),
        };

        if !confirmation.confirm(archive_path, &summary) {
            info!("Restore from {} declined", archive_path.display());
            return Ok(RestoreOutcome::Declined);
        }

        let mut report = RestoreReport::default();

        let manifest: Option<SnapshotManifest> = if names.iter().any(|n| n == MANIFEST_ENTRY) {
            let bytes = Archive::read_entry(&mut archive, MANIFEST_ENTRY)?;
            match serde_json::from_slice(&bytes) {
                Ok(manifest) => Some(manifest),
                Err(e) => {
                    report.warnings.push(format!("manifest unreadable: {}", e));
                    None
                }
            }
        } else {
            None
        };

        // Phase 1: databases
        fs::create_dir_all(&self.paths.db_dir)?;
        for name in &databases {
            let dest = self.paths.db_dir.join(name);
            let staging = self.paths.db_dir.join(format!(".{}.restoring", name));
            Archive::extract_to(&mut archive, name, &staging)?;
            Utils::remove_sqlite_sidecars(&dest)?;
            fs::rename(&staging, &dest)?;
            info!("Restored database {}", name);

            if let Some(expected) = manifest.as_ref().and_then(|m| m.checksum_of(name)) {
                let actual = Hash::compute_sha2_hash(&dest)?;
                if !Hash::is_sha2_hex(expected) {
                    let msg = format!("manifest checksum for {} is malformed", name);
                    warn!("{}", msg);
                    report.warnings.push(msg);
                } else if !actual.eq_ignore_ascii_case(expected) {
                    let msg = format!(
                        "{} checksum {} does not match manifest {}",
                        name,
                        Hash::short_hash(&actual),
                        Hash::short_hash(expected)
                    );
                    warn!("{}", msg);
                    report.warnings.push(msg);
                }
            }
            report.databases.push(name.clone());
        }

        // Phase 2: configuration and logos
        let phase_two = self.restore_config_and_logos(&mut archive, &summary, &logo_entries, &mut report);
        if let Err(e) = phase_two {
            return Err(VaultError::Error(format!(
                "databases were restored but configuration/logo restore failed: {}",
                e
            )));
        }

        info!(
            "Restore from {} complete; restart the application",
            archive_path.display()
        );
        Ok(RestoreOutcome::Applied(report))
    }

    fn restore_config_and_logos(
        &self,
        archive: &mut zip::ZipArchive<fs::File>,
        summary: &ArchiveSummary,
        logo_entries: &[(String, String)],
        report: &mut RestoreReport,
    ) -> Result<(), VaultError> {
        if summary.has_config {
            Archive::extract_to(archive, CONFIG_ENTRY, &self.paths.config_file)?;
            report.config_restored = true;
            info!("Restored configuration to {}", self.paths.config_file.display());
        }

        let mut restored_logos: HashMap<String, PathBuf> = HashMap::new();
        if !logo_entries.is_empty() {
            fs::create_dir_all(&self.paths.restored_assets_dir)?;
        }
        for (entry, file) in logo_entries {
            let dest = std::path::absolute(self.paths.restored_assets_dir.join(file))?;
            Archive::extract_to(archive, entry, &dest)?;
            info!("Restored logo {}", dest.display());
            restored_logos.insert(file.clone(), dest.clone());
            report.logos.push(dest);
        }

        if !restored_logos.is_empty() && self.paths.config_file.is_file() {
            report.rewired_keys =
                rewire_logo_references(&self.paths.config_file, &self.logo_keys, &restored_logos)?;
        }

        Ok(())
    }
}

/// Points each logo key whose file name was restored at the restored copy. The file is
/// only rewritten when at least one key changed; the changed keys are returned.
pub fn rewire_logo_references(
    config_file: &Path,
    keys: &[String],
    restored: &HashMap<String, PathBuf>,
) -> Result<Vec<String>, VaultError> {
    let text = fs::read_to_string(config_file)?;
    let mut value: Value = serde_yaml::from_str(&text)?;

    let mut changed = Vec::new();
    if let Value::Mapping(mapping) = &mut value {
        for key in keys {
            let Some(current) = mapping.get_mut(key.as_str()) else {
                continue;
            };
            let Some(base) = current
                .as_str()
                .and_then(|s| Path::new(s.trim()).file_name())
                .map(|n| n.to_string_lossy().into_owned())
            else {
                continue;
            };
            if let Some(new_path) = restored.get(&base) {
                *current = Value::String(new_path.to_string_lossy().into_owned());
                changed.push(key.clone());
            }
        }
    }

    if !changed.is_empty() {
        fs::write(config_file, serde_yaml::to_string(&value)?)?;
        info!("Updated logo references: {}", changed.join(", "));
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupManager;
    use crate::test_support::{db_bytes, fixture_paths, seed_legacy_databases};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct LiveState {
        dbs: Vec<(String, Vec<u8>)>,
        config: Option<Vec<u8>>,
        assets: Vec<PathBuf>,
    }

    fn capture(paths: &EnginePaths) -> LiveState {
        let mut assets: Vec<PathBuf> = fs::read_dir(&paths.assets_dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assets.sort();
        LiveState {
            dbs: db_bytes(paths),
            config: fs::read(&paths.config_file).ok(),
            assets,
        }
    }

    fn assert_untouched(paths: &EnginePaths, before: &LiveState) {
        let after = capture(paths);
        assert_eq!(after.dbs, before.dbs);
        assert_eq!(after.config, before.config);
        assert_eq!(after.assets, before.assets);
    }

    fn branded_fixture(root: &TempDir) -> EnginePaths {
        let paths = fixture_paths(root.path());
        seed_legacy_databases(&paths);
        fs::write(paths.assets_dir.join("brand.svg"), b"<svg/>").unwrap();
        fs::write(
            &paths.config_file,
            "CLINIC_NAME: Test Clinic\nBRANDING_LOGO: brand.svg\nREPORT_LOGO: missing.png\n",
        )
        .unwrap();
        paths
    }

    #[test]
    fn test_rejects_non_archive_without_touching_anything() {
        let root = TempDir::new().unwrap();
        let paths = branded_fixture(&root);
        let bogus = root.path().join("backup.zip");
        fs::write(&bogus, b"definitely not a zip").unwrap();
        let before = capture(&paths);

        let asked = std::cell::Cell::new(false);
        let confirm = |_: &Path, _: &ArchiveSummary| {
            asked.set(true);
            true
        };
        let outcome = RestoreManager::new(paths.clone()).restore(&bogus, &confirm).unwrap();

        assert!(matches!(outcome, RestoreOutcome::Rejected(_)));
        assert!(!asked.get());
        assert_untouched(&paths, &before);
    }

    #[test]
    fn test_rejects_archive_without_databases() {
        let root = TempDir::new().unwrap();
        let paths = branded_fixture(&root);

        let staging = root.path().join("staging");
        fs::create_dir_all(staging.join("nested")).unwrap();
        fs::write(staging.join("config.yaml"), b"BRANDING_LOGO: x.png\n").unwrap();
        fs::write(staging.join("nested").join("patient_cms.db"), b"nested").unwrap();
        let zip_path = root.path().join("no_dbs.zip");
        Archive::create_from_dir(&staging, &zip_path).unwrap();
        let before = capture(&paths);

        let outcome = RestoreManager::new(paths.clone()).restore(&zip_path, &AssumeYes).unwrap();

        match outcome {
            RestoreOutcome::Rejected(reason) => assert!(reason.contains("does not contain any database")),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_untouched(&paths, &before);
    }

    #[test]
    fn test_declined_confirmation_changes_nothing() {
        let root = TempDir::new().unwrap();
        let paths = branded_fixture(&root);
        let report = BackupManager::new(paths.clone()).create_snapshot().unwrap();
        fs::write(paths.db_dir.join("patient_cms.db"), b"newer data").unwrap();
        let before = capture(&paths);

        let decline = |_: &Path, summary: &ArchiveSummary| {
            assert_eq!(summary.databases.len(), 4);
            assert!(summary.has_config);
            assert_eq!(summary.logos, vec!["brand.svg"]);
            false
        };
        let outcome = RestoreManager::new(paths.clone())
            .restore(&report.archive_path, &decline)
            .unwrap();

        assert_eq!(outcome, RestoreOutcome::Declined);
        assert_untouched(&paths, &before);
    }

    #[test]
    fn test_full_restore_rewires_logo_references() {
        let root = TempDir::new().unwrap();
        let paths = branded_fixture(&root);
        let originals = db_bytes(&paths);
        let report = BackupManager::new(paths.clone()).create_snapshot().unwrap();

        for (name, _) in &originals {
            fs::write(paths.db_dir.join(name), b"damaged").unwrap();
        }
        fs::write(&paths.config_file, "CLINIC_NAME: Changed\n").unwrap();
        fs::remove_file(paths.assets_dir.join("brand.svg")).unwrap();

        let outcome = RestoreManager::new(paths.clone())
            .restore(&report.archive_path, &AssumeYes)
            .unwrap();
        let RestoreOutcome::Applied(restored) = outcome else {
            panic!("restore was not applied");
        };

        assert_eq!(db_bytes(&paths), originals);
        assert!(restored.config_restored);
        assert_eq!(restored.rewired_keys, vec!["BRANDING_LOGO"]);
        assert!(restored.warnings.is_empty());

        let logo = std::path::absolute(paths.restored_assets_dir.join("brand.svg")).unwrap();
        assert_eq!(restored.logos, vec![logo.clone()]);
        assert_eq!(fs::read(&logo).unwrap(), b"<svg/>".to_vec());

        let config: Value = serde_yaml::from_str(&fs::read_to_string(&paths.config_file).unwrap()).unwrap();
        assert_eq!(config["CLINIC_NAME"].as_str(), Some("Test Clinic"));
        assert_eq!(config["BRANDING_LOGO"].as_str(), Some(logo.to_string_lossy().as_ref()));
        assert_eq!(config["REPORT_LOGO"].as_str(), Some("missing.png"));
        assert!(!paths.db_dir.join(".patient_cms.db.restoring").exists());
    }

    #[test]
    fn test_manifest_checksum_mismatch_is_reported() {
        let root = TempDir::new().unwrap();
        let paths = fixture_paths(root.path());

        let staging = root.path().join("staging");
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("patient_cms.db"), b"actual bytes").unwrap();
        fs::write(
            staging.join(MANIFEST_ENTRY),
            r#"{"snapshot_id":"20250115_103000","created_at":"2025-01-15T10:30:00+00:00","tool_version":"0.3.0",
                "files":[{"name":"patient_cms.db","source":"/x/patient_cms.db","kind":"database","outcome":"copied",
                "size":12,"sha256":"0000000000000000000000000000000000000000000000000000000000000000"}]}"#,
        )
        .unwrap();
        let zip_path = root.path().join("tampered.zip");
        Archive::create_from_dir(&staging, &zip_path).unwrap();

        let outcome = RestoreManager::new(paths.clone()).restore(&zip_path, &AssumeYes).unwrap();
        let RestoreOutcome::Applied(report) = outcome else {
            panic!("restore was not applied");
        };
        assert_eq!(report.databases, vec!["patient_cms.db"]);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("does not match manifest"));
        assert!(!report.config_restored);
    }

    fn archive_with_manifest(root: &TempDir, manifest: &str) -> PathBuf {
        let staging = root.path().join("staging");
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("patient_cms.db"), b"patient bytes").unwrap();
        fs::write(staging.join("report_tracker.db"), b"report bytes").unwrap();
        fs::write(staging.join(MANIFEST_ENTRY), manifest).unwrap();
        let zip_path = root.path().join("snapshot.zip");
        Archive::create_from_dir(&staging, &zip_path).unwrap();
        zip_path
    }

    #[test]
    fn test_malformed_manifest_checksum_is_a_warning() {
        let root = TempDir::new().unwrap();
        let paths = fixture_paths(root.path());
        let bad_checksum = "é".repeat(32);
        let manifest = format!(
            r#"{{"snapshot_id":"20250115_103000","created_at":"2025-01-15T10:30:00+00:00","tool_version":"0.3.0",
                "files":[{{"name":"patient_cms.db","source":"/x/patient_cms.db","kind":"database","outcome":"copied",
                "size":13,"sha256":"{}"}}]}}"#,
            bad_checksum
        );
        let zip_path = archive_with_manifest(&root, &manifest);

        let outcome = RestoreManager::new(paths.clone()).restore(&zip_path, &AssumeYes).unwrap();
        let RestoreOutcome::Applied(report) = outcome else {
            panic!("restore was not applied");
        };
        assert_eq!(report.databases, vec!["patient_cms.db", "report_tracker.db"]);
        assert_eq!(
            report.warnings,
            vec!["manifest checksum for patient_cms.db is malformed".to_string()]
        );
        assert_eq!(
            fs::read(paths.db_dir.join("report_tracker.db")).unwrap(),
            b"report bytes".to_vec()
        );
    }

    #[test]
    fn test_restore_removes_stale_journal_files() {
        let root = TempDir::new().unwrap();
        let paths = fixture_paths(root.path());
        let zip_path = archive_with_manifest(&root, "{ not json");

        fs::write(paths.db_dir.join("patient_cms.db"), b"live").unwrap();
        fs::write(paths.db_dir.join("patient_cms.db-wal"), b"live wal").unwrap();
        fs::write(paths.db_dir.join("patient_cms.db-shm"), b"live shm").unwrap();
        fs::write(paths.db_dir.join("report_tracker.db-journal"), b"hot journal").unwrap();

        let outcome = RestoreManager::new(paths.clone()).restore(&zip_path, &AssumeYes).unwrap();
        let RestoreOutcome::Applied(report) = outcome else {
            panic!("restore was not applied");
        };
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].starts_with("manifest unreadable"));

        let mut left: Vec<String> = fs::read_dir(&paths.db_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["patient_cms.db", "report_tracker.db"]);
        assert_eq!(
            fs::read(paths.db_dir.join("patient_cms.db")).unwrap(),
            b"patient bytes".to_vec()
        );
    }

    #[test]
    fn test_rewire_leaves_unmatched_config_unchanged() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("config.yaml");
        let original = "BRANDING_LOGO: other.svg\n# comment kept\n";
        fs::write(&config, original).unwrap();

        let restored = HashMap::from([("brand.svg".to_string(), PathBuf::from("/restored/brand.svg"))]);
        let keys = vec!["BRANDING_LOGO".to_string(), "REPORT_LOGO".to_string()];
        assert!(rewire_logo_references(&config, &keys, &restored).unwrap().is_empty());
        assert_eq!(fs::read_to_string(&config).unwrap(), original);
    }

    #[test]
    fn test_rewire_matches_absolute_paths_by_file_name() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("config.yaml");
        fs::write(&config, "REPORT_LOGO: /old/machine/report.png\n").unwrap();

        let restored = HashMap::from([("report.png".to_string(), PathBuf::from("/new/custom/report.png"))]);
        let keys = vec!["REPORT_LOGO".to_string()];
        assert_eq!(rewire_logo_references(&config, &keys, &restored).unwrap(), vec!["REPORT_LOGO"]);

        let value: Value = serde_yaml::from_str(&fs::read_to_string(&config).unwrap()).unwrap();
        assert_eq!(value["REPORT_LOGO"].as_str(), Some("/new/custom/report.png"));
    }
}
