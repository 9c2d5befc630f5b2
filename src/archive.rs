use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::VaultError;
use crate::utils::Utils;

pub const CONFIG_ENTRY: &str = "config.yaml";
pub const LOGOS_PREFIX: &str = "logos/";
pub const MANIFEST_ENTRY: &str = "manifest.json";

/// Zip packaging of snapshot directories.
pub struct Archive;

impl Archive {
    /// Compresses every file below `dir` into `zip_path`, storing paths relative to `dir`.
    /// The archive is written under a temporary name and renamed into place once complete.
    pub fn create_from_dir(dir: &Path, zip_path: &Path) -> Result<usize, VaultError> {
        let partial = zip_path.with_extension("zip.partial");
        let mut zip = ZipWriter::new(File::create(&partial)?);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut count = 0;
        for (entry_name, path) in Self::walk(dir, "")? {
            debug!("Archiving {} as {}", path.display(), entry_name);
            zip.start_file(entry_name, options)?;
            let mut f = File::open(&path)?;
            io::copy(&mut f, &mut zip)?;
            count += 1;
        }
        zip.finish()?;

        fs::rename(&partial, zip_path)?;
        Ok(count)
    }

    fn walk(dir: &Path, prefix: &str) -> Result<Vec<(String, PathBuf)>, VaultError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<_, _>>()?;
        paths.sort();

        let mut files = Vec::new();
        for path in paths {
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            if path.is_dir() {
                files.extend(Self::walk(&path, &format!("{}{}/", prefix, name))?);
            } else {
                files.push((format!("{}{}", prefix, name), path));
            }
        }
        Ok(files)
    }

    /// Opens a zip archive, reporting anything that is not one as `ArchiveInvalid`.
    pub fn open(path: &Path) -> Result<ZipArchive<File>, VaultError> {
        let file = File::open(path).map_err(|e| {
            VaultError::ArchiveInvalid(format!("cannot open '{}': {}", path.display(), e))
        })?;
        ZipArchive::new(file).map_err(|e| {
            VaultError::ArchiveInvalid(format!("'{}' is not a valid archive: {}", path.display(), e))
        })
    }

    pub fn entry_names(archive: &ZipArchive<File>) -> Vec<String> {
        archive.file_names().map(str::to_owned).collect()
    }

    /// Database files stored at the archive root. Nested or path-escaping names are ignored.
    pub fn root_db_entries(names: &[String]) -> Vec<String> {
        let mut entries: Vec<String> = names
            .iter()
            .filter(|n| Self::is_plain_file_name(n) && Utils::is_db_file_name(n))
            .cloned()
            .collect();
        entries.sort();
        entries
    }

    /// `logos/<file>` entries, returned as `(entry name, file name)`.
    pub fn logo_entries(names: &[String]) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = names
            .iter()
            .filter_map(|n| {
                let file = n.strip_prefix(LOGOS_PREFIX)?;
                Self::is_plain_file_name(file).then(|| (n.clone(), file.to_owned()))
            })
            .collect();
        entries.sort();
        entries
    }

    fn is_plain_file_name(name: &str) -> bool {
        !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains('/')
            && !name.contains('\\')
            && !name.contains(':')
    }

    pub fn extract_to(archive: &mut ZipArchive<File>, entry: &str, dest: &Path) -> Result<u64, VaultError> {
        let mut file = archive.by_name(entry)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(dest)?;
        let written = io::copy(&mut file, &mut out)?;
        Ok(written)
    }

    pub fn read_entry(archive: &mut ZipArchive<File>, entry: &str) -> Result<Vec<u8>, VaultError> {
        let mut file = archive.by_name(entry)?;
        let mut buf = Vec::new();
        io::copy(&mut file, &mut buf)?;
        Ok(buf)
    }
}
