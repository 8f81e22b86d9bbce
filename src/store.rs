use std::fs;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;

use crate::error::BiomapError;

/// On-disk layout the pipeline works against: the inbox directory holding
/// downloaded uploads and the exported responses sheet, the main dataset
/// file, and an optional backup directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    inbox: Utf8PathBuf,
}

impl Workspace {
    pub fn new(inbox: Utf8PathBuf) -> Self {
        Self { inbox }
    }

    pub fn inbox(&self) -> &Utf8Path {
        &self.inbox
    }

    pub fn ensure_inbox(&self) -> Result<(), BiomapError> {
        fs::create_dir_all(self.inbox.as_std_path())
            .map_err(|err| BiomapError::Filesystem(err.to_string()))
    }

    /// Uploaded survey files, sorted by name so runs are deterministic.
    pub fn gpkg_files(&self) -> Result<Vec<Utf8PathBuf>, BiomapError> {
        let mut files = self.files_with_extension("gpkg")?;
        files.sort();
        Ok(files)
    }

    /// The exported responses sheet. The inbox must hold exactly one CSV;
    /// anything else means the sync step was skipped or ran twice.
    pub fn responses_sheet(&self) -> Result<Utf8PathBuf, BiomapError> {
        let mut sheets = self.files_with_extension("csv")?;
        if sheets.len() != 1 {
            return Err(BiomapError::MissingResponsesSheet(self.inbox.to_string()));
        }
        Ok(sheets.remove(0))
    }

    fn files_with_extension(&self, extension: &str) -> Result<Vec<Utf8PathBuf>, BiomapError> {
        if !self.inbox.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(self.inbox.as_std_path())
            .map_err(|err| BiomapError::Filesystem(err.to_string()))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| BiomapError::Filesystem(err.to_string()))?;
            let path = entry.path();
            let matches = path.is_file()
                && path
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case(extension))
                    .unwrap_or(false);
            if matches {
                let utf8 = Utf8PathBuf::from_path_buf(path)
                    .map_err(|path| BiomapError::Filesystem(format!("non-utf8 path {path:?}")))?;
                files.push(utf8);
            }
        }
        Ok(files)
    }
}

pub fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), BiomapError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| BiomapError::Filesystem(err.to_string()))?;
    }
    let tmp_path = temp_sibling(path);
    fs::write(&tmp_path, content).map_err(|err| BiomapError::Filesystem(err.to_string()))?;
    fs::rename(&tmp_path, path).map_err(|err| BiomapError::Filesystem(err.to_string()))
}

pub fn copy_file_atomic(source: &Path, dest: &Path) -> Result<(), BiomapError> {
    let parent = dest
        .parent()
        .ok_or_else(|| BiomapError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent).map_err(|err| BiomapError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix("biomap-copy")
        .tempfile_in(parent)
        .map_err(|err| BiomapError::Filesystem(err.to_string()))?;
    fs::copy(source, temp.path()).map_err(|err| BiomapError::Filesystem(err.to_string()))?;
    if dest.exists() {
        fs::remove_file(dest).map_err(|err| BiomapError::Filesystem(err.to_string()))?;
    }
    temp.persist(dest)
        .map_err(|err| BiomapError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Copies the current main dataset into the backup directory under a
/// timestamped name before it gets rewritten. Returns the backup path.
pub fn backup_main(main: &Utf8Path, backup_dir: &Utf8Path) -> Result<Utf8PathBuf, BiomapError> {
    let stem = main.file_stem().unwrap_or("main");
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let dest = backup_dir.join(format!("{stem}_{stamp}.gpkg"));
    copy_file_atomic(main.as_std_path(), dest.as_std_path())?;
    Ok(dest)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
