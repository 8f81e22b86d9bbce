use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::error::BiomapError;
use crate::store;

/// One pipeline run, as recorded in `log.csv` next to the main dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub timestamp: String,
    pub files_processed: usize,
    pub rows_merged: usize,
    pub rows_appended: usize,
    pub note: String,
}

impl RunLogEntry {
    pub fn now(files_processed: usize, rows_merged: usize, rows_appended: usize, note: &str) -> Self {
        Self {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            files_processed,
            rows_merged,
            rows_appended,
            note: note.to_string(),
        }
    }
}

/// The run log lives next to the main dataset.
pub fn log_path_for(main_gpkg: &Utf8Path) -> Utf8PathBuf {
    match main_gpkg.parent() {
        Some(parent) => parent.join("log.csv"),
        None => Utf8PathBuf::from("log.csv"),
    }
}

/// Appends one row, creating the file with a header row when new. The
/// whole log is rewritten atomically so a crash never truncates it.
pub fn append(path: &Utf8Path, entry: &RunLogEntry) -> Result<(), BiomapError> {
    let log_err = |message: String| BiomapError::RunLog {
        path: path.to_string(),
        message,
    };

    let existing = if path.as_std_path().exists() {
        // An empty file has no header yet, so it counts as a fresh log.
        Some(std::fs::read(path.as_std_path()).map_err(|err| log_err(err.to_string()))?)
            .filter(|bytes| !bytes.is_empty())
    } else {
        None
    };

    let mut writer = csv::WriterBuilder::new()
        .has_headers(existing.is_none())
        .from_writer(Vec::new());
    writer
        .serialize(entry)
        .map_err(|err| log_err(err.to_string()))?;
    let row = writer
        .into_inner()
        .map_err(|err| log_err(err.to_string()))?;

    let mut content = existing.unwrap_or_default();
    if !content.is_empty() && !content.ends_with(b"\n") {
        content.push(b'\n');
    }
    content.extend_from_slice(&row);

    store::write_bytes_atomic(path.as_std_path(), &content)
}

/// Reads the log back, mostly for diagnostics and tests.
pub fn read(path: &Utf8Path) -> Result<Vec<RunLogEntry>, BiomapError> {
    let log_err = |message: String| BiomapError::RunLog {
        path: path.to_string(),
        message,
    };
    let mut reader = csv::Reader::from_path(path.as_std_path())
        .map_err(|err| log_err(err.to_string()))?;
    reader
        .deserialize()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| log_err(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_with_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("log.csv")).unwrap();

        append(&path, &RunLogEntry::now(3, 120, 45, "first run")).unwrap();
        append(&path, &RunLogEntry::now(1, 10, 0, "nothing new")).unwrap();

        let entries = read(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].files_processed, 3);
        assert_eq!(entries[1].note, "nothing new");

        let raw = std::fs::read_to_string(path.as_std_path()).unwrap();
        assert_eq!(raw.matches("timestamp").count(), 1);
    }

    #[test]
    fn empty_existing_file_still_gets_a_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("log.csv")).unwrap();
        std::fs::write(path.as_std_path(), b"").unwrap();

        append(&path, &RunLogEntry::now(2, 5, 5, "after touch")).unwrap();

        let entries = read(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].note, "after touch");

        let raw = std::fs::read_to_string(path.as_std_path()).unwrap();
        assert!(raw.starts_with("timestamp"));
    }

    #[test]
    fn log_sits_next_to_main_dataset() {
        let path = log_path_for(Utf8Path::new("data/out/main.gpkg"));
        assert_eq!(path.as_str(), "data/out/log.csv");
    }
}
