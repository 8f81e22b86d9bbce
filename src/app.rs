use std::time::Duration;

use camino::Utf8Path;
use serde::Serialize;
use tracing::warn;

use crate::config::{PipelineConfig, SyncConfig};
use crate::diagnose;
use crate::domain::FolderId;
use crate::drive::{DriveClient, DriveEntry};
use crate::error::BiomapError;
use crate::pipeline::{self, PipelineOutcome};
use crate::snapshot;
use crate::store::Workspace;

#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub items: Vec<SyncItemResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncItemResult {
    pub id: String,
    pub name: String,
    pub action: String,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    #[serde(flatten)]
    pub outcome: PipelineOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupResult {
    pub deleted: Vec<String>,
    pub kept: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnoseResult {
    pub report: String,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Clone)]
pub struct App<D: DriveClient> {
    drive: D,
}

impl<D: DriveClient> App<D> {
    pub fn new(drive: D) -> Self {
        Self { drive }
    }

    /// Mirrors a shared Drive folder into the inbox. Every regular file is
    /// saved as `<file_id><extension>` so later stages can recover the Drive
    /// identity from the filename alone; spreadsheets are exported as CSV.
    pub fn sync(
        &self,
        config: &SyncConfig,
        sink: &dyn ProgressSink,
    ) -> Result<SyncResult, BiomapError> {
        let workspace = Workspace::new(config.inbox_dir.clone());
        workspace.ensure_inbox()?;

        let mut items = Vec::new();
        self.sync_folder(&config.folder, workspace.inbox(), sink, &mut items)?;
        Ok(SyncResult { items })
    }

    fn sync_folder(
        &self,
        folder: &FolderId,
        dest: &Utf8Path,
        sink: &dyn ProgressSink,
        items: &mut Vec<SyncItemResult>,
    ) -> Result<(), BiomapError> {
        sink.event(ProgressEvent {
            message: format!("phase=List; folder {}", folder.as_str()),
            elapsed: None,
        });
        let entries = self.drive.list_folder(folder)?;

        for entry in entries {
            if entry.is_folder() {
                let subdir = dest.join(&entry.name);
                std::fs::create_dir_all(subdir.as_std_path())
                    .map_err(|err| BiomapError::Filesystem(err.to_string()))?;
                let sub: FolderId = match entry.id.as_str().parse() {
                    Ok(folder) => folder,
                    Err(err) => {
                        items.push(item(&entry, format!("error: {err}"), None));
                        continue;
                    }
                };
                self.sync_folder(&sub, &subdir, sink, items)?;
                continue;
            }

            let result = self.sync_entry(&entry, dest, sink);
            match result {
                Ok(Some(recorded)) => items.push(recorded),
                Ok(None) => items.push(item(&entry, "skipped".to_string(), None)),
                // A broken individual file must not abort the whole sync.
                Err(err) => {
                    warn!(file = %entry.name, error = %err, "sync: download failed");
                    items.push(item(&entry, format!("error: {err}"), None));
                }
            }
        }
        Ok(())
    }

    fn sync_entry(
        &self,
        entry: &DriveEntry,
        dest: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<Option<SyncItemResult>, BiomapError> {
        if entry.is_spreadsheet() {
            let path = dest.join(format!("{}.csv", entry.id.as_str()));
            sink.event(ProgressEvent {
                message: format!("phase=Download; exporting sheet {}", entry.name),
                elapsed: None,
            });
            self.drive.export_sheet_csv(&entry.id, path.as_std_path())?;
            return Ok(Some(item(entry, "exported".to_string(), Some(path.to_string()))));
        }
        if entry.is_google_native() {
            return Ok(None);
        }

        let path = dest.join(format!("{}{}", entry.id.as_str(), entry.extension()));
        sink.event(ProgressEvent {
            message: format!("phase=Download; file {}", entry.name),
            elapsed: None,
        });
        let start = std::time::Instant::now();
        self.drive.download_file(&entry.id, path.as_std_path())?;
        sink.event(ProgressEvent {
            message: format!("drive.response latency_ms={}", start.elapsed().as_millis()),
            elapsed: Some(start.elapsed()),
        });
        Ok(Some(item(entry, "downloaded".to_string(), Some(path.to_string()))))
    }

    /// Runs the merge pipeline. On failure an error snapshot is written
    /// first, then the original error is returned.
    pub fn run(
        &self,
        config: &PipelineConfig,
        note: &str,
        sink: &dyn ProgressSink,
    ) -> Result<RunResult, BiomapError> {
        sink.event(ProgressEvent {
            message: "phase=Merge; running pipeline".to_string(),
            elapsed: None,
        });
        match pipeline::run(config, note) {
            Ok(outcome) => Ok(RunResult { outcome }),
            Err(err) => {
                let report = diagnose::report(config);
                if let Err(snap_err) = snapshot::create(config, &report) {
                    warn!(error = %snap_err, "error snapshot could not be written");
                }
                Err(err)
            }
        }
    }

    /// Deletes processed uploads from the Drive folder. Only top-level
    /// `.gpkg` files go; the responses sheet, subfolders and everything
    /// else stay untouched.
    pub fn cleanup(
        &self,
        folder: &FolderId,
        sink: &dyn ProgressSink,
    ) -> Result<CleanupResult, BiomapError> {
        sink.event(ProgressEvent {
            message: format!("phase=List; folder {}", folder.as_str()),
            elapsed: None,
        });
        let entries = self.drive.list_folder(folder)?;

        let mut deleted = Vec::new();
        let mut kept = Vec::new();
        for entry in entries {
            if !entry.is_folder() && entry.name.to_ascii_lowercase().ends_with(".gpkg") {
                sink.event(ProgressEvent {
                    message: format!("phase=Delete; {}", entry.name),
                    elapsed: None,
                });
                self.drive.delete_file(&entry.id)?;
                deleted.push(entry.name);
            } else {
                kept.push(entry.name);
            }
        }
        Ok(CleanupResult { deleted, kept })
    }

    pub fn diagnose(
        &self,
        config: &PipelineConfig,
        sink: &dyn ProgressSink,
    ) -> Result<DiagnoseResult, BiomapError> {
        sink.event(ProgressEvent {
            message: "phase=Inspect; checking inputs".to_string(),
            elapsed: None,
        });
        Ok(DiagnoseResult {
            report: diagnose::report(config),
        })
    }
}

fn item(entry: &DriveEntry, action: String, path: Option<String>) -> SyncItemResult {
    SyncItemResult {
        id: entry.id.as_str().to_string(),
        name: entry.name.clone(),
        action,
        path,
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::domain::FileId;
    use crate::output::JsonOutput;

    struct MockDrive {
        entries: Vec<DriveEntry>,
        deleted: Mutex<Vec<String>>,
    }

    impl MockDrive {
        fn new(entries: Vec<DriveEntry>) -> Self {
            Self {
                entries,
                deleted: Mutex::new(Vec::new()),
            }
        }
    }

    impl DriveClient for MockDrive {
        fn list_folder(&self, _folder: &FolderId) -> Result<Vec<DriveEntry>, BiomapError> {
            Ok(self.entries.clone())
        }

        fn download_file(&self, _id: &FileId, destination: &Path) -> Result<(), BiomapError> {
            std::fs::write(destination, b"payload")
                .map_err(|err| BiomapError::Filesystem(err.to_string()))
        }

        fn export_sheet_csv(&self, _id: &FileId, destination: &Path) -> Result<(), BiomapError> {
            std::fs::write(destination, b"name,links\n")
                .map_err(|err| BiomapError::Filesystem(err.to_string()))
        }

        fn delete_file(&self, id: &FileId) -> Result<(), BiomapError> {
            self.deleted.lock().unwrap().push(id.as_str().to_string());
            Ok(())
        }
    }

    fn entry(id: &str, name: &str, mime: &str) -> DriveEntry {
        DriveEntry {
            id: id.parse().unwrap(),
            name: name.to_string(),
            mime_type: mime.to_string(),
        }
    }

    #[test]
    fn sync_names_files_by_drive_id() {
        let temp = tempfile::tempdir().unwrap();
        let inbox = Utf8PathBuf::from_path_buf(temp.path().join("inbox")).unwrap();
        let drive = MockDrive::new(vec![
            entry("1AbC2dEfG3hIj", "survey.gpkg", "application/geopackage+sqlite3"),
            entry(
                "4KlM5nOpQ6rSt",
                "responses",
                "application/vnd.google-apps.spreadsheet",
            ),
            entry(
                "7UvW8xYzA9bCd",
                "notes",
                "application/vnd.google-apps.document",
            ),
        ]);
        let app = App::new(drive);
        let config = SyncConfig {
            folder: "0FoLdErId12345".parse().unwrap(),
            inbox_dir: inbox.clone(),
        };

        let result = app.sync(&config, &JsonOutput).unwrap();

        assert!(inbox.join("1AbC2dEfG3hIj.gpkg").as_std_path().exists());
        assert!(inbox.join("4KlM5nOpQ6rSt.csv").as_std_path().exists());
        let actions: Vec<&str> = result.items.iter().map(|i| i.action.as_str()).collect();
        assert_eq!(actions, vec!["downloaded", "exported", "skipped"]);
    }

    #[test]
    fn cleanup_only_touches_gpkg_files() {
        let drive = MockDrive::new(vec![
            entry("1AbC2dEfG3hIj", "survey.gpkg", "application/geopackage+sqlite3"),
            entry(
                "4KlM5nOpQ6rSt",
                "responses",
                "application/vnd.google-apps.spreadsheet",
            ),
            entry(
                "7UvW8xYzA9bCd",
                "archive",
                "application/vnd.google-apps.folder",
            ),
        ]);
        let app = App::new(drive);

        let result = app
            .cleanup(&"0FoLdErId12345".parse().unwrap(), &JsonOutput)
            .unwrap();

        assert_eq!(result.deleted, vec!["survey.gpkg"]);
        assert_eq!(result.kept.len(), 2);
        assert_eq!(
            *app.drive.deleted.lock().unwrap(),
            vec!["1AbC2dEfG3hIj".to_string()]
        );
    }

    #[test]
    fn run_writes_snapshot_on_failure() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let inbox = root.join("inbox");
        std::fs::create_dir_all(inbox.as_std_path()).unwrap();
        // No responses sheet in the inbox, so the pipeline must fail.
        let config = PipelineConfig {
            inbox_dir: inbox,
            species_csv: root.join("species.csv"),
            main_gpkg: root.join("main.gpkg"),
            backup_dir: None,
        };
        let app = App::new(MockDrive::new(Vec::new()));

        let err = app.run(&config, "", &JsonOutput).unwrap_err();
        assert!(matches!(err, BiomapError::MissingResponsesSheet(_)));

        let snapshots: Vec<_> = std::fs::read_dir(root.as_std_path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("error_snapshot_")
            })
            .collect();
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].path().join("report.txt").exists());
    }
}
