use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::BiomapError;
use crate::store::{self, Workspace};

/// Captures every pipeline input plus a diagnostic report into a
/// timestamped folder next to the inbox, so a failed run can be handed
/// over for inspection without access to the machine it ran on.
pub fn create(config: &PipelineConfig, report: &str) -> Result<Utf8PathBuf, BiomapError> {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let parent = config
        .inbox_dir
        .parent()
        .unwrap_or_else(|| Utf8Path::new("."));
    let root = parent.join(format!("error_snapshot_{stamp}"));
    let field_files = root.join("field_files");
    std::fs::create_dir_all(field_files.as_std_path())
        .map_err(|err| BiomapError::Filesystem(err.to_string()))?;

    copy_optional(&config.species_csv, &root);

    let workspace = Workspace::new(config.inbox_dir.clone());
    if let Ok(sheet) = workspace.responses_sheet() {
        copy_optional(&sheet, &root);
    }
    match workspace.gpkg_files() {
        Ok(files) => {
            for file in files {
                copy_optional(&file, &field_files);
            }
        }
        Err(err) => warn!(error = %err, "snapshot: could not list inbox"),
    }

    copy_optional(&config.main_gpkg, &root);

    store::write_bytes_atomic(root.join("report.txt").as_std_path(), report.as_bytes())?;

    info!(path = %root, "error snapshot written");
    Ok(root)
}

// Missing inputs are part of what a snapshot documents; skip, never fail.
fn copy_optional(source: &Utf8Path, dest_dir: &Utf8Path) {
    if !source.as_std_path().exists() {
        return;
    }
    let Some(name) = source.file_name() else {
        return;
    };
    let dest = dest_dir.join(name);
    if let Err(err) = store::copy_file_atomic(source.as_std_path(), dest.as_std_path()) {
        warn!(file = %source, error = %err, "snapshot: copy failed");
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn snapshot_collects_available_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let inbox = root.join("inbox");
        std::fs::create_dir_all(inbox.as_std_path()).unwrap();
        std::fs::write(inbox.join("responses.csv").as_std_path(), "a,b\n").unwrap();
        std::fs::write(inbox.join("abc.gpkg").as_std_path(), b"not a real gpkg").unwrap();
        std::fs::write(root.join("species.csv").as_std_path(), "species,type\n").unwrap();

        let config = PipelineConfig {
            inbox_dir: inbox,
            species_csv: root.join("species.csv"),
            main_gpkg: root.join("main.gpkg"),
            backup_dir: None,
        };

        let snapshot = create(&config, "report body").unwrap();
        assert!(snapshot.join("report.txt").as_std_path().exists());
        assert!(snapshot.join("species.csv").as_std_path().exists());
        assert!(snapshot.join("responses.csv").as_std_path().exists());
        assert!(snapshot.join("field_files/abc.gpkg").as_std_path().exists());
        assert!(!snapshot.join("main.gpkg").as_std_path().exists());
    }
}
