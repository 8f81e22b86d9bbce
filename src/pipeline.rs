use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use camino::Utf8Path;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::domain::{FileId, ObserverName};
use crate::error::BiomapError;
use crate::gpkg;
use crate::reconcile::{self, SpeciesTable};
use crate::runlog::{self, RunLogEntry};
use crate::schema::{self, Observation};
use crate::store::{self, Workspace};

#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub file: String,
    pub reason: String,
}

/// Counters and outcomes of one merge run, also the non-interactive JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub files_processed: usize,
    pub skipped: Vec<SkippedFile>,
    pub rows_merged: usize,
    pub duplicates_dropped: usize,
    pub rows_appended: usize,
    pub main_total: usize,
    pub unmatched_species: usize,
    pub undated_rows: usize,
    pub backup_path: Option<String>,
    pub log_path: String,
}

/// The whole ETL sequence: reconcile metadata, normalize and merge the
/// uploaded files, drop (geometry, species, observer) duplicates against
/// the main dataset, append the novel rows and log the run.
pub fn run(config: &PipelineConfig, note: &str) -> Result<PipelineOutcome, BiomapError> {
    let workspace = Workspace::new(config.inbox_dir.clone());

    let sheet = workspace.responses_sheet()?;
    let observer_map = reconcile::load_observer_map(sheet.as_std_path())?;
    let species = SpeciesTable::load(config.species_csv.as_std_path())?;
    info!(
        observers = observer_map.len(),
        species = species.len(),
        "reference tables loaded"
    );

    let mut merged: Vec<Observation> = Vec::new();
    let mut skipped = Vec::new();
    let mut files_processed = 0usize;
    let mut unmatched_species = 0usize;
    let mut undated_rows = 0usize;

    for path in workspace.gpkg_files()? {
        let file_name = path.file_name().unwrap_or_default().to_string();
        match ingest_file(&path, &observer_map, &species) {
            Ok(IngestResult::Rows {
                mut observations,
                unmatched,
                undated,
            }) => {
                info!(file = file_name, rows = observations.len(), "merged upload");
                files_processed += 1;
                unmatched_species += unmatched;
                undated_rows += undated;
                merged.append(&mut observations);
            }
            Ok(IngestResult::Skipped(reason)) => {
                warn!(file = file_name, reason, "skipping upload");
                skipped.push(SkippedFile {
                    file: file_name,
                    reason,
                });
            }
            Err(err) => return Err(err),
        }
    }
    let rows_merged = merged.len();

    let main_exists = config.main_gpkg.as_std_path().exists();
    let main_observations = if main_exists {
        read_main(&config.main_gpkg)?
    } else {
        Vec::new()
    };

    let mut seen: HashSet<_> = main_observations
        .iter()
        .map(Observation::key)
        .collect::<Result<_, _>>()?;
    let mut novel = Vec::new();
    let mut duplicates_dropped = 0usize;
    for obs in merged {
        if seen.insert(obs.key()?) {
            novel.push(obs);
        } else {
            duplicates_dropped += 1;
        }
    }

    let backup_path = match (&config.backup_dir, main_exists) {
        (Some(backup_dir), true) => Some(
            store::backup_main(&config.main_gpkg, backup_dir)?
                .to_string(),
        ),
        _ => None,
    };

    let rows_appended = novel.len();
    let mut final_observations = main_observations;
    final_observations.extend(novel);
    let main_total = final_observations.len();

    let layer = config.main_gpkg.file_stem().unwrap_or("main");
    let table = schema::to_feature_table(layer, &final_observations);
    gpkg::write_geopackage(config.main_gpkg.as_std_path(), &table)?;
    info!(
        appended = rows_appended,
        total = main_total,
        main = config.main_gpkg.as_str(),
        "main dataset written"
    );

    let log_path = runlog::log_path_for(&config.main_gpkg);
    runlog::append(
        &log_path,
        &RunLogEntry::now(files_processed, rows_merged, rows_appended, note),
    )?;

    Ok(PipelineOutcome {
        files_processed,
        skipped,
        rows_merged,
        duplicates_dropped,
        rows_appended,
        main_total,
        unmatched_species,
        undated_rows,
        backup_path,
        log_path: log_path.to_string(),
    })
}

enum IngestResult {
    Rows {
        observations: Vec<Observation>,
        unmatched: usize,
        undated: usize,
    },
    Skipped(String),
}

fn ingest_file(
    path: &Utf8Path,
    observer_map: &HashMap<FileId, ObserverName>,
    species: &SpeciesTable,
) -> Result<IngestResult, BiomapError> {
    let stem = path.file_stem().unwrap_or_default();
    let Ok(file_id) = FileId::from_str(stem) else {
        return Ok(IngestResult::Skipped(
            "file name is not a drive file id".to_string(),
        ));
    };
    let Some(observer) = observer_map.get(&file_id) else {
        return Ok(IngestResult::Skipped(
            "no matching entry in the responses sheet".to_string(),
        ));
    };

    let layers = gpkg::list_layers(path.as_std_path())?;
    let layer = if layers.iter().any(|l| l == stem) {
        stem.to_string()
    } else {
        match layers.as_slice() {
            [only] => only.clone(),
            [] => {
                return Ok(IngestResult::Skipped("no feature layer".to_string()));
            }
            _ => {
                return Ok(IngestResult::Skipped(format!(
                    "no layer named '{stem}' among {} layers",
                    layers.len()
                )));
            }
        }
    };

    let table = gpkg::read_layer(path.as_std_path(), &layer)?;
    let (mut observations, stats) = schema::normalize(&table)?;
    let unmatched = reconcile::apply(&mut observations, observer, species);

    Ok(IngestResult::Rows {
        observations,
        unmatched,
        undated: stats.undated_rows,
    })
}

fn read_main(main: &Utf8Path) -> Result<Vec<Observation>, BiomapError> {
    let layers = gpkg::list_layers(main.as_std_path())?;
    let stem = main.file_stem().unwrap_or("main");
    let layer = if layers.iter().any(|l| l == stem) {
        stem.to_string()
    } else {
        layers
            .first()
            .cloned()
            .ok_or_else(|| BiomapError::NoFeatureLayer(main.to_string()))?
    };
    let table = gpkg::read_layer(main.as_std_path(), &layer)?;
    schema::from_feature_table(&table)
}
