use std::fmt::Write as _;

use camino::Utf8Path;
use chrono::Local;

use crate::config::PipelineConfig;
use crate::gpkg;
use crate::reconcile::{self, SpeciesTable};
use crate::store::Workspace;

/// Builds the plain-text diagnostic report covering every pipeline input.
/// Each check is best-effort: a broken input is described, never fatal,
/// since the report is exactly what gets shared when something is broken.
pub fn report(config: &PipelineConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "BIOMAP PIPELINE DIAGNOSIS");
    let _ = writeln!(out, "generated: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "tool: biomap/{}", env!("CARGO_PKG_VERSION"));
    let _ = writeln!(out);
    let _ = writeln!(out, "inputs:");
    let _ = writeln!(out, "  inbox_dir:   {}", config.inbox_dir);
    let _ = writeln!(out, "  species_csv: {}", config.species_csv);
    let _ = writeln!(out, "  main_gpkg:   {}", config.main_gpkg);
    let _ = writeln!(
        out,
        "  backup_dir:  {}",
        config
            .backup_dir
            .as_deref()
            .map(|p| p.as_str())
            .unwrap_or("(none)")
    );

    check_species_table(&mut out, &config.species_csv);
    check_responses_sheet(&mut out, &config.inbox_dir);
    check_uploads(&mut out, &config.inbox_dir);
    check_main(&mut out, &config.main_gpkg);

    out
}

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", "=".repeat(60));
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "{}", "=".repeat(60));
}

fn file_facts(out: &mut String, path: &Utf8Path) -> bool {
    let exists = path.as_std_path().exists();
    let _ = writeln!(out, "path: {path}");
    let _ = writeln!(out, "exists: {exists}");
    if exists {
        if let Ok(meta) = path.as_std_path().metadata() {
            let _ = writeln!(out, "size: {} bytes", meta.len());
        }
    }
    exists
}

fn check_species_table(out: &mut String, path: &Utf8Path) {
    section(out, "SPECIES TABLE");
    if !file_facts(out, path) {
        return;
    }

    match SpeciesTable::load(path.as_std_path()) {
        Ok(table) => {
            let _ = writeln!(out, "species entries: {}", table.len());
            let _ = writeln!(out, "duplicate keys: {}", table.duplicate_keys);
        }
        Err(err) => {
            let _ = writeln!(out, "ERROR loading table: {err}");
            return;
        }
    }

    // Re-read raw to spot keys that only differ by padding; devices add
    // trailing spaces and that is the usual cause of failed lookups.
    if let Ok(bytes) = std::fs::read(path.as_std_path()) {
        let decoded = reconcile::latin1_to_string(&bytes);
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(decoded.as_bytes());
        let padded = reader
            .records()
            .filter_map(|record| record.ok())
            .filter(|record| {
                record
                    .get(0)
                    .map(|value| value != value.trim())
                    .unwrap_or(false)
            })
            .count();
        let _ = writeln!(out, "keys with stray whitespace: {padded}");
    }
}

fn check_responses_sheet(out: &mut String, inbox: &Utf8Path) {
    section(out, "RESPONSES SHEET");
    let workspace = Workspace::new(inbox.to_path_buf());
    let sheet = match workspace.responses_sheet() {
        Ok(sheet) => sheet,
        Err(err) => {
            let _ = writeln!(out, "ERROR: {err}");
            return;
        }
    };
    file_facts(out, &sheet);

    match reconcile::load_observer_map(sheet.as_std_path()) {
        Ok(map) => {
            let _ = writeln!(out, "file ids mapped to observers: {}", map.len());
        }
        Err(err) => {
            let _ = writeln!(out, "ERROR parsing sheet: {err}");
        }
    }
}

fn check_uploads(out: &mut String, inbox: &Utf8Path) {
    section(out, "UPLOADED FILES");
    let workspace = Workspace::new(inbox.to_path_buf());
    let files = match workspace.gpkg_files() {
        Ok(files) => files,
        Err(err) => {
            let _ = writeln!(out, "ERROR: {err}");
            return;
        }
    };
    let _ = writeln!(out, "gpkg files found: {}", files.len());

    for path in files {
        let _ = writeln!(out);
        file_facts(out, &path);
        describe_geopackage(out, &path);
    }
}

fn check_main(out: &mut String, main: &Utf8Path) {
    section(out, "MAIN DATASET");
    if !file_facts(out, main) {
        let _ = writeln!(out, "(a fresh main dataset will be created on the next run)");
        return;
    }
    let _ = writeln!(out, "expected layer: {}", main.file_stem().unwrap_or("main"));
    describe_geopackage(out, main);
}

fn describe_geopackage(out: &mut String, path: &Utf8Path) {
    let layers = match gpkg::list_layers(path.as_std_path()) {
        Ok(layers) => layers,
        Err(err) => {
            let _ = writeln!(out, "ERROR listing layers: {err}");
            return;
        }
    };
    let _ = writeln!(out, "layers: {layers:?}");

    for layer in &layers {
        match gpkg::read_layer(path.as_std_path(), layer) {
            Ok(table) => {
                let _ = writeln!(
                    out,
                    "layer '{layer}': {} rows, srs {}, columns {:?}",
                    table.len(),
                    table.srs,
                    table.columns
                );
                if table.null_geometry_rows > 0 {
                    let _ = writeln!(
                        out,
                        "layer '{layer}': {} rows with NULL geometry",
                        table.null_geometry_rows
                    );
                }
                if let Some(idx) = table.column_index("species") {
                    let padded = table
                        .features
                        .iter()
                        .filter_map(|feature| feature.attributes[idx].as_text())
                        .filter(|value| *value != value.trim())
                        .count();
                    if padded > 0 {
                        let _ = writeln!(
                            out,
                            "layer '{layer}': {padded} species values with stray whitespace"
                        );
                    }
                }
            }
            Err(err) => {
                let _ = writeln!(out, "ERROR reading layer '{layer}': {err}");
            }
        }
    }
}
