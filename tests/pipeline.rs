use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use geo_types::{Geometry, point};

use biomap_manager::config::PipelineConfig;
use biomap_manager::error::BiomapError;
use biomap_manager::geom::Crs;
use biomap_manager::gpkg::{self, AttributeValue, Feature, FeatureTable};
use biomap_manager::pipeline;
use biomap_manager::runlog;

const FILE_A: &str = "1AbC2dEfG3hIj";
const FILE_B: &str = "4KlM5nOpQ6rSt";

fn write_upload(
    inbox: &Utf8PathBuf,
    file_id: &str,
    epsg: i32,
    rows: &[(f64, f64, &str, Option<&str>)],
) {
    let mut table = FeatureTable::new(
        file_id,
        vec!["taxon".to_string(), "observation_date".to_string()],
        Crs::from_epsg(epsg),
    );
    for (x, y, species, date) in rows {
        table.features.push(Feature {
            geometry: Geometry::Point(point!(x: *x, y: *y)),
            attributes: vec![
                AttributeValue::Text((*species).to_string()),
                match date {
                    Some(date) => AttributeValue::Text((*date).to_string()),
                    None => AttributeValue::Null,
                },
            ],
        });
    }
    let path = inbox.join(format!("{file_id}.gpkg"));
    gpkg::write_geopackage(path.as_std_path(), &table).unwrap();
}

fn fixture() -> (tempfile::TempDir, PipelineConfig) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let inbox = root.join("inbox");
    std::fs::create_dir_all(inbox.as_std_path()).unwrap();

    std::fs::write(
        inbox.join("responses.csv").as_std_path(),
        format!(
            "Timestamp,Include your name here,Upload your gpkg files here\n\
             2024-05-01,Ada,https://drive.google.com/open?id={FILE_A}\n\
             2024-05-02,Grace,https://drive.google.com/open?id={FILE_B}&usp=sharing\n"
        ),
    )
    .unwrap();

    std::fs::write(
        root.join("species.csv").as_std_path(),
        "species,type,english_name\nParus major,bird,Great Tit\n",
    )
    .unwrap();

    // Two identical sightings (same point, species, uploader) plus one
    // species the reference table does not know.
    write_upload(
        &inbox,
        FILE_A,
        4326,
        &[
            (5.1, 52.0, "Parus major", Some("2024-05-01")),
            (5.1, 52.0, "Parus major", Some("2024-05-02")),
            (5.2, 52.1, "Turdus merula", None),
        ],
    );
    // Web Mercator upload; the origin reprojects to (0, 0) exactly.
    write_upload(&inbox, FILE_B, 3857, &[(0.0, 0.0, "Parus major", None)]);

    // Valid-looking id that no responses row mentions.
    write_upload(&inbox, "zZ9unknown0x", 4326, &[(1.0, 1.0, "Parus major", None)]);

    let config = PipelineConfig {
        inbox_dir: inbox,
        species_csv: root.join("species.csv"),
        main_gpkg: root.join("out/main.gpkg"),
        backup_dir: Some(root.join("backups")),
    };
    (dir, config)
}

#[test]
fn merge_dedup_and_append() {
    let (_dir, config) = fixture();

    let outcome = pipeline::run(&config, "first").unwrap();
    assert_eq!(outcome.files_processed, 2);
    assert_eq!(outcome.skipped.len(), 1);
    assert!(outcome.skipped[0].reason.contains("responses sheet"));
    assert_eq!(outcome.rows_merged, 4);
    assert_eq!(outcome.duplicates_dropped, 1);
    assert_eq!(outcome.rows_appended, 3);
    assert_eq!(outcome.main_total, 3);
    assert_eq!(outcome.unmatched_species, 1);
    // No main dataset existed yet, so nothing to back up.
    assert!(outcome.backup_path.is_none());

    let table = gpkg::read_layer(config.main_gpkg.as_std_path(), "main").unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(table.srs, Crs::wgs84());
    let species_idx = table.column_index("species").unwrap();
    let observer_idx = table.column_index("observer").unwrap();
    let english_idx = table.column_index("english_name").unwrap();
    let titmice = table
        .features
        .iter()
        .filter(|f| f.attributes[species_idx].as_text() == Some("Parus major"))
        .count();
    assert_eq!(titmice, 2);
    assert!(
        table
            .features
            .iter()
            .any(|f| f.attributes[observer_idx].as_text() == Some("Grace"))
    );
    assert!(
        table
            .features
            .iter()
            .any(|f| f.attributes[english_idx].as_text() == Some("Great Tit"))
    );
}

fn strip_feature_layers(path: &std::path::Path) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute("DELETE FROM gpkg_geometry_columns", []).unwrap();
    conn.execute("DELETE FROM gpkg_contents", []).unwrap();
}

#[test]
fn layerless_upload_is_skipped_not_fatal() {
    let (_dir, config) = fixture();
    strip_feature_layers(
        config
            .inbox_dir
            .join(format!("{FILE_A}.gpkg"))
            .as_std_path(),
    );

    let outcome = pipeline::run(&config, "first").unwrap();
    assert_eq!(outcome.files_processed, 1);
    assert_eq!(outcome.skipped.len(), 2);
    assert!(
        outcome
            .skipped
            .iter()
            .any(|s| s.file.contains(FILE_A) && s.reason.contains("no feature layer"))
    );
    assert_eq!(outcome.main_total, 1);
}

#[test]
fn layerless_main_dataset_is_an_error() {
    let (_dir, config) = fixture();
    pipeline::run(&config, "first").unwrap();
    strip_feature_layers(config.main_gpkg.as_std_path());

    let err = pipeline::run(&config, "second").unwrap_err();
    assert_matches!(err, BiomapError::NoFeatureLayer(_));
}

#[test]
fn second_run_is_idempotent() {
    let (_dir, config) = fixture();

    pipeline::run(&config, "first").unwrap();
    let outcome = pipeline::run(&config, "second").unwrap();

    assert_eq!(outcome.rows_merged, 4);
    assert_eq!(outcome.duplicates_dropped, 4);
    assert_eq!(outcome.rows_appended, 0);
    assert_eq!(outcome.main_total, 3);
    // The pre-run state of the main dataset was preserved this time.
    let backup = outcome.backup_path.expect("backup of existing main");
    assert!(std::path::Path::new(&backup).exists());

    let log = runlog::read(&Utf8PathBuf::from(&outcome.log_path)).unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].note, "first");
    assert_eq!(log[1].note, "second");
    assert_eq!(log[1].rows_appended, 0);
}
