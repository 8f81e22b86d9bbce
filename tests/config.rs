use assert_matches::assert_matches;

use biomap_manager::config::{Settings, SettingsLoader};
use biomap_manager::error::BiomapError;

#[test]
fn settings_parse_partial_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("biomap.json");
    std::fs::write(
        &path,
        r#"{ "inbox_dir": "inbox", "species_csv": "ref/species.csv", "main_gpkg": "out/main.gpkg" }"#,
    )
    .unwrap();

    let settings = SettingsLoader::resolve(path.to_str()).unwrap();
    let pipeline = settings.pipeline().unwrap();
    assert_eq!(pipeline.species_csv.as_str(), "ref/species.csv");
    assert!(pipeline.backup_dir.is_none());

    // Sync needs the folder id, which this file does not have.
    let err = settings.sync().unwrap_err();
    assert_matches!(err, BiomapError::SettingsIncomplete(_));
}

#[test]
fn settings_reject_malformed_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("biomap.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = SettingsLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, BiomapError::SettingsParse(_));
}

#[test]
fn skeleton_saves_and_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("biomap.json");
    let path_str = path.to_str().unwrap();

    SettingsLoader::save(&Settings::skeleton(), Some(path_str)).unwrap();
    let loaded = SettingsLoader::resolve(Some(path_str)).unwrap();
    assert_eq!(loaded.main_gpkg.as_deref(), Some("main.gpkg"));
    assert_eq!(loaded.backup_dir.as_deref(), Some("backups"));
}

#[test]
fn token_path_requires_setting() {
    let settings = Settings::default();
    let err = settings.token_path().unwrap_err();
    assert_matches!(err, BiomapError::MissingToken(_));

    let settings = Settings {
        token_file: Some(" drive_token.txt ".to_string()),
        ..Settings::default()
    };
    assert_eq!(settings.token_path().unwrap().as_str(), "drive_token.txt");
}
