use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::FolderId;
use crate::error::BiomapError;

pub const SETTINGS_FILE: &str = "biomap.json";

/// Persisted settings. Every field is optional in the file; a command
/// complains only about the fields it actually needs.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub drive_folder_id: Option<String>,
    #[serde(default)]
    pub inbox_dir: Option<String>,
    #[serde(default)]
    pub species_csv: Option<String>,
    #[serde(default)]
    pub main_gpkg: Option<String>,
    #[serde(default)]
    pub backup_dir: Option<String>,
    #[serde(default)]
    pub token_file: Option<String>,
}

/// Everything the ETL pipeline needs, validated and path-typed.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub inbox_dir: Utf8PathBuf,
    pub species_csv: Utf8PathBuf,
    pub main_gpkg: Utf8PathBuf,
    pub backup_dir: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub folder: FolderId,
    pub inbox_dir: Utf8PathBuf,
}

pub struct SettingsLoader;

impl SettingsLoader {
    /// Loads settings from an explicit path, `biomap.json` in the current
    /// directory, or `~/.config/biomap/biomap.json` as a last resort.
    pub fn resolve(path: Option<&str>) -> Result<Settings, BiomapError> {
        let settings_path = match path {
            Some(path) => PathBuf::from(path),
            None => {
                let local = PathBuf::from(SETTINGS_FILE);
                if local.exists() {
                    local
                } else {
                    Self::home_settings()
                        .filter(|home| home.exists())
                        .ok_or(BiomapError::MissingSettings)?
                }
            }
        };

        let content = fs::read_to_string(&settings_path)
            .map_err(|_| BiomapError::SettingsRead(settings_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| BiomapError::SettingsParse(err.to_string()))
    }

    fn home_settings() -> Option<PathBuf> {
        BaseDirs::new().map(|dirs| dirs.home_dir().join(".config").join("biomap").join(SETTINGS_FILE))
    }

    pub fn save(settings: &Settings, path: Option<&str>) -> Result<(), BiomapError> {
        let settings_path = PathBuf::from(path.unwrap_or(SETTINGS_FILE));
        let content = serde_json::to_vec_pretty(settings)
            .map_err(|err| BiomapError::SettingsParse(err.to_string()))?;
        crate::store::write_bytes_atomic(&settings_path, &content)
    }
}

impl Settings {
    pub fn pipeline(&self) -> Result<PipelineConfig, BiomapError> {
        Ok(PipelineConfig {
            inbox_dir: required_path(&self.inbox_dir, "inbox_dir")?,
            species_csv: required_path(&self.species_csv, "species_csv")?,
            main_gpkg: required_path(&self.main_gpkg, "main_gpkg")?,
            backup_dir: self.backup_dir.as_deref().map(Utf8PathBuf::from),
        })
    }

    pub fn sync(&self) -> Result<SyncConfig, BiomapError> {
        let folder = self
            .drive_folder_id
            .as_deref()
            .ok_or_else(|| BiomapError::SettingsIncomplete("drive_folder_id".to_string()))?;
        Ok(SyncConfig {
            folder: FolderId::from_str(folder)?,
            inbox_dir: required_path(&self.inbox_dir, "inbox_dir")?,
        })
    }

    pub fn cleanup_folder(&self) -> Result<FolderId, BiomapError> {
        let folder = self
            .drive_folder_id
            .as_deref()
            .ok_or_else(|| BiomapError::SettingsIncomplete("drive_folder_id".to_string()))?;
        FolderId::from_str(folder)
    }

    pub fn token_path(&self) -> Result<Utf8PathBuf, BiomapError> {
        self.token_file
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(Utf8PathBuf::from)
            .ok_or_else(|| {
                BiomapError::MissingToken("token_file is not set in settings".to_string())
            })
    }

    /// Skeleton written by `biomap init` for hand-editing.
    pub fn skeleton() -> Self {
        Self {
            drive_folder_id: Some(String::new()),
            inbox_dir: Some("inbox".to_string()),
            species_csv: Some("species.csv".to_string()),
            main_gpkg: Some("main.gpkg".to_string()),
            backup_dir: Some("backups".to_string()),
            token_file: Some("drive_token.txt".to_string()),
        }
    }
}

fn required_path(value: &Option<String>, field: &str) -> Result<Utf8PathBuf, BiomapError> {
    let value = value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BiomapError::SettingsIncomplete(field.to_string()))?;
    Ok(Utf8PathBuf::from(value))
}
