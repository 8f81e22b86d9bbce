use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BiomapError {
    #[error("invalid drive file id: {0}")]
    InvalidFileId(String),

    #[error("invalid drive folder id: {0}")]
    InvalidFolderId(String),

    #[error("missing settings file biomap.json in current directory")]
    MissingSettings,

    #[error("failed to read settings file at {0}")]
    SettingsRead(PathBuf),

    #[error("failed to parse JSON settings: {0}")]
    SettingsParse(String),

    #[error("settings value missing: {0}")]
    SettingsIncomplete(String),

    #[error("drive request failed: {0}")]
    DriveHttp(String),

    #[error("drive returned status {status}: {message}")]
    DriveStatus { status: u16, message: String },

    #[error("missing drive access token: {0}")]
    MissingToken(String),

    #[error("geopackage {path}: {message}")]
    Geopackage { path: String, message: String },

    #[error("layer not found in {path}: {layer}")]
    LayerNotFound { path: String, layer: String },

    #[error("no feature layer in {0}")]
    NoFeatureLayer(String),

    #[error("malformed geometry blob: {0}")]
    GeometryDecode(String),

    #[error("unsupported geometry type code: {0}")]
    UnsupportedGeometry(u32),

    #[error("unsupported source crs EPSG:{0} (only 4326 and 3857 are accepted)")]
    UnsupportedCrs(u32),

    #[error("species table {path}: {message}")]
    SpeciesTable { path: String, message: String },

    #[error("responses sheet {path}: {message}")]
    ResponsesSheet { path: String, message: String },

    #[error("no responses sheet found in {0}")]
    MissingResponsesSheet(String),

    #[error("run log {path}: {message}")]
    RunLog { path: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
