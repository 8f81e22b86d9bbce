use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::domain::{FileId, ObserverName, SpeciesName};
use crate::error::BiomapError;
use crate::schema::Observation;

/// Header of the form column holding the uploader's name.
pub const NAME_COLUMN: &str = "Include your name here";
/// Header of the form column holding the pasted share links.
pub const LINKS_COLUMN: &str = "Upload your gpkg files here";

fn link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s,]+").unwrap())
}

/// Pulls every URL out of a links cell. Cells may hold several links
/// separated by commas or whitespace.
pub fn extract_links(cell: &str) -> Vec<&str> {
    link_regex().find_iter(cell).map(|m| m.as_str()).collect()
}

/// Extracts the Drive file id from a share link: the value of the `id=`
/// query parameter, terminated by `&`.
pub fn file_id_from_link(link: &str) -> Option<FileId> {
    let (_, rest) = link.split_once("id=")?;
    let raw = rest.split('&').next()?;
    FileId::from_str(raw).ok()
}

/// file-id → uploader-name mapping parsed from the responses sheet.
/// A repeated file id keeps the later sheet row (re-submissions win).
pub fn load_observer_map(path: &Path) -> Result<HashMap<FileId, ObserverName>, BiomapError> {
    let sheet_err = |message: String| BiomapError::ResponsesSheet {
        path: path.display().to_string(),
        message,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|err| sheet_err(err.to_string()))?;

    let headers = reader
        .headers()
        .map_err(|err| sheet_err(err.to_string()))?
        .clone();
    let name_idx = find_header(&headers, NAME_COLUMN)
        .ok_or_else(|| sheet_err(format!("missing column '{NAME_COLUMN}'")))?;
    let links_idx = find_header(&headers, LINKS_COLUMN)
        .ok_or_else(|| sheet_err(format!("missing column '{LINKS_COLUMN}'")))?;

    let mut map = HashMap::new();
    for record in reader.records() {
        let record = record.map_err(|err| sheet_err(err.to_string()))?;
        let Some(name) = record.get(name_idx).and_then(ObserverName::new) else {
            continue;
        };
        let Some(links_cell) = record.get(links_idx) else {
            continue;
        };
        for link in extract_links(links_cell) {
            match file_id_from_link(link) {
                Some(file_id) => {
                    map.insert(file_id, name.clone());
                }
                None => debug!(link, "link without a usable file id"),
            }
        }
    }

    Ok(map)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeciesInfo {
    pub group: Option<String>,
    pub english_name: Option<String>,
}

/// Species → taxonomy/display lookup built from the reference CSV. The
/// file is maintained in a spreadsheet program and arrives as ISO-8859-1.
#[derive(Debug, Default)]
pub struct SpeciesTable {
    entries: HashMap<String, SpeciesInfo>,
    pub duplicate_keys: usize,
}

impl SpeciesTable {
    pub fn load(path: &Path) -> Result<Self, BiomapError> {
        let table_err = |message: String| BiomapError::SpeciesTable {
            path: path.display().to_string(),
            message,
        };

        let bytes = std::fs::read(path).map_err(|err| table_err(err.to_string()))?;
        let decoded = latin1_to_string(&bytes);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(decoded.as_bytes());
        let headers = reader
            .headers()
            .map_err(|err| table_err(err.to_string()))?
            .clone();
        let species_idx = find_header(&headers, "species")
            .ok_or_else(|| table_err("missing column 'species'".to_string()))?;
        let group_idx = find_header(&headers, "type");
        let english_idx = find_header(&headers, "english_name");

        let mut table = Self::default();
        for record in reader.records() {
            let record = record.map_err(|err| table_err(err.to_string()))?;
            let Some(species) = record.get(species_idx).map(str::trim) else {
                continue;
            };
            if species.is_empty() {
                continue;
            }
            let info = SpeciesInfo {
                group: group_idx
                    .and_then(|idx| record.get(idx))
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string),
                english_name: english_idx
                    .and_then(|idx| record.get(idx))
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string),
            };
            if table.entries.insert(species.to_string(), info).is_some() {
                table.duplicate_keys += 1;
            }
        }
        if table.duplicate_keys > 0 {
            warn!(
                duplicates = table.duplicate_keys,
                "species table has duplicate keys, later rows win"
            );
        }
        Ok(table)
    }

    pub fn lookup(&self, species: &SpeciesName) -> Option<&SpeciesInfo> {
        self.entries.get(species.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Stamps the uploader onto every record of a file and fills taxonomy and
/// display fields from the species table. Species missing from the table
/// leave whatever the device recorded untouched.
pub fn apply(
    observations: &mut [Observation],
    observer: &ObserverName,
    species: &SpeciesTable,
) -> usize {
    let mut unmatched = 0;
    for obs in observations.iter_mut() {
        obs.observer = Some(observer.clone());
        match obs.species.as_ref().and_then(|name| species.lookup(name)) {
            Some(info) => {
                if info.group.is_some() {
                    obs.group = info.group.clone();
                }
                if info.english_name.is_some() {
                    obs.english_name = info.english_name.clone();
                }
            }
            None => {
                if obs.species.is_some() {
                    unmatched += 1;
                }
            }
        }
    }
    unmatched
}

/// ISO-8859-1 bytes map one-to-one onto the first 256 Unicode code points.
pub fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn find_header(headers: &csv::StringRecord, wanted: &str) -> Option<usize> {
    headers
        .iter()
        .position(|header| header.trim().eq_ignore_ascii_case(wanted))
}
