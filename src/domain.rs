use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BiomapError;

/// Google Drive file identifier. Uploaded survey files land in the inbox
/// named `<file id>.gpkg`, and the responses sheet refers to them by the
/// same id inside share links.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(String);

impl FileId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileId {
    type Err = BiomapError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = trimmed.len() >= 10
            && trimmed
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !is_valid {
            return Err(BiomapError::InvalidFileId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderId(String);

impl FolderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FolderId {
    type Err = BiomapError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = trimmed.len() >= 10
            && trimmed
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !is_valid {
            return Err(BiomapError::InvalidFolderId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Observer display name as entered in the upload form. Stored trimmed;
/// comparisons are exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObserverName(String);

impl ObserverName {
    pub fn new(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObserverName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scientific species name, the lookup key into the reference table.
/// Field devices pad these with stray whitespace, so the key is trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpeciesName(String);

impl SpeciesName {
    pub fn new(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpeciesName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_file_id_valid() {
        let id: FileId = " 1a2B3c4D5e_-x ".parse().unwrap();
        assert_eq!(id.as_str(), "1a2B3c4D5e_-x");
    }

    #[test]
    fn parse_file_id_invalid() {
        let err = "short".parse::<FileId>().unwrap_err();
        assert_matches!(err, BiomapError::InvalidFileId(_));

        let err = "has spaces inside oops".parse::<FileId>().unwrap_err();
        assert_matches!(err, BiomapError::InvalidFileId(_));
    }

    #[test]
    fn observer_name_trims_and_rejects_blank() {
        let name = ObserverName::new("  Jane Field  ").unwrap();
        assert_eq!(name.as_str(), "Jane Field");
        assert!(ObserverName::new("   ").is_none());
    }

    #[test]
    fn species_name_trims() {
        let sp = SpeciesName::new("Pieris rapae ").unwrap();
        assert_eq!(sp.as_str(), "Pieris rapae");
        assert!(SpeciesName::new("").is_none());
    }
}
