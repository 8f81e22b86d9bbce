use assert_matches::assert_matches;

use biomap_manager::domain::{FileId, FolderId, ObserverName, SpeciesName};
use biomap_manager::error::BiomapError;

#[test]
fn parse_file_id_valid() {
    let id: FileId = " 1AbC2dEfG3hIj_-x ".parse().unwrap();
    assert_eq!(id.as_str(), "1AbC2dEfG3hIj_-x");
}

#[test]
fn parse_file_id_too_short() {
    let err = "abc".parse::<FileId>().unwrap_err();
    assert_matches!(err, BiomapError::InvalidFileId(_));
}

#[test]
fn parse_file_id_rejects_punctuation() {
    let err = "1AbC2dEfG3hIj!".parse::<FileId>().unwrap_err();
    assert_matches!(err, BiomapError::InvalidFileId(_));
}

#[test]
fn parse_folder_id_valid() {
    let id: FolderId = "0B1xYzAbCdEfGh".parse().unwrap();
    assert_eq!(id.as_str(), "0B1xYzAbCdEfGh");
}

#[test]
fn parse_folder_id_invalid() {
    let err = "not a folder".parse::<FolderId>().unwrap_err();
    assert_matches!(err, BiomapError::InvalidFolderId(_));
}

#[test]
fn observer_name_trims_and_rejects_blank() {
    let name = ObserverName::new("  Ada Lovelace  ").unwrap();
    assert_eq!(name.as_str(), "Ada Lovelace");
    assert!(ObserverName::new("   ").is_none());
}

#[test]
fn species_name_trims_and_rejects_blank() {
    let name = SpeciesName::new(" Parus major ").unwrap();
    assert_eq!(name.as_str(), "Parus major");
    assert!(SpeciesName::new("").is_none());
}
