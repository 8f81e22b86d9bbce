use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use geo_types::Geometry;

use crate::domain::{ObserverName, SpeciesName};
use crate::error::BiomapError;
use crate::geom::{self, Crs, GeomKey};
use crate::gpkg::{AttributeValue, Feature, FeatureTable};

/// Column layout every dataset is normalized into, and the layout of the
/// main dataset on disk.
pub const CANONICAL_COLUMNS: [&str; 8] = [
    "species",
    "observer",
    "type",
    "english_name",
    "date",
    "year",
    "month",
    "day",
];

const SPECIES_ALIASES: [&str; 4] = ["species", "taxon", "species_name", "scientific_name"];
const OBSERVER_ALIASES: [&str; 3] = ["observer", "recorded_by", "recorder"];
const GROUP_ALIASES: [&str; 3] = ["type", "group", "taxon_group"];
const ENGLISH_ALIASES: [&str; 3] = ["english_name", "common_name", "vernacular_name"];
const DATE_ALIASES: [&str; 4] = ["date", "observation_date", "timestamp", "date_observed"];

/// One survey record in canonical form, geometry always WGS84.
#[derive(Debug, Clone)]
pub struct Observation {
    pub geometry: Geometry<f64>,
    pub species: Option<SpeciesName>,
    pub observer: Option<ObserverName>,
    pub group: Option<String>,
    pub english_name: Option<String>,
    pub date: Option<String>,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

/// Dedup identity: a record is the triple (geometry, species, observer).
/// Missing species or observer compare as the empty string, so two
/// anonymous records at the same point still collapse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObservationKey {
    geometry: GeomKey,
    species: String,
    observer: String,
}

impl Observation {
    pub fn key(&self) -> Result<ObservationKey, BiomapError> {
        Ok(ObservationKey {
            geometry: GeomKey::of(&self.geometry)?,
            species: self
                .species
                .as_ref()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            observer: self
                .observer
                .as_ref()
                .map(|o| o.as_str().to_string())
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Default)]
pub struct NormalizeStats {
    pub undated_rows: usize,
}

/// Remaps an inbound feature table onto the canonical schema and reprojects
/// every geometry to WGS84. Unknown extra columns are dropped; missing
/// source columns yield empty canonical fields.
pub fn normalize(table: &FeatureTable) -> Result<(Vec<Observation>, NormalizeStats), BiomapError> {
    let species_idx = find_column(table, &SPECIES_ALIASES);
    let observer_idx = find_column(table, &OBSERVER_ALIASES);
    let group_idx = find_column(table, &GROUP_ALIASES);
    let english_idx = find_column(table, &ENGLISH_ALIASES);
    let date_idx = find_column(table, &DATE_ALIASES);

    let mut stats = NormalizeStats::default();
    let mut observations = Vec::with_capacity(table.len());

    for feature in &table.features {
        let geometry = geom::to_wgs84(feature.geometry.clone(), table.srs)?;

        let date = date_idx.and_then(|idx| text_at(feature, idx));
        let parsed = date.as_deref().and_then(parse_date);
        if date.is_some() && parsed.is_none() {
            stats.undated_rows += 1;
        }

        observations.push(Observation {
            geometry,
            species: species_idx
                .and_then(|idx| text_at(feature, idx))
                .and_then(|value| SpeciesName::new(&value)),
            observer: observer_idx
                .and_then(|idx| text_at(feature, idx))
                .and_then(|value| ObserverName::new(&value)),
            group: group_idx.and_then(|idx| text_at(feature, idx)),
            english_name: english_idx.and_then(|idx| text_at(feature, idx)),
            date,
            year: parsed.map(|d| d.year()),
            month: parsed.map(|d| d.month()),
            day: parsed.map(|d| d.day()),
        });
    }

    Ok((observations, stats))
}

/// Lays canonical observations back out as a feature table, ready for
/// `gpkg::write_geopackage`.
pub fn to_feature_table(layer: &str, observations: &[Observation]) -> FeatureTable {
    let mut table = FeatureTable::new(
        layer,
        CANONICAL_COLUMNS.iter().map(|c| c.to_string()).collect(),
        Crs::wgs84(),
    );
    for obs in observations {
        table.features.push(Feature {
            geometry: obs.geometry.clone(),
            attributes: vec![
                text_value(obs.species.as_ref().map(|s| s.as_str())),
                text_value(obs.observer.as_ref().map(|o| o.as_str())),
                text_value(obs.group.as_deref()),
                text_value(obs.english_name.as_deref()),
                text_value(obs.date.as_deref()),
                int_value(obs.year.map(i64::from)),
                int_value(obs.month.map(i64::from)),
                int_value(obs.day.map(i64::from)),
            ],
        });
    }
    table
}

/// Reads the main dataset's canonical rows back into observations. The
/// main file is always written by this tool, so the canonical columns are
/// expected; a foreign file still goes through the alias mapping.
pub fn from_feature_table(table: &FeatureTable) -> Result<Vec<Observation>, BiomapError> {
    let (observations, _) = normalize(table)?;
    Ok(observations)
}

fn find_column(table: &FeatureTable, aliases: &[&str]) -> Option<usize> {
    aliases.iter().find_map(|alias| {
        table
            .columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(alias))
    })
}

fn text_at(feature: &Feature, index: usize) -> Option<String> {
    match &feature.attributes[index] {
        AttributeValue::Text(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        AttributeValue::Int(value) => Some(value.to_string()),
        AttributeValue::Float(value) => Some(value.to_string()),
        AttributeValue::Null => None,
    }
}

fn text_value(value: Option<&str>) -> AttributeValue {
    match value {
        Some(text) => AttributeValue::Text(text.to_string()),
        None => AttributeValue::Null,
    }
}

fn int_value(value: Option<i64>) -> AttributeValue {
    match value {
        Some(number) => AttributeValue::Int(number),
        None => AttributeValue::Null,
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Some(datetime.date());
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%d/%m/%Y") {
        return Some(date);
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(datetime.date_naive());
    }
    None
}

#[cfg(test)]
mod tests {
    use geo_types::point;

    use super::*;
    use crate::geom::{WEB_MERCATOR_SRS_ID, WGS84_SRS_ID};

    fn table_with(columns: &[&str], rows: Vec<(Geometry<f64>, Vec<AttributeValue>)>, epsg: i32) -> FeatureTable {
        let mut table = FeatureTable::new(
            "upload",
            columns.iter().map(|c| c.to_string()).collect(),
            Crs::from_epsg(epsg),
        );
        for (geometry, attributes) in rows {
            table.features.push(Feature {
                geometry,
                attributes,
            });
        }
        table
    }

    #[test]
    fn remaps_aliased_columns() {
        let table = table_with(
            &["Taxon", "Recorded_By", "Observation_Date"],
            vec![(
                Geometry::Point(point! { x: 8.0, y: 47.0 }),
                vec![
                    AttributeValue::Text("Pieris rapae ".to_string()),
                    AttributeValue::Text("Jane".to_string()),
                    AttributeValue::Text("2025-06-14".to_string()),
                ],
            )],
            WGS84_SRS_ID,
        );

        let (observations, stats) = normalize(&table).unwrap();
        assert_eq!(stats.undated_rows, 0);
        let obs = &observations[0];
        assert_eq!(obs.species.as_ref().unwrap().as_str(), "Pieris rapae");
        assert_eq!(obs.observer.as_ref().unwrap().as_str(), "Jane");
        assert_eq!((obs.year, obs.month, obs.day), (Some(2025), Some(6), Some(14)));
    }

    #[test]
    fn reprojects_web_mercator_rows() {
        let table = table_with(
            &["species"],
            vec![(
                Geometry::Point(point! { x: 0.0, y: 0.0 }),
                vec![AttributeValue::Text("Pieris rapae".to_string())],
            )],
            WEB_MERCATOR_SRS_ID,
        );
        let (observations, _) = normalize(&table).unwrap();
        match &observations[0].geometry {
            Geometry::Point(point) => {
                assert!(point.x().abs() < 1e-9);
                assert!(point.y().abs() < 1e-9);
            }
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn unparseable_date_is_counted_not_fatal() {
        let table = table_with(
            &["species", "date"],
            vec![(
                Geometry::Point(point! { x: 8.0, y: 47.0 }),
                vec![
                    AttributeValue::Text("Pieris rapae".to_string()),
                    AttributeValue::Text("sometime in June".to_string()),
                ],
            )],
            WGS84_SRS_ID,
        );
        let (observations, stats) = normalize(&table).unwrap();
        assert_eq!(stats.undated_rows, 1);
        assert_eq!(observations[0].year, None);
        assert_eq!(observations[0].date.as_deref(), Some("sometime in June"));
    }

    #[test]
    fn missing_columns_yield_empty_fields() {
        let table = table_with(
            &["notes"],
            vec![(
                Geometry::Point(point! { x: 8.0, y: 47.0 }),
                vec![AttributeValue::Text("windy".to_string())],
            )],
            WGS84_SRS_ID,
        );
        let (observations, _) = normalize(&table).unwrap();
        assert!(observations[0].species.is_none());
        assert!(observations[0].observer.is_none());
    }

    #[test]
    fn canonical_roundtrip_preserves_key() {
        let obs = Observation {
            geometry: Geometry::Point(point! { x: 8.5, y: 47.3 }),
            species: SpeciesName::new("Pieris rapae"),
            observer: ObserverName::new("Jane"),
            group: Some("butterfly".to_string()),
            english_name: Some("Small White".to_string()),
            date: Some("2025-06-14".to_string()),
            year: Some(2025),
            month: Some(6),
            day: Some(14),
        };
        let table = to_feature_table("main", std::slice::from_ref(&obs));
        let back = from_feature_table(&table).unwrap();
        assert_eq!(back[0].key().unwrap(), obs.key().unwrap());
        assert_eq!(back[0].english_name.as_deref(), Some("Small White"));
    }

    #[test]
    fn date_formats() {
        assert_eq!(
            parse_date("14/06/2025"),
            NaiveDate::from_ymd_opt(2025, 6, 14)
        );
        assert_eq!(
            parse_date("2025-06-14 09:30:00"),
            NaiveDate::from_ymd_opt(2025, 6, 14)
        );
        assert_eq!(
            parse_date("2025-06-14T09:30:00Z"),
            NaiveDate::from_ymd_opt(2025, 6, 14)
        );
        assert_eq!(parse_date("June 14"), None);
    }
}
