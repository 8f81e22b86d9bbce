use std::path::Path;

use geo_types::Geometry;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, OpenFlags, params_from_iter};
use tracing::warn;

use crate::error::BiomapError;
use crate::geom::{self, Crs};

/// Attribute cell in a feature table.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }
}

#[derive(Debug, Clone)]
pub struct Feature {
    pub geometry: Geometry<f64>,
    /// Parallel to `FeatureTable::columns`.
    pub attributes: Vec<AttributeValue>,
}

/// One feature layer read from (or destined for) a GeoPackage.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub layer: String,
    pub columns: Vec<String>,
    pub srs: Crs,
    pub features: Vec<Feature>,
    /// Rows dropped on read because their geometry cell was NULL.
    pub null_geometry_rows: usize,
}

impl FeatureTable {
    pub fn new(layer: &str, columns: Vec<String>, srs: Crs) -> Self {
        Self {
            layer: layer.to_string(),
            columns,
            srs,
            features: Vec::new(),
            null_geometry_rows: 0,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

fn gpkg_err(path: &Path, err: impl std::fmt::Display) -> BiomapError {
    BiomapError::Geopackage {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

fn open_readonly(path: &Path) -> Result<Connection, BiomapError> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|err| gpkg_err(path, err))
}

/// Lists the feature layers registered in `gpkg_contents`.
pub fn list_layers(path: &Path) -> Result<Vec<String>, BiomapError> {
    let conn = open_readonly(path)?;
    let mut stmt = conn
        .prepare("SELECT table_name FROM gpkg_contents WHERE data_type = 'features' ORDER BY table_name")
        .map_err(|err| gpkg_err(path, err))?;
    let layers = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|err| gpkg_err(path, err))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| gpkg_err(path, err))?;
    Ok(layers)
}

/// Reads one feature layer. Rows with a NULL geometry are skipped and
/// counted; attribute BLOBs (unexpected in survey data) read as NULL.
pub fn read_layer(path: &Path, layer: &str) -> Result<FeatureTable, BiomapError> {
    let conn = open_readonly(path)?;

    let (geom_column, srs_id): (String, i32) = conn
        .query_row(
            "SELECT column_name, srs_id FROM gpkg_geometry_columns WHERE table_name = ?1",
            [layer],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => BiomapError::LayerNotFound {
                path: path.display().to_string(),
                layer: layer.to_string(),
            },
            other => gpkg_err(path, other),
        })?;

    let mut columns = Vec::new();
    {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(layer)))
            .map_err(|err| gpkg_err(path, err))?;
        let mut rows = stmt.query([]).map_err(|err| gpkg_err(path, err))?;
        while let Some(row) = rows.next().map_err(|err| gpkg_err(path, err))? {
            let name: String = row.get(1).map_err(|err| gpkg_err(path, err))?;
            let pk: i64 = row.get(5).map_err(|err| gpkg_err(path, err))?;
            if pk == 0 && name != geom_column {
                columns.push(name);
            }
        }
    }

    let mut table = FeatureTable::new(layer, columns, Crs::from_epsg(srs_id));

    let select = format!(
        "SELECT {}{} FROM {}",
        quote_ident(&geom_column),
        table
            .columns
            .iter()
            .map(|column| format!(", {}", quote_ident(column)))
            .collect::<String>(),
        quote_ident(layer),
    );
    let mut stmt = conn.prepare(&select).map_err(|err| gpkg_err(path, err))?;
    let mut rows = stmt.query([]).map_err(|err| gpkg_err(path, err))?;
    while let Some(row) = rows.next().map_err(|err| gpkg_err(path, err))? {
        let geom_ref = row.get_ref(0).map_err(|err| gpkg_err(path, err))?;
        let blob = match geom_ref {
            ValueRef::Blob(blob) => blob,
            ValueRef::Null => {
                table.null_geometry_rows += 1;
                continue;
            }
            other => {
                return Err(gpkg_err(
                    path,
                    format!("geometry column holds {:?} instead of a blob", other.data_type()),
                ));
            }
        };
        let (geometry, _) = geom::decode_gpkg_blob(blob)?;

        let mut attributes = Vec::with_capacity(table.columns.len());
        for index in 0..table.columns.len() {
            let value = row.get_ref(index + 1).map_err(|err| gpkg_err(path, err))?;
            attributes.push(match value {
                ValueRef::Null => AttributeValue::Null,
                ValueRef::Integer(v) => AttributeValue::Int(v),
                ValueRef::Real(v) => AttributeValue::Float(v),
                ValueRef::Text(text) => {
                    AttributeValue::Text(String::from_utf8_lossy(text).into_owned())
                }
                ValueRef::Blob(_) => AttributeValue::Null,
            });
        }
        table.features.push(Feature {
            geometry,
            attributes,
        });
    }

    if table.null_geometry_rows > 0 {
        warn!(
            layer,
            skipped = table.null_geometry_rows,
            "skipped rows with NULL geometry"
        );
    }

    Ok(table)
}

/// Writes a single-layer GeoPackage. The file is built next to `path` and
/// moved into place, so a partially written container never replaces a
/// good one.
pub fn write_geopackage(path: &Path, table: &FeatureTable) -> Result<(), BiomapError> {
    let parent = path
        .parent()
        .ok_or_else(|| BiomapError::Filesystem("destination has no parent directory".to_string()))?;
    std::fs::create_dir_all(parent).map_err(|err| BiomapError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix(".biomap-gpkg")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|err| BiomapError::Filesystem(err.to_string()))?;
    let temp_path = temp.path().to_path_buf();
    // rusqlite needs to create the database file itself.
    drop(temp);
    let _ = std::fs::remove_file(&temp_path);

    write_fresh(&temp_path, table).inspect_err(|_| {
        let _ = std::fs::remove_file(&temp_path);
    })?;

    if path.exists() {
        std::fs::remove_file(path).map_err(|err| BiomapError::Filesystem(err.to_string()))?;
    }
    std::fs::rename(&temp_path, path).map_err(|err| BiomapError::Filesystem(err.to_string()))
}

fn write_fresh(path: &Path, table: &FeatureTable) -> Result<(), BiomapError> {
    let mut conn = Connection::open(path).map_err(|err| gpkg_err(path, err))?;

    conn.execute_batch(
        "PRAGMA application_id = 0x47504B47;
         PRAGMA user_version = 10300;

         CREATE TABLE gpkg_spatial_ref_sys (
             srs_name TEXT NOT NULL,
             srs_id INTEGER PRIMARY KEY,
             organization TEXT NOT NULL,
             organization_coordsys_id INTEGER NOT NULL,
             definition TEXT NOT NULL,
             description TEXT
         );
         INSERT INTO gpkg_spatial_ref_sys VALUES
             ('Undefined Cartesian', -1, 'NONE', -1, 'undefined', NULL),
             ('Undefined Geographic', 0, 'NONE', 0, 'undefined', NULL),
             ('WGS 84', 4326, 'EPSG', 4326,
              'GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\",SPHEROID[\"WGS 84\",6378137,298.257223563]],PRIMEM[\"Greenwich\",0],UNIT[\"degree\",0.0174532925199433]]',
              NULL),
             ('WGS 84 / Pseudo-Mercator', 3857, 'EPSG', 3857,
              'PROJCS[\"WGS 84 / Pseudo-Mercator\",GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\",SPHEROID[\"WGS 84\",6378137,298.257223563]],PRIMEM[\"Greenwich\",0],UNIT[\"degree\",0.0174532925199433]],PROJECTION[\"Mercator_1SP\"],PARAMETER[\"central_meridian\",0],PARAMETER[\"scale_factor\",1],PARAMETER[\"false_easting\",0],PARAMETER[\"false_northing\",0],UNIT[\"metre\",1]]',
              NULL);

         CREATE TABLE gpkg_contents (
             table_name TEXT NOT NULL PRIMARY KEY,
             data_type TEXT NOT NULL,
             identifier TEXT UNIQUE,
             description TEXT DEFAULT '',
             last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
             min_x DOUBLE, min_y DOUBLE, max_x DOUBLE, max_y DOUBLE,
             srs_id INTEGER,
             CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
         );

         CREATE TABLE gpkg_geometry_columns (
             table_name TEXT NOT NULL,
             column_name TEXT NOT NULL,
             geometry_type_name TEXT NOT NULL,
             srs_id INTEGER NOT NULL,
             z TINYINT NOT NULL,
             m TINYINT NOT NULL,
             CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name)
         );",
    )
    .map_err(|err| gpkg_err(path, err))?;

    let column_types = infer_column_types(table);
    let create_columns = table
        .columns
        .iter()
        .zip(&column_types)
        .map(|(column, sql_type)| format!(", {} {sql_type}", quote_ident(column)))
        .collect::<String>();
    conn.execute_batch(&format!(
        "CREATE TABLE {} (fid INTEGER PRIMARY KEY AUTOINCREMENT, geom BLOB{create_columns});",
        quote_ident(&table.layer),
    ))
    .map_err(|err| gpkg_err(path, err))?;

    conn.execute(
        "INSERT INTO gpkg_contents (table_name, data_type, identifier, srs_id)
         VALUES (?1, 'features', ?1, ?2)",
        rusqlite::params![table.layer, table.srs.epsg()],
    )
    .map_err(|err| gpkg_err(path, err))?;
    conn.execute(
        "INSERT INTO gpkg_geometry_columns VALUES (?1, 'geom', ?2, ?3, 0, 0)",
        rusqlite::params![table.layer, geometry_type_name(table), table.srs.epsg()],
    )
    .map_err(|err| gpkg_err(path, err))?;

    let tx = conn.transaction().map_err(|err| gpkg_err(path, err))?;
    {
        let placeholders = (1..=table.columns.len() + 1)
            .map(|n| format!("?{n}"))
            .collect::<Vec<_>>()
            .join(", ");
        let insert = format!(
            "INSERT INTO {} (geom{}) VALUES ({placeholders})",
            quote_ident(&table.layer),
            table
                .columns
                .iter()
                .map(|column| format!(", {}", quote_ident(column)))
                .collect::<String>(),
        );
        let mut stmt = tx.prepare(&insert).map_err(|err| gpkg_err(path, err))?;
        for feature in &table.features {
            let blob = geom::encode_gpkg_blob(&feature.geometry, table.srs.epsg())?;
            let mut values = Vec::with_capacity(table.columns.len() + 1);
            values.push(Value::Blob(blob));
            for attribute in &feature.attributes {
                values.push(match attribute {
                    AttributeValue::Null => Value::Null,
                    AttributeValue::Int(v) => Value::Integer(*v),
                    AttributeValue::Float(v) => Value::Real(*v),
                    AttributeValue::Text(v) => Value::Text(v.clone()),
                });
            }
            stmt.execute(params_from_iter(values))
                .map_err(|err| gpkg_err(path, err))?;
        }
    }
    tx.commit().map_err(|err| gpkg_err(path, err))
}

fn infer_column_types(table: &FeatureTable) -> Vec<&'static str> {
    table
        .columns
        .iter()
        .enumerate()
        .map(|(index, _)| {
            let first = table
                .features
                .iter()
                .map(|feature| &feature.attributes[index])
                .find(|value| !value.is_null());
            match first {
                Some(AttributeValue::Int(_)) => "INTEGER",
                Some(AttributeValue::Float(_)) => "REAL",
                _ => "TEXT",
            }
        })
        .collect()
}

fn geometry_type_name(table: &FeatureTable) -> &'static str {
    let mut name = None;
    for feature in &table.features {
        let current = match feature.geometry {
            Geometry::Point(_) => "POINT",
            Geometry::LineString(_) => "LINESTRING",
            Geometry::Polygon(_) => "POLYGON",
            Geometry::MultiPoint(_) => "MULTIPOINT",
            Geometry::MultiLineString(_) => "MULTILINESTRING",
            Geometry::MultiPolygon(_) => "MULTIPOLYGON",
            _ => "GEOMETRY",
        };
        match name {
            None => name = Some(current),
            Some(previous) if previous == current => {}
            Some(_) => return "GEOMETRY",
        }
    }
    name.unwrap_or("GEOMETRY")
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use geo_types::point;

    use super::*;
    use crate::geom::WGS84_SRS_ID;

    fn sample_table() -> FeatureTable {
        let mut table = FeatureTable::new(
            "survey",
            vec!["species".to_string(), "observer".to_string(), "year".to_string()],
            Crs::from_epsg(WGS84_SRS_ID),
        );
        table.features.push(Feature {
            geometry: Geometry::Point(point! { x: 8.55, y: 47.37 }),
            attributes: vec![
                AttributeValue::Text("Pieris rapae".to_string()),
                AttributeValue::Text("Jane Field".to_string()),
                AttributeValue::Int(2025),
            ],
        });
        table.features.push(Feature {
            geometry: Geometry::Point(point! { x: 8.56, y: 47.38 }),
            attributes: vec![
                AttributeValue::Text("Vanessa atalanta".to_string()),
                AttributeValue::Null,
                AttributeValue::Int(2025),
            ],
        });
        table
    }

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("survey.gpkg");

        let table = sample_table();
        write_geopackage(&path, &table).unwrap();

        let layers = list_layers(&path).unwrap();
        assert_eq!(layers, vec!["survey".to_string()]);

        let read = read_layer(&path, "survey").unwrap();
        assert_eq!(read.columns, table.columns);
        assert_eq!(read.srs.epsg(), WGS84_SRS_ID);
        assert_eq!(read.len(), 2);
        assert_eq!(read.features[0].attributes, table.features[0].attributes);
        assert_eq!(read.features[0].geometry, table.features[0].geometry);
        assert!(read.features[1].attributes[1].is_null());
    }

    #[test]
    fn null_geometry_row_is_skipped_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("survey.gpkg");
        write_geopackage(&path, &sample_table()).unwrap();

        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute(
            "INSERT INTO survey (geom, species, observer, year) VALUES (NULL, 'Anas ghost', 'Jane Field', 2025)",
            [],
        )
        .unwrap();
        drop(conn);

        let read = read_layer(&path, "survey").unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read.null_geometry_rows, 1);
        assert!(
            !read
                .features
                .iter()
                .any(|f| f.attributes[0].as_text() == Some("Anas ghost"))
        );
    }

    #[test]
    fn missing_layer_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("survey.gpkg");
        write_geopackage(&path, &sample_table()).unwrap();

        let err = read_layer(&path, "absent").unwrap_err();
        assert_matches!(err, BiomapError::LayerNotFound { .. });
    }

    #[test]
    fn rewrite_replaces_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("survey.gpkg");

        let mut table = sample_table();
        write_geopackage(&path, &table).unwrap();

        table.features.truncate(1);
        write_geopackage(&path, &table).unwrap();

        let read = read_layer(&path, "survey").unwrap();
        assert_eq!(read.len(), 1);
    }
}
