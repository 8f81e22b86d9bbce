use std::f64::consts::FRAC_PI_2;

use geo_types::{
    Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon,
};

use crate::error::BiomapError;

pub const WGS84_SRS_ID: i32 = 4326;
pub const WEB_MERCATOR_SRS_ID: i32 = 3857;

const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Coordinate reference system, by EPSG code only. Survey devices emit
/// either WGS84 or Web Mercator; anything else is rejected up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crs(i32);

impl Crs {
    pub fn from_epsg(code: i32) -> Self {
        Self(code)
    }

    pub fn wgs84() -> Self {
        Self(WGS84_SRS_ID)
    }

    pub fn epsg(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

/// Canonical byte encoding of a geometry, used as the geometry component of
/// the (geometry, species, observer) dedup triple. Bitwise-equal coordinate
/// sequences produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeomKey(Vec<u8>);

impl GeomKey {
    pub fn of(geometry: &Geometry<f64>) -> Result<Self, BiomapError> {
        Ok(Self(encode_wkb(geometry)?))
    }
}

/// Reprojects a geometry into WGS84. Identity for EPSG:4326 input, the
/// closed-form spherical inverse for EPSG:3857.
pub fn to_wgs84(geometry: Geometry<f64>, source: Crs) -> Result<Geometry<f64>, BiomapError> {
    match source.epsg() {
        WGS84_SRS_ID => Ok(geometry),
        WEB_MERCATOR_SRS_ID => Ok(map_coords(geometry, mercator_to_wgs84)),
        other => Err(BiomapError::UnsupportedCrs(other.unsigned_abs())),
    }
}

fn mercator_to_wgs84(coord: Coord<f64>) -> Coord<f64> {
    let lon = (coord.x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (coord.y / EARTH_RADIUS_M).exp().atan() - FRAC_PI_2).to_degrees();
    Coord { x: lon, y: lat }
}

fn map_coords<F>(geometry: Geometry<f64>, f: F) -> Geometry<f64>
where
    F: Fn(Coord<f64>) -> Coord<f64> + Copy,
{
    match geometry {
        Geometry::Point(point) => Geometry::Point(Point(f(point.0))),
        Geometry::LineString(line) => Geometry::LineString(map_line(line, f)),
        Geometry::Polygon(polygon) => Geometry::Polygon(map_polygon(polygon, f)),
        Geometry::MultiPoint(points) => Geometry::MultiPoint(MultiPoint(
            points.0.into_iter().map(|point| Point(f(point.0))).collect(),
        )),
        Geometry::MultiLineString(lines) => Geometry::MultiLineString(MultiLineString(
            lines.0.into_iter().map(|line| map_line(line, f)).collect(),
        )),
        Geometry::MultiPolygon(polygons) => Geometry::MultiPolygon(MultiPolygon(
            polygons
                .0
                .into_iter()
                .map(|polygon| map_polygon(polygon, f))
                .collect(),
        )),
        other => other,
    }
}

fn map_line<F>(line: LineString<f64>, f: F) -> LineString<f64>
where
    F: Fn(Coord<f64>) -> Coord<f64> + Copy,
{
    LineString(line.0.into_iter().map(f).collect())
}

fn map_polygon<F>(polygon: Polygon<f64>, f: F) -> Polygon<f64>
where
    F: Fn(Coord<f64>) -> Coord<f64> + Copy,
{
    let (exterior, interiors) = polygon.into_inner();
    Polygon::new(
        map_line(exterior, f),
        interiors.into_iter().map(|ring| map_line(ring, f)).collect(),
    )
}

/// Decodes a GeoPackage geometry BLOB (the `GP` header followed by ISO WKB)
/// into a geometry and the SRS id recorded in the header.
pub fn decode_gpkg_blob(blob: &[u8]) -> Result<(Geometry<f64>, i32), BiomapError> {
    if blob.len() < 8 || blob[0] != b'G' || blob[1] != b'P' {
        return Err(BiomapError::GeometryDecode(
            "missing GP magic in geometry blob".to_string(),
        ));
    }
    let flags = blob[3];
    if flags & 0b0010_0000 != 0 {
        return Err(BiomapError::GeometryDecode(
            "empty geometry flag set".to_string(),
        ));
    }
    let header_little_endian = flags & 0b0000_0001 != 0;
    let envelope_indicator = (flags >> 1) & 0b0000_0111;
    let envelope_len = match envelope_indicator {
        0 => 0,
        1 => 32,
        2 | 3 => 48,
        4 => 64,
        other => {
            return Err(BiomapError::GeometryDecode(format!(
                "invalid envelope indicator {other}"
            )));
        }
    };

    let srs_bytes: [u8; 4] = blob[4..8]
        .try_into()
        .map_err(|_| BiomapError::GeometryDecode("truncated header".to_string()))?;
    let srs_id = if header_little_endian {
        i32::from_le_bytes(srs_bytes)
    } else {
        i32::from_be_bytes(srs_bytes)
    };

    let wkb_start = 8 + envelope_len;
    if blob.len() <= wkb_start {
        return Err(BiomapError::GeometryDecode(
            "blob ends before WKB body".to_string(),
        ));
    }

    let mut cursor = WkbCursor::new(&blob[wkb_start..]);
    let geometry = cursor.read_geometry()?;
    Ok((geometry, srs_id))
}

/// Encodes a geometry as a GeoPackage BLOB: little-endian header, no
/// envelope, little-endian WKB body.
pub fn encode_gpkg_blob(geometry: &Geometry<f64>, srs_id: i32) -> Result<Vec<u8>, BiomapError> {
    let wkb = encode_wkb(geometry)?;
    let mut blob = Vec::with_capacity(8 + wkb.len());
    blob.extend_from_slice(b"GP");
    blob.push(0); // version
    blob.push(0b0000_0001); // little-endian header, no envelope
    blob.extend_from_slice(&srs_id.to_le_bytes());
    blob.extend_from_slice(&wkb);
    Ok(blob)
}

const WKB_POINT: u32 = 1;
const WKB_LINESTRING: u32 = 2;
const WKB_POLYGON: u32 = 3;
const WKB_MULTIPOINT: u32 = 4;
const WKB_MULTILINESTRING: u32 = 5;
const WKB_MULTIPOLYGON: u32 = 6;

struct WkbCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WkbCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], BiomapError> {
        if self.pos + len > self.data.len() {
            return Err(BiomapError::GeometryDecode(
                "truncated WKB body".to_string(),
            ));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, BiomapError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self, little_endian: bool) -> Result<u32, BiomapError> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(if little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    }

    fn read_f64(&mut self, little_endian: bool) -> Result<f64, BiomapError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(if little_endian {
            f64::from_le_bytes(bytes)
        } else {
            f64::from_be_bytes(bytes)
        })
    }

    fn read_coord(&mut self, little_endian: bool) -> Result<Coord<f64>, BiomapError> {
        let x = self.read_f64(little_endian)?;
        let y = self.read_f64(little_endian)?;
        Ok(Coord { x, y })
    }

    fn read_ring(&mut self, little_endian: bool) -> Result<LineString<f64>, BiomapError> {
        let count = self.read_u32(little_endian)? as usize;
        let mut coords = Vec::with_capacity(count);
        for _ in 0..count {
            coords.push(self.read_coord(little_endian)?);
        }
        Ok(LineString(coords))
    }

    fn read_geometry(&mut self) -> Result<Geometry<f64>, BiomapError> {
        let little_endian = match self.read_u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(BiomapError::GeometryDecode(format!(
                    "invalid byte order marker {other}"
                )));
            }
        };
        let raw_type = self.read_u32(little_endian)?;
        // 2-D only: the EWKB Z/M flag bits change the coordinate width.
        if raw_type & 0xC000_0000 != 0 {
            return Err(BiomapError::UnsupportedGeometry(raw_type));
        }
        // EWKB embeds an SRID after the type word.
        if raw_type & 0x2000_0000 != 0 {
            self.read_u32(little_endian)?;
        }
        let code = raw_type & !0x2000_0000;
        if code > WKB_MULTIPOLYGON {
            // Covers the ISO 1001+/2001+ Z and M ranges as well.
            return Err(BiomapError::UnsupportedGeometry(raw_type));
        }

        match code {
            WKB_POINT => Ok(Geometry::Point(Point(self.read_coord(little_endian)?))),
            WKB_LINESTRING => Ok(Geometry::LineString(self.read_ring(little_endian)?)),
            WKB_POLYGON => {
                let ring_count = self.read_u32(little_endian)? as usize;
                let mut rings = Vec::with_capacity(ring_count);
                for _ in 0..ring_count {
                    rings.push(self.read_ring(little_endian)?);
                }
                if rings.is_empty() {
                    return Err(BiomapError::GeometryDecode(
                        "polygon without exterior ring".to_string(),
                    ));
                }
                let exterior = rings.remove(0);
                Ok(Geometry::Polygon(Polygon::new(exterior, rings)))
            }
            WKB_MULTIPOINT => {
                let count = self.read_u32(little_endian)? as usize;
                let mut points = Vec::with_capacity(count);
                for _ in 0..count {
                    match self.read_geometry()? {
                        Geometry::Point(point) => points.push(point),
                        _ => {
                            return Err(BiomapError::GeometryDecode(
                                "multipoint member is not a point".to_string(),
                            ));
                        }
                    }
                }
                Ok(Geometry::MultiPoint(MultiPoint(points)))
            }
            WKB_MULTILINESTRING => {
                let count = self.read_u32(little_endian)? as usize;
                let mut lines = Vec::with_capacity(count);
                for _ in 0..count {
                    match self.read_geometry()? {
                        Geometry::LineString(line) => lines.push(line),
                        _ => {
                            return Err(BiomapError::GeometryDecode(
                                "multilinestring member is not a linestring".to_string(),
                            ));
                        }
                    }
                }
                Ok(Geometry::MultiLineString(MultiLineString(lines)))
            }
            WKB_MULTIPOLYGON => {
                let count = self.read_u32(little_endian)? as usize;
                let mut polygons = Vec::with_capacity(count);
                for _ in 0..count {
                    match self.read_geometry()? {
                        Geometry::Polygon(polygon) => polygons.push(polygon),
                        _ => {
                            return Err(BiomapError::GeometryDecode(
                                "multipolygon member is not a polygon".to_string(),
                            ));
                        }
                    }
                }
                Ok(Geometry::MultiPolygon(MultiPolygon(polygons)))
            }
            other => Err(BiomapError::UnsupportedGeometry(other)),
        }
    }
}

fn encode_wkb(geometry: &Geometry<f64>) -> Result<Vec<u8>, BiomapError> {
    let mut out = Vec::new();
    write_geometry(&mut out, geometry)?;
    Ok(out)
}

fn write_geometry(out: &mut Vec<u8>, geometry: &Geometry<f64>) -> Result<(), BiomapError> {
    out.push(1); // little-endian
    match geometry {
        Geometry::Point(point) => {
            out.extend_from_slice(&WKB_POINT.to_le_bytes());
            write_coord(out, point.0);
        }
        Geometry::LineString(line) => {
            out.extend_from_slice(&WKB_LINESTRING.to_le_bytes());
            write_ring(out, line);
        }
        Geometry::Polygon(polygon) => {
            out.extend_from_slice(&WKB_POLYGON.to_le_bytes());
            let ring_count = 1 + polygon.interiors().len() as u32;
            out.extend_from_slice(&ring_count.to_le_bytes());
            write_ring(out, polygon.exterior());
            for ring in polygon.interiors() {
                write_ring(out, ring);
            }
        }
        Geometry::MultiPoint(points) => {
            out.extend_from_slice(&WKB_MULTIPOINT.to_le_bytes());
            out.extend_from_slice(&(points.0.len() as u32).to_le_bytes());
            for point in &points.0 {
                write_geometry(out, &Geometry::Point(*point))?;
            }
        }
        Geometry::MultiLineString(lines) => {
            out.extend_from_slice(&WKB_MULTILINESTRING.to_le_bytes());
            out.extend_from_slice(&(lines.0.len() as u32).to_le_bytes());
            for line in &lines.0 {
                write_geometry(out, &Geometry::LineString(line.clone()))?;
            }
        }
        Geometry::MultiPolygon(polygons) => {
            out.extend_from_slice(&WKB_MULTIPOLYGON.to_le_bytes());
            out.extend_from_slice(&(polygons.0.len() as u32).to_le_bytes());
            for polygon in &polygons.0 {
                write_geometry(out, &Geometry::Polygon(polygon.clone()))?;
            }
        }
        _ => {
            return Err(BiomapError::GeometryDecode(
                "geometry type not representable in survey data".to_string(),
            ));
        }
    }
    Ok(())
}

fn write_coord(out: &mut Vec<u8>, coord: Coord<f64>) {
    out.extend_from_slice(&coord.x.to_le_bytes());
    out.extend_from_slice(&coord.y.to_le_bytes());
}

fn write_ring(out: &mut Vec<u8>, line: &LineString<f64>) {
    out.extend_from_slice(&(line.0.len() as u32).to_le_bytes());
    for coord in &line.0 {
        write_coord(out, *coord);
    }
}
