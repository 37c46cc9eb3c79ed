//! Zipped shapefile to GeoJSON conversion.
//!
//! The archive must hold a `.shp` and a `.dbf`. A `.prj` naming a projection we
//! know causes every vertex to be projected to WGS84.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use shapefile::dbase::FieldValue;
use shapefile::{PolygonRing, Shape};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::error::{FormatError, FormatResult};
use crate::models::{Feature, FeatureCollection, Geometry, Record};
use crate::projection::{CoordTransformer, Crs};

/// Files of one shapefile layer pulled out of an archive.
#[derive(Debug, Default)]
struct LayerFiles {
    shp: Option<Vec<u8>>,
    dbf: Option<Vec<u8>>,
    prj: Option<String>,
}

fn conversion<E: std::fmt::Display>(err: E) -> FormatError {
    FormatError::Conversion(err.to_string())
}

fn read_archive(bytes: &[u8]) -> FormatResult<LayerFiles> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(conversion)?;
    let mut layer = LayerFiles::default();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(conversion)?;
        let name = file.name().to_lowercase();
        if file.is_dir() || name.starts_with("__macosx/") {
            continue;
        }
        let slot = if name.ends_with(".shp") {
            &mut layer.shp
        } else if name.ends_with(".dbf") {
            &mut layer.dbf
        } else if name.ends_with(".prj") {
            if layer.prj.is_none() {
                let mut prj = String::new();
                file.read_to_string(&mut prj).map_err(conversion)?;
                layer.prj = Some(prj);
            }
            continue;
        } else {
            continue;
        };
        if slot.is_some() {
            debug!(entry = %name, "Ignoring additional shapefile layer");
            continue;
        }
        let mut data = Vec::new();
        file.read_to_end(&mut data).map_err(conversion)?;
        *slot = Some(data);
    }

    Ok(layer)
}

/// Convert a zipped shapefile into a WGS84 feature collection.
///
/// `source_crs` overrides the projection declared by the `.prj` member.
pub fn shapefile_to_geojson(
    bytes: &[u8],
    source_crs: Option<Crs>,
) -> FormatResult<FeatureCollection> {
    let layer = read_archive(bytes)?;
    let shp = layer
        .shp
        .ok_or_else(|| FormatError::Conversion("archive contains no .shp file".to_string()))?;
    let dbf = layer
        .dbf
        .ok_or_else(|| FormatError::Conversion("archive contains no .dbf file".to_string()))?;

    let shape_reader = shapefile::ShapeReader::new(Cursor::new(shp)).map_err(conversion)?;
    let dbase_reader = shapefile::dbase::Reader::new(Cursor::new(dbf)).map_err(conversion)?;
    let mut reader = shapefile::Reader::new(shape_reader, dbase_reader);

    let source_crs = source_crs.or_else(|| layer.prj.as_deref().and_then(detect_prj_crs));
    let transformer = match source_crs {
        Some(crs) if !crs.is_wgs84() => match CoordTransformer::to_wgs84(crs) {
            Ok(transformer) => Some(transformer),
            Err(err) => {
                warn!(crs = %crs, error = %err, "Keeping shapefile coordinates as-is");
                None
            }
        },
        _ => None,
    };

    let mut features = Vec::new();
    for entry in reader.iter_shapes_and_records() {
        let (shape, record) = entry.map_err(conversion)?;
        let mut geometry = shape_to_geometry(&shape);
        if let (Some(transformer), Some(geometry)) = (transformer.as_ref(), geometry.as_mut()) {
            transformer.transform_geometry(geometry).map_err(conversion)?;
        }
        features.push(Feature::new(geometry, record_to_properties(record)));
    }

    debug!(
        features = features.len(),
        reprojected = transformer.is_some(),
        "Converted shapefile"
    );
    Ok(FeatureCollection::new(features))
}

// =============================================================================
// Projection detection
// =============================================================================

static AUTHORITY_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"AUTHORITY\["EPSG",\s*"(\d+)"\]\]\s*$"#).ok());

/// Guess the EPSG code from `.prj` WKT: a trailing EPSG authority, else the
/// projection name.
pub fn detect_prj_crs(prj: &str) -> Option<Crs> {
    let prj = prj.trim();
    let from_authority = AUTHORITY_PATTERN
        .as_ref()
        .and_then(|re| re.captures(prj))
        .and_then(|captures| captures[1].parse().ok())
        .map(Crs);
    if from_authority.is_some() {
        return from_authority;
    }

    let upper = prj.to_uppercase();
    let epsg = if upper.starts_with("GEOGCS") {
        if upper.contains("ETRS") || upper.contains("ETRF") {
            4258
        } else {
            4326
        }
    } else if upper.contains("UTM") && (upper.contains("ETRS") || upper.contains("ETRF")) {
        if upper.contains("ZONE_32") || upper.contains("ZONE 32") || upper.contains("UTM32") {
            25832
        } else if upper.contains("ZONE_33") || upper.contains("ZONE 33") || upper.contains("UTM33")
        {
            25833
        } else {
            return None;
        }
    } else if upper.contains("WGS_1984_UTM_ZONE_32N") || upper.contains("WGS 84 / UTM ZONE 32N") {
        32632
    } else if upper.contains("WGS_1984_UTM_ZONE_33N") || upper.contains("WGS 84 / UTM ZONE 33N") {
        32633
    } else if upper.contains("PSEUDO") || upper.contains("AUXILIARY_SPHERE") {
        3857
    } else if upper.contains("GAUSS") || upper.contains("GK") {
        if upper.contains("ZONE_2") {
            31466
        } else if upper.contains("ZONE_3") {
            31467
        } else if upper.contains("ZONE_4") {
            31468
        } else {
            return None;
        }
    } else {
        return None;
    };
    Some(Crs(epsg))
}

// =============================================================================
// Geometry conversion
// =============================================================================

/// Point types carrying x/y.
trait PlanarPoint {
    fn xy(&self) -> [f64; 2];
}

impl PlanarPoint for shapefile::Point {
    fn xy(&self) -> [f64; 2] {
        [self.x, self.y]
    }
}

impl PlanarPoint for shapefile::PointM {
    fn xy(&self) -> [f64; 2] {
        [self.x, self.y]
    }
}

impl PlanarPoint for shapefile::PointZ {
    fn xy(&self) -> [f64; 2] {
        [self.x, self.y]
    }
}

fn geometry(kind: &str, coordinates: Value) -> Geometry {
    Geometry {
        kind: kind.to_string(),
        coordinates,
        extra: Default::default(),
    }
}

fn positions<P: PlanarPoint>(points: &[P]) -> Value {
    Value::Array(points.iter().map(|p| json!(p.xy())).collect())
}

fn point_geometry<P: PlanarPoint>(point: &P) -> Geometry {
    geometry("Point", json!(point.xy()))
}

fn multipoint_geometry<P: PlanarPoint>(points: &[P]) -> Geometry {
    geometry("MultiPoint", positions(points))
}

fn polyline_geometry<P: PlanarPoint>(parts: &[Vec<P>]) -> Geometry {
    match parts {
        [single] => geometry("LineString", positions(single)),
        _ => geometry(
            "MultiLineString",
            Value::Array(parts.iter().map(|part| positions(part)).collect()),
        ),
    }
}

/// Each outer ring starts a polygon; inner rings are holes of the preceding one.
fn polygon_geometry<P: PlanarPoint>(rings: &[PolygonRing<P>]) -> Geometry {
    let mut polygons: Vec<Vec<Value>> = Vec::new();
    for ring in rings {
        match ring {
            PolygonRing::Outer(points) => polygons.push(vec![positions(points)]),
            PolygonRing::Inner(points) => match polygons.last_mut() {
                Some(polygon) => polygon.push(positions(points)),
                None => polygons.push(vec![positions(points)]),
            },
        }
    }
    match polygons.len() {
        1 => geometry("Polygon", Value::Array(polygons.remove(0))),
        _ => geometry(
            "MultiPolygon",
            Value::Array(polygons.into_iter().map(Value::Array).collect()),
        ),
    }
}

fn shape_to_geometry(shape: &Shape) -> Option<Geometry> {
    let geometry = match shape {
        Shape::NullShape => return None,
        Shape::Point(p) => point_geometry(p),
        Shape::PointM(p) => point_geometry(p),
        Shape::PointZ(p) => point_geometry(p),
        Shape::Multipoint(m) => multipoint_geometry(m.points()),
        Shape::MultipointM(m) => multipoint_geometry(m.points()),
        Shape::MultipointZ(m) => multipoint_geometry(m.points()),
        Shape::Polyline(l) => polyline_geometry(l.parts()),
        Shape::PolylineM(l) => polyline_geometry(l.parts()),
        Shape::PolylineZ(l) => polyline_geometry(l.parts()),
        Shape::Polygon(p) => polygon_geometry(p.rings()),
        Shape::PolygonM(p) => polygon_geometry(p.rings()),
        Shape::PolygonZ(p) => polygon_geometry(p.rings()),
        #[allow(unreachable_patterns)]
        _ => {
            debug!("Skipping unsupported shape type");
            return None;
        }
    };
    Some(geometry)
}

// =============================================================================
// Attributes
// =============================================================================

fn field_value_to_json(value: FieldValue) -> Value {
    match value {
        FieldValue::Character(Some(s)) => Value::String(s.trim_end().to_string()),
        FieldValue::Numeric(Some(n)) => json!(n),
        FieldValue::Float(Some(f)) => json!(f),
        FieldValue::Logical(Some(b)) => Value::Bool(b),
        FieldValue::Integer(i) => json!(i),
        FieldValue::Double(d) => json!(d),
        FieldValue::Currency(c) => json!(c),
        FieldValue::Memo(s) => Value::String(s),
        FieldValue::Date(Some(d)) => {
            Value::String(format!("{:04}-{:02}-{:02}", d.year(), d.month(), d.day()))
        }
        FieldValue::Character(None)
        | FieldValue::Numeric(None)
        | FieldValue::Float(None)
        | FieldValue::Logical(None)
        | FieldValue::Date(None) => Value::Null,
        #[allow(unreachable_patterns)]
        other => Value::String(format!("{:?}", other)),
    }
}

/// dBASE record to properties, ordered by field name.
fn record_to_properties(record: shapefile::dbase::Record) -> Record {
    let fields: HashMap<String, FieldValue> = record.into();
    let mut fields: Vec<(String, FieldValue)> = fields.into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));
    fields
        .into_iter()
        .map(|(name, value)| (name, field_value_to_json(value)))
        .collect()
}
