//! Coordinate reprojection into WGS84.
//!
//! Only point geometries (and their 4-element bboxes) are reprojected when a
//! collection is normalised; everything else passes through. After projecting, a
//! point whose axes look swapped is swapped back, and points outside the
//! [`Envelope`] are dropped.

use once_cell::sync::Lazy;
use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::{ProjectionError, ProjectionResult};
use crate::models::{FeatureCollection, Geometry};

pub const EPSG_WGS84: u32 = 4326;

/// Proj definitions for every CRS we can reproject from.
const PROJ_DEFINITIONS: &[(u32, &str)] = &[
    (4326, "+proj=longlat +datum=WGS84 +no_defs"),
    (4258, "+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs"),
    (
        3857,
        "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +nadgrids=@null +no_defs",
    ),
    (25832, "+proj=utm +zone=32 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs"),
    (25833, "+proj=utm +zone=33 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs"),
    (32632, "+proj=utm +zone=32 +datum=WGS84 +units=m +no_defs"),
    (32633, "+proj=utm +zone=33 +datum=WGS84 +units=m +no_defs"),
    (
        31466,
        "+proj=tmerc +lat_0=0 +lon_0=6 +k=1 +x_0=2500000 +y_0=0 +ellps=bessel +towgs84=598.1,73.7,418.2,0.202,0.045,-2.455,6.7 +units=m +no_defs",
    ),
    (
        31467,
        "+proj=tmerc +lat_0=0 +lon_0=9 +k=1 +x_0=3500000 +y_0=0 +ellps=bessel +towgs84=598.1,73.7,418.2,0.202,0.045,-2.455,6.7 +units=m +no_defs",
    ),
    (
        31468,
        "+proj=tmerc +lat_0=0 +lon_0=12 +k=1 +x_0=4500000 +y_0=0 +ellps=bessel +towgs84=598.1,73.7,418.2,0.202,0.045,-2.455,6.7 +units=m +no_defs",
    ),
];

/// Proj string for a supported EPSG code.
pub fn proj_definition(epsg: u32) -> Option<&'static str> {
    PROJ_DEFINITIONS
        .iter()
        .find(|(code, _)| *code == epsg)
        .map(|(_, definition)| *definition)
}

fn is_geographic(epsg: u32) -> bool {
    matches!(epsg, 4326 | 4258)
}

// =============================================================================
// CRS identifiers
// =============================================================================

static EPSG_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)^(?:urn:ogc:def:crs:)?EPSG:+(?:[\d.]+:)?(\d+)$").ok());

/// A coordinate reference system identified by its EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs(pub u32);

impl Crs {
    pub const WGS84: Crs = Crs(EPSG_WGS84);

    /// Parse `EPSG:25832`, `urn:ogc:def:crs:EPSG::25832`, `CRS84`, `WGS84` or a bare code.
    pub fn parse(identifier: &str) -> ProjectionResult<Self> {
        let trimmed = identifier.trim();
        let upper = trimmed.to_uppercase();
        if upper == "WGS84" || upper.ends_with("CRS84") {
            return Ok(Crs::WGS84);
        }
        let code = EPSG_PATTERN
            .as_ref()
            .and_then(|re| re.captures(trimmed))
            .and_then(|captures| captures[1].parse().ok());
        if let Some(code) = code {
            return Ok(Crs(code));
        }
        trimmed
            .parse::<u32>()
            .map(Crs)
            .map_err(|_| ProjectionError::UnsupportedCrs(identifier.to_string()))
    }

    pub fn epsg(&self) -> u32 {
        self.0
    }

    pub fn is_wgs84(&self) -> bool {
        self.0 == EPSG_WGS84
    }
}

impl FromStr for Crs {
    type Err = ProjectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Crs::parse(s)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// Lon/lat box reprojected points must fall into. Defaults to Schleswig-Holstein
/// and its surroundings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            min_lon: 5.9,
            min_lat: 47.2,
            max_lon: 15.0,
            max_lat: 55.1,
        }
    }
}

impl Envelope {
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        (self.min_lon..=self.max_lon).contains(&lon) && (self.min_lat..=self.max_lat).contains(&lat)
    }
}

impl FromStr for Envelope {
    type Err = String;

    /// `min_lon,min_lat,max_lon,max_lat`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("'{}': {}", s, e))?;
        match values.as_slice() {
            [min_lon, min_lat, max_lon, max_lat] if min_lon <= max_lon && min_lat <= max_lat => {
                Ok(Self {
                    min_lon: *min_lon,
                    min_lat: *min_lat,
                    max_lon: *max_lon,
                    max_lat: *max_lat,
                })
            }
            _ => Err(format!(
                "'{}': expected min_lon,min_lat,max_lon,max_lat with min <= max",
                s
            )),
        }
    }
}

/// Swap `(x, y)` when only the swapped pair lies inside the envelope.
///
/// Applying it twice gives the same result as applying it once.
pub fn swap_if_needed(x: f64, y: f64, envelope: &Envelope) -> (f64, f64) {
    if !envelope.contains(x, y) && envelope.contains(y, x) {
        (y, x)
    } else {
        (x, y)
    }
}

// =============================================================================
// Transformer
// =============================================================================

/// Source CRS to WGS84 for single coordinates.
pub struct CoordTransformer {
    source: Crs,
    source_proj: Proj,
    target_proj: Proj,
}

impl fmt::Debug for CoordTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordTransformer")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl CoordTransformer {
    pub fn to_wgs84(source: Crs) -> ProjectionResult<Self> {
        let source_definition = proj_definition(source.epsg())
            .ok_or_else(|| ProjectionError::UnsupportedCrs(source.to_string()))?;
        let target_definition = proj_definition(EPSG_WGS84)
            .ok_or_else(|| ProjectionError::UnsupportedCrs(Crs::WGS84.to_string()))?;

        let source_proj = Proj::from_proj_string(source_definition).map_err(|e| {
            ProjectionError::InvalidDefinition {
                crs: source.to_string(),
                message: format!("{:?}", e),
            }
        })?;
        let target_proj = Proj::from_proj_string(target_definition).map_err(|e| {
            ProjectionError::InvalidDefinition {
                crs: Crs::WGS84.to_string(),
                message: format!("{:?}", e),
            }
        })?;

        Ok(Self {
            source,
            source_proj,
            target_proj,
        })
    }

    /// Project one coordinate to `(lon, lat)` in degrees.
    pub fn transform(&self, x: f64, y: f64) -> ProjectionResult<(f64, f64)> {
        if self.source.is_wgs84() {
            return Ok((x, y));
        }
        // proj4rs works in radians for geographic systems
        let mut point = if is_geographic(self.source.epsg()) {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        transform(&self.source_proj, &self.target_proj, &mut point)
            .map_err(|e| ProjectionError::Transform(format!("({}, {}): {:?}", x, y, e)))?;
        let (lon, lat) = (point.0.to_degrees(), point.1.to_degrees());
        if lon.is_finite() && lat.is_finite() {
            Ok((lon, lat))
        } else {
            Err(ProjectionError::Transform(format!(
                "({}, {}) projected to a non-finite value",
                x, y
            )))
        }
    }

    /// Project every vertex of a geometry, at any nesting depth.
    pub fn transform_geometry(&self, geometry: &mut Geometry) -> ProjectionResult<()> {
        self.transform_coordinates(&mut geometry.coordinates)
    }

    fn transform_coordinates(&self, value: &mut Value) -> ProjectionResult<()> {
        let Value::Array(items) = value else {
            return Ok(());
        };
        let is_position = items.len() >= 2 && items.iter().all(Value::is_number);
        if is_position {
            let (x, y) = match (items[0].as_f64(), items[1].as_f64()) {
                (Some(x), Some(y)) => (x, y),
                _ => return Ok(()),
            };
            let (lon, lat) = self.transform(x, y)?;
            items[0] = Value::from(lon);
            items[1] = Value::from(lat);
            return Ok(());
        }
        for item in items.iter_mut() {
            self.transform_coordinates(item)?;
        }
        Ok(())
    }
}

// =============================================================================
// Collection reprojection
// =============================================================================

/// Reprojects point collections to WGS84 and filters them against an envelope.
#[derive(Debug, Clone, Default)]
pub struct CoordinateReprojector {
    envelope: Envelope,
}

impl CoordinateReprojector {
    pub fn new(envelope: Envelope) -> Self {
        Self { envelope }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Reproject from a CRS named by string. Unknown or unsupported identifiers are
    /// logged and the collection is returned untouched.
    pub fn reproject_named(&self, collection: FeatureCollection, crs: &str) -> FeatureCollection {
        match Crs::parse(crs) {
            Ok(source) => self.reproject(collection, source),
            Err(err) => {
                warn!(crs, error = %err, "Skipping reprojection");
                collection
            }
        }
    }

    /// Reproject from `source`; an unsupported CRS passes the collection through.
    pub fn reproject(&self, collection: FeatureCollection, source: Crs) -> FeatureCollection {
        if source.is_wgs84() {
            return collection;
        }
        match self.try_reproject(collection.clone(), source) {
            Ok(reprojected) => reprojected,
            Err(err) => {
                warn!(crs = %source, error = %err, "Skipping reprojection");
                collection
            }
        }
    }

    /// Reproject from `source`, failing if the CRS is unsupported.
    pub fn try_reproject(
        &self,
        mut collection: FeatureCollection,
        source: Crs,
    ) -> ProjectionResult<FeatureCollection> {
        if source.is_wgs84() {
            return Ok(collection);
        }
        let transformer = CoordTransformer::to_wgs84(source)?;
        let before = collection.features.len();

        collection.features.retain_mut(|feature| {
            let Some((x, y)) = feature.point_coordinates() else {
                return true;
            };
            let (lon, lat) = match transformer.transform(x, y) {
                Ok(projected) => swap_if_needed(projected.0, projected.1, &self.envelope),
                Err(err) => {
                    debug!(error = %err, "Dropping point that failed to project");
                    return false;
                }
            };
            if !self.envelope.contains(lon, lat) {
                return false;
            }
            if let Some(geometry) = feature.geometry.as_mut() {
                geometry.set_point_coordinates(lon, lat);
            }
            if let Some(bbox) = feature.bbox.as_mut() {
                if bbox.len() == 4 {
                    if let (Ok(min), Ok(max)) = (
                        transformer.transform(bbox[0], bbox[1]),
                        transformer.transform(bbox[2], bbox[3]),
                    ) {
                        let min = swap_if_needed(min.0, min.1, &self.envelope);
                        let max = swap_if_needed(max.0, max.1, &self.envelope);
                        *bbox = vec![min.0, min.1, max.0, max.1];
                    }
                }
            }
            true
        });

        let dropped = before - collection.features.len();
        if dropped > 0 {
            debug!(crs = %source, dropped, "Dropped points outside the envelope");
        }
        collection.crs = None;
        Ok(collection)
    }
}
