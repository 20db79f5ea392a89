//! Persisted polygon model and GeoJSON wire shape.
//!
//! # Invariants
//! - Only `"type": "Polygon"` with exactly one ring is accepted.
//! - The ring is closed (first point equals last point) and has >= 4 points.
//! - Coordinates are finite and inside WGS84 ranges.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Smallest closed ring: three distinct vertices plus the closing point.
pub const MIN_RING_POINTS: usize = 4;

const POLYGON_TYPE: &str = "Polygon";

/// Errors raised when a shape cannot become a site polygon.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// Wire `type` is something other than `Polygon`.
    UnsupportedType(String),
    /// Map shape is not a polygon (marker, polyline, circle, ...).
    NotAPolygon(&'static str),
    /// Holes and multi-polygons are unsupported.
    RingCount(usize),
    /// Closed ring has fewer than `MIN_RING_POINTS` points, counting only
    /// distinct vertices plus the closing point.
    TooFewPoints(usize),
    /// First and last point differ.
    RingNotClosed,
    /// Coordinate at `index` is non-finite or outside WGS84 ranges.
    CoordinateOutOfRange { index: usize },
    /// JSON could not be decoded into the wire shape.
    Malformed(String),
}

impl Display for GeometryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedType(kind) => {
                write!(f, "unsupported geometry type `{kind}`; expected Polygon")
            }
            Self::NotAPolygon(kind) => write!(f, "shape `{kind}` is not a polygon"),
            Self::RingCount(count) => {
                write!(f, "polygon must have exactly one ring, got {count}")
            }
            Self::TooFewPoints(count) => write!(
                f,
                "ring must have at least {MIN_RING_POINTS} points, got {count}"
            ),
            Self::RingNotClosed => write!(f, "ring is not closed"),
            Self::CoordinateOutOfRange { index } => {
                write!(f, "coordinate {index} is outside WGS84 range")
            }
            Self::Malformed(message) => write!(f, "malformed geometry: {message}"),
        }
    }
}

impl Error for GeometryError {}

/// One `(longitude, latitude)` position, serialized as `[lon, lat]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

impl LonLat {
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    fn is_valid(&self) -> bool {
        self.lon.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lon)
            && (-90.0..=90.0).contains(&self.lat)
    }
}

impl From<[f64; 2]> for LonLat {
    fn from(value: [f64; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

impl From<LonLat> for [f64; 2] {
    fn from(value: LonLat) -> Self {
        [value.lon, value.lat]
    }
}

/// GeoJSON polygon wire shape exchanged with the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<Vec<LonLat>>,
}

/// Validated single-ring closed polygon owned by a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PolygonGeometry", into = "PolygonGeometry")]
pub struct SitePolygon {
    ring: Vec<LonLat>,
}

impl SitePolygon {
    /// Validates and wraps a closed ring.
    pub fn new(ring: Vec<LonLat>) -> Result<Self, GeometryError> {
        if let Some(index) = ring.iter().position(|point| !point.is_valid()) {
            return Err(GeometryError::CoordinateOutOfRange { index });
        }
        if ring.len() < MIN_RING_POINTS {
            return Err(GeometryError::TooFewPoints(ring.len()));
        }
        if !is_closed(&ring) {
            return Err(GeometryError::RingNotClosed);
        }
        let distinct = distinct_vertices(&ring[..ring.len() - 1]);
        if distinct + 1 < MIN_RING_POINTS {
            return Err(GeometryError::TooFewPoints(distinct + 1));
        }
        Ok(Self { ring })
    }

    /// Validates a wire geometry: type, ring count, then the ring itself.
    pub fn from_geometry(geometry: PolygonGeometry) -> Result<Self, GeometryError> {
        if geometry.kind != POLYGON_TYPE {
            return Err(GeometryError::UnsupportedType(geometry.kind));
        }
        let mut rings = geometry.coordinates;
        if rings.len() != 1 {
            return Err(GeometryError::RingCount(rings.len()));
        }
        Self::new(rings.remove(0))
    }

    /// Decodes arbitrary GeoJSON, checking `type` before coordinate depth so a
    /// MultiPolygon reports `UnsupportedType` rather than a decode error.
    pub fn from_geojson_value(value: &serde_json::Value) -> Result<Self, GeometryError> {
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| GeometryError::Malformed("missing `type`".to_string()))?;
        if kind != POLYGON_TYPE {
            return Err(GeometryError::UnsupportedType(kind.to_string()));
        }
        let geometry = PolygonGeometry::deserialize(value)
            .map_err(|err| GeometryError::Malformed(err.to_string()))?;
        Self::from_geometry(geometry)
    }

    /// Decodes a GeoJSON polygon from text.
    pub fn from_geojson_str(text: &str) -> Result<Self, GeometryError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|err| GeometryError::Malformed(err.to_string()))?;
        Self::from_geojson_value(&value)
    }

    /// Closed ring, first point repeated at the end.
    pub fn ring(&self) -> &[LonLat] {
        &self.ring
    }

    /// Number of distinct vertices (closing point excluded).
    pub fn vertex_count(&self) -> usize {
        self.ring.len() - 1
    }

    pub fn to_geometry(&self) -> PolygonGeometry {
        PolygonGeometry {
            kind: POLYGON_TYPE.to_string(),
            coordinates: vec![self.ring.clone()],
        }
    }

    pub fn to_geojson_string(&self) -> String {
        // Serializing plain f64 arrays cannot fail.
        serde_json::to_string(&self.to_geometry()).unwrap_or_default()
    }
}

impl TryFrom<PolygonGeometry> for SitePolygon {
    type Error = GeometryError;

    fn try_from(value: PolygonGeometry) -> Result<Self, Self::Error> {
        Self::from_geometry(value)
    }
}

impl From<SitePolygon> for PolygonGeometry {
    fn from(value: SitePolygon) -> Self {
        value.to_geometry()
    }
}

/// Axis-aligned longitude/latitude box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Bounds {
    /// Smallest box containing both inputs.
    pub fn union(self, other: Bounds) -> Bounds {
        Bounds {
            min_lon: self.min_lon.min(other.min_lon),
            min_lat: self.min_lat.min(other.min_lat),
            max_lon: self.max_lon.max(other.max_lon),
            max_lat: self.max_lat.max(other.max_lat),
        }
    }

    pub fn contains(&self, point: LonLat) -> bool {
        (self.min_lon..=self.max_lon).contains(&point.lon)
            && (self.min_lat..=self.max_lat).contains(&point.lat)
    }

    pub fn center(&self) -> LonLat {
        LonLat::new(
            (self.min_lon + self.max_lon) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }
}

fn distinct_vertices(points: &[LonLat]) -> usize {
    points
        .iter()
        .enumerate()
        .filter(|(index, point)| !points[..*index].contains(point))
        .count()
}

pub(crate) fn is_closed(ring: &[LonLat]) -> bool {
    match (ring.first(), ring.last()) {
        (Some(first), Some(last)) => ring.len() > 1 && first == last,
        _ => false,
    }
}
