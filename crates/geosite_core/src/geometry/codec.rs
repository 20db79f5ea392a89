//! Conversion between persisted polygons and drawing-library shapes.
//!
//! # Responsibility
//! - Map `SitePolygon` rings to open, lat-first `RenderShape` rings and back.
//! - Compute bounding boxes used for viewport fitting.
//! - Compute geodesic site area.
//!
//! # Invariants
//! - `from_renderable(&to_renderable(p)) == Ok(p)` for every valid polygon.
//! - Native rings never repeat their first vertex.

use crate::geometry::polygon::{is_closed, Bounds, GeometryError, LonLat, SitePolygon};
use geo::{BoundingRect, Coord, GeodesicArea, LineString, Polygon};
use serde::{Deserialize, Serialize};

const SQUARE_METERS_PER_HECTARE: f64 = 10_000.0;

/// Lat-first position as used by the map library.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl From<LonLat> for LatLng {
    fn from(value: LonLat) -> Self {
        Self::new(value.lat, value.lon)
    }
}

impl From<LatLng> for LonLat {
    fn from(value: LatLng) -> Self {
        LonLat::new(value.lng, value.lat)
    }
}

/// Shape kinds the drawing tool can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Polygon,
    MultiPolygon,
    Polyline,
    Marker,
    Circle,
}

impl ShapeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Polygon => "polygon",
            Self::MultiPolygon => "multi_polygon",
            Self::Polyline => "polyline",
            Self::Marker => "marker",
            Self::Circle => "circle",
        }
    }

    /// Only single polygons are captured by drawing sessions; every other
    /// kind is dropped.
    pub fn is_capturable(self) -> bool {
        matches!(self, Self::Polygon)
    }
}

/// Native shape representation of the map/drawing library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RenderShape {
    /// Open rings; the first ring is the outline, further rings are holes.
    Polygon { rings: Vec<Vec<LatLng>> },
    MultiPolygon { polygons: Vec<Vec<Vec<LatLng>>> },
    Polyline { points: Vec<LatLng> },
    Marker { at: LatLng },
    Circle { center: LatLng, radius_m: f64 },
}

impl RenderShape {
    pub fn kind(&self) -> ShapeKind {
        match self {
            Self::Polygon { .. } => ShapeKind::Polygon,
            Self::MultiPolygon { .. } => ShapeKind::MultiPolygon,
            Self::Polyline { .. } => ShapeKind::Polyline,
            Self::Marker { .. } => ShapeKind::Marker,
            Self::Circle { .. } => ShapeKind::Circle,
        }
    }
}

/// Converts a persisted polygon to the map library's open, lat-first ring.
pub fn to_renderable(polygon: &SitePolygon) -> RenderShape {
    let ring = polygon.ring();
    let open = &ring[..ring.len() - 1];
    RenderShape::Polygon {
        rings: vec![open.iter().copied().map(LatLng::from).collect()],
    }
}

/// Converts a drawn or rendered shape back into a persisted polygon.
///
/// # Errors
/// - `NotAPolygon` for markers, polylines and circles.
/// - `RingCount` for multi-polygons and polygons with holes.
/// - `TooFewPoints` when the closed ring would have fewer than 3 distinct
///   vertices plus the closing point.
///
/// A ring the library already closed has its repeated last vertex dropped
/// before closing.
pub fn from_renderable(shape: &RenderShape) -> Result<SitePolygon, GeometryError> {
    let rings = match shape {
        RenderShape::Polygon { rings } => rings,
        RenderShape::MultiPolygon { polygons } => {
            let ring_count = polygons.iter().map(Vec::len).sum();
            return Err(GeometryError::RingCount(ring_count));
        }
        other => return Err(GeometryError::NotAPolygon(other.kind().as_str())),
    };
    let [ring] = rings.as_slice() else {
        return Err(GeometryError::RingCount(rings.len()));
    };
    let Some(first) = ring.first() else {
        return Err(GeometryError::TooFewPoints(0));
    };
    let open = match ring.split_last() {
        Some((last, rest)) if !rest.is_empty() && last == first => rest,
        _ => ring.as_slice(),
    };

    let mut closed: Vec<LonLat> = open.iter().copied().map(LonLat::from).collect();
    closed.push(LonLat::from(*first));
    SitePolygon::new(closed)
}

/// Returns whether `ring` is closed (first point equals last point).
pub fn is_closed_ring(ring: &[LonLat]) -> bool {
    is_closed(ring)
}

/// Axis-aligned bounds of one polygon.
pub fn compute_bounds(polygon: &SitePolygon) -> Bounds {
    match to_geo(polygon).bounding_rect() {
        Some(rect) => Bounds {
            min_lon: rect.min().x,
            min_lat: rect.min().y,
            max_lon: rect.max().x,
            max_lat: rect.max().y,
        },
        // Unreachable for validated polygons; fall back to the first vertex.
        None => {
            let first = polygon.ring()[0];
            Bounds {
                min_lon: first.lon,
                min_lat: first.lat,
                max_lon: first.lon,
                max_lat: first.lat,
            }
        }
    }
}

/// Bounds enclosing every polygon, or `None` for an empty set.
///
/// Callers fall back to the default world view on `None`.
pub fn compute_extent<'a>(polygons: impl IntoIterator<Item = &'a SitePolygon>) -> Option<Bounds> {
    polygons
        .into_iter()
        .map(compute_bounds)
        .reduce(Bounds::union)
}

/// Geodesic area of the polygon in hectares.
pub fn area_hectares(polygon: &SitePolygon) -> f64 {
    to_geo(polygon).geodesic_area_unsigned() / SQUARE_METERS_PER_HECTARE
}

fn to_geo(polygon: &SitePolygon) -> Polygon<f64> {
    let exterior: LineString<f64> = polygon
        .ring()
        .iter()
        .map(|point| Coord {
            x: point.lon,
            y: point.lat,
        })
        .collect();
    Polygon::new(exterior, vec![])
}
