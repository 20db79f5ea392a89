//! Site geometry: persisted polygon shape and conversion to map shapes.
//!
//! # Responsibility
//! - Define the persisted single-ring polygon (`SitePolygon`) and its
//!   GeoJSON wire shape.
//! - Convert between persisted polygons and drawing-library shapes.
//!
//! # Invariants
//! - A `SitePolygon` always holds exactly one closed ring of >= 4 points.
//! - Persisted coordinates are `[longitude, latitude]`; map shapes are lat-first.

pub mod codec;
pub mod polygon;
