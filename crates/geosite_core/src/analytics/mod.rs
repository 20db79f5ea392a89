//! Analytics history projections for chart consumption.

pub mod series;
