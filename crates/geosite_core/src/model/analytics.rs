//! Analytics time-series record.
//!
//! Records are immutable once written; core only reads and orders them.

use crate::model::site::SiteId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type AnalyticsRecordId = Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub id: AnalyticsRecordId,
    pub site_id: SiteId,
    /// Calendar date the measurements describe. Not unique per site.
    pub date: NaiveDate,
    pub carbon_sequestration_tonnes: f64,
    pub biodiversity_score: f64,
    pub tree_count: i64,
    pub vegetation_cover_percentage: f64,
    pub soil_carbon_percentage: f64,
    /// Epoch ms.
    pub created_at: i64,
}

/// Measurements for a new record; identity and timestamps are assigned on insert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewAnalyticsRecord {
    pub date: NaiveDate,
    pub carbon_sequestration_tonnes: f64,
    pub biodiversity_score: f64,
    pub tree_count: i64,
    pub vegetation_cover_percentage: f64,
    pub soil_carbon_percentage: f64,
}
