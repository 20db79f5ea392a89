//! Site domain model.
//!
//! # Invariants
//! - `polygon` is always a validated single closed ring.
//! - `biodiversity_score` lies in `[0, 100]`; `carbon_sequestration_tonnes`
//!   is finite and non-negative.

use crate::geometry::polygon::SitePolygon;
use crate::model::analytics::AnalyticsRecord;
use crate::model::project::ProjectId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type SiteId = Uuid;

/// Free-form site metadata mapping.
pub type SiteMetadata = serde_json::Map<String, serde_json::Value>;

pub const BIODIVERSITY_MIN: f64 = 0.0;
pub const BIODIVERSITY_MAX: f64 = 100.0;

/// Site read model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub project_id: ProjectId,
    pub name: String,
    #[serde(rename = "geometry")]
    pub polygon: SitePolygon,
    pub area_hectares: Option<f64>,
    pub carbon_sequestration_tonnes: f64,
    pub biodiversity_score: f64,
    pub metadata: Option<SiteMetadata>,
    /// Epoch ms.
    pub created_at: i64,
    /// Epoch ms.
    pub updated_at: i64,
}

/// Site together with its (unordered) analytics history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteDetail {
    pub site: Site,
    pub analytics: Vec<AnalyticsRecord>,
}

/// Snapshot metric values supplied at creation time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SiteMetrics {
    pub carbon_sequestration_tonnes: Option<f64>,
    pub biodiversity_score: Option<f64>,
}

/// Fully resolved insert payload handed to the repository.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSite {
    pub id: SiteId,
    pub project_id: ProjectId,
    pub name: String,
    pub polygon: SitePolygon,
    pub area_hectares: Option<f64>,
    pub carbon_sequestration_tonnes: f64,
    pub biodiversity_score: f64,
    pub metadata: Option<SiteMetadata>,
}

/// Partial descriptive update. Geometry is immutable after creation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteUpdate {
    pub name: Option<String>,
    pub area_hectares: Option<f64>,
    pub metadata: Option<SiteMetadata>,
}

impl SiteUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.area_hectares.is_none() && self.metadata.is_none()
    }
}
