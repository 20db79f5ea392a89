//! Core domain logic for GeoSite.
//! This crate is the single source of truth for site lifecycle, geometry and
//! map-session invariants.

pub mod analytics;
pub mod config;
pub mod db;
pub mod draw;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod map;
pub mod model;
pub mod repo;
pub mod service;

pub use analytics::series::{
    build_series, latest, summary, AnalyticsSeries, SeriesPoint, SiteSummary,
};
pub use config::{ConfigError, CoreConfig, MapConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use draw::session::{
    DrawEvent, DrawEventKind, DrawSessionError, DrawingSessionController, SessionOutcome,
    SessionPhase, SessionTransition,
};
pub use error::{Classify, ErrorKind, Notification};
pub use geometry::codec::{
    area_hectares, compute_bounds, compute_extent, from_renderable, is_closed_ring,
    to_renderable, LatLng, RenderShape, ShapeKind,
};
pub use geometry::polygon::{Bounds, GeometryError, LonLat, PolygonGeometry, SitePolygon};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status};
pub use map::backend::{ContainerId, EventKind, MapBackend, MapBackendError, ViewState};
pub use map::headless::HeadlessMapBackend;
pub use map::surface::{AttachOutcome, MapSurfaceManager, SurfaceError, SurfaceHandle};
pub use map::view::{SiteMapView, ViewEvent};
pub use model::analytics::{AnalyticsRecord, NewAnalyticsRecord};
pub use model::project::{OwnerId, Project, ProjectId, ProjectList};
pub use model::site::{Site, SiteDetail, SiteId, SiteMetrics, SiteUpdate};
pub use repo::analytics_repo::{AnalyticsRepository, SqliteAnalyticsRepository};
pub use repo::project_repo::{ProjectRepository, SqliteProjectRepository};
pub use repo::site_repo::{SiteRepository, SqliteSiteRepository};
pub use repo::{EntityRef, RepoError, RepoResult};
pub use service::site_service::{SiteDraft, SiteLifecycleService, SiteServiceError};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
