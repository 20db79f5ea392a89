//! FFI use-case API for Flutter-facing calls.
//!
//! # Responsibility
//! - Expose project/site lifecycle and analytics series to Dart via FRB.
//! - Flatten core errors into envelopes carrying a stable `error_kind`.
//!
//! # Invariants
//! - Exported functions must not panic across FFI boundary.
//! - Every call acts on behalf of the `owner_id` it receives; foreign
//!   projects and sites are reported as `not_found`.
//! - Geometry crosses the boundary as GeoJSON polygon text.

use chrono::NaiveDate;
use geosite_core::{
    build_series, core_version as core_version_inner, init_logging as init_logging_inner,
    latest, open_db, ping as ping_inner, AnalyticsRepository, Classify, CoreConfig,
    NewAnalyticsRecord, Project, SeriesPoint, Site, SiteLifecycleService, SiteMetrics,
    SitePolygon, SiteServiceError, SiteUpdate, SqliteAnalyticsRepository,
    SqliteProjectRepository, SqliteSiteRepository,
};
use log::warn;
use std::path::PathBuf;
use std::sync::OnceLock;
use uuid::Uuid;

const FFI_DB_FILE_NAME: &str = "geosite_ffi.sqlite3";
const DATE_FORMAT: &str = "%Y-%m-%d";
static FFI_DB_PATH: OnceLock<PathBuf> = OnceLock::new();

type SqliteSiteService<'conn> =
    SiteLifecycleService<SqliteProjectRepository<'conn>, SqliteSiteRepository<'conn>>;

/// Minimal health-check API for FRB smoke integration.
///
/// # FFI contract
/// - Sync call, non-blocking.
/// - Never throws; always returns a UTF-8 string.
#[flutter_rust_bridge::frb(sync)]
pub fn ping() -> String {
    ping_inner().to_owned()
}

/// Expose core crate version through FFI.
#[flutter_rust_bridge::frb(sync)]
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes Rust core logging once per process.
///
/// Input semantics:
/// - `level`: one of `trace|debug|info|warn|error` (case-insensitive).
/// - `log_dir`: absolute directory path where rolling logs are written.
///
/// # FFI contract
/// - Safe to call repeatedly with the same `level + log_dir`.
/// - Never panics; returns empty string on success and error message on failure.
#[flutter_rust_bridge::frb(sync)]
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err,
    }
}

/// Project projection returned to Dart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectItem {
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub site_count: u32,
    pub created_at_ms: i64,
}

/// Site projection returned to Dart.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteItem {
    pub site_id: String,
    pub project_id: String,
    pub name: String,
    /// GeoJSON polygon text.
    pub geometry: String,
    pub area_hectares: Option<f64>,
    pub carbon_sequestration_tonnes: f64,
    pub biodiversity_score: f64,
}

/// Generic action response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResponse {
    pub ok: bool,
    /// Stable error classification (`invalid_geometry|not_found|...`).
    pub error_kind: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectResponse {
    pub ok: bool,
    pub project: Option<ProjectItem>,
    pub error_kind: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectListResponse {
    pub ok: bool,
    pub items: Vec<ProjectItem>,
    /// Owner's total project count, independent of paging.
    pub total: u32,
    pub error_kind: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SiteResponse {
    pub ok: bool,
    pub site: Option<SiteItem>,
    pub error_kind: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SiteListResponse {
    pub ok: bool,
    pub items: Vec<SiteItem>,
    pub error_kind: Option<String>,
    pub message: String,
}

/// Chart-ready analytics series; every vector shares the `dates` axis.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesResponse {
    pub ok: bool,
    pub dates: Vec<String>,
    pub carbon: Vec<f64>,
    pub biodiversity: Vec<f64>,
    pub tree_count: Vec<f64>,
    pub vegetation_cover: Vec<f64>,
    pub soil_carbon: Vec<f64>,
    /// Date of the latest record; `None` hides the summary panel.
    pub latest_date: Option<String>,
    pub error_kind: Option<String>,
    pub message: String,
}

/// Failure flattened for envelopes.
struct FfiFailure {
    kind: Option<&'static str>,
    message: String,
}

impl FfiFailure {
    fn plain(message: impl Into<String>) -> Self {
        Self {
            kind: None,
            message: message.into(),
        }
    }

    fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            kind: Some("invalid_input"),
            message: message.into(),
        }
    }

    fn logged(self, operation: &str) -> Self {
        warn!(
            "event=ffi_call module=ffi status=error op={} kind={}",
            operation,
            self.kind.unwrap_or("internal")
        );
        self
    }
}

impl From<SiteServiceError> for FfiFailure {
    fn from(value: SiteServiceError) -> Self {
        Self {
            kind: Some(value.kind().as_str()),
            message: value.to_string(),
        }
    }
}

/// Creates a project owned by `owner_id`.
#[flutter_rust_bridge::frb(sync)]
pub fn project_create(
    owner_id: String,
    name: String,
    description: Option<String>,
) -> ProjectResponse {
    let result = with_site_service(&owner_id, |service| {
        Ok(service.create_project(&name, description.as_deref())?)
    });
    project_response("project_create", "Project created.", result)
}

/// Pages the owner's projects. `limit` of `None` or `0` selects the default.
#[flutter_rust_bridge::frb(sync)]
pub fn project_list(
    owner_id: String,
    offset: Option<u32>,
    limit: Option<u32>,
) -> ProjectListResponse {
    let result = with_site_service(&owner_id, |service| {
        Ok(service.list_projects(offset.unwrap_or(0), limit.unwrap_or(0))?)
    });
    match result {
        Ok(list) => ProjectListResponse {
            ok: true,
            message: format!("Found {} project(s).", list.projects.len()),
            items: list.projects.into_iter().map(to_project_item).collect(),
            total: list.total,
            error_kind: None,
        },
        Err(failure) => ProjectListResponse {
            error_kind: failure.kind.map(str::to_string),
            message: format!(
                "project_list failed: {}",
                failure.logged("project_list").message
            ),
            ok: false,
            items: Vec::new(),
            total: 0,
        },
    }
}

#[flutter_rust_bridge::frb(sync)]
pub fn project_rename(owner_id: String, project_id: String, name: String) -> ProjectResponse {
    let result = with_site_service(&owner_id, |service| {
        let project_id = parse_id(&project_id, "project_id")?;
        Ok(service.rename_project(project_id, &name)?)
    });
    project_response("project_rename", "Project renamed.", result)
}

/// Deletes a project with all its sites and their analytics.
#[flutter_rust_bridge::frb(sync)]
pub fn project_delete(owner_id: String, project_id: String) -> ActionResponse {
    let result = with_site_service(&owner_id, |service| {
        let project_id = parse_id(&project_id, "project_id")?;
        Ok(service.delete_project(project_id)?)
    });
    match result {
        Ok(deletion) => action_success(format!(
            "Project deleted with {} site(s).",
            deletion.sites_removed
        )),
        Err(failure) => action_failure("project_delete", failure),
    }
}

/// Creates a site from GeoJSON polygon text.
///
/// # FFI contract
/// - Geometry is validated before anything is written.
/// - Missing metrics default to zero; area is derived from the polygon.
#[flutter_rust_bridge::frb(sync)]
pub fn site_create(
    owner_id: String,
    project_id: String,
    name: String,
    geometry: String,
    carbon_sequestration_tonnes: Option<f64>,
    biodiversity_score: Option<f64>,
) -> SiteResponse {
    let result = with_site_service(&owner_id, |service| {
        let project_id = parse_id(&project_id, "project_id")?;
        let polygon = SitePolygon::from_geojson_str(&geometry)
            .map_err(SiteServiceError::from)?;
        let metrics = SiteMetrics {
            carbon_sequestration_tonnes,
            biodiversity_score,
        };
        Ok(service.create_site(project_id, &name, polygon.to_geometry(), metrics)?)
    });
    site_response("site_create", "Site created.", result)
}

#[flutter_rust_bridge::frb(sync)]
pub fn site_list(owner_id: String, project_id: String) -> SiteListResponse {
    let result = with_site_service(&owner_id, |service| {
        let project_id = parse_id(&project_id, "project_id")?;
        Ok(service.list_sites(project_id)?)
    });
    match result {
        Ok(sites) => SiteListResponse {
            ok: true,
            message: format!("Found {} site(s).", sites.len()),
            items: sites.iter().map(to_site_item).collect(),
            error_kind: None,
        },
        Err(failure) => SiteListResponse {
            error_kind: failure.kind.map(str::to_string),
            message: format!(
                "site_list failed: {}",
                failure.logged("site_list").message
            ),
            ok: false,
            items: Vec::new(),
        },
    }
}

/// Partial descriptive update. `metadata_json` must be a JSON object.
#[flutter_rust_bridge::frb(sync)]
pub fn site_update(
    owner_id: String,
    site_id: String,
    name: Option<String>,
    metadata_json: Option<String>,
) -> SiteResponse {
    let result = with_site_service(&owner_id, |service| {
        let site_id = parse_id(&site_id, "site_id")?;
        let metadata = match metadata_json.as_deref() {
            Some(text) => Some(
                serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(text)
                    .map_err(|err| {
                        FfiFailure::invalid_input(format!("metadata must be a JSON object: {err}"))
                    })?,
            ),
            None => None,
        };
        let update = SiteUpdate {
            name,
            area_hectares: None,
            metadata,
        };
        Ok(service.update_site(site_id, update)?)
    });
    site_response("site_update", "Site updated.", result)
}

/// Updates snapshot metrics without creating an analytics record.
#[flutter_rust_bridge::frb(sync)]
pub fn site_update_metrics(
    owner_id: String,
    site_id: String,
    carbon_sequestration_tonnes: Option<f64>,
    biodiversity_score: Option<f64>,
) -> SiteResponse {
    let result = with_site_service(&owner_id, |service| {
        let site_id = parse_id(&site_id, "site_id")?;
        Ok(service.update_site_metrics(site_id, carbon_sequestration_tonnes, biodiversity_score)?)
    });
    site_response("site_update_metrics", "Site metrics updated.", result)
}

#[flutter_rust_bridge::frb(sync)]
pub fn site_delete(owner_id: String, site_id: String) -> ActionResponse {
    let result = with_site_service(&owner_id, |service| {
        let site_id = parse_id(&site_id, "site_id")?;
        Ok(service.delete_site(site_id)?)
    });
    match result {
        Ok(records) => action_success(format!(
            "Site deleted with {records} analytics record(s)."
        )),
        Err(failure) => action_failure("site_delete", failure),
    }
}

/// Appends one analytics record to an owned site.
#[allow(clippy::too_many_arguments)]
#[flutter_rust_bridge::frb(sync)]
pub fn site_record_analytics(
    owner_id: String,
    site_id: String,
    date: String,
    carbon_sequestration_tonnes: f64,
    biodiversity_score: f64,
    tree_count: i64,
    vegetation_cover_percentage: f64,
    soil_carbon_percentage: f64,
) -> ActionResponse {
    let result = with_connection(|conn| {
        let service = site_service(conn, &owner_id)?;
        let site_id = parse_id(&site_id, "site_id")?;
        let date = NaiveDate::parse_from_str(date.trim(), DATE_FORMAT).map_err(|_| {
            FfiFailure::invalid_input(format!("date `{date}` is not YYYY-MM-DD"))
        })?;
        service.get_site(site_id)?;

        let repo = SqliteAnalyticsRepository::try_new(conn)
            .map_err(|err| FfiFailure::plain(format!("analytics repo init failed: {err}")))?;
        let record = NewAnalyticsRecord {
            date,
            carbon_sequestration_tonnes,
            biodiversity_score,
            tree_count,
            vegetation_cover_percentage,
            soil_carbon_percentage,
        };
        repo.insert_record(site_id, &record)
            .map_err(|err| FfiFailure::from(SiteServiceError::from(err)))
    });
    match result {
        Ok(record) => action_success(format!("Analytics recorded for {}.", record.date)),
        Err(failure) => action_failure("site_record_analytics", failure),
    }
}

/// Returns the site's analytics as date-ordered chart series.
#[flutter_rust_bridge::frb(sync)]
pub fn site_series(owner_id: String, site_id: String) -> SeriesResponse {
    let result = with_site_service(&owner_id, |service| {
        let site_id = parse_id(&site_id, "site_id")?;
        Ok(service.get_site_detail(site_id)?)
    });
    match result {
        Ok(detail) => {
            let series = build_series(&detail.analytics);
            SeriesResponse {
                ok: true,
                dates: series
                    .dates()
                    .iter()
                    .map(|date| date.format(DATE_FORMAT).to_string())
                    .collect(),
                carbon: values(&series.carbon),
                biodiversity: values(&series.biodiversity),
                tree_count: values(&series.tree_count),
                vegetation_cover: values(&series.vegetation_cover),
                soil_carbon: values(&series.soil_carbon),
                latest_date: latest(&detail.analytics)
                    .map(|record| record.date.format(DATE_FORMAT).to_string()),
                error_kind: None,
                message: format!("Loaded {} record(s).", detail.analytics.len()),
            }
        }
        Err(failure) => SeriesResponse {
            error_kind: failure.kind.map(str::to_string),
            message: format!(
                "site_series failed: {}",
                failure.logged("site_series").message
            ),
            ok: false,
            dates: Vec::new(),
            carbon: Vec::new(),
            biodiversity: Vec::new(),
            tree_count: Vec::new(),
            vegetation_cover: Vec::new(),
            soil_carbon: Vec::new(),
            latest_date: None,
        },
    }
}

fn values(points: &[SeriesPoint]) -> Vec<f64> {
    points.iter().map(|point| point.value).collect()
}

fn resolve_ffi_db_path() -> PathBuf {
    FFI_DB_PATH
        .get_or_init(|| {
            let config = CoreConfig::default().with_env_overrides();
            if config.db_path.is_absolute() {
                config.db_path
            } else {
                std::env::temp_dir().join(FFI_DB_FILE_NAME)
            }
        })
        .clone()
}

fn open_ffi_db() -> Result<rusqlite::Connection, FfiFailure> {
    open_db(resolve_ffi_db_path())
        .map_err(|err| FfiFailure::plain(format!("DB open failed: {err}")))
}

fn with_connection<T>(
    f: impl FnOnce(&rusqlite::Connection) -> Result<T, FfiFailure>,
) -> Result<T, FfiFailure> {
    let conn = open_ffi_db()?;
    f(&conn)
}

fn site_service<'conn>(
    conn: &'conn rusqlite::Connection,
    owner_id: &str,
) -> Result<SqliteSiteService<'conn>, FfiFailure> {
    let owner_id = parse_id(owner_id, "owner_id")?;
    let projects = SqliteProjectRepository::try_new(conn)
        .map_err(|err| FfiFailure::plain(format!("project repo init failed: {err}")))?;
    let sites = SqliteSiteRepository::try_new(conn)
        .map_err(|err| FfiFailure::plain(format!("site repo init failed: {err}")))?;
    Ok(SiteLifecycleService::new(owner_id, projects, sites))
}

fn with_site_service<T>(
    owner_id: &str,
    f: impl FnOnce(&SqliteSiteService<'_>) -> Result<T, FfiFailure>,
) -> Result<T, FfiFailure> {
    with_connection(|conn| {
        let service = site_service(conn, owner_id)?;
        f(&service)
    })
}

fn parse_id(value: &str, field: &'static str) -> Result<Uuid, FfiFailure> {
    Uuid::parse_str(value.trim())
        .map_err(|_| FfiFailure::invalid_input(format!("{field} `{value}` is not a valid UUID")))
}

fn project_response(
    operation: &str,
    success: &str,
    result: Result<Project, FfiFailure>,
) -> ProjectResponse {
    match result {
        Ok(project) => ProjectResponse {
            ok: true,
            project: Some(to_project_item(project)),
            error_kind: None,
            message: success.to_string(),
        },
        Err(failure) => ProjectResponse {
            ok: false,
            project: None,
            error_kind: failure.kind.map(str::to_string),
            message: failure.logged(operation).message,
        },
    }
}

fn site_response(
    operation: &str,
    success: &str,
    result: Result<Site, FfiFailure>,
) -> SiteResponse {
    match result {
        Ok(site) => SiteResponse {
            ok: true,
            site: Some(to_site_item(&site)),
            error_kind: None,
            message: success.to_string(),
        },
        Err(failure) => SiteResponse {
            ok: false,
            site: None,
            error_kind: failure.kind.map(str::to_string),
            message: failure.logged(operation).message,
        },
    }
}

fn action_success(message: String) -> ActionResponse {
    ActionResponse {
        ok: true,
        error_kind: None,
        message,
    }
}

fn action_failure(operation: &str, failure: FfiFailure) -> ActionResponse {
    ActionResponse {
        ok: false,
        error_kind: failure.kind.map(str::to_string),
        message: format!("{operation} failed: {}", failure.logged(operation).message),
    }
}

fn to_project_item(project: Project) -> ProjectItem {
    ProjectItem {
        project_id: project.id.to_string(),
        name: project.name,
        description: project.description,
        site_count: project.site_count,
        created_at_ms: project.created_at,
    }
}

fn to_site_item(site: &Site) -> SiteItem {
    SiteItem {
        site_id: site.id.to_string(),
        project_id: site.project_id.to_string(),
        name: site.name.clone(),
        geometry: site.polygon.to_geojson_string(),
        area_hectares: site.area_hectares,
        carbon_sequestration_tonnes: site.carbon_sequestration_tonnes,
        biodiversity_score: site.biodiversity_score,
    }
}
