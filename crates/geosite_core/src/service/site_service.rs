//! Project → site → analytics lifecycle use-cases.
//!
//! # Responsibility
//! - Enforce ownership: every operation acts on behalf of one owner and
//!   treats foreign projects and sites as absent.
//! - Validate names, geometry and metrics before any repository call.
//! - Run cascades explicitly: analytics, then site, then project.
//!
//! # Invariants
//! - A created site always belongs to an existing project owned by the actor.
//! - `delete_project` removes sites one transaction at a time; a failure
//!   leaves a prefix of wholly removed sites and the project itself intact.
//! - Snapshot metric updates never create analytics records.

use crate::error::{Classify, ErrorKind};
use crate::geometry::codec::area_hectares;
use crate::geometry::polygon::{GeometryError, PolygonGeometry, SitePolygon};
use crate::model::project::{OwnerId, Project, ProjectId, ProjectList, ProjectUpdate};
use crate::model::site::{
    NewSite, Site, SiteDetail, SiteId, SiteMetadata, SiteMetrics, SiteUpdate, BIODIVERSITY_MAX,
    BIODIVERSITY_MIN,
};
use crate::repo::project_repo::ProjectRepository;
use crate::repo::site_repo::SiteRepository;
use crate::repo::{EntityRef, RepoError};
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Smallest area stored for a site whose area was derived from geometry.
pub const MIN_SITE_AREA_HECTARES: f64 = 0.1;
pub const DEFAULT_PROJECT_PAGE: u32 = 100;
pub const MAX_PROJECT_PAGE: u32 = 500;

pub type SiteServiceResult<T> = Result<T, SiteServiceError>;

/// Service error for project and site use-cases.
#[derive(Debug)]
pub enum SiteServiceError {
    /// Submitted geometry failed polygon validation.
    InvalidGeometry(GeometryError),
    /// Entity is absent or owned by someone else.
    NotFound(EntityRef),
    /// Blank name or out-of-range metric.
    InvalidInput(String),
    /// Persistence-layer failure.
    Repo(RepoError),
}

impl Display for SiteServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidGeometry(err) => write!(f, "invalid site geometry: {err}"),
            Self::NotFound(entity) => write!(f, "{entity} not found"),
            Self::InvalidInput(message) => write!(f, "{message}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SiteServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidGeometry(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for SiteServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(entity) => Self::NotFound(entity),
            other => Self::Repo(other),
        }
    }
}

impl From<GeometryError> for SiteServiceError {
    fn from(value: GeometryError) -> Self {
        Self::InvalidGeometry(value)
    }
}

impl Classify for SiteServiceError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidGeometry(_) => ErrorKind::InvalidGeometry,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Repo(_) => ErrorKind::PersistenceFailure,
        }
    }
}

/// Everything needed to create one site.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteDraft {
    pub name: String,
    pub geometry: PolygonGeometry,
    pub metrics: SiteMetrics,
    /// Explicit area; derived from geometry when `None`.
    pub area_hectares: Option<f64>,
    pub metadata: Option<SiteMetadata>,
}

impl SiteDraft {
    pub fn new(name: impl Into<String>, geometry: PolygonGeometry) -> Self {
        Self {
            name: name.into(),
            geometry,
            metrics: SiteMetrics::default(),
            area_hectares: None,
            metadata: None,
        }
    }
}

/// Counts removed by a project cascade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectDeletion {
    pub sites_removed: usize,
    pub records_removed: usize,
}

/// Lifecycle facade over project and site repositories, bound to one actor.
pub struct SiteLifecycleService<P: ProjectRepository, S: SiteRepository> {
    actor: OwnerId,
    projects: P,
    sites: S,
}

impl<P: ProjectRepository, S: SiteRepository> SiteLifecycleService<P, S> {
    pub fn new(actor: OwnerId, projects: P, sites: S) -> Self {
        Self {
            actor,
            projects,
            sites,
        }
    }

    pub fn actor(&self) -> OwnerId {
        self.actor
    }

    pub fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> SiteServiceResult<Project> {
        let name = normalize_name(name, "project")?;
        let description = description.map(str::trim).filter(|value| !value.is_empty());
        let project = self
            .projects
            .create_project(self.actor, &name, description)?;
        info!(
            "event=project_create module=service status=ok project_id={}",
            project.id
        );
        Ok(project)
    }

    /// Loads one project owned by the actor.
    pub fn get_project(&self, id: ProjectId) -> SiteServiceResult<Project> {
        self.owned_project(id)
    }

    /// Pages the actor's projects. `limit == 0` selects the default page size.
    pub fn list_projects(&self, offset: u32, limit: u32) -> SiteServiceResult<ProjectList> {
        let limit = match limit {
            0 => DEFAULT_PROJECT_PAGE,
            value => value.min(MAX_PROJECT_PAGE),
        };
        Ok(self.projects.list_projects(self.actor, offset, limit)?)
    }

    pub fn rename_project(&self, id: ProjectId, name: &str) -> SiteServiceResult<Project> {
        let name = normalize_name(name, "project")?;
        self.owned_project(id)?;
        let update = ProjectUpdate {
            name: Some(name),
            description: None,
        };
        Ok(self.projects.update_project(id, &update)?)
    }

    pub fn describe_project(&self, id: ProjectId, description: &str) -> SiteServiceResult<Project> {
        self.owned_project(id)?;
        let update = ProjectUpdate {
            name: None,
            description: Some(description.trim().to_string()),
        };
        Ok(self.projects.update_project(id, &update)?)
    }

    /// Deletes every site of the project (each with its analytics), then
    /// the project.
    pub fn delete_project(&self, id: ProjectId) -> SiteServiceResult<ProjectDeletion> {
        self.owned_project(id)?;
        let site_ids = self.sites.list_site_ids(id)?;
        info!(
            "event=project_delete module=service status=start project_id={} sites={}",
            id,
            site_ids.len()
        );

        let mut deletion = ProjectDeletion::default();
        for site_id in site_ids {
            match self.sites.delete_site_cascade(site_id) {
                Ok(records) => {
                    deletion.sites_removed += 1;
                    deletion.records_removed += records;
                }
                Err(err) => {
                    error!(
                        "event=project_delete module=service status=error project_id={} site_id={} sites_removed={} error={}",
                        id, site_id, deletion.sites_removed, err
                    );
                    return Err(err.into());
                }
            }
        }

        self.projects.delete_project(id)?;
        info!(
            "event=project_delete module=service status=ok project_id={} sites_removed={} records_removed={}",
            id, deletion.sites_removed, deletion.records_removed
        );
        Ok(deletion)
    }

    /// Sites of an owned project, in creation order.
    pub fn list_sites(&self, project_id: ProjectId) -> SiteServiceResult<Vec<Site>> {
        self.owned_project(project_id)?;
        Ok(self.sites.list_sites(project_id)?)
    }

    pub fn count_sites(&self, project_id: ProjectId) -> SiteServiceResult<u32> {
        self.owned_project(project_id)?;
        Ok(self.sites.count_sites(project_id)?)
    }

    /// Creates a site with default metrics and derived area.
    pub fn create_site(
        &self,
        project_id: ProjectId,
        name: &str,
        geometry: PolygonGeometry,
        metrics: SiteMetrics,
    ) -> SiteServiceResult<Site> {
        let mut draft = SiteDraft::new(name, geometry);
        draft.metrics = metrics;
        self.create_site_from_draft(project_id, draft)
    }

    /// Creates a site from a full draft.
    ///
    /// # Errors
    /// - `InvalidInput` for a blank name, out-of-range metrics or area.
    /// - `InvalidGeometry` when the polygon fails validation.
    /// - `NotFound` when the project is absent or not owned by the actor.
    pub fn create_site_from_draft(
        &self,
        project_id: ProjectId,
        draft: SiteDraft,
    ) -> SiteServiceResult<Site> {
        let name = normalize_name(&draft.name, "site")?;
        let polygon = SitePolygon::from_geometry(draft.geometry)?;
        let carbon = draft.metrics.carbon_sequestration_tonnes.unwrap_or(0.0);
        let biodiversity = draft.metrics.biodiversity_score.unwrap_or(0.0);
        validate_carbon(carbon)?;
        validate_biodiversity(biodiversity)?;
        if let Some(area) = draft.area_hectares {
            validate_area(area)?;
        }

        self.owned_project(project_id)?;

        let area = draft
            .area_hectares
            .unwrap_or_else(|| area_hectares(&polygon).max(MIN_SITE_AREA_HECTARES));
        let new_site = NewSite {
            id: Uuid::new_v4(),
            project_id,
            name,
            polygon,
            area_hectares: Some(area),
            carbon_sequestration_tonnes: carbon,
            biodiversity_score: biodiversity,
            metadata: draft.metadata,
        };

        let site = self.sites.create_site(&new_site)?;
        info!(
            "event=site_create module=service status=ok project_id={} site_id={} vertices={}",
            project_id,
            site.id,
            site.polygon.vertex_count()
        );
        Ok(site)
    }

    pub fn get_site(&self, site_id: SiteId) -> SiteServiceResult<Site> {
        self.owned_site(site_id)
    }

    /// Site plus its analytics history in storage order.
    pub fn get_site_detail(&self, site_id: SiteId) -> SiteServiceResult<SiteDetail> {
        let site = self.owned_site(site_id)?;
        let analytics = self.sites.list_analytics(site_id)?;
        Ok(SiteDetail { site, analytics })
    }

    /// Applies a partial descriptive update. An empty update is a read.
    pub fn update_site(&self, site_id: SiteId, update: SiteUpdate) -> SiteServiceResult<Site> {
        let update = SiteUpdate {
            name: update
                .name
                .as_deref()
                .map(|name| normalize_name(name, "site"))
                .transpose()?,
            ..update
        };
        if let Some(area) = update.area_hectares {
            validate_area(area)?;
        }

        let site = self.owned_site(site_id)?;
        if update.is_empty() {
            return Ok(site);
        }
        Ok(self.sites.update_site(site_id, &update)?)
    }

    /// Partial update of the two snapshot metrics.
    pub fn update_site_metrics(
        &self,
        site_id: SiteId,
        carbon_sequestration_tonnes: Option<f64>,
        biodiversity_score: Option<f64>,
    ) -> SiteServiceResult<Site> {
        if let Some(carbon) = carbon_sequestration_tonnes {
            validate_carbon(carbon)?;
        }
        if let Some(score) = biodiversity_score {
            validate_biodiversity(score)?;
        }

        let site = self.owned_site(site_id)?;
        if carbon_sequestration_tonnes.is_none() && biodiversity_score.is_none() {
            return Ok(site);
        }
        Ok(self
            .sites
            .update_site_metrics(site_id, carbon_sequestration_tonnes, biodiversity_score)?)
    }

    /// Deletes the site and its analytics. Returns removed record count.
    pub fn delete_site(&self, site_id: SiteId) -> SiteServiceResult<usize> {
        self.owned_site(site_id)?;
        let removed = self.sites.delete_site_cascade(site_id)?;
        info!(
            "event=site_delete module=service status=ok site_id={} records_removed={}",
            site_id, removed
        );
        Ok(removed)
    }

    fn owned_project(&self, id: ProjectId) -> SiteServiceResult<Project> {
        match self.projects.get_project(id)? {
            Some(project) if project.owner_id == self.actor => Ok(project),
            _ => Err(SiteServiceError::NotFound(EntityRef::Project(id))),
        }
    }

    fn owned_site(&self, id: SiteId) -> SiteServiceResult<Site> {
        let site = self
            .sites
            .get_site(id)?
            .ok_or(SiteServiceError::NotFound(EntityRef::Site(id)))?;
        match self.owned_project(site.project_id) {
            Ok(_) => Ok(site),
            Err(SiteServiceError::NotFound(_)) => {
                Err(SiteServiceError::NotFound(EntityRef::Site(id)))
            }
            Err(other) => Err(other),
        }
    }
}

fn normalize_name(value: &str, entity: &str) -> SiteServiceResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SiteServiceError::InvalidInput(format!(
            "{entity} name cannot be blank"
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_carbon(value: f64) -> SiteServiceResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(SiteServiceError::InvalidInput(format!(
            "carbon sequestration must be a finite non-negative number, got {value}"
        )));
    }
    Ok(())
}

fn validate_biodiversity(value: f64) -> SiteServiceResult<()> {
    if !(BIODIVERSITY_MIN..=BIODIVERSITY_MAX).contains(&value) {
        return Err(SiteServiceError::InvalidInput(format!(
            "biodiversity score must lie in [{BIODIVERSITY_MIN}, {BIODIVERSITY_MAX}], got {value}"
        )));
    }
    Ok(())
}

fn validate_area(value: f64) -> SiteServiceResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(SiteServiceError::InvalidInput(format!(
            "site area must be a positive number of hectares, got {value}"
        )));
    }
    Ok(())
}
