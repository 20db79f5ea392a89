//! One mounted map container and everything drawn on it.
//!
//! # Responsibility
//! - Tie the surface handle, drawing session, sites layer and fetch
//!   sequencing of one container together.
//! - Turn component errors into `ViewEvent::Notify` for the UI shell.
//!
//! # Invariants
//! - Exactly one drawing session per view.
//! - Only the latest fetch of the selected project is rendered.
//! - Selecting a project replaces the mounted surface; nothing drawn for the
//!   previous project survives on the new one.
//! - Unmounting cancels outstanding fetches and resets drawing without
//!   touching the already released surface.

use crate::config::MapConfig;
use crate::draw::session::{
    DrawEvent, DrawSessionError, DrawingSessionController, SessionPhase, SessionTransition,
};
use crate::error::{Classify, Notification};
use crate::map::backend::{ContainerId, MapBackend, ViewState};
use crate::map::feed::{FetchSequencer, FetchTicket};
use crate::map::layer::{FeatureEvent, SiteEvent, SiteLayerSynchronizer};
use crate::map::surface::{AttachOutcome, MapSurfaceManager, SurfaceError, SurfaceHandle};
use crate::model::project::ProjectId;
use crate::model::site::{Site, SiteId};
use crate::repo::project_repo::ProjectRepository;
use crate::repo::site_repo::SiteRepository;
use crate::service::site_service::{SiteLifecycleService, SiteServiceError};
use log::warn;
use serde::Serialize;
use std::fmt::Display;

/// Event emitted to the UI shell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ViewEvent {
    SiteSelected(SiteId),
    DetailRequested(SiteId),
    Drawing(SessionTransition),
    Notify(Notification),
}

pub struct SiteMapView {
    container: ContainerId,
    initial_view: ViewState,
    mounted: bool,
    surface: Option<SurfaceHandle>,
    project_id: Option<ProjectId>,
    sites: Vec<Site>,
    session: DrawingSessionController,
    layer: SiteLayerSynchronizer,
    feed: FetchSequencer,
}

impl SiteMapView {
    pub fn new(container: ContainerId, config: &MapConfig) -> Self {
        Self {
            container,
            initial_view: ViewState {
                center: config.default_center,
                zoom: config.default_zoom,
            },
            mounted: false,
            surface: None,
            project_id: None,
            sites: Vec::new(),
            session: DrawingSessionController::new(),
            layer: SiteLayerSynchronizer::new(config),
            feed: FetchSequencer::new(),
        }
    }

    pub fn container(&self) -> &ContainerId {
        &self.container
    }

    pub fn surface(&self) -> Option<&SurfaceHandle> {
        self.surface.as_ref()
    }

    pub fn project_id(&self) -> Option<ProjectId> {
        self.project_id
    }

    /// Sites of the last applied fetch.
    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn drawing_phase(&self) -> SessionPhase {
        self.session.phase()
    }

    pub fn session(&self) -> &DrawingSessionController {
        &self.session
    }

    /// Attaches a surface. Returns `false` while the attach is pending
    /// behind a surface that is still tearing down.
    pub fn mount<B: MapBackend>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
    ) -> Result<bool, SurfaceError> {
        let outcome = manager.attach(&self.container, self.initial_view)?;
        self.mounted = true;
        Ok(self.adopt(manager, outcome))
    }

    /// Retries a pending mount. Returns whether the view now has a surface.
    pub fn settle<B: MapBackend>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
    ) -> Result<bool, SurfaceError> {
        if self.surface.as_ref().is_some_and(|handle| manager.is_live(handle)) {
            return Ok(true);
        }
        let outcome = manager.settle(&self.container)?;
        Ok(self.adopt(manager, outcome))
    }

    /// Tears the surface down and drops interest in pending fetches.
    pub fn unmount<B: MapBackend>(&mut self, manager: &mut MapSurfaceManager<B>) -> Vec<ViewEvent> {
        self.feed.cancel_all();
        manager.detach_container(&self.container);
        self.mounted = false;
        self.surface = None;
        self.layer.forget();
        self.session
            .abandon()
            .map(ViewEvent::Drawing)
            .into_iter()
            .collect()
    }

    /// Switches project: drops drawing and layer state, replaces the mounted
    /// surface and issues a fetch ticket for the caller to complete with
    /// `apply_sites`. While the replacement is pending, `settle` finishes it.
    pub fn select_project<B: MapBackend>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
        project_id: ProjectId,
    ) -> (FetchTicket, Vec<ViewEvent>) {
        let mut events = Vec::new();
        self.feed.cancel_all();
        events.extend(self.session.abandon().map(ViewEvent::Drawing));
        self.layer.forget();
        self.sites.clear();
        self.project_id = Some(project_id);

        if self.mounted {
            match manager.replace(&self.container, self.initial_view) {
                Ok(outcome) => {
                    self.adopt(manager, outcome);
                }
                Err(err) => {
                    self.surface = None;
                    notify(&mut events, &err);
                }
            }
        }
        (self.feed.begin(project_id), events)
    }

    /// Applies a fetch result if `ticket` is still the latest one.
    pub fn apply_sites<B: MapBackend>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
        ticket: FetchTicket,
        result: Result<Vec<Site>, SiteServiceError>,
    ) -> Vec<ViewEvent> {
        let mut events = Vec::new();
        if Some(ticket.project_id()) != self.project_id || !self.feed.accept(&ticket) {
            return events;
        }
        match result {
            Ok(sites) => {
                self.sites = sites;
                self.render(manager, &mut events);
            }
            Err(err) => notify(&mut events, &err),
        }
        events
    }

    /// Fetches and applies the selected project's sites in one step.
    pub fn refresh<B, P, S>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
        service: &SiteLifecycleService<P, S>,
    ) -> Vec<ViewEvent>
    where
        B: MapBackend,
        P: ProjectRepository,
        S: SiteRepository,
    {
        let Some(project_id) = self.project_id else {
            return Vec::new();
        };
        let ticket = self.feed.begin(project_id);
        self.apply_sites(manager, ticket, service.list_sites(project_id))
    }

    /// Draw-mode toggle.
    pub fn toggle_draw<B: MapBackend>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
    ) -> Vec<ViewEvent> {
        let mut events = Vec::new();
        let result = match (&self.surface, self.project_id) {
            (None, _) => Err(DrawSessionError::NoLiveSurface),
            (_, None) => Err(DrawSessionError::NoProjectSelected),
            (Some(surface), Some(project_id)) => self.session.toggle(manager, surface, project_id),
        };
        match result {
            Ok(transition) => events.push(ViewEvent::Drawing(transition)),
            Err(err) => notify(&mut events, &err),
        }
        events
    }

    pub fn handle_draw_event<B: MapBackend>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
        event: DrawEvent,
    ) -> Vec<ViewEvent> {
        let mut events = Vec::new();
        match self.session.handle_draw_event(manager, event) {
            Ok(Some(transition)) => events.push(ViewEvent::Drawing(transition)),
            Ok(None) => {}
            Err(err) => notify(&mut events, &err),
        }
        events
    }

    /// Commits the drawn ring and re-renders the project's sites.
    pub fn confirm_site<B, P, S>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
        service: &SiteLifecycleService<P, S>,
        name: Option<&str>,
    ) -> Vec<ViewEvent>
    where
        B: MapBackend,
        P: ProjectRepository,
        S: SiteRepository,
    {
        let mut events = Vec::new();
        match self.session.commit(manager, service, name) {
            Ok((transition, _site)) => {
                events.push(ViewEvent::Drawing(transition));
                events.extend(self.refresh(manager, service));
            }
            Err(err) => notify(&mut events, &err),
        }
        events
    }

    pub fn cancel_draw<B: MapBackend>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
    ) -> Vec<ViewEvent> {
        let mut events = Vec::new();
        match self.session.cancel(manager) {
            Ok(transition) => events.push(ViewEvent::Drawing(transition)),
            Err(err) => notify(&mut events, &err),
        }
        events
    }

    pub fn handle_feature_event<B: MapBackend>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
        event: FeatureEvent,
    ) -> Vec<ViewEvent> {
        let mut events = Vec::new();
        match self.layer.handle_feature_event(manager, event) {
            Ok(Some(SiteEvent::Selected(site_id))) => events.push(ViewEvent::SiteSelected(site_id)),
            Ok(Some(SiteEvent::DetailRequested(site_id))) => {
                events.push(ViewEvent::DetailRequested(site_id))
            }
            Ok(None) => {}
            Err(err) => notify(&mut events, &err),
        }
        events
    }

    fn adopt<B: MapBackend>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
        outcome: AttachOutcome,
    ) -> bool {
        match outcome {
            AttachOutcome::Ready(handle) => {
                self.surface = Some(handle);
                self.layer.forget();
                self.session.abandon();
                if self.project_id.is_some() {
                    let mut events = Vec::new();
                    self.render(manager, &mut events);
                }
                true
            }
            AttachOutcome::Placeholder { .. } => {
                self.surface = None;
                self.layer.forget();
                self.session.abandon();
                false
            }
        }
    }

    fn render<B: MapBackend>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
        events: &mut Vec<ViewEvent>,
    ) {
        let Some(surface) = &self.surface else {
            return;
        };
        if let Err(err) = self.layer.render(manager, surface, &self.sites) {
            notify(events, &err);
        }
    }
}

fn notify<E: Classify + Display>(events: &mut Vec<ViewEvent>, err: &E) {
    warn!(
        "event=view_error module=map status=error kind={}",
        err.kind().as_str()
    );
    if let Some(notification) = Notification::from_error(err) {
        events.push(ViewEvent::Notify(notification));
    }
}
