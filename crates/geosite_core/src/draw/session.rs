//! "Draw a new site" session state machine.
//!
//! # Responsibility
//! - Open a single-polygon drawing affordance on a live surface.
//! - Capture the completed ring as transient `DrawnGeometry` and show it
//!   as a provisional overlay until the user confirms or cancels.
//! - Persist confirmed geometry through `SiteLifecycleService`.
//!
//! # Invariants
//! - `Idle → Active → AwaitingConfirmation → Idle`; toggling off and
//!   cancelling return to `Idle` without persistence.
//! - Listeners are subscribed on entry to `Active` and released on exit;
//!   events carrying any other listener id are dropped.
//! - A failed commit keeps the session in `AwaitingConfirmation` with the
//!   geometry retained.

use crate::error::{Classify, ErrorKind};
use crate::geometry::codec::{from_renderable, to_renderable, RenderShape};
use crate::geometry::polygon::{GeometryError, SitePolygon};
use crate::map::backend::{
    ControlId, ControlSpec, EventKind, LayerId, LayerSpec, ListenerId, MapBackend, ShapeStyle,
};
use crate::map::surface::{MapSurfaceManager, SurfaceError, SurfaceHandle};
use crate::model::project::ProjectId;
use crate::model::site::{Site, SiteId, SiteMetrics};
use crate::repo::project_repo::ProjectRepository;
use crate::repo::site_repo::SiteRepository;
use crate::service::site_service::{SiteLifecycleService, SiteServiceError};
use log::{debug, info, warn};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Active,
    AwaitingConfirmation,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::AwaitingConfirmation => "awaiting_confirmation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "site_id", rename_all = "snake_case")]
pub enum SessionOutcome {
    Started,
    /// Draw mode toggled off before a ring completed.
    Stopped,
    Captured,
    Committed(SiteId),
    Cancelled,
    /// Reset without backend calls after the surface went away.
    Abandoned,
}

/// One state change, reported to the UI shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionTransition {
    pub from: SessionPhase,
    pub to: SessionPhase,
    pub outcome: SessionOutcome,
}

/// Completed polygon not yet promoted to a site.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawnGeometry {
    polygon: SitePolygon,
}

impl DrawnGeometry {
    pub fn polygon(&self) -> &SitePolygon {
        &self.polygon
    }

    pub fn shape(&self) -> RenderShape {
        to_renderable(&self.polygon)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawEventKind {
    /// Drawing tool completed a shape.
    Created(RenderShape),
    /// In-progress shape was removed in the tool.
    Deleted,
}

/// Backend draw event delivered to one listener.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawEvent {
    pub listener: ListenerId,
    pub kind: DrawEventKind,
}

#[derive(Debug)]
pub enum DrawSessionError {
    /// Entering `Active` requires a live surface.
    NoLiveSurface,
    /// Drawing needs a project to draw into.
    NoProjectSelected,
    /// A captured ring still awaits confirm or cancel.
    PendingConfirmation,
    InvalidTransition {
        phase: SessionPhase,
        action: &'static str,
    },
    InvalidGeometry(GeometryError),
    Surface(SurfaceError),
    /// Commit failed; the geometry is retained.
    Persistence(SiteServiceError),
}

impl Display for DrawSessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoLiveSurface => write!(f, "drawing requires a mounted map"),
            Self::NoProjectSelected => write!(f, "select a project before drawing a site"),
            Self::PendingConfirmation => {
                write!(f, "confirm or cancel the drawn site before drawing another")
            }
            Self::InvalidTransition { phase, action } => {
                write!(f, "cannot {action} while drawing is {}", phase.as_str())
            }
            Self::InvalidGeometry(err) => write!(f, "drawn shape rejected: {err}"),
            Self::Surface(err) => write!(f, "{err}"),
            Self::Persistence(err) => write!(f, "could not save site: {err}"),
        }
    }
}

impl Error for DrawSessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidGeometry(err) => Some(err),
            Self::Surface(err) => Some(err),
            Self::Persistence(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SurfaceError> for DrawSessionError {
    fn from(value: SurfaceError) -> Self {
        Self::Surface(value)
    }
}

impl Classify for DrawSessionError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NoLiveSurface
            | Self::NoProjectSelected
            | Self::PendingConfirmation
            | Self::InvalidTransition { .. } => ErrorKind::InvalidInput,
            Self::InvalidGeometry(_) => ErrorKind::InvalidGeometry,
            Self::Surface(err) => err.kind(),
            Self::Persistence(err) => err.kind(),
        }
    }
}

#[derive(Debug)]
enum State {
    Idle,
    Active {
        surface: SurfaceHandle,
        project_id: ProjectId,
        control: ControlId,
        listeners: [ListenerId; 2],
    },
    AwaitingConfirmation {
        surface: SurfaceHandle,
        project_id: ProjectId,
        drawn: DrawnGeometry,
        overlay: LayerId,
    },
}

impl State {
    fn phase(&self) -> SessionPhase {
        match self {
            Self::Idle => SessionPhase::Idle,
            Self::Active { .. } => SessionPhase::Active,
            Self::AwaitingConfirmation { .. } => SessionPhase::AwaitingConfirmation,
        }
    }
}

/// Drawing state machine; one per mounted map view.
#[derive(Debug)]
pub struct DrawingSessionController {
    state: State,
}

impl Default for DrawingSessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawingSessionController {
    pub fn new() -> Self {
        Self { state: State::Idle }
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    /// Geometry awaiting confirmation.
    pub fn drawn(&self) -> Option<&DrawnGeometry> {
        match &self.state {
            State::AwaitingConfirmation { drawn, .. } => Some(drawn),
            _ => None,
        }
    }

    /// Project the current session draws into.
    pub fn project_id(&self) -> Option<ProjectId> {
        match &self.state {
            State::Idle => None,
            State::Active { project_id, .. } | State::AwaitingConfirmation { project_id, .. } => {
                Some(*project_id)
            }
        }
    }

    /// Enters `Active`: adds the polygon tool and subscribes to draw events.
    pub fn start<B: MapBackend>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
        surface: &SurfaceHandle,
        project_id: ProjectId,
    ) -> Result<SessionTransition, DrawSessionError> {
        match self.state {
            State::Idle => {}
            State::Active { .. } => {
                return Err(DrawSessionError::InvalidTransition {
                    phase: SessionPhase::Active,
                    action: "start drawing",
                })
            }
            State::AwaitingConfirmation { .. } => return Err(DrawSessionError::PendingConfirmation),
        }
        if !manager.is_live(surface) {
            return Err(DrawSessionError::NoLiveSurface);
        }

        let control = manager.add_control(surface, ControlSpec::PolygonDrawTool)?;
        let created = match manager.subscribe(surface, EventKind::DrawCreated) {
            Ok(listener) => listener,
            Err(err) => {
                let _ = manager.remove_control(surface, control);
                return Err(err.into());
            }
        };
        let deleted = match manager.subscribe(surface, EventKind::DrawDeleted) {
            Ok(listener) => listener,
            Err(err) => {
                let _ = manager.unsubscribe(surface, created);
                let _ = manager.remove_control(surface, control);
                return Err(err.into());
            }
        };

        self.state = State::Active {
            surface: surface.clone(),
            project_id,
            control,
            listeners: [created, deleted],
        };
        Ok(self.transition(SessionPhase::Idle, SessionOutcome::Started))
    }

    /// Leaves `Active` for `Idle` without capturing anything.
    pub fn stop<B: MapBackend>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
    ) -> Result<SessionTransition, DrawSessionError> {
        self.leave_active(manager, SessionOutcome::Stopped, "stop drawing")
    }

    /// Draw-mode toggle: `Idle` starts, `Active` stops.
    pub fn toggle<B: MapBackend>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
        surface: &SurfaceHandle,
        project_id: ProjectId,
    ) -> Result<SessionTransition, DrawSessionError> {
        match self.state {
            State::Active { .. } => self.stop(manager),
            _ => self.start(manager, surface, project_id),
        }
    }

    /// Handles a backend draw event.
    ///
    /// Returns `Ok(None)` for dropped or ignored events. A polygon that fails
    /// validation keeps the session `Active` and returns `InvalidGeometry`.
    pub fn handle_draw_event<B: MapBackend>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
        event: DrawEvent,
    ) -> Result<Option<SessionTransition>, DrawSessionError> {
        let State::Active {
            surface, listeners, ..
        } = &self.state
        else {
            debug!(
                "event=draw_event module=draw status=skip listener={} phase={}",
                event.listener,
                self.phase().as_str()
            );
            return Ok(None);
        };
        if !listeners.contains(&event.listener) || !manager.is_live(surface) {
            debug!(
                "event=draw_event module=draw status=skip listener={} reason=stale",
                event.listener
            );
            return Ok(None);
        }

        let shape = match event.kind {
            DrawEventKind::Created(shape) => shape,
            DrawEventKind::Deleted => return Ok(None),
        };
        if !shape.kind().is_capturable() {
            debug!(
                "event=draw_event module=draw status=skip shape={} reason=not_polygon",
                shape.kind().as_str()
            );
            return Ok(None);
        }
        let polygon = from_renderable(&shape).map_err(DrawSessionError::InvalidGeometry)?;

        let State::Active {
            surface,
            project_id,
            control,
            listeners,
        } = std::mem::replace(&mut self.state, State::Idle)
        else {
            return Ok(None);
        };
        release_tool(manager, &surface, control, listeners);

        let overlay = match manager.add_layer(
            &surface,
            LayerSpec::ProvisionalOverlay {
                shape: to_renderable(&polygon),
                style: ShapeStyle::provisional(),
            },
        ) {
            Ok(layer) => layer,
            Err(err) => return Err(err.into()),
        };

        debug!(
            "event=draw_capture module=draw status=ok project_id={} vertices={}",
            project_id,
            polygon.vertex_count()
        );
        self.state = State::AwaitingConfirmation {
            surface,
            project_id,
            drawn: DrawnGeometry { polygon },
            overlay,
        };
        Ok(Some(
            self.transition(SessionPhase::Active, SessionOutcome::Captured),
        ))
    }

    /// Persists the captured geometry as a new site.
    ///
    /// A blank or absent name becomes `Site N`, N being the project's
    /// current site count plus one.
    pub fn commit<B, P, S>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
        service: &SiteLifecycleService<P, S>,
        name: Option<&str>,
    ) -> Result<(SessionTransition, Site), DrawSessionError>
    where
        B: MapBackend,
        P: ProjectRepository,
        S: SiteRepository,
    {
        let State::AwaitingConfirmation {
            project_id, drawn, ..
        } = &self.state
        else {
            return Err(DrawSessionError::InvalidTransition {
                phase: self.phase(),
                action: "commit",
            });
        };
        let project_id = *project_id;

        let name = match name.map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => value.to_string(),
            None => {
                let count = service
                    .count_sites(project_id)
                    .map_err(DrawSessionError::Persistence)?;
                format!("Site {}", count + 1)
            }
        };

        let site = service
            .create_site(
                project_id,
                &name,
                drawn.polygon().to_geometry(),
                SiteMetrics::default(),
            )
            .map_err(|err| {
                warn!(
                    "event=draw_commit module=draw status=error project_id={} error_kind={}",
                    project_id,
                    err.kind().as_str()
                );
                DrawSessionError::Persistence(err)
            })?;

        if let State::AwaitingConfirmation {
            surface, overlay, ..
        } = std::mem::replace(&mut self.state, State::Idle)
        {
            remove_overlay(manager, &surface, overlay);
        }
        info!(
            "event=draw_commit module=draw status=ok project_id={} site_id={}",
            project_id, site.id
        );
        let transition = self.transition(
            SessionPhase::AwaitingConfirmation,
            SessionOutcome::Committed(site.id),
        );
        Ok((transition, site))
    }

    /// Discards any session in progress and returns to `Idle`.
    pub fn cancel<B: MapBackend>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
    ) -> Result<SessionTransition, DrawSessionError> {
        match self.state {
            State::Idle => Err(DrawSessionError::InvalidTransition {
                phase: SessionPhase::Idle,
                action: "cancel",
            }),
            State::Active { .. } => self.leave_active(manager, SessionOutcome::Cancelled, "cancel"),
            State::AwaitingConfirmation { .. } => {
                if let State::AwaitingConfirmation {
                    surface, overlay, ..
                } = std::mem::replace(&mut self.state, State::Idle)
                {
                    remove_overlay(manager, &surface, overlay);
                }
                Ok(self.transition(
                    SessionPhase::AwaitingConfirmation,
                    SessionOutcome::Cancelled,
                ))
            }
        }
    }

    /// Resets to `Idle` without backend calls. Used after the surface was
    /// already detached, which released every resource the session held.
    pub fn abandon(&mut self) -> Option<SessionTransition> {
        let from = self.phase();
        if from == SessionPhase::Idle {
            return None;
        }
        self.state = State::Idle;
        Some(self.transition(from, SessionOutcome::Abandoned))
    }

    fn leave_active<B: MapBackend>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
        outcome: SessionOutcome,
        action: &'static str,
    ) -> Result<SessionTransition, DrawSessionError> {
        let phase = self.phase();
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Active {
                surface,
                control,
                listeners,
                ..
            } => {
                release_tool(manager, &surface, control, listeners);
                Ok(self.transition(SessionPhase::Active, outcome))
            }
            other => {
                self.state = other;
                Err(DrawSessionError::InvalidTransition { phase, action })
            }
        }
    }

    fn transition(&self, from: SessionPhase, outcome: SessionOutcome) -> SessionTransition {
        let transition = SessionTransition {
            from,
            to: self.phase(),
            outcome,
        };
        debug!(
            "event=draw_transition module=draw status=ok from={} to={}",
            transition.from.as_str(),
            transition.to.as_str()
        );
        transition
    }
}

/// Unsubscribes draw listeners, then removes the draw control. Stale
/// surfaces already released both.
fn release_tool<B: MapBackend>(
    manager: &mut MapSurfaceManager<B>,
    surface: &SurfaceHandle,
    control: ControlId,
    listeners: [ListenerId; 2],
) {
    if !manager.is_live(surface) {
        return;
    }
    for listener in listeners {
        if let Err(err) = manager.unsubscribe(surface, listener) {
            warn!("event=draw_release module=draw status=error listener={listener} error={err}");
        }
    }
    if let Err(err) = manager.remove_control(surface, control) {
        warn!("event=draw_release module=draw status=error control={control} error={err}");
    }
}

fn remove_overlay<B: MapBackend>(
    manager: &mut MapSurfaceManager<B>,
    surface: &SurfaceHandle,
    overlay: LayerId,
) {
    if !manager.is_live(surface) {
        return;
    }
    if let Err(err) = manager.remove_layer(surface, overlay) {
        warn!("event=draw_release module=draw status=error layer={overlay} error={err}");
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DrawEvent, DrawEventKind, DrawSessionError, DrawingSessionController, SessionOutcome,
        SessionPhase,
    };
    use crate::config::MapConfig;
    use crate::geometry::codec::{LatLng, RenderShape};
    use crate::map::backend::{ContainerId, EventKind, ViewState};
    use crate::map::headless::HeadlessMapBackend;
    use crate::map::surface::{MapSurfaceManager, SurfaceHandle};
    use uuid::Uuid;

    fn mounted() -> (MapSurfaceManager<HeadlessMapBackend>, SurfaceHandle) {
        let mut manager = MapSurfaceManager::new(HeadlessMapBackend::new(), &MapConfig::default());
        let view = ViewState {
            center: LatLng::new(0.0, 0.0),
            zoom: 2,
        };
        let outcome = manager.attach(&ContainerId::new("map"), view).unwrap();
        let handle = outcome.handle().unwrap().clone();
        (manager, handle)
    }

    fn created_listener(
        manager: &MapSurfaceManager<HeadlessMapBackend>,
        handle: &SurfaceHandle,
    ) -> crate::map::backend::ListenerId {
        manager.backend().listeners(handle.surface_id(), EventKind::DrawCreated)[0]
    }

    fn triangle() -> RenderShape {
        RenderShape::Polygon {
            rings: vec![vec![
                LatLng::new(1.0, 1.0),
                LatLng::new(1.0, 1.1),
                LatLng::new(1.1, 1.1),
            ]],
        }
    }

    #[test]
    fn toggle_on_and_off_releases_tool() {
        let (mut manager, handle) = mounted();
        let mut session = DrawingSessionController::new();
        session.toggle(&mut manager, &handle, Uuid::new_v4()).unwrap();
        assert_eq!(session.phase(), SessionPhase::Active);

        let transition = session.toggle(&mut manager, &handle, Uuid::new_v4()).unwrap();
        assert_eq!(transition.outcome, SessionOutcome::Stopped);
        let record = manager.backend().surface(handle.surface_id()).unwrap();
        assert!(record.controls.is_empty());
        assert!(record.listeners.is_empty());
    }

    #[test]
    fn non_polygon_shapes_are_ignored() {
        let (mut manager, handle) = mounted();
        let mut session = DrawingSessionController::new();
        session.start(&mut manager, &handle, Uuid::new_v4()).unwrap();
        let event = DrawEvent {
            listener: created_listener(&manager, &handle),
            kind: DrawEventKind::Created(RenderShape::Marker {
                at: LatLng::new(1.0, 1.0),
            }),
        };
        assert!(session.handle_draw_event(&mut manager, event).unwrap().is_none());

        let ring = vec![
            LatLng::new(1.0, 1.0),
            LatLng::new(1.0, 1.1),
            LatLng::new(1.1, 1.1),
        ];
        let event = DrawEvent {
            listener: created_listener(&manager, &handle),
            kind: DrawEventKind::Created(RenderShape::MultiPolygon {
                polygons: vec![vec![ring.clone()], vec![ring]],
            }),
        };
        assert!(session.handle_draw_event(&mut manager, event).unwrap().is_none());
        assert_eq!(session.phase(), SessionPhase::Active);
    }

    #[test]
    fn invalid_polygon_keeps_session_active() {
        let (mut manager, handle) = mounted();
        let mut session = DrawingSessionController::new();
        session.start(&mut manager, &handle, Uuid::new_v4()).unwrap();
        let event = DrawEvent {
            listener: created_listener(&manager, &handle),
            kind: DrawEventKind::Created(RenderShape::Polygon {
                rings: vec![vec![LatLng::new(1.0, 1.0), LatLng::new(2.0, 2.0)]],
            }),
        };
        let err = session.handle_draw_event(&mut manager, event).unwrap_err();
        assert!(matches!(err, DrawSessionError::InvalidGeometry(_)));
        assert_eq!(session.phase(), SessionPhase::Active);
    }

    #[test]
    fn captured_ring_blocks_new_session_until_cancelled() {
        let (mut manager, handle) = mounted();
        let mut session = DrawingSessionController::new();
        session.start(&mut manager, &handle, Uuid::new_v4()).unwrap();
        let event = DrawEvent {
            listener: created_listener(&manager, &handle),
            kind: DrawEventKind::Created(triangle()),
        };
        let transition = session.handle_draw_event(&mut manager, event).unwrap().unwrap();
        assert_eq!(transition.to, SessionPhase::AwaitingConfirmation);
        assert_eq!(session.drawn().unwrap().polygon().vertex_count(), 3);

        let record = manager.backend().surface(handle.surface_id()).unwrap();
        assert!(record.controls.is_empty());
        assert_eq!(record.layers.len(), 1);

        assert!(matches!(
            session.start(&mut manager, &handle, Uuid::new_v4()),
            Err(DrawSessionError::PendingConfirmation)
        ));

        let transition = session.cancel(&mut manager).unwrap();
        assert_eq!(transition.outcome, SessionOutcome::Cancelled);
        assert_eq!(session.phase(), SessionPhase::Idle);
        let record = manager.backend().surface(handle.surface_id()).unwrap();
        assert!(record.layers.is_empty());
    }

    #[test]
    fn events_from_previous_session_are_dropped() {
        let (mut manager, handle) = mounted();
        let mut session = DrawingSessionController::new();
        session.start(&mut manager, &handle, Uuid::new_v4()).unwrap();
        let old_listener = created_listener(&manager, &handle);
        session.stop(&mut manager).unwrap();
        session.start(&mut manager, &handle, Uuid::new_v4()).unwrap();

        let event = DrawEvent {
            listener: old_listener,
            kind: DrawEventKind::Created(triangle()),
        };
        assert!(session.handle_draw_event(&mut manager, event).unwrap().is_none());
        assert_eq!(session.phase(), SessionPhase::Active);
    }

    #[test]
    fn start_requires_live_surface() {
        let (mut manager, handle) = mounted();
        manager.detach(&handle);
        let mut session = DrawingSessionController::new();
        assert!(matches!(
            session.start(&mut manager, &handle, Uuid::new_v4()),
            Err(DrawSessionError::NoLiveSurface)
        ));
        assert!(session.abandon().is_none());
    }
}
