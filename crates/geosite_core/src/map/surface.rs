//! Rendering surface lifecycle per container.
//!
//! # Responsibility
//! - Create, tear down and re-create surfaces bound to containers.
//! - Own every child resource (layers, controls, listeners) created on a
//!   surface so that teardown can release them before the surface itself.
//! - Absorb re-entrant mounts: a second attach while an earlier incarnation
//!   is still live or still tearing down becomes a placeholder that
//!   `settle` retries within a bounded budget.
//!
//! # Invariants
//! - At most one live surface per container at any instant.
//! - Handles are keyed by `(container, generation)`; every attach bumps the
//!   generation, so a handle from an earlier incarnation is stale forever.
//! - Stale handles are rejected by every resource operation and ignored by
//!   `detach`.

use crate::config::MapConfig;
use crate::error::{Classify, ErrorKind};
use crate::geometry::polygon::Bounds;
use crate::map::backend::{
    ContainerId, ControlId, ControlSpec, EventKind, LayerId, LayerSpec, ListenerId, MapBackend,
    MapBackendError, ShapeStyle, SurfaceId, ViewState,
};
use crate::model::site::SiteId;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Handle to one surface incarnation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceHandle {
    container: ContainerId,
    generation: u64,
    surface: SurfaceId,
}

impl SurfaceHandle {
    pub fn container(&self) -> &ContainerId {
        &self.container
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn surface_id(&self) -> SurfaceId {
        self.surface
    }
}

impl Display for SurfaceHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}#{}",
            self.surface, self.container, self.generation
        )
    }
}

/// Result of `attach`, `replace` and `settle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    Ready(SurfaceHandle),
    /// Surface is pending; call `settle` once the container is free.
    Placeholder { container: ContainerId, generation: u64 },
}

impl AttachOutcome {
    pub fn handle(&self) -> Option<&SurfaceHandle> {
        match self {
            Self::Ready(handle) => Some(handle),
            Self::Placeholder { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    /// Container still occupied after the retry budget ran out.
    ContainerBusy { container: ContainerId, attempts: u32 },
    /// Handle refers to an incarnation that is no longer live.
    StaleHandle(String),
    /// `settle` called for a container with no attach in progress.
    NotAttached(ContainerId),
    Backend(MapBackendError),
}

impl Display for SurfaceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContainerBusy {
                container,
                attempts,
            } => write!(
                f,
                "container `{container}` still busy after {attempts} attach attempts"
            ),
            Self::StaleHandle(handle) => write!(f, "surface handle {handle} is stale"),
            Self::NotAttached(container) => {
                write!(f, "container `{container}` has no surface attach in progress")
            }
            Self::Backend(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SurfaceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<MapBackendError> for SurfaceError {
    fn from(value: MapBackendError) -> Self {
        Self::Backend(value)
    }
}

impl Classify for SurfaceError {
    fn kind(&self) -> ErrorKind {
        match self {
            // Raised only after the retry budget; logged at error level.
            Self::ContainerBusy { .. } => ErrorKind::TransientSurfaceConflict,
            Self::StaleHandle(_) | Self::NotAttached(_) | Self::Backend(_) => {
                ErrorKind::InvalidInput
            }
        }
    }
}

#[derive(Debug)]
struct LiveSurface {
    surface: SurfaceId,
    listeners: Vec<ListenerId>,
    controls: Vec<ControlId>,
    layers: Vec<LayerId>,
}

impl LiveSurface {
    fn new(surface: SurfaceId) -> Self {
        Self {
            surface,
            listeners: Vec::new(),
            controls: Vec::new(),
            layers: Vec::new(),
        }
    }
}

#[derive(Debug)]
enum SlotState {
    Idle,
    Live(LiveSurface),
    Pending { view: ViewState, attempts: u32 },
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    state: SlotState,
}

/// Owns surfaces of every container driven through one backend.
pub struct MapSurfaceManager<B: MapBackend> {
    backend: B,
    slots: BTreeMap<ContainerId, Slot>,
    retry_budget: u32,
}

impl<B: MapBackend> MapSurfaceManager<B> {
    pub fn new(backend: B, config: &MapConfig) -> Self {
        Self {
            backend,
            slots: BTreeMap::new(),
            retry_budget: config.attach_retry_budget,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Attaches a new surface incarnation to `container`.
    ///
    /// A still-live earlier incarnation is torn down and the attach is
    /// deferred to `settle`, as is an attach the backend refuses because
    /// the container is still occupied.
    pub fn attach(
        &mut self,
        container: &ContainerId,
        view: ViewState,
    ) -> Result<AttachOutcome, SurfaceError> {
        let slot = self.slots.entry(container.clone()).or_insert(Slot {
            generation: 0,
            state: SlotState::Idle,
        });
        slot.generation += 1;
        let generation = slot.generation;

        let previous = std::mem::replace(&mut slot.state, SlotState::Idle);
        if let SlotState::Live(live) = previous {
            debug!(
                "event=surface_attach module=map status=conflict container={} generation={} previous={}",
                container, generation, live.surface
            );
            release(&mut self.backend, live);
            slot.state = SlotState::Pending { view, attempts: 0 };
            return Ok(AttachOutcome::Placeholder {
                container: container.clone(),
                generation,
            });
        }

        match self.backend.create_surface(container, view) {
            Ok(surface) => {
                slot.state = SlotState::Live(LiveSurface::new(surface));
                info!(
                    "event=surface_attach module=map status=ok container={} generation={} surface={}",
                    container, generation, surface
                );
                Ok(AttachOutcome::Ready(SurfaceHandle {
                    container: container.clone(),
                    generation,
                    surface,
                }))
            }
            Err(MapBackendError::AlreadyInitialized(_)) => {
                debug!(
                    "event=surface_attach module=map status=conflict container={} generation={} previous=tearing_down",
                    container, generation
                );
                slot.state = SlotState::Pending { view, attempts: 0 };
                Ok(AttachOutcome::Placeholder {
                    container: container.clone(),
                    generation,
                })
            }
            Err(err) => {
                error!(
                    "event=surface_attach module=map status=error container={} generation={} error={}",
                    container, generation, err
                );
                Err(err.into())
            }
        }
    }

    /// Retries a deferred attach. Each call that finds the container still
    /// busy consumes one retry.
    pub fn settle(&mut self, container: &ContainerId) -> Result<AttachOutcome, SurfaceError> {
        let budget = self.retry_budget;
        let Some(slot) = self.slots.get_mut(container) else {
            return Err(SurfaceError::NotAttached(container.clone()));
        };
        let generation = slot.generation;

        let (view, attempts) = match &slot.state {
            SlotState::Live(live) => {
                return Ok(AttachOutcome::Ready(SurfaceHandle {
                    container: container.clone(),
                    generation,
                    surface: live.surface,
                }))
            }
            SlotState::Idle => return Err(SurfaceError::NotAttached(container.clone())),
            SlotState::Pending { view, attempts } => (*view, *attempts + 1),
        };

        if self.backend.container_ready(container) {
            match self.backend.create_surface(container, view) {
                Ok(surface) => {
                    slot.state = SlotState::Live(LiveSurface::new(surface));
                    info!(
                        "event=surface_attach module=map status=ok container={} generation={} surface={} attempts={}",
                        container, generation, surface, attempts
                    );
                    return Ok(AttachOutcome::Ready(SurfaceHandle {
                        container: container.clone(),
                        generation,
                        surface,
                    }));
                }
                Err(MapBackendError::AlreadyInitialized(_)) => {}
                Err(err) => {
                    slot.state = SlotState::Idle;
                    return Err(err.into());
                }
            }
        }

        if attempts >= budget {
            slot.state = SlotState::Idle;
            error!(
                "event=surface_attach module=map status=error container={} generation={} attempts={} reason=container_busy",
                container, generation, attempts
            );
            return Err(SurfaceError::ContainerBusy {
                container: container.clone(),
                attempts,
            });
        }
        slot.state = SlotState::Pending { view, attempts };
        Ok(AttachOutcome::Placeholder {
            container: container.clone(),
            generation,
        })
    }

    /// Tears down the incarnation behind `handle`. Stale handles are a no-op.
    /// Returns whether a surface was torn down.
    pub fn detach(&mut self, handle: &SurfaceHandle) -> bool {
        if self.validate(handle).is_err() {
            debug!(
                "event=surface_detach module=map status=skip handle={} reason=stale",
                handle
            );
            return false;
        }
        self.detach_container(&handle.container)
    }

    /// Tears down whatever `container` holds, including a pending attach.
    pub fn detach_container(&mut self, container: &ContainerId) -> bool {
        let Some(slot) = self.slots.get_mut(container) else {
            return false;
        };
        match std::mem::replace(&mut slot.state, SlotState::Idle) {
            SlotState::Live(live) => {
                let surface = live.surface;
                release(&mut self.backend, live);
                info!(
                    "event=surface_detach module=map status=ok container={} generation={} surface={}",
                    container, slot.generation, surface
                );
                true
            }
            SlotState::Pending { .. } => {
                debug!(
                    "event=surface_detach module=map status=ok container={} generation={} pending=cancelled",
                    container, slot.generation
                );
                false
            }
            SlotState::Idle => false,
        }
    }

    /// Detach followed by a fresh attach.
    pub fn replace(
        &mut self,
        container: &ContainerId,
        view: ViewState,
    ) -> Result<AttachOutcome, SurfaceError> {
        self.detach_container(container);
        self.attach(container, view)
    }

    /// Current live handle of `container`.
    pub fn current(&self, container: &ContainerId) -> Option<SurfaceHandle> {
        let slot = self.slots.get(container)?;
        match &slot.state {
            SlotState::Live(live) => Some(SurfaceHandle {
                container: container.clone(),
                generation: slot.generation,
                surface: live.surface,
            }),
            _ => None,
        }
    }

    pub fn is_live(&self, handle: &SurfaceHandle) -> bool {
        self.validate(handle).is_ok()
    }

    /// Confirms `handle` is the container's live incarnation.
    pub fn validate(&self, handle: &SurfaceHandle) -> Result<SurfaceId, SurfaceError> {
        match self.slots.get(&handle.container) {
            Some(Slot {
                generation,
                state: SlotState::Live(live),
            }) if *generation == handle.generation && live.surface == handle.surface => {
                Ok(live.surface)
            }
            _ => Err(SurfaceError::StaleHandle(handle.to_string())),
        }
    }

    pub fn add_layer(
        &mut self,
        handle: &SurfaceHandle,
        spec: LayerSpec,
    ) -> Result<LayerId, SurfaceError> {
        let surface = self.validate(handle)?;
        let layer = self.backend.add_layer(surface, spec)?;
        self.live_mut(handle)?.layers.push(layer);
        Ok(layer)
    }

    pub fn remove_layer(
        &mut self,
        handle: &SurfaceHandle,
        layer: LayerId,
    ) -> Result<(), SurfaceError> {
        let surface = self.validate(handle)?;
        self.live_mut(handle)?.layers.retain(|owned| *owned != layer);
        self.backend.remove_layer(surface, layer)?;
        Ok(())
    }

    pub fn set_feature_style(
        &mut self,
        handle: &SurfaceHandle,
        layer: LayerId,
        site_id: SiteId,
        style: &ShapeStyle,
    ) -> Result<(), SurfaceError> {
        let surface = self.validate(handle)?;
        self.backend
            .set_feature_style(surface, layer, site_id, style)?;
        Ok(())
    }

    pub fn add_control(
        &mut self,
        handle: &SurfaceHandle,
        spec: ControlSpec,
    ) -> Result<ControlId, SurfaceError> {
        let surface = self.validate(handle)?;
        let control = self.backend.add_control(surface, spec)?;
        self.live_mut(handle)?.controls.push(control);
        Ok(control)
    }

    pub fn remove_control(
        &mut self,
        handle: &SurfaceHandle,
        control: ControlId,
    ) -> Result<(), SurfaceError> {
        let surface = self.validate(handle)?;
        self.live_mut(handle)?
            .controls
            .retain(|owned| *owned != control);
        self.backend.remove_control(surface, control)?;
        Ok(())
    }

    pub fn subscribe(
        &mut self,
        handle: &SurfaceHandle,
        kind: EventKind,
    ) -> Result<ListenerId, SurfaceError> {
        let surface = self.validate(handle)?;
        let listener = self.backend.subscribe(surface, kind)?;
        self.live_mut(handle)?.listeners.push(listener);
        Ok(listener)
    }

    pub fn unsubscribe(
        &mut self,
        handle: &SurfaceHandle,
        listener: ListenerId,
    ) -> Result<(), SurfaceError> {
        let surface = self.validate(handle)?;
        self.live_mut(handle)?
            .listeners
            .retain(|owned| *owned != listener);
        self.backend.unsubscribe(surface, listener)?;
        Ok(())
    }

    pub fn set_view(&mut self, handle: &SurfaceHandle, view: ViewState) -> Result<(), SurfaceError> {
        let surface = self.validate(handle)?;
        self.backend.set_view(surface, view)?;
        Ok(())
    }

    pub fn fit_bounds(
        &mut self,
        handle: &SurfaceHandle,
        bounds: Bounds,
        padding_px: u32,
    ) -> Result<(), SurfaceError> {
        let surface = self.validate(handle)?;
        self.backend.fit_bounds(surface, bounds, padding_px)?;
        Ok(())
    }

    fn live_mut(&mut self, handle: &SurfaceHandle) -> Result<&mut LiveSurface, SurfaceError> {
        match self.slots.get_mut(&handle.container) {
            Some(Slot {
                state: SlotState::Live(live),
                ..
            }) => Ok(live),
            _ => Err(SurfaceError::StaleHandle(handle.to_string())),
        }
    }
}

/// Releases listeners, controls and layers, then destroys the surface.
/// Teardown is best effort: backend failures are logged and skipped.
fn release<B: MapBackend>(backend: &mut B, live: LiveSurface) {
    let surface = live.surface;
    for listener in live.listeners {
        if let Err(err) = backend.unsubscribe(surface, listener) {
            warn!("event=surface_release module=map status=error surface={surface} resource={listener} error={err}");
        }
    }
    for control in live.controls {
        if let Err(err) = backend.remove_control(surface, control) {
            warn!("event=surface_release module=map status=error surface={surface} resource={control} error={err}");
        }
    }
    for layer in live.layers {
        if let Err(err) = backend.remove_layer(surface, layer) {
            warn!("event=surface_release module=map status=error surface={surface} resource={layer} error={err}");
        }
    }
    if let Err(err) = backend.destroy_surface(surface) {
        warn!("event=surface_release module=map status=error surface={surface} error={err}");
    }
}
