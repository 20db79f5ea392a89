//! In-memory `MapBackend` used by the CLI walkthrough and tests.
//!
//! Records every surface, layer, control, listener and viewport call. With
//! deferred teardown enabled, destroyed surfaces keep their container
//! occupied until `flush_teardowns`, mimicking libraries that release the
//! container asynchronously.

use crate::geometry::polygon::Bounds;
use crate::map::backend::{
    BackendResult, ContainerId, ControlId, ControlSpec, EventKind, LayerId, LayerSpec, ListenerId,
    MapBackend, MapBackendError, ShapeStyle, SurfaceId, ViewState,
};
use crate::model::site::SiteId;
use std::collections::BTreeMap;

/// Recorded state of one surface.
#[derive(Debug, Clone)]
pub struct SurfaceRecord {
    pub container: ContainerId,
    pub view: ViewState,
    pub layers: BTreeMap<LayerId, LayerSpec>,
    pub controls: BTreeMap<ControlId, ControlSpec>,
    pub listeners: BTreeMap<ListenerId, EventKind>,
    /// Styles set through `set_feature_style`, latest per site.
    pub feature_styles: BTreeMap<SiteId, ShapeStyle>,
    pub last_fit: Option<(Bounds, u32)>,
    pub tearing_down: bool,
}

impl SurfaceRecord {
    fn owns_children(&self) -> bool {
        !(self.layers.is_empty() && self.controls.is_empty() && self.listeners.is_empty())
    }
}

#[derive(Debug, Default)]
pub struct HeadlessMapBackend {
    next_id: u64,
    surfaces: BTreeMap<SurfaceId, SurfaceRecord>,
    occupied: BTreeMap<ContainerId, SurfaceId>,
    pending_teardown: Vec<SurfaceId>,
    deferred_teardown: bool,
    surfaces_created: usize,
    destroyed_with_children: usize,
}

impl HeadlessMapBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose teardowns complete only on `flush_teardowns`.
    pub fn with_deferred_teardown() -> Self {
        Self {
            deferred_teardown: true,
            ..Self::default()
        }
    }

    pub fn set_deferred_teardown(&mut self, deferred: bool) {
        self.deferred_teardown = deferred;
    }

    /// Completes pending teardowns and frees their containers.
    pub fn flush_teardowns(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending_teardown);
        for surface in &pending {
            self.forget(*surface);
        }
        pending.len()
    }

    /// Surfaces on `container` that are not tearing down.
    pub fn live_surfaces(&self, container: &ContainerId) -> usize {
        self.surfaces
            .values()
            .filter(|record| &record.container == container && !record.tearing_down)
            .count()
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&SurfaceRecord> {
        self.surfaces.get(&id)
    }

    /// Live surface currently bound to `container`, if any.
    pub fn surface_on(&self, container: &ContainerId) -> Option<(SurfaceId, &SurfaceRecord)> {
        self.surfaces
            .iter()
            .find(|(_, record)| &record.container == container && !record.tearing_down)
            .map(|(id, record)| (*id, record))
    }

    /// Listeners of `kind` on `surface`, ascending.
    pub fn listeners(&self, surface: SurfaceId, kind: EventKind) -> Vec<ListenerId> {
        self.surfaces
            .get(&surface)
            .map(|record| {
                record
                    .listeners
                    .iter()
                    .filter(|(_, candidate)| **candidate == kind)
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn surfaces_created(&self) -> usize {
        self.surfaces_created
    }

    /// Surfaces destroyed while still owning layers, controls or listeners.
    pub fn destroyed_with_children(&self) -> usize {
        self.destroyed_with_children
    }

    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn live_mut(&mut self, surface: SurfaceId) -> BackendResult<&mut SurfaceRecord> {
        match self.surfaces.get_mut(&surface) {
            Some(record) if !record.tearing_down => Ok(record),
            _ => Err(MapBackendError::UnknownSurface(surface)),
        }
    }

    fn forget(&mut self, surface: SurfaceId) {
        if let Some(record) = self.surfaces.remove(&surface) {
            if self.occupied.get(&record.container) == Some(&surface) {
                self.occupied.remove(&record.container);
            }
        }
    }
}

impl MapBackend for HeadlessMapBackend {
    fn create_surface(
        &mut self,
        container: &ContainerId,
        view: ViewState,
    ) -> BackendResult<SurfaceId> {
        if self.occupied.contains_key(container) {
            return Err(MapBackendError::AlreadyInitialized(container.clone()));
        }
        let id = SurfaceId(self.allocate());
        self.surfaces.insert(
            id,
            SurfaceRecord {
                container: container.clone(),
                view,
                layers: BTreeMap::new(),
                controls: BTreeMap::new(),
                listeners: BTreeMap::new(),
                feature_styles: BTreeMap::new(),
                last_fit: None,
                tearing_down: false,
            },
        );
        self.occupied.insert(container.clone(), id);
        self.surfaces_created += 1;
        Ok(id)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) -> BackendResult<()> {
        let deferred = self.deferred_teardown;
        let record = self.live_mut(surface)?;
        let leaked = record.owns_children();
        record.tearing_down = true;
        if leaked {
            self.destroyed_with_children += 1;
        }
        if deferred {
            self.pending_teardown.push(surface);
        } else {
            self.forget(surface);
        }
        Ok(())
    }

    fn container_ready(&self, container: &ContainerId) -> bool {
        !self.occupied.contains_key(container)
    }

    fn add_layer(&mut self, surface: SurfaceId, spec: LayerSpec) -> BackendResult<LayerId> {
        let id = LayerId(self.allocate());
        self.live_mut(surface)?.layers.insert(id, spec);
        Ok(id)
    }

    fn remove_layer(&mut self, surface: SurfaceId, layer: LayerId) -> BackendResult<()> {
        self.live_mut(surface)?
            .layers
            .remove(&layer)
            .map(|_| ())
            .ok_or(MapBackendError::UnknownLayer(layer))
    }

    fn set_feature_style(
        &mut self,
        surface: SurfaceId,
        layer: LayerId,
        site_id: SiteId,
        style: &ShapeStyle,
    ) -> BackendResult<()> {
        let record = self.live_mut(surface)?;
        if !record.layers.contains_key(&layer) {
            return Err(MapBackendError::UnknownLayer(layer));
        }
        record.feature_styles.insert(site_id, style.clone());
        Ok(())
    }

    fn add_control(&mut self, surface: SurfaceId, spec: ControlSpec) -> BackendResult<ControlId> {
        let id = ControlId(self.allocate());
        self.live_mut(surface)?.controls.insert(id, spec);
        Ok(id)
    }

    fn remove_control(&mut self, surface: SurfaceId, control: ControlId) -> BackendResult<()> {
        self.live_mut(surface)?
            .controls
            .remove(&control)
            .map(|_| ())
            .ok_or(MapBackendError::UnknownControl(control))
    }

    fn subscribe(&mut self, surface: SurfaceId, kind: EventKind) -> BackendResult<ListenerId> {
        let id = ListenerId(self.allocate());
        self.live_mut(surface)?.listeners.insert(id, kind);
        Ok(id)
    }

    fn unsubscribe(&mut self, surface: SurfaceId, listener: ListenerId) -> BackendResult<()> {
        self.live_mut(surface)?
            .listeners
            .remove(&listener)
            .map(|_| ())
            .ok_or(MapBackendError::UnknownListener(listener))
    }

    fn set_view(&mut self, surface: SurfaceId, view: ViewState) -> BackendResult<()> {
        let record = self.live_mut(surface)?;
        record.view = view;
        record.last_fit = None;
        Ok(())
    }

    fn fit_bounds(
        &mut self,
        surface: SurfaceId,
        bounds: Bounds,
        padding_px: u32,
    ) -> BackendResult<()> {
        self.live_mut(surface)?.last_fit = Some((bounds, padding_px));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::HeadlessMapBackend;
    use crate::geometry::codec::LatLng;
    use crate::map::backend::{ContainerId, MapBackend, MapBackendError, ViewState};

    fn world() -> ViewState {
        ViewState {
            center: LatLng::new(0.0, 0.0),
            zoom: 2,
        }
    }

    #[test]
    fn second_surface_on_container_is_rejected() {
        let mut backend = HeadlessMapBackend::new();
        let container = ContainerId::new("map");
        backend.create_surface(&container, world()).unwrap();
        let err = backend.create_surface(&container, world()).unwrap_err();
        assert_eq!(err, MapBackendError::AlreadyInitialized(container));
    }

    #[test]
    fn deferred_teardown_holds_container_until_flush() {
        let mut backend = HeadlessMapBackend::with_deferred_teardown();
        let container = ContainerId::new("map");
        let surface = backend.create_surface(&container, world()).unwrap();
        backend.destroy_surface(surface).unwrap();

        assert_eq!(backend.live_surfaces(&container), 0);
        assert!(!backend.container_ready(&container));
        assert_eq!(backend.flush_teardowns(), 1);
        assert!(backend.container_ready(&container));
    }
}
