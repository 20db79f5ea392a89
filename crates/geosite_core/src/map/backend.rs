//! Rendering backend seam implemented by the UI shell.
//!
//! The map library and its drawing tool live outside core. Core drives
//! them only through `MapBackend`, using opaque ids for every resource it
//! creates so that `MapSurfaceManager` can release them on teardown.

use crate::geometry::codec::{LatLng, RenderShape};
use crate::geometry::polygon::Bounds;
use crate::model::site::SiteId;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Logical DOM/widget container a surface is bound to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContainerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! backend_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        pub struct $name(pub u64);

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

backend_id!(SurfaceId, "surface");
backend_id!(LayerId, "layer");
backend_id!(ControlId, "control");
backend_id!(ListenerId, "listener");

/// Viewport center and zoom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewState {
    pub center: LatLng,
    pub zoom: u8,
}

/// Vector style applied to one rendered shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShapeStyle {
    pub stroke_color: &'static str,
    pub fill_color: &'static str,
    pub fill_opacity: f32,
    pub weight: f32,
    pub dashed: bool,
}

impl ShapeStyle {
    /// Resting style of a committed site.
    pub const fn site_base() -> Self {
        Self {
            stroke_color: "#2e7d32",
            fill_color: "#66bb6a",
            fill_opacity: 0.3,
            weight: 2.0,
            dashed: false,
        }
    }

    /// Hover emphasis of a committed site.
    pub const fn site_hover() -> Self {
        Self {
            stroke_color: "#1b5e20",
            fill_color: "#66bb6a",
            fill_opacity: 0.55,
            weight: 4.0,
            dashed: false,
        }
    }

    /// Uncommitted ring awaiting confirmation.
    pub const fn provisional() -> Self {
        Self {
            stroke_color: "#f57c00",
            fill_color: "#ffb74d",
            fill_opacity: 0.2,
            weight: 3.0,
            dashed: true,
        }
    }
}

/// Popup shown for a site feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopupContent {
    pub title: String,
    pub carbon_sequestration_tonnes: f64,
    pub biodiversity_score: f64,
    /// Whether the "view details" affordance is offered.
    pub detail_action: bool,
}

/// One site in the sites layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteFeature {
    pub site_id: SiteId,
    pub shape: RenderShape,
    pub base_style: ShapeStyle,
    pub hover_style: ShapeStyle,
    pub popup: PopupContent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "layer", rename_all = "snake_case")]
pub enum LayerSpec {
    /// Committed sites of the selected project.
    Sites { features: Vec<SiteFeature> },
    /// Drawn ring awaiting confirmation.
    ProvisionalOverlay { shape: RenderShape, style: ShapeStyle },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControlSpec {
    /// Drawing tool restricted to one polygon ring at a time.
    PolygonDrawTool,
}

/// Backend event channels a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    DrawCreated,
    DrawDeleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapBackendError {
    /// Container already hosts a surface, possibly one still tearing down.
    AlreadyInitialized(ContainerId),
    UnknownSurface(SurfaceId),
    UnknownLayer(LayerId),
    UnknownControl(ControlId),
    UnknownListener(ListenerId),
    /// Any other backend failure, carried as text.
    Backend(String),
}

impl Display for MapBackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyInitialized(container) => {
                write!(f, "container `{container}` already hosts a surface")
            }
            Self::UnknownSurface(id) => write!(f, "unknown {id}"),
            Self::UnknownLayer(id) => write!(f, "unknown {id}"),
            Self::UnknownControl(id) => write!(f, "unknown {id}"),
            Self::UnknownListener(id) => write!(f, "unknown {id}"),
            Self::Backend(message) => write!(f, "map backend failure: {message}"),
        }
    }
}

impl Error for MapBackendError {}

pub type BackendResult<T> = Result<T, MapBackendError>;

/// Operations core needs from the map library.
///
/// Implementations must report `AlreadyInitialized` instead of silently
/// stacking a second surface on a container.
pub trait MapBackend {
    fn create_surface(&mut self, container: &ContainerId, view: ViewState)
        -> BackendResult<SurfaceId>;
    /// Begins teardown. The container may stay occupied until the backend
    /// finishes; `container_ready` reports when it is free again.
    fn destroy_surface(&mut self, surface: SurfaceId) -> BackendResult<()>;
    fn container_ready(&self, container: &ContainerId) -> bool;

    fn add_layer(&mut self, surface: SurfaceId, spec: LayerSpec) -> BackendResult<LayerId>;
    fn remove_layer(&mut self, surface: SurfaceId, layer: LayerId) -> BackendResult<()>;
    fn set_feature_style(
        &mut self,
        surface: SurfaceId,
        layer: LayerId,
        site_id: SiteId,
        style: &ShapeStyle,
    ) -> BackendResult<()>;

    fn add_control(&mut self, surface: SurfaceId, spec: ControlSpec) -> BackendResult<ControlId>;
    fn remove_control(&mut self, surface: SurfaceId, control: ControlId) -> BackendResult<()>;

    fn subscribe(&mut self, surface: SurfaceId, kind: EventKind) -> BackendResult<ListenerId>;
    fn unsubscribe(&mut self, surface: SurfaceId, listener: ListenerId) -> BackendResult<()>;

    fn set_view(&mut self, surface: SurfaceId, view: ViewState) -> BackendResult<()>;
    fn fit_bounds(&mut self, surface: SurfaceId, bounds: Bounds, padding_px: u32)
        -> BackendResult<()>;
}
