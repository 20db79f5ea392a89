//! Sites feature layer kept in step with the selected project.
//!
//! # Responsibility
//! - Render the full site collection as one feature layer, replacing any
//!   previous rendering wholesale.
//! - Translate feature interactions into selection and detail requests.
//! - Fit the viewport to rendered sites, or reset to the world view.
//!
//! # Invariants
//! - At most one sites layer exists per synchronizer.
//! - Events addressed to a layer other than the current one are ignored.

use crate::config::MapConfig;
use crate::geometry::codec::{compute_extent, to_renderable};
use crate::geometry::polygon::Bounds;
use crate::map::backend::{
    LayerId, LayerSpec, MapBackend, PopupContent, ShapeStyle, SiteFeature, ViewState,
};
use crate::map::surface::{MapSurfaceManager, SurfaceError, SurfaceHandle};
use crate::model::site::{Site, SiteId};
use log::{debug, warn};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Viewport {
    Fitted(Bounds),
    DefaultWorld,
}

/// What one `render` call produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSummary {
    pub layer: LayerId,
    pub rendered: usize,
    pub viewport: Viewport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureEventKind {
    Click,
    HoverIn,
    HoverOut,
    /// "View details" affordance in the popup.
    OpenDetail,
}

/// Interaction reported by the backend for one rendered site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureEvent {
    pub layer: LayerId,
    pub site_id: SiteId,
    pub kind: FeatureEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SiteEvent {
    Selected(SiteId),
    DetailRequested(SiteId),
}

#[derive(Debug)]
struct RenderedLayer {
    surface: SurfaceHandle,
    layer: LayerId,
    sites: BTreeSet<SiteId>,
}

#[derive(Debug)]
pub struct SiteLayerSynchronizer {
    fit_padding_px: u32,
    default_view: ViewState,
    current: Option<RenderedLayer>,
}

impl SiteLayerSynchronizer {
    pub fn new(config: &MapConfig) -> Self {
        Self {
            fit_padding_px: config.fit_padding_px,
            default_view: ViewState {
                center: config.default_center,
                zoom: config.default_zoom,
            },
            current: None,
        }
    }

    pub fn default_view(&self) -> ViewState {
        self.default_view
    }

    pub fn current_layer(&self) -> Option<LayerId> {
        self.current.as_ref().map(|rendered| rendered.layer)
    }

    /// Replaces the rendered layer with `sites` and refits the viewport.
    pub fn render<B: MapBackend>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
        handle: &SurfaceHandle,
        sites: &[Site],
    ) -> Result<RenderSummary, SurfaceError> {
        manager.validate(handle)?;
        if let Some(previous) = self.current.take() {
            if previous.surface == *handle {
                manager.remove_layer(handle, previous.layer)?;
            }
        }

        let features: Vec<SiteFeature> = sites.iter().map(site_feature).collect();
        let layer = manager.add_layer(handle, LayerSpec::Sites { features })?;
        self.current = Some(RenderedLayer {
            surface: handle.clone(),
            layer,
            sites: sites.iter().map(|site| site.id).collect(),
        });

        let viewport = match compute_extent(sites.iter().map(|site| &site.polygon)) {
            Some(bounds) => {
                manager.fit_bounds(handle, bounds, self.fit_padding_px)?;
                Viewport::Fitted(bounds)
            }
            None => {
                manager.set_view(handle, self.default_view)?;
                Viewport::DefaultWorld
            }
        };

        debug!(
            "event=layer_render module=map status=ok surface={} layer={} sites={}",
            handle,
            layer,
            sites.len()
        );
        Ok(RenderSummary {
            layer,
            rendered: sites.len(),
            viewport,
        })
    }

    /// Maps a feature interaction to a site event, applying hover styles.
    pub fn handle_feature_event<B: MapBackend>(
        &mut self,
        manager: &mut MapSurfaceManager<B>,
        event: FeatureEvent,
    ) -> Result<Option<SiteEvent>, SurfaceError> {
        let Some(current) = &self.current else {
            return Ok(None);
        };
        if current.layer != event.layer
            || !current.sites.contains(&event.site_id)
            || !manager.is_live(&current.surface)
        {
            debug!(
                "event=feature_event module=map status=skip layer={} reason=stale",
                event.layer
            );
            return Ok(None);
        }

        match event.kind {
            FeatureEventKind::Click => Ok(Some(SiteEvent::Selected(event.site_id))),
            FeatureEventKind::OpenDetail => Ok(Some(SiteEvent::DetailRequested(event.site_id))),
            FeatureEventKind::HoverIn => {
                manager.set_feature_style(
                    &current.surface,
                    current.layer,
                    event.site_id,
                    &ShapeStyle::site_hover(),
                )?;
                Ok(None)
            }
            FeatureEventKind::HoverOut => {
                manager.set_feature_style(
                    &current.surface,
                    current.layer,
                    event.site_id,
                    &ShapeStyle::site_base(),
                )?;
                Ok(None)
            }
        }
    }

    /// Removes the rendered layer if its surface is still live.
    pub fn clear<B: MapBackend>(&mut self, manager: &mut MapSurfaceManager<B>) {
        if let Some(previous) = self.current.take() {
            if manager.is_live(&previous.surface) {
                if let Err(err) = manager.remove_layer(&previous.surface, previous.layer) {
                    warn!(
                        "event=layer_clear module=map status=error layer={} error={}",
                        previous.layer, err
                    );
                }
            }
        }
    }

    /// Drops layer bookkeeping after the surface went away.
    pub fn forget(&mut self) {
        self.current = None;
    }
}

fn site_feature(site: &Site) -> SiteFeature {
    SiteFeature {
        site_id: site.id,
        shape: to_renderable(&site.polygon),
        base_style: ShapeStyle::site_base(),
        hover_style: ShapeStyle::site_hover(),
        popup: PopupContent {
            title: site.name.clone(),
            carbon_sequestration_tonnes: site.carbon_sequestration_tonnes,
            biodiversity_score: site.biodiversity_score,
            detail_action: true,
        },
    }
}
