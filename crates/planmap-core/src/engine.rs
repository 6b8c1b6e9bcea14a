//! The planning map: drawing session, mirrors, view sync and overlays wired
//! together behind one owner.
//!
//! Hosts drive a [`PlanningMap`] from their event handlers and drain
//! [`EngineEvent`]s with [`PlanningMap::poll_events`] to show warnings and
//! spinners.

use crate::config::EngineConfig;
use crate::events::EngineEvent;
use crate::geometry::GeometryPredicates;
use crate::layers::{self, LayerCache, LayerData, LayerError, LayerFetcher, LayerRequest, LayerStatus};
use crate::legend::{self, ColormapSource, Legend, LegendError};
use crate::mirror::MirrorRegistry;
use crate::session::{DrawMode, DrawingSession, EditOutcome, PlanningPolygon, PolygonId, SessionError, VertexOutcome};
use crate::style::PolygonStyle;
use crate::view_sync::ViewSyncCoordinator;
use crate::viewport::{LayerHandle, MapLayer, Viewport, ViewportEvent, ViewportId, Viewports};
use geo::MultiPolygon;
use geojson::{Feature, FeatureCollection, GeoJson};
use kurbo::Point;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Engine errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Layer(#[from] LayerError),
    #[error(transparent)]
    Legend(#[from] LegendError),
    #[error("Viewport not found: {0}")]
    UnknownViewport(ViewportId),
    #[error("No colormap source configured")]
    NoColormapSource,
    #[error("Invalid GeoJSON: {0}")]
    GeoJson(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Planning-area authoring engine.
pub struct PlanningMap {
    config: EngineConfig,
    session: DrawingSession,
    viewports: Viewports,
    mirrors: MirrorRegistry,
    view_sync: ViewSyncCoordinator,
    layers: LayerCache,
    colormaps: Option<Box<dyn ColormapSource>>,
    /// Overlays each viewport wants; None while the load is in flight.
    overlays: HashMap<(ViewportId, String), Option<LayerHandle>>,
}

impl PlanningMap {
    /// Create an engine with no viewports.
    pub fn new(config: EngineConfig, fetcher: Box<dyn LayerFetcher>) -> Self {
        Self {
            session: DrawingSession::new(&config),
            mirrors: MirrorRegistry::new(config.mirror_style.clone()),
            config,
            viewports: Viewports::new(),
            view_sync: ViewSyncCoordinator::new(),
            layers: LayerCache::new(fetcher),
            colormaps: None,
            overlays: HashMap::new(),
        }
    }

    /// Replace the geometry predicates. Only meaningful before any drawing.
    pub fn with_predicates(mut self, predicates: Box<dyn GeometryPredicates>) -> Self {
        self.session = DrawingSession::with_predicates(&self.config, predicates);
        self
    }

    pub fn with_colormaps(mut self, source: Box<dyn ColormapSource>) -> Self {
        self.colormaps = Some(source);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn session(&self) -> &DrawingSession {
        &self.session
    }

    pub fn mirrors(&self) -> &MirrorRegistry {
        &self.mirrors
    }

    pub fn layers(&self) -> &LayerCache {
        &self.layers
    }

    pub fn view_sync(&self) -> &ViewSyncCoordinator {
        &self.view_sync
    }

    pub fn viewport(&self, id: ViewportId) -> Option<&(dyn Viewport + 'static)> {
        self.viewports.get(id)
    }

    pub fn viewport_ids(&self) -> Vec<ViewportId> {
        self.viewports.ids().collect()
    }

    pub fn primary(&self) -> Option<ViewportId> {
        self.view_sync.primary()
    }

    fn require_viewport(&self, id: ViewportId) -> EngineResult<()> {
        if self.viewports.contains(id) {
            Ok(())
        } else {
            Err(EngineError::UnknownViewport(id))
        }
    }

    // --- Viewports ---

    /// Register a viewport. The first one becomes primary. Existing polygons
    /// are mirrored onto it.
    pub fn add_viewport(&mut self, viewport: Box<dyn Viewport>) -> ViewportId {
        let id = self.viewports.insert(viewport);
        self.mirrors.register(id);
        self.view_sync.on_registered(id);

        let polygons: Vec<&PlanningPolygon> = self.session.polygons().collect();
        for polygon in polygons {
            self.mirrors.mirror_onto(&mut self.viewports, id, polygon);
        }
        log::info!("registered {}", id);
        id
    }

    /// Unregister a viewport, removing its mirrors and overlays, and hand it back.
    pub fn remove_viewport(&mut self, id: ViewportId) -> EngineResult<Box<dyn Viewport>> {
        self.require_viewport(id)?;
        self.mirrors.unregister(&mut self.viewports, id);

        let names: Vec<String> = self
            .overlays
            .keys()
            .filter(|(v, _)| *v == id)
            .map(|(_, name)| name.clone())
            .collect();
        for name in names {
            self.hide_layer(id, &name);
        }

        let viewport = self.viewports.remove(id).ok_or(EngineError::UnknownViewport(id))?;
        self.view_sync.on_unregistered(id, self.viewports.ids());
        log::info!("unregistered {}", id);
        Ok(viewport)
    }

    pub fn set_primary(&mut self, id: ViewportId) -> EngineResult<()> {
        self.require_viewport(id)?;
        self.view_sync.set_primary(id);
        Ok(())
    }

    /// Re-check which secondaries follow the primary's pan/zoom.
    pub fn refresh_visibility<F>(&mut self, is_visible: F) -> usize
    where
        F: Fn(ViewportId) -> bool,
    {
        let ids: Vec<ViewportId> = self.viewports.ids().collect();
        self.view_sync.refresh_visibility(&mut self.viewports, ids, is_visible)
    }

    /// Push the primary's view to every synced secondary.
    pub fn sync_views(&mut self) -> usize {
        self.view_sync.broadcast(&mut self.viewports)
    }

    /// Route an event from a viewport's own dispatch.
    ///
    /// Clicks on the primary while drawing add vertices and a double click
    /// finishes the shape; pans and zooms on the primary are broadcast.
    /// Everything else is ignored.
    pub fn handle_event(&mut self, source: ViewportId, event: ViewportEvent) -> EngineResult<()> {
        self.require_viewport(source)?;
        let from_primary = Some(source) == self.primary();
        match event {
            ViewportEvent::ViewChanged => {
                self.view_sync.handle_view_change(&mut self.viewports, source);
            }
            ViewportEvent::Click(point) if from_primary && self.session.is_drawing() => {
                self.add_vertex(point)?;
            }
            ViewportEvent::DoubleClick(point) if from_primary && self.session.is_drawing() => {
                self.add_vertex(point)?;
                self.finish_drawing()?;
            }
            ViewportEvent::Click(_) | ViewportEvent::DoubleClick(_) => {}
        }
        Ok(())
    }

    // --- Drawing ---

    pub fn mode(&self) -> DrawMode {
        self.session.mode()
    }

    pub fn start_drawing(&mut self) -> EngineResult<()> {
        Ok(self.session.start_drawing()?)
    }

    pub fn add_vertex(&mut self, point: Point) -> EngineResult<VertexOutcome> {
        Ok(self.session.add_vertex(point)?)
    }

    pub fn cancel_drawing(&mut self) -> EngineResult<()> {
        Ok(self.session.cancel_drawing()?)
    }

    /// Close the shape being drawn and mirror it onto every viewport except
    /// the primary, where it was drawn.
    pub fn finish_drawing(&mut self) -> EngineResult<Option<PolygonId>> {
        let committed = self.session.finish_drawing()?;
        if let Some(id) = committed {
            self.mirror_created(id, self.primary());
        }
        Ok(committed)
    }

    /// Commit a single uploaded geometry and mirror it onto every viewport.
    pub fn upload_polygon(&mut self, geometry: MultiPolygon<f64>) -> EngineResult<Option<PolygonId>> {
        let committed = self.session.upload_polygon(geometry, self.config.validate_uploads)?;
        if let Some(id) = committed {
            self.mirror_created(id, None);
        }
        Ok(committed)
    }

    /// Commit every polygonal feature of a GeoJSON document.
    ///
    /// Features that are degenerate or conflict with what is already
    /// committed are skipped. Returns the ids of committed polygons.
    pub fn upload_geojson(&mut self, source: &str) -> EngineResult<Vec<PolygonId>> {
        let features = layers::features_from_geojson(source).map_err(EngineError::GeoJson)?;
        let mut committed = Vec::new();
        for feature in features {
            committed.extend(self.upload_polygon(feature.geometry)?);
        }
        Ok(committed)
    }

    fn mirror_created(&mut self, id: PolygonId, origin: Option<ViewportId>) {
        if let Some(polygon) = self.session.get(id) {
            self.mirrors.mirror_create(&mut self.viewports, polygon, origin);
        }
    }

    pub fn begin_edit(&mut self, id: PolygonId) -> EngineResult<()> {
        Ok(self.session.begin_edit(id)?)
    }

    pub fn finish_edit(&mut self) -> EngineResult<()> {
        Ok(self.session.finish_edit()?)
    }

    /// Replace a polygon's geometry and refresh its mirrors. Overlap only
    /// warns; the edit stands.
    pub fn edit_polygon(&mut self, id: PolygonId, geometry: MultiPolygon<f64>) -> EngineResult<EditOutcome> {
        let outcome = self.session.edit_polygon(id, geometry)?;
        let origin = self.primary();
        if let Some(polygon) = self.session.get(id) {
            self.mirrors.mirror_update(&mut self.viewports, polygon, origin);
        }
        Ok(outcome)
    }

    /// Delete a polygon together with all of its mirrors.
    pub fn delete_polygon(&mut self, id: PolygonId) -> EngineResult<PlanningPolygon> {
        let polygon = self.session.delete_polygon(id)?;
        self.mirrors.mirror_delete(&mut self.viewports, id);
        Ok(polygon)
    }

    /// Delete every polygon and every mirror.
    pub fn clear_all(&mut self) -> usize {
        let removed = self.session.clear_all();
        self.mirrors.clear(&mut self.viewports);
        removed.len()
    }

    /// Restyle one viewport's mirror, e.g. for hover. `None` restores the
    /// configured mirror style.
    pub fn set_mirror_style(
        &mut self,
        viewport: ViewportId,
        id: PolygonId,
        style: Option<PolygonStyle>,
    ) -> EngineResult<bool> {
        self.require_viewport(viewport)?;
        let polygon = self.session.get(id).ok_or(SessionError::UnknownPolygon(id))?;
        Ok(self.mirrors.set_mirror_style(&mut self.viewports, viewport, polygon, style))
    }

    /// Export the planning area as a GeoJSON FeatureCollection.
    pub fn to_geojson(&self) -> String {
        let features = self
            .session
            .polygons()
            .map(|polygon| {
                let mut properties = serde_json::Map::new();
                properties.insert("id".into(), polygon.id().to_string().into());
                properties.insert("area".into(), polygon.area().into());
                properties.insert("stroke".into(), polygon.style.stroke_color.to_hex().into());
                Feature {
                    bbox: None,
                    geometry: Some(geojson::Geometry::new(geojson::Value::from(&polygon.geometry))),
                    id: Some(geojson::feature::Id::String(polygon.id().to_string())),
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
            .collect();
        GeoJson::from(FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        })
        .to_string()
    }

    // --- Overlays ---

    /// Show a boundary or condition layer on a viewport, loading it if needed.
    pub fn show_layer(&mut self, viewport: ViewportId, name: &str) -> EngineResult<LayerStatus> {
        self.require_viewport(viewport)?;
        let key = (viewport, name.to_string());
        if let Some(Some(_)) = self.overlays.get(&key) {
            return Ok(LayerStatus::Loaded);
        }

        match self.layers.load_layer(name) {
            LayerRequest::Ready(data) => {
                let handle = self.attach(viewport, data);
                self.overlays.insert(key, handle);
            }
            LayerRequest::Pending => {
                self.overlays.insert(key, None);
            }
        }
        // Fetchers may deliver synchronously
        self.poll();
        Ok(self.layers.status(name))
    }

    /// Stop showing a layer on a viewport. A load still in flight is kept in
    /// the cache but no longer attached here. Returns false if it was not shown.
    pub fn hide_layer(&mut self, viewport: ViewportId, name: &str) -> bool {
        match self.overlays.remove(&(viewport, name.to_string())) {
            Some(Some(handle)) => {
                if let Some(target) = self.viewports.get_mut(viewport) {
                    target.remove_layer(handle);
                }
                true
            }
            Some(None) => true,
            None => false,
        }
    }

    fn attach(&mut self, viewport: ViewportId, data: Arc<LayerData>) -> Option<LayerHandle> {
        let target = self.viewports.get_mut(viewport)?;
        Some(target.add_layer(MapLayer::Overlay(data)))
    }

    /// Apply finished layer loads, attaching each loaded layer to every
    /// viewport still waiting for it. Returns the number of loads applied.
    pub fn poll(&mut self) -> usize {
        let finished = self.layers.poll_completions();
        for done in &finished {
            let waiting: Vec<ViewportId> = self
                .overlays
                .iter()
                .filter(|((_, name), handle)| *name == done.name && handle.is_none())
                .map(|((viewport, _), _)| *viewport)
                .collect();
            for viewport in waiting {
                let key = (viewport, done.name.clone());
                match &done.result {
                    Ok(data) => {
                        let handle = self.attach(viewport, Arc::clone(data));
                        self.overlays.insert(key, handle);
                    }
                    // Nothing to show; a later show_layer retries
                    Err(_) => {
                        self.overlays.remove(&key);
                    }
                }
            }
        }
        finished.len()
    }

    pub fn layer_status(&self, name: &str) -> LayerStatus {
        self.layers.status(name)
    }

    /// Whether `name` is attached to `viewport` (false while still loading).
    pub fn is_layer_shown(&self, viewport: ViewportId, name: &str) -> bool {
        matches!(self.overlays.get(&(viewport, name.to_string())), Some(Some(_)))
    }

    // --- Legends ---

    /// Fetch a colormap by name and build its legend.
    pub fn legend(&self, colormap: &str) -> EngineResult<Legend> {
        let source = self.colormaps.as_ref().ok_or(EngineError::NoColormapSource)?;
        let config = source.colormap(colormap)?;
        Ok(legend::build_legend(&config))
    }

    // --- Events ---

    /// Take every event emitted since the last call.
    pub fn poll_events(&mut self) -> Vec<EngineEvent> {
        let mut events = self.session.take_events();
        events.extend(self.layers.take_events());
        events
    }
}
