//! Map viewport capability and the arena that owns the host's viewports.

use crate::layers::LayerData;
use crate::session::PolygonId;
use crate::style::PolygonStyle;
use geo::MultiPolygon;
use kurbo::Point;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Index of a viewport inside [`Viewports`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ViewportId(pub usize);

impl fmt::Display for ViewportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewport#{}", self.0)
    }
}

/// Opaque reference to a layer a viewport is rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerHandle(pub u64);

/// Something a viewport can render.
#[derive(Debug, Clone, PartialEq)]
pub enum MapLayer {
    /// Independent copy of a canonical planning polygon.
    Mirror {
        polygon: PolygonId,
        geometry: MultiPolygon<f64>,
        style: PolygonStyle,
    },
    /// A shared boundary or condition overlay.
    Overlay(Arc<LayerData>),
}

/// Input the host forwards from a viewport's own event dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewportEvent {
    /// Pointer click in map coordinates.
    Click(Point),
    /// Double click; closes the shape being drawn.
    DoubleClick(Point),
    /// Pan or zoom finished.
    ViewChanged,
}

/// A renderable map surface supplied by the host.
pub trait Viewport {
    /// Start rendering a layer.
    fn add_layer(&mut self, layer: MapLayer) -> LayerHandle;

    /// Stop rendering a layer. Returns false if the handle was unknown.
    fn remove_layer(&mut self, handle: LayerHandle) -> bool;

    fn center(&self) -> Point;

    fn set_center(&mut self, center: Point);

    fn zoom(&self) -> f64;

    fn set_zoom(&mut self, zoom: f64);
}

/// Arena of host viewports. Ids are slot indices and are never reused.
#[derive(Default)]
pub struct Viewports {
    slots: Vec<Option<Box<dyn Viewport>>>,
}

impl Viewports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a viewport and assign it the next id.
    pub fn insert(&mut self, viewport: Box<dyn Viewport>) -> ViewportId {
        self.slots.push(Some(viewport));
        ViewportId(self.slots.len() - 1)
    }

    pub fn remove(&mut self, id: ViewportId) -> Option<Box<dyn Viewport>> {
        self.slots.get_mut(id.0).and_then(Option::take)
    }

    pub fn contains(&self, id: ViewportId) -> bool {
        matches!(self.slots.get(id.0), Some(Some(_)))
    }

    pub fn get(&self, id: ViewportId) -> Option<&(dyn Viewport + 'static)> {
        self.slots.get(id.0).and_then(|slot| slot.as_deref())
    }

    pub fn get_mut(&mut self, id: ViewportId) -> Option<&mut (dyn Viewport + 'static)> {
        match self.slots.get_mut(id.0) {
            Some(Some(viewport)) => Some(&mut **viewport),
            _ => None,
        }
    }

    /// Ids of live viewports in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = ViewportId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| ViewportId(i))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct MemoryViewState {
    center: Point,
    zoom: f64,
    next_handle: u64,
    layers: Vec<(LayerHandle, MapLayer)>,
}

impl Default for MemoryViewState {
    fn default() -> Self {
        Self {
            center: Point::ZERO,
            zoom: 1.0,
            next_handle: 1,
            layers: Vec::new(),
        }
    }
}

/// In-memory viewport for testing and headless use.
///
/// Clones share state, so a host can keep a handle for inspection after
/// boxing one into [`Viewports`].
#[derive(Debug, Clone, Default)]
pub struct MemoryViewport {
    state: Rc<RefCell<MemoryViewState>>,
}

impl MemoryViewport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer_count(&self) -> usize {
        self.state.borrow().layers.len()
    }

    /// Polygon ids of mirrors currently rendered, in insertion order.
    pub fn mirror_ids(&self) -> Vec<PolygonId> {
        self.state
            .borrow()
            .layers
            .iter()
            .filter_map(|(_, layer)| match layer {
                MapLayer::Mirror { polygon, .. } => Some(*polygon),
                MapLayer::Overlay(_) => None,
            })
            .collect()
    }

    /// Geometry of the rendered mirror for `polygon`, if any.
    pub fn mirror_geometry(&self, polygon: PolygonId) -> Option<MultiPolygon<f64>> {
        self.state.borrow().layers.iter().find_map(|(_, layer)| match layer {
            MapLayer::Mirror { polygon: id, geometry, .. } if *id == polygon => Some(geometry.clone()),
            _ => None,
        })
    }

    /// Style of the rendered mirror for `polygon`, if any.
    pub fn mirror_style(&self, polygon: PolygonId) -> Option<PolygonStyle> {
        self.state.borrow().layers.iter().find_map(|(_, layer)| match layer {
            MapLayer::Mirror { polygon: id, style, .. } if *id == polygon => Some(style.clone()),
            _ => None,
        })
    }

    /// Names of overlays currently rendered.
    pub fn overlay_names(&self) -> Vec<String> {
        self.state
            .borrow()
            .layers
            .iter()
            .filter_map(|(_, layer)| match layer {
                MapLayer::Overlay(data) => Some(data.name.clone()),
                MapLayer::Mirror { .. } => None,
            })
            .collect()
    }
}

impl Viewport for MemoryViewport {
    fn add_layer(&mut self, layer: MapLayer) -> LayerHandle {
        let mut state = self.state.borrow_mut();
        let handle = LayerHandle(state.next_handle);
        state.next_handle += 1;
        state.layers.push((handle, layer));
        handle
    }

    fn remove_layer(&mut self, handle: LayerHandle) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.layers.len();
        state.layers.retain(|(h, _)| *h != handle);
        state.layers.len() != before
    }

    fn center(&self) -> Point {
        self.state.borrow().center
    }

    fn set_center(&mut self, center: Point) {
        self.state.borrow_mut().center = center;
    }

    fn zoom(&self) -> f64 {
        self.state.borrow().zoom
    }

    fn set_zoom(&mut self, zoom: f64) {
        self.state.borrow_mut().zoom = zoom;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn mirror_layer(id: PolygonId) -> MapLayer {
        MapLayer::Mirror {
            polygon: id,
            geometry: MultiPolygon(vec![]),
            style: PolygonStyle::mirror(),
        }
    }

    #[test]
    fn test_memory_viewport_layers() {
        let mut vp = MemoryViewport::new();
        let id = Uuid::new_v4();
        let handle = vp.add_layer(mirror_layer(id));
        assert_eq!(vp.layer_count(), 1);
        assert_eq!(vp.mirror_ids(), vec![id]);

        assert!(vp.remove_layer(handle));
        assert!(!vp.remove_layer(handle));
        assert_eq!(vp.layer_count(), 0);
    }

    #[test]
    fn test_memory_viewport_handles_are_shared() {
        let vp = MemoryViewport::new();
        let mut boxed: Box<dyn Viewport> = Box::new(vp.clone());
        boxed.set_center(Point::new(3.0, 4.0));
        boxed.set_zoom(7.0);
        assert_eq!(vp.center(), Point::new(3.0, 4.0));
        assert!((vp.zoom() - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_arena_ids_not_reused() {
        let mut viewports = Viewports::new();
        let a = viewports.insert(Box::new(MemoryViewport::new()));
        let b = viewports.insert(Box::new(MemoryViewport::new()));
        assert_eq!(viewports.len(), 2);

        assert!(viewports.remove(a).is_some());
        assert!(viewports.remove(a).is_none());
        assert!(!viewports.contains(a));

        let c = viewports.insert(Box::new(MemoryViewport::new()));
        assert_ne!(c, a);
        assert_eq!(viewports.ids().collect::<Vec<_>>(), vec![b, c]);
    }
}
