//! Per-viewport copies of canonical polygons.

use crate::session::{PlanningPolygon, PolygonId};
use crate::style::PolygonStyle;
use crate::viewport::{LayerHandle, MapLayer, ViewportId, Viewports};
use std::collections::{BTreeSet, HashMap};

/// Tracks which viewport renders which polygon copy.
///
/// Rows are keyed by `(viewport, polygon)`. The registry is the only writer of
/// mirror layers; canonical geometry always comes from the caller.
#[derive(Debug, Clone)]
pub struct MirrorRegistry {
    /// Viewports that receive mirrors.
    registered: BTreeSet<ViewportId>,
    /// Layer handle of each mirror.
    rows: HashMap<(ViewportId, PolygonId), LayerHandle>,
    /// Per-viewport style overrides (e.g. hover highlighting).
    overrides: HashMap<(ViewportId, PolygonId), PolygonStyle>,
    default_style: PolygonStyle,
}

impl Default for MirrorRegistry {
    fn default() -> Self {
        Self::new(PolygonStyle::mirror())
    }
}

impl MirrorRegistry {
    pub fn new(default_style: PolygonStyle) -> Self {
        Self {
            registered: BTreeSet::new(),
            rows: HashMap::new(),
            overrides: HashMap::new(),
            default_style,
        }
    }

    /// Add a viewport to the broadcast set. Returns false if already present.
    pub fn register(&mut self, viewport: ViewportId) -> bool {
        self.registered.insert(viewport)
    }

    /// Drop a viewport from the broadcast set, removing its mirror layers if
    /// it is still alive. Returns false if it was not registered.
    pub fn unregister(&mut self, viewports: &mut Viewports, viewport: ViewportId) -> bool {
        if !self.registered.remove(&viewport) {
            return false;
        }
        let keys: Vec<_> = self.rows.keys().filter(|(v, _)| *v == viewport).copied().collect();
        for key in keys {
            if let Some(handle) = self.rows.remove(&key) {
                if let Some(target) = viewports.get_mut(viewport) {
                    target.remove_layer(handle);
                }
            }
            self.overrides.remove(&key);
        }
        true
    }

    pub fn is_registered(&self, viewport: ViewportId) -> bool {
        self.registered.contains(&viewport)
    }

    /// Registered viewports in ascending id order.
    pub fn registered(&self) -> impl Iterator<Item = ViewportId> + '_ {
        self.registered.iter().copied()
    }

    pub fn handle(&self, viewport: ViewportId, polygon: PolygonId) -> Option<LayerHandle> {
        self.rows.get(&(viewport, polygon)).copied()
    }

    /// Number of viewports holding a mirror of `polygon`.
    pub fn mirror_count(&self, polygon: PolygonId) -> usize {
        self.rows.keys().filter(|(_, p)| *p == polygon).count()
    }

    /// Total number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn style_for(&self, viewport: ViewportId, polygon: PolygonId) -> PolygonStyle {
        self.overrides
            .get(&(viewport, polygon))
            .cloned()
            .unwrap_or_else(|| self.default_style.clone())
    }

    /// Render a fresh copy of `polygon` on one viewport, replacing any
    /// existing mirror there.
    fn place(&mut self, viewports: &mut Viewports, viewport: ViewportId, polygon: &PlanningPolygon) -> bool {
        let key = (viewport, polygon.id());
        let style = self.style_for(viewport, polygon.id());
        let Some(target) = viewports.get_mut(viewport) else {
            log::warn!("{} is registered but no longer exists", viewport);
            return false;
        };
        if let Some(old) = self.rows.remove(&key) {
            target.remove_layer(old);
        }
        // Deep copy: the mirror never shares geometry with the canonical polygon.
        let handle = target.add_layer(MapLayer::Mirror {
            polygon: polygon.id(),
            geometry: polygon.geometry.clone(),
            style,
        });
        self.rows.insert(key, handle);
        true
    }

    fn targets(&self, origin: Option<ViewportId>) -> Vec<ViewportId> {
        self.registered
            .iter()
            .copied()
            .filter(|v| Some(*v) != origin)
            .collect()
    }

    /// Copy a newly committed polygon onto every registered viewport except
    /// `origin`. Returns the number of mirrors created.
    pub fn mirror_create(
        &mut self,
        viewports: &mut Viewports,
        polygon: &PlanningPolygon,
        origin: Option<ViewportId>,
    ) -> usize {
        let created = self
            .targets(origin)
            .into_iter()
            .filter(|&viewport| self.place(viewports, viewport, polygon))
            .count();
        log::debug!("mirrored {} onto {} viewports", polygon.id(), created);
        created
    }

    /// Refresh every existing mirror of `polygon` with its current geometry,
    /// `origin` included. Registered viewports without a mirror yet (other
    /// than `origin`) receive one.
    pub fn mirror_update(
        &mut self,
        viewports: &mut Viewports,
        polygon: &PlanningPolygon,
        origin: Option<ViewportId>,
    ) -> usize {
        let mut targets: Vec<ViewportId> = self
            .rows
            .keys()
            .filter(|(_, p)| *p == polygon.id())
            .map(|(v, _)| *v)
            .collect();
        for viewport in self.targets(origin) {
            if !targets.contains(&viewport) {
                targets.push(viewport);
            }
        }
        targets
            .into_iter()
            .filter(|&viewport| self.place(viewports, viewport, polygon))
            .count()
    }

    /// Copy `polygon` onto a single viewport, e.g. one registered after the
    /// polygon was committed.
    pub fn mirror_onto(&mut self, viewports: &mut Viewports, viewport: ViewportId, polygon: &PlanningPolygon) -> bool {
        self.is_registered(viewport) && self.place(viewports, viewport, polygon)
    }

    /// Remove every mirror of `polygon`. Viewports that never had one are
    /// skipped. Returns the number of rows removed.
    pub fn mirror_delete(&mut self, viewports: &mut Viewports, polygon: PolygonId) -> usize {
        let keys: Vec<_> = self.rows.keys().filter(|(_, p)| *p == polygon).copied().collect();
        for key in &keys {
            if let Some(handle) = self.rows.remove(key) {
                if let Some(target) = viewports.get_mut(key.0) {
                    target.remove_layer(handle);
                }
            }
        }
        self.overrides.retain(|(_, p), _| *p != polygon);
        keys.len()
    }

    /// Remove every mirror on every viewport.
    pub fn clear(&mut self, viewports: &mut Viewports) -> usize {
        let removed = self.rows.len();
        for ((viewport, _), handle) in self.rows.drain() {
            if let Some(target) = viewports.get_mut(viewport) {
                target.remove_layer(handle);
            }
        }
        self.overrides.clear();
        removed
    }

    /// Restyle the mirror of `polygon` on one viewport only. `None` restores
    /// the default mirror style. Returns false if that viewport has no mirror.
    pub fn set_mirror_style(
        &mut self,
        viewports: &mut Viewports,
        viewport: ViewportId,
        polygon: &PlanningPolygon,
        style: Option<PolygonStyle>,
    ) -> bool {
        let key = (viewport, polygon.id());
        if !self.rows.contains_key(&key) {
            return false;
        }
        match style {
            Some(style) => {
                self.overrides.insert(key, style);
            }
            None => {
                self.overrides.remove(&key);
            }
        }
        self.place(viewports, viewport, polygon)
    }
}
