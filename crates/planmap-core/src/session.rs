//! Drawing session: the mode state machine and the canonical polygon set.

use crate::config::EngineConfig;
use crate::events::{EngineEvent, EventQueue};
use crate::geometry::{self, Footprint, GeoPredicates, GeometryPredicates, Sketch};
use crate::overlap;
use crate::style::PolygonStyle;
use geo::MultiPolygon;
use kurbo::{Point, Rect};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Stable identity of a planning polygon.
pub type PolygonId = Uuid;

/// Session errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// The operation is not valid in the current mode. The session is unchanged.
    #[error("Cannot {operation} while {mode}")]
    InvalidTransition { mode: &'static str, operation: &'static str },
    #[error("Polygon not found: {0}")]
    UnknownPolygon(PolygonId),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// A committed, user-authored planning polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanningPolygon {
    id: PolygonId,
    /// Polygon or multipolygon coordinates.
    pub geometry: MultiPolygon<f64>,
    /// Presentation only.
    pub style: PolygonStyle,
}

impl PlanningPolygon {
    /// Create a polygon with a freshly allocated id.
    pub fn new(geometry: MultiPolygon<f64>, style: PolygonStyle) -> Self {
        Self {
            id: Uuid::new_v4(),
            geometry,
            style,
        }
    }

    pub fn id(&self) -> PolygonId {
        self.id
    }

    pub fn area(&self) -> f64 {
        geometry::area(&self.geometry)
    }

    pub fn bounds(&self) -> Option<Rect> {
        geometry::bounds(&self.geometry)
    }

    pub fn footprint(&self) -> Footprint<'_> {
        Footprint::Area(&self.geometry)
    }
}

/// Drawing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrawMode {
    #[default]
    Idle,
    /// A shape is being traced vertex by vertex.
    Drawing,
    /// The given polygon is selected for vertex editing.
    Editing(PolygonId),
}

impl DrawMode {
    pub fn name(self) -> &'static str {
        match self {
            DrawMode::Idle => "idle",
            DrawMode::Drawing => "drawing",
            DrawMode::Editing(_) => "editing",
        }
    }
}

/// Result of offering a vertex to the in-progress shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexOutcome {
    Accepted,
    /// The shape closed at this vertex would overlap a committed polygon.
    Rejected,
}

/// Result of replacing a polygon's geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Clean,
    /// The edit was kept but now overlaps another polygon.
    Overlapping,
}

/// Owns the drawing mode and the canonical polygon collection.
///
/// Mirrors and overlays are not managed here; [`PlanningMap`](crate::PlanningMap)
/// propagates every committed change to the other viewports.
pub struct DrawingSession {
    mode: DrawMode,
    /// Committed polygons, keyed by ID.
    polygons: HashMap<PolygonId, PlanningPolygon>,
    /// Drawing order of committed polygons.
    order: Vec<PolygonId>,
    /// Vertices of the shape being drawn.
    vertices: Vec<Point>,
    predicates: Box<dyn GeometryPredicates>,
    style: PolygonStyle,
    min_area: f64,
    events: EventQueue,
}

impl Default for DrawingSession {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl DrawingSession {
    /// Create an empty session using `geo` predicates.
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_predicates(config, Box::new(GeoPredicates))
    }

    /// Create an empty session with host-supplied predicates.
    pub fn with_predicates(config: &EngineConfig, predicates: Box<dyn GeometryPredicates>) -> Self {
        Self {
            mode: DrawMode::Idle,
            polygons: HashMap::new(),
            order: Vec::new(),
            vertices: Vec::new(),
            predicates,
            style: config.polygon_style.clone(),
            min_area: config.min_polygon_area,
            events: EventQueue::new(),
        }
    }

    pub fn mode(&self) -> DrawMode {
        self.mode
    }

    pub fn is_drawing(&self) -> bool {
        self.mode == DrawMode::Drawing
    }

    /// Vertices accepted so far for the shape being drawn.
    pub fn in_progress(&self) -> &[Point] {
        &self.vertices
    }

    /// Polygons in drawing order.
    pub fn polygons(&self) -> impl Iterator<Item = &PlanningPolygon> {
        self.order.iter().filter_map(|id| self.polygons.get(id))
    }

    /// Polygon ids in drawing order.
    pub fn ids(&self) -> &[PolygonId] {
        &self.order
    }

    pub fn get(&self, id: PolygonId) -> Option<&PlanningPolygon> {
        self.polygons.get(&id)
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    /// Bounding box of all polygons.
    pub fn bounds(&self) -> Option<Rect> {
        self.polygons().filter_map(PlanningPolygon::bounds).reduce(|a, b| a.union(b))
    }

    /// Combined area of all polygons.
    pub fn total_area(&self) -> f64 {
        self.polygons().map(PlanningPolygon::area).sum()
    }

    /// Take events emitted since the last call.
    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        self.events.drain()
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        log::warn!("ignoring {} while {}", operation, self.mode.name());
        SessionError::InvalidTransition {
            mode: self.mode.name(),
            operation,
        }
    }

    fn require_drawing(&self, operation: &'static str) -> SessionResult<()> {
        if self.mode == DrawMode::Drawing {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    fn is_degenerate(&self, geometry: &MultiPolygon<f64>) -> bool {
        geometry.0.is_empty() || geometry::area(geometry) <= self.min_area
    }

    fn conflict(&self, candidate: Footprint<'_>, exclude: Option<PolygonId>) -> Option<PolygonId> {
        overlap::first_conflict(self.predicates.as_ref(), candidate, self.polygons(), exclude)
    }

    fn commit(&mut self, geometry: MultiPolygon<f64>) -> PolygonId {
        let polygon = PlanningPolygon::new(geometry, self.style.clone());
        let id = polygon.id();
        log::info!("committed polygon {} ({:.3} area)", id, polygon.area());
        self.order.push(id);
        self.polygons.insert(id, polygon);
        id
    }

    /// Enter drawing mode. Repeated calls while drawing are no-ops.
    pub fn start_drawing(&mut self) -> SessionResult<()> {
        match self.mode {
            DrawMode::Drawing => Ok(()),
            DrawMode::Idle => {
                log::debug!("drawing started");
                self.mode = DrawMode::Drawing;
                self.vertices.clear();
                Ok(())
            }
            DrawMode::Editing(_) => Err(self.invalid("start drawing")),
        }
    }

    /// Offer the next vertex of the shape being drawn.
    ///
    /// If the shape closed at this vertex would intersect or nest with a
    /// committed polygon, the vertex is dropped and an overlap warning fires.
    pub fn add_vertex(&mut self, point: Point) -> SessionResult<VertexOutcome> {
        self.require_drawing("add a vertex")?;

        self.vertices.push(point);
        let conflict = Sketch::closed_from(&self.vertices)
            .and_then(|sketch| self.conflict(sketch.footprint(), None));

        match conflict {
            Some(other) => {
                self.vertices.pop();
                log::warn!("vertex ({}, {}) rejected: shape would overlap {}", point.x, point.y, other);
                self.events.push(EngineEvent::OverlapWarning { polygon: None });
                Ok(VertexOutcome::Rejected)
            }
            None => Ok(VertexOutcome::Accepted),
        }
    }

    /// Close the shape being drawn.
    ///
    /// Shapes with fewer than three vertices or no area are dropped without
    /// notice and `Ok(None)` is returned. Either way the session returns to idle.
    pub fn finish_drawing(&mut self) -> SessionResult<Option<PolygonId>> {
        self.require_drawing("finish drawing")?;

        let vertices = std::mem::take(&mut self.vertices);
        self.mode = DrawMode::Idle;

        if vertices.len() < 3 {
            log::debug!("discarding shape with {} vertices", vertices.len());
            return Ok(None);
        }
        let geometry = geometry::multipolygon_from_vertices(&vertices);
        if self.is_degenerate(&geometry) {
            log::debug!("discarding zero-area shape");
            return Ok(None);
        }

        Ok(Some(self.commit(geometry)))
    }

    /// Abandon the shape being drawn.
    pub fn cancel_drawing(&mut self) -> SessionResult<()> {
        self.require_drawing("cancel drawing")?;
        log::debug!("drawing cancelled with {} vertices", self.vertices.len());
        self.vertices.clear();
        self.mode = DrawMode::Idle;
        Ok(())
    }

    /// Select a polygon for vertex editing.
    pub fn begin_edit(&mut self, id: PolygonId) -> SessionResult<()> {
        if self.mode != DrawMode::Idle {
            return Err(self.invalid("begin editing"));
        }
        if !self.polygons.contains_key(&id) {
            return Err(SessionError::UnknownPolygon(id));
        }
        self.mode = DrawMode::Editing(id);
        Ok(())
    }

    /// Deselect the polygon being edited.
    pub fn finish_edit(&mut self) -> SessionResult<()> {
        match self.mode {
            DrawMode::Editing(_) => {
                self.mode = DrawMode::Idle;
                Ok(())
            }
            _ => Err(self.invalid("finish editing")),
        }
    }

    /// Replace a polygon's geometry in place.
    ///
    /// An overlap with another polygon raises a warning but the edit is kept.
    pub fn edit_polygon(&mut self, id: PolygonId, geometry: MultiPolygon<f64>) -> SessionResult<EditOutcome> {
        if !self.polygons.contains_key(&id) {
            return Err(SessionError::UnknownPolygon(id));
        }

        let conflict = self.conflict(Footprint::Area(&geometry), Some(id));
        if let Some(polygon) = self.polygons.get_mut(&id) {
            polygon.geometry = geometry;
        }

        match conflict {
            Some(other) => {
                log::warn!("edited polygon {} now overlaps {}", id, other);
                self.events.push(EngineEvent::OverlapWarning { polygon: Some(id) });
                Ok(EditOutcome::Overlapping)
            }
            None => Ok(EditOutcome::Clean),
        }
    }

    /// Commit externally supplied geometry, such as an uploaded shape.
    ///
    /// Degenerate geometry is dropped like a degenerate drawing. When
    /// `validate` is set, a conflicting upload is refused with a warning.
    pub fn upload_polygon(&mut self, geometry: MultiPolygon<f64>, validate: bool) -> SessionResult<Option<PolygonId>> {
        if self.mode != DrawMode::Idle {
            return Err(self.invalid("upload a polygon"));
        }
        if self.is_degenerate(&geometry) {
            log::debug!("discarding degenerate upload");
            return Ok(None);
        }
        if validate {
            if let Some(other) = self.conflict(Footprint::Area(&geometry), None) {
                log::warn!("upload rejected: overlaps {}", other);
                self.events.push(EngineEvent::OverlapWarning { polygon: None });
                return Ok(None);
            }
        }
        Ok(Some(self.commit(geometry)))
    }

    /// Remove a polygon.
    ///
    /// Removing the last polygon emits [`EngineEvent::NoPolygonsRemaining`].
    pub fn delete_polygon(&mut self, id: PolygonId) -> SessionResult<PlanningPolygon> {
        let polygon = self.polygons.remove(&id).ok_or(SessionError::UnknownPolygon(id))?;
        self.order.retain(|&other| other != id);
        if self.mode == DrawMode::Editing(id) {
            self.mode = DrawMode::Idle;
        }
        log::info!("deleted polygon {}", id);

        if self.polygons.is_empty() {
            self.events.push(EngineEvent::NoPolygonsRemaining);
        }
        Ok(polygon)
    }

    /// Remove every polygon and any shape in progress. Returns the removed ids.
    pub fn clear_all(&mut self) -> Vec<PolygonId> {
        let removed = std::mem::take(&mut self.order);
        self.polygons.clear();
        self.vertices.clear();
        self.mode = DrawMode::Idle;

        if !removed.is_empty() {
            log::info!("cleared {} polygons", removed.len());
            self.events.push(EngineEvent::NoPolygonsRemaining);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(session: &mut DrawingSession, corners: &[(f64, f64)]) -> Vec<VertexOutcome> {
        session.start_drawing().unwrap();
        corners
            .iter()
            .map(|&(x, y)| session.add_vertex(Point::new(x, y)).unwrap())
            .collect()
    }

    const A: [(f64, f64); 4] = [(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 0.0)];
    const B: [(f64, f64); 4] = [(5.0, 5.0), (5.0, 15.0), (15.0, 15.0), (15.0, 5.0)];
    const C: [(f64, f64); 4] = [(20.0, 20.0), (20.0, 30.0), (30.0, 30.0), (30.0, 20.0)];

    fn square(corners: &[(f64, f64)]) -> MultiPolygon<f64> {
        let points: Vec<Point> = corners.iter().map(|&(x, y)| Point::new(x, y)).collect();
        geometry::multipolygon_from_vertices(&points)
    }

    #[test]
    fn test_draw_and_commit() {
        let mut session = DrawingSession::default();
        let outcomes = draw(&mut session, &A);
        assert!(outcomes.iter().all(|o| *o == VertexOutcome::Accepted));

        let id = session.finish_drawing().unwrap().unwrap();
        assert_eq!(session.mode(), DrawMode::Idle);
        assert_eq!(session.len(), 1);
        assert!((session.get(id).unwrap().area() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_overlapping_closing_vertex_rejected() {
        let mut session = DrawingSession::default();
        draw(&mut session, &A);
        let a = session.finish_drawing().unwrap().unwrap();

        let outcomes = draw(&mut session, &B);
        // (5,5) lies inside A, so B is refused from its first vertex
        assert_eq!(outcomes[0], VertexOutcome::Rejected);
        assert!(session.in_progress().len() < B.len());
        assert_eq!(
            session.take_events().first(),
            Some(&EngineEvent::OverlapWarning { polygon: None })
        );

        assert_eq!(session.finish_drawing().unwrap(), None);
        assert_eq!(session.ids(), &[a]);
    }

    #[test]
    fn test_enclosing_shape_rejected() {
        let mut session = DrawingSession::default();
        draw(&mut session, &[(6.0, 1.0), (6.0, 3.0), (8.0, 3.0), (8.0, 1.0)]);
        session.finish_drawing().unwrap().unwrap();

        // Every vertex is outside the small square, but closing at the
        // fourth vertex would swallow it.
        let outcomes = draw(&mut session, &A);
        assert_eq!(&outcomes[..3], &[VertexOutcome::Accepted; 3]);
        assert_eq!(outcomes[3], VertexOutcome::Rejected);
        assert_eq!(session.in_progress().len(), 3);
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn test_disjoint_shapes_commit() {
        let mut session = DrawingSession::default();
        draw(&mut session, &A);
        session.finish_drawing().unwrap().unwrap();
        draw(&mut session, &C);
        session.finish_drawing().unwrap().unwrap();
        assert_eq!(session.len(), 2);
        assert!(session.take_events().is_empty());
        assert_eq!(session.bounds(), Some(Rect::new(0.0, 0.0, 30.0, 30.0)));
        assert!((session.total_area() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_shapes_discarded() {
        let mut session = DrawingSession::default();
        draw(&mut session, &[(0.0, 0.0), (5.0, 0.0)]);
        assert_eq!(session.finish_drawing().unwrap(), None);

        draw(&mut session, &[(0.0, 0.0), (5.0, 0.0), (10.0, 0.0)]);
        assert_eq!(session.finish_drawing().unwrap(), None);

        assert!(session.is_empty());
        assert_eq!(session.mode(), DrawMode::Idle);
        assert!(session.take_events().is_empty());
    }

    #[test]
    fn test_min_area_threshold() {
        let config = EngineConfig {
            min_polygon_area: 150.0,
            ..EngineConfig::default()
        };
        let mut session = DrawingSession::new(&config);
        draw(&mut session, &A);
        assert_eq!(session.finish_drawing().unwrap(), None);
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut session = DrawingSession::default();
        session.start_drawing().unwrap();
        session.add_vertex(Point::new(1.0, 1.0)).unwrap();
        session.start_drawing().unwrap();
        assert_eq!(session.in_progress().len(), 1);
    }

    #[test]
    fn test_cancel_discards_shape() {
        let mut session = DrawingSession::default();
        draw(&mut session, &A[..2]);
        session.cancel_drawing().unwrap();
        assert_eq!(session.mode(), DrawMode::Idle);
        assert!(session.in_progress().is_empty());
        assert!(session.is_empty());
    }

    #[test]
    fn test_invalid_transitions_leave_state_unchanged() {
        let mut session = DrawingSession::default();
        assert!(matches!(
            session.add_vertex(Point::ZERO),
            Err(SessionError::InvalidTransition { mode: "idle", .. })
        ));
        assert!(session.finish_drawing().is_err());
        assert!(session.cancel_drawing().is_err());
        assert!(session.finish_edit().is_err());
        assert_eq!(session.mode(), DrawMode::Idle);

        draw(&mut session, &A);
        let id = session.finish_drawing().unwrap().unwrap();
        session.begin_edit(id).unwrap();
        assert!(session.start_drawing().is_err());
        assert!(session.upload_polygon(square(&C), true).is_err());
        assert_eq!(session.mode(), DrawMode::Editing(id));
        session.finish_edit().unwrap();
        assert_eq!(session.mode(), DrawMode::Idle);
    }

    #[test]
    fn test_edit_overlap_warns_without_rollback() {
        let mut session = DrawingSession::default();
        draw(&mut session, &A);
        session.finish_drawing().unwrap().unwrap();
        draw(&mut session, &C);
        let c = session.finish_drawing().unwrap().unwrap();

        let moved = square(&B);
        assert_eq!(session.edit_polygon(c, moved.clone()).unwrap(), EditOutcome::Overlapping);
        assert_eq!(session.get(c).unwrap().geometry, moved);
        assert_eq!(
            session.take_events(),
            vec![EngineEvent::OverlapWarning { polygon: Some(c) }]
        );

        let back = square(&C);
        assert_eq!(session.edit_polygon(c, back).unwrap(), EditOutcome::Clean);
    }

    #[test]
    fn test_edit_ignores_own_previous_geometry() {
        let mut session = DrawingSession::default();
        draw(&mut session, &A);
        let a = session.finish_drawing().unwrap().unwrap();
        let grown = square(&[(0.0, 0.0), (0.0, 12.0), (12.0, 12.0), (12.0, 0.0)]);
        assert_eq!(session.edit_polygon(a, grown).unwrap(), EditOutcome::Clean);
    }

    #[test]
    fn test_delete_last_polygon_signals_once() {
        let mut session = DrawingSession::default();
        draw(&mut session, &A);
        let a = session.finish_drawing().unwrap().unwrap();

        session.delete_polygon(a).unwrap();
        assert!(session.is_empty());
        assert_eq!(session.take_events(), vec![EngineEvent::NoPolygonsRemaining]);
        assert_eq!(session.delete_polygon(a), Err(SessionError::UnknownPolygon(a)));
        assert!(session.take_events().is_empty());
    }

    #[test]
    fn test_delete_edited_polygon_returns_to_idle() {
        let mut session = DrawingSession::default();
        draw(&mut session, &A);
        let a = session.finish_drawing().unwrap().unwrap();
        session.begin_edit(a).unwrap();
        session.delete_polygon(a).unwrap();
        assert_eq!(session.mode(), DrawMode::Idle);
    }

    #[test]
    fn test_clear_all() {
        let mut session = DrawingSession::default();
        draw(&mut session, &A);
        session.finish_drawing().unwrap().unwrap();
        draw(&mut session, &C[..2]);

        let removed = session.clear_all();
        assert_eq!(removed.len(), 1);
        assert!(session.is_empty());
        assert!(session.in_progress().is_empty());
        assert_eq!(session.mode(), DrawMode::Idle);
        assert_eq!(session.take_events(), vec![EngineEvent::NoPolygonsRemaining]);

        assert!(session.clear_all().is_empty());
        assert!(session.take_events().is_empty());
    }

    #[test]
    fn test_upload_validation() {
        let mut session = DrawingSession::default();
        assert!(session.upload_polygon(square(&A), true).unwrap().is_some());
        assert_eq!(session.upload_polygon(square(&B), true).unwrap(), None);
        assert_eq!(session.take_events(), vec![EngineEvent::OverlapWarning { polygon: None }]);

        assert!(session.upload_polygon(square(&B), false).unwrap().is_some());
        assert_eq!(session.len(), 2);
    }

    #[test]
    fn test_ids_are_unique() {
        let mut session = DrawingSession::default();
        let a = session.upload_polygon(square(&A), true).unwrap().unwrap();
        session.delete_polygon(a).unwrap();
        let again = session.upload_polygon(square(&A), true).unwrap().unwrap();
        assert_ne!(a, again);
    }
}
