//! Spatial predicates and conversions between viewport points and GIS geometry.

use geo::{Area, BoundingRect, Contains, Coord, Intersects, LineString, MultiPolygon, Point as GeoPoint, Polygon};
use kurbo::{Point, Rect};

/// Borrowed view of a geometry handed to the predicates.
#[derive(Debug, Clone, Copy)]
pub enum Footprint<'a> {
    Point(&'a GeoPoint<f64>),
    Path(&'a LineString<f64>),
    Area(&'a MultiPolygon<f64>),
}

impl<'a> From<&'a MultiPolygon<f64>> for Footprint<'a> {
    fn from(area: &'a MultiPolygon<f64>) -> Self {
        Footprint::Area(area)
    }
}

/// An in-progress shape, closed at its last vertex.
///
/// One vertex is a point, two a path, three or more a polygon.
#[derive(Debug, Clone, PartialEq)]
pub enum Sketch {
    Point(GeoPoint<f64>),
    Path(LineString<f64>),
    Area(MultiPolygon<f64>),
}

impl Sketch {
    /// Build the shape traced by `vertices` if it were closed after the last one.
    pub fn closed_from(vertices: &[Point]) -> Option<Self> {
        match vertices {
            [] => None,
            [only] => Some(Sketch::Point(GeoPoint::new(only.x, only.y))),
            [a, b] => Some(Sketch::Path(LineString::from(vec![to_coord(*a), to_coord(*b)]))),
            _ => Some(Sketch::Area(MultiPolygon(vec![polygon_from_vertices(vertices)]))),
        }
    }

    pub fn footprint(&self) -> Footprint<'_> {
        match self {
            Sketch::Point(p) => Footprint::Point(p),
            Sketch::Path(l) => Footprint::Path(l),
            Sketch::Area(m) => Footprint::Area(m),
        }
    }
}

fn to_coord(point: Point) -> Coord<f64> {
    Coord { x: point.x, y: point.y }
}

/// Close a vertex ring into a single-polygon shell.
pub fn polygon_from_vertices(vertices: &[Point]) -> Polygon<f64> {
    let ring: Vec<Coord<f64>> = vertices.iter().copied().map(to_coord).collect();
    // Polygon::new closes the exterior ring
    Polygon::new(LineString::from(ring), vec![])
}

/// Multipolygon holding the single ring traced by `vertices`.
pub fn multipolygon_from_vertices(vertices: &[Point]) -> MultiPolygon<f64> {
    MultiPolygon(vec![polygon_from_vertices(vertices)])
}

/// Unsigned planar area.
pub fn area(geometry: &MultiPolygon<f64>) -> f64 {
    geometry.unsigned_area()
}

/// Axis-aligned bounds, or None for an empty geometry.
pub fn bounds(geometry: &MultiPolygon<f64>) -> Option<Rect> {
    geometry
        .bounding_rect()
        .map(|r| Rect::new(r.min().x, r.min().y, r.max().x, r.max().y))
}

/// Boolean spatial tests consumed by the overlap validator.
pub trait GeometryPredicates {
    /// True when `a` and `b` share at least one point, boundaries included.
    fn intersects(&self, a: Footprint<'_>, b: Footprint<'_>) -> bool;

    /// True when `a` lies entirely inside `b`.
    fn within(&self, a: Footprint<'_>, b: Footprint<'_>) -> bool;
}

/// Predicates backed by the `geo` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoPredicates;

impl GeometryPredicates for GeoPredicates {
    fn intersects(&self, a: Footprint<'_>, b: Footprint<'_>) -> bool {
        use Footprint::*;
        match (a, b) {
            (Point(p), Point(q)) => p.intersects(q),
            (Point(p), Path(l)) | (Path(l), Point(p)) => l.intersects(p),
            (Point(p), Area(m)) | (Area(m), Point(p)) => m.intersects(p),
            (Path(l), Path(k)) => l.intersects(k),
            (Path(l), Area(m)) | (Area(m), Path(l)) => m.intersects(l),
            (Area(m), Area(n)) => m.intersects(n),
        }
    }

    fn within(&self, a: Footprint<'_>, b: Footprint<'_>) -> bool {
        use Footprint::*;
        match (a, b) {
            (Point(p), Point(q)) => q.contains(p),
            (Point(p), Path(l)) => l.contains(p),
            (Point(p), Area(m)) => m.contains(p),
            (Path(l), Path(k)) => k.contains(l),
            (Path(l), Area(m)) => m.0.iter().any(|outer| outer.contains(l)),
            (Area(inner), Area(outer)) => {
                !inner.0.is_empty()
                    && inner
                        .0
                        .iter()
                        .all(|part| outer.0.iter().any(|o| o.contains(part)))
            }
            // A shape with extent never fits inside a lower-dimensional one.
            (Path(_), Point(_)) | (Area(_), Point(_)) | (Area(_), Path(_)) => false,
        }
    }
}
