//! Overlap validation between a candidate shape and committed polygons.

use crate::geometry::{Footprint, GeometryPredicates};
use crate::session::{PlanningPolygon, PolygonId};

/// True if `candidate` conflicts with `existing`.
///
/// A conflict is any shared point (boundary contact included) or full
/// containment in either direction.
pub fn conflicts<P>(predicates: &P, candidate: Footprint<'_>, existing: Footprint<'_>) -> bool
where
    P: GeometryPredicates + ?Sized,
{
    predicates.intersects(candidate, existing)
        || predicates.within(candidate, existing)
        || predicates.within(existing, candidate)
}

/// Find the first committed polygon that `candidate` conflicts with.
///
/// `exclude` skips the polygon being edited.
pub fn first_conflict<'a, P, I>(
    predicates: &P,
    candidate: Footprint<'_>,
    committed: I,
    exclude: Option<PolygonId>,
) -> Option<PolygonId>
where
    P: GeometryPredicates + ?Sized,
    I: IntoIterator<Item = &'a PlanningPolygon>,
{
    committed
        .into_iter()
        .filter(|polygon| Some(polygon.id()) != exclude)
        .find(|polygon| conflicts(predicates, candidate, polygon.footprint()))
        .map(PlanningPolygon::id)
}
