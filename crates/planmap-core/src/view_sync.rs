//! One-directional pan/zoom sync from the primary viewport.

use crate::viewport::{ViewportId, Viewports};
use kurbo::Point;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Center and zoom of a viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub center: Point,
    pub zoom: f64,
}

impl ViewState {
    fn read(viewports: &Viewports, id: ViewportId) -> Option<Self> {
        viewports.get(id).map(|vp| Self {
            center: vp.center(),
            zoom: vp.zoom(),
        })
    }

    fn apply(self, viewports: &mut Viewports, id: ViewportId) -> bool {
        match viewports.get_mut(id) {
            Some(vp) => {
                vp.set_center(self.center);
                vp.set_zoom(self.zoom);
                true
            }
            None => false,
        }
    }
}

/// Broadcasts the primary viewport's view to the visible secondaries.
///
/// Secondaries never feed back into the primary.
#[derive(Debug, Clone, Default)]
pub struct ViewSyncCoordinator {
    primary: Option<ViewportId>,
    /// Secondaries currently following the primary.
    synced: BTreeSet<ViewportId>,
}

impl ViewSyncCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn primary(&self) -> Option<ViewportId> {
        self.primary
    }

    pub fn is_synced(&self, id: ViewportId) -> bool {
        self.synced.contains(&id)
    }

    /// Secondaries currently following the primary.
    pub fn synced(&self) -> impl Iterator<Item = ViewportId> + '_ {
        self.synced.iter().copied()
    }

    /// Make `id` the primary. The old primary becomes an ordinary viewport
    /// and rejoins the synced set on the next visibility refresh.
    pub fn set_primary(&mut self, id: ViewportId) {
        if self.primary != Some(id) {
            log::debug!("primary viewport is now {}", id);
        }
        self.synced.remove(&id);
        self.primary = Some(id);
    }

    /// A viewport joined. The first one becomes primary.
    pub fn on_registered(&mut self, id: ViewportId) {
        if self.primary.is_none() {
            self.set_primary(id);
        }
    }

    /// A viewport left. Losing the primary promotes the lowest remaining id.
    pub fn on_unregistered(&mut self, id: ViewportId, remaining: impl IntoIterator<Item = ViewportId>) {
        self.synced.remove(&id);
        if self.primary == Some(id) {
            self.primary = None;
            if let Some(next) = remaining.into_iter().filter(|&v| v != id).min() {
                self.set_primary(next);
            }
        }
    }

    /// Copy the primary's view onto every synced secondary.
    /// Returns how many viewports were updated.
    pub fn broadcast(&self, viewports: &mut Viewports) -> usize {
        let Some(view) = self.primary.and_then(|p| ViewState::read(viewports, p)) else {
            return 0;
        };
        self.synced
            .iter()
            .filter(|&&id| view.apply(viewports, id))
            .count()
    }

    /// React to a pan/zoom on `source`. Only the primary is broadcast.
    pub fn handle_view_change(&self, viewports: &mut Viewports, source: ViewportId) -> usize {
        if Some(source) != self.primary {
            log::trace!("ignoring view change on secondary {}", source);
            return 0;
        }
        self.broadcast(viewports)
    }

    /// Re-evaluate which secondaries follow the primary.
    ///
    /// Hidden viewports leave the synced set; viewports that became visible
    /// join it and are snapped to the primary's view. Returns how many joined.
    pub fn refresh_visibility<F>(
        &mut self,
        viewports: &mut Viewports,
        candidates: impl IntoIterator<Item = ViewportId>,
        is_visible: F,
    ) -> usize
    where
        F: Fn(ViewportId) -> bool,
    {
        let view = self.primary.and_then(|p| ViewState::read(viewports, p));
        let mut joined = 0;
        for id in candidates {
            if Some(id) == self.primary {
                continue;
            }
            if !is_visible(id) {
                if self.synced.remove(&id) {
                    log::debug!("{} hidden; no longer synced", id);
                }
                continue;
            }
            if self.synced.insert(id) {
                if let Some(view) = view {
                    view.apply(viewports, id);
                }
                joined += 1;
            }
        }
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewport::{MemoryViewport, Viewport};

    fn setup(n: usize) -> (Viewports, Vec<MemoryViewport>, Vec<ViewportId>, ViewSyncCoordinator) {
        let mut viewports = Viewports::new();
        let mut sync = ViewSyncCoordinator::new();
        let handles: Vec<MemoryViewport> = (0..n).map(|_| MemoryViewport::new()).collect();
        let ids: Vec<ViewportId> = handles
            .iter()
            .map(|h| {
                let id = viewports.insert(Box::new(h.clone()));
                sync.on_registered(id);
                id
            })
            .collect();
        sync.refresh_visibility(&mut viewports, ids.clone(), |_| true);
        (viewports, handles, ids, sync)
    }

    #[test]
    fn test_first_registered_is_primary() {
        let (_viewports, _handles, ids, sync) = setup(3);
        assert_eq!(sync.primary(), Some(ids[0]));
        assert_eq!(sync.synced().collect::<Vec<_>>(), vec![ids[1], ids[2]]);
    }

    #[test]
    fn test_primary_change_is_broadcast() {
        let (mut viewports, mut handles, ids, sync) = setup(3);
        handles[0].set_center(Point::new(-120.5, 38.2));
        handles[0].set_zoom(9.0);

        assert_eq!(sync.handle_view_change(&mut viewports, ids[0]), 2);
        for h in &handles[1..] {
            assert_eq!(h.center(), Point::new(-120.5, 38.2));
            assert!((h.zoom() - 9.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn test_secondary_change_does_not_feed_back() {
        let (mut viewports, mut handles, ids, sync) = setup(2);
        handles[1].set_center(Point::new(5.0, 5.0));
        assert_eq!(sync.handle_view_change(&mut viewports, ids[1]), 0);
        assert_eq!(handles[0].center(), Point::ZERO);
    }

    #[test]
    fn test_hidden_viewports_unsynced_on_refresh() {
        let (mut viewports, mut handles, ids, mut sync) = setup(3);
        let hidden = ids[2];
        sync.refresh_visibility(&mut viewports, ids.clone(), |id| id != hidden);
        assert!(!sync.is_synced(hidden));

        handles[0].set_zoom(4.0);
        assert_eq!(sync.broadcast(&mut viewports), 1);
        assert!((handles[2].zoom() - 1.0).abs() < f64::EPSILON);

        // Visible again: snapped to the primary right away
        assert_eq!(sync.refresh_visibility(&mut viewports, ids.clone(), |_| true), 1);
        assert!((handles[2].zoom() - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_explicit_primary_and_promotion() {
        let (mut viewports, mut handles, ids, mut sync) = setup(3);
        sync.set_primary(ids[1]);
        sync.refresh_visibility(&mut viewports, ids.clone(), |_| true);
        assert!(sync.is_synced(ids[0]));

        handles[1].set_zoom(12.0);
        sync.handle_view_change(&mut viewports, ids[1]);
        assert!((handles[0].zoom() - 12.0).abs() < f64::EPSILON);

        viewports.remove(ids[1]);
        sync.on_unregistered(ids[1], viewports.ids());
        assert_eq!(sync.primary(), Some(ids[0]));
        assert!(!sync.is_synced(ids[0]));
    }
}
