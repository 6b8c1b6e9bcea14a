//! Side-channel notifications for the host UI.

use crate::session::PolygonId;
use serde::Serialize;

/// Events emitted by the engine.
///
/// Collected in an [`EventQueue`] and drained by the host, which renders
/// toasts and spinners from them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A vertex, edit or upload conflicts with a committed polygon.
    /// Carries the edited polygon for edits, None while drawing or uploading.
    OverlapWarning { polygon: Option<PolygonId> },
    /// The last polygon was removed.
    NoPolygonsRemaining,
    /// A fetch for the named layer started.
    LayerLoadStart { name: String },
    /// The fetch for the named layer finished, successfully or not.
    LayerLoadDone { name: String, success: bool },
}

/// Ordered outbox of pending events.
#[derive(Debug, Default)]
pub struct EventQueue {
    pending: Vec<EngineEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: EngineEvent) {
        log::trace!("event queued: {:?}", event);
        self.pending.push(event);
    }

    /// Take every pending event, oldest first.
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_preserves_order() {
        let mut queue = EventQueue::new();
        queue.push(EngineEvent::LayerLoadStart { name: "counties".into() });
        queue.push(EngineEvent::NoPolygonsRemaining);
        assert_eq!(queue.len(), 2);

        let events = queue.drain();
        assert!(queue.is_empty());
        assert_eq!(events[0], EngineEvent::LayerLoadStart { name: "counties".into() });
        assert_eq!(events[1], EngineEvent::NoPolygonsRemaining);
    }

    #[test]
    fn test_event_serialize() {
        let json = serde_json::to_string(&EngineEvent::LayerLoadDone {
            name: "huc12".into(),
            success: false,
        })
        .unwrap();
        assert!(json.contains("layer_load_done"));
        assert!(json.contains("huc12"));
    }
}
