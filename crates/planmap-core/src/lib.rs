//! Planmap Core Library
//!
//! Drawing-session state machine, overlap validation, cross-viewport mirroring,
//! pan/zoom sync and single-flight overlay loading for planning-area authoring.

pub mod config;
pub mod engine;
pub mod events;
pub mod geometry;
pub mod layers;
pub mod legend;
pub mod mirror;
pub mod overlap;
pub mod session;
pub mod style;
pub mod view_sync;
pub mod viewport;

pub use config::{ConfigError, EngineConfig};
pub use engine::{EngineError, EngineResult, PlanningMap};
pub use events::{EngineEvent, EventQueue};
pub use geometry::{Footprint, GeoPredicates, GeometryPredicates, Sketch};
pub use layers::{
    FileLayerFetcher, LayerCache, LayerData, LayerError, LayerFetcher, LayerKind, LayerRequest,
    LayerStatus, LoadCompletion, LoadFinished,
};
pub use legend::{
    ColorEntry, ColormapConfig, ColormapSource, Legend, LegendError, StaticColormaps, build_legend,
};
pub use mirror::MirrorRegistry;
pub use session::{DrawMode, DrawingSession, EditOutcome, PlanningPolygon, PolygonId, SessionError, VertexOutcome};
pub use style::{PolygonStyle, SerializableColor};
pub use view_sync::{ViewState, ViewSyncCoordinator};
pub use viewport::{LayerHandle, MapLayer, MemoryViewport, Viewport, ViewportEvent, ViewportId, Viewports};
