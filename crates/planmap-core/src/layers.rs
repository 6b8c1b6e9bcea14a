//! Boundary and condition overlay cache with single-flight loading.
//!
//! Each layer name is fetched at most once at a time. Fetchers run wherever
//! they like and report back through a [`LoadCompletion`]; the cache applies
//! results when the owner calls [`LayerCache::poll_completions`].

use crate::events::{EngineEvent, EventQueue};
use geo::MultiPolygon;
use geojson::GeoJson;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread;
use thiserror::Error;

/// Layer loading errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LayerError {
    #[error("Fetch failed: {0}")]
    Fetch(String),
    #[error("Invalid layer data: {0}")]
    Parse(String),
}

/// Result type for layer operations.
pub type LayerResult<T> = Result<T, LayerError>;

/// What an overlay depicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LayerKind {
    /// Administrative or planning boundaries.
    #[default]
    Boundary,
    /// Condition data, rendered with a colormap legend.
    Condition,
}

/// One polygonal feature of an overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryFeature {
    pub geometry: MultiPolygon<f64>,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// A loaded overlay, shared by every viewport that shows it.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerData {
    pub name: String,
    pub kind: LayerKind,
    pub features: Vec<BoundaryFeature>,
}

impl LayerData {
    /// Parse a GeoJSON document. Non-areal geometries are skipped.
    pub fn from_geojson(name: &str, kind: LayerKind, source: &str) -> LayerResult<Self> {
        let features = features_from_geojson(source).map_err(LayerError::Parse)?;
        Ok(Self {
            name: name.to_string(),
            kind,
            features,
        })
    }
}

/// Extract polygonal features from a GeoJSON document.
pub(crate) fn features_from_geojson(source: &str) -> Result<Vec<BoundaryFeature>, String> {
    let parsed: GeoJson = source.parse().map_err(|e: geojson::Error| e.to_string())?;

    let raw = match parsed {
        GeoJson::FeatureCollection(fc) => fc
            .features
            .into_iter()
            .filter_map(|f| f.geometry.map(|g| (g, f.properties.unwrap_or_default())))
            .collect(),
        GeoJson::Feature(f) => f
            .geometry
            .map(|g| vec![(g, f.properties.unwrap_or_default())])
            .unwrap_or_default(),
        GeoJson::Geometry(g) => vec![(g, serde_json::Map::new())],
    };

    let mut features = Vec::with_capacity(raw.len());
    for (gj, properties) in raw {
        let geom: geo::Geometry<f64> = gj.value.try_into().map_err(|e: geojson::Error| e.to_string())?;
        let geometry = match geom {
            geo::Geometry::Polygon(p) => p.into(),
            geo::Geometry::MultiPolygon(m) => m,
            other => {
                log::debug!("skipping non-areal feature: {:?}", std::mem::discriminant(&other));
                continue;
            }
        };
        features.push(BoundaryFeature { geometry, properties });
    }
    Ok(features)
}

/// Load state of a cached layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayerStatus {
    #[default]
    NotLoaded,
    Loading,
    Loaded,
    Failed,
}

type Delivery = (String, LayerResult<LayerData>);

/// One-shot handle a fetcher uses to report the outcome of a fetch.
///
/// Can be sent to another thread. Dropping it unresolved (a fetcher that
/// gives up, or a worker that panics) reports a failed fetch.
#[derive(Debug)]
pub struct LoadCompletion {
    name: String,
    tx: Option<Sender<Delivery>>,
}

impl LoadCompletion {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver the result. Dropped silently if the cache is gone.
    pub fn resolve(mut self, result: LayerResult<LayerData>) {
        self.deliver(result);
    }

    fn deliver(&mut self, result: LayerResult<LayerData>) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        if tx.send((std::mem::take(&mut self.name), result)).is_err() {
            log::debug!("layer cache dropped before load finished");
        }
    }
}

impl Drop for LoadCompletion {
    fn drop(&mut self) {
        if self.tx.is_some() {
            log::warn!("load of layer {} abandoned without a result", self.name);
            self.deliver(Err(LayerError::Fetch("dropped".into())));
        }
    }
}

/// Source of layer data.
pub trait LayerFetcher {
    /// Begin fetching `name`. The result must be delivered through
    /// `completion`, from this call or later.
    fn fetch(&self, name: &str, completion: LoadCompletion);
}

/// Reads `<root>/<name>.geojson` on a worker thread.
#[derive(Debug, Clone)]
pub struct FileLayerFetcher {
    root: PathBuf,
    kind: LayerKind,
}

impl FileLayerFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            kind: LayerKind::Boundary,
        }
    }

    /// Tag every loaded layer with `kind`.
    pub fn with_kind(mut self, kind: LayerKind) -> Self {
        self.kind = kind;
        self
    }

    fn path_for(&self, name: &str) -> LayerResult<PathBuf> {
        // Layer names come from the host; keep them inside the root.
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(LayerError::Fetch(format!("Invalid layer name: {}", name)));
        }
        Ok(self.root.join(format!("{}.geojson", name)))
    }
}

impl LayerFetcher for FileLayerFetcher {
    fn fetch(&self, name: &str, completion: LoadCompletion) {
        let path = match self.path_for(name) {
            Ok(path) => path,
            Err(e) => {
                completion.resolve(Err(e));
                return;
            }
        };
        let name = name.to_string();
        let kind = self.kind;

        thread::spawn(move || {
            log::info!("loading layer {} from {}", name, path.display());
            let result = std::fs::read_to_string(&path)
                .map_err(|e| LayerError::Fetch(format!("{}: {}", path.display(), e)))
                .and_then(|source| LayerData::from_geojson(&name, kind, &source));
            completion.resolve(result);
        });
    }
}

#[derive(Debug, Default)]
struct CacheEntry {
    status: LayerStatus,
    data: Option<Arc<LayerData>>,
    last_error: Option<LayerError>,
}

/// Answer to a load request.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerRequest {
    /// Already cached.
    Ready(Arc<LayerData>),
    /// A fetch is in flight; the result arrives through `poll_completions`.
    Pending,
}

/// A fetch that finished during `poll_completions`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadFinished {
    pub name: String,
    pub result: LayerResult<Arc<LayerData>>,
}

/// Name-keyed overlay cache.
pub struct LayerCache {
    fetcher: Box<dyn LayerFetcher>,
    entries: HashMap<String, CacheEntry>,
    tx: Sender<Delivery>,
    rx: Receiver<Delivery>,
    events: EventQueue,
}

impl LayerCache {
    pub fn new(fetcher: Box<dyn LayerFetcher>) -> Self {
        let (tx, rx) = channel();
        Self {
            fetcher,
            entries: HashMap::new(),
            tx,
            rx,
            events: EventQueue::new(),
        }
    }

    /// Request a layer.
    ///
    /// Cached layers are returned immediately. A request for a layer already
    /// loading joins the existing fetch. Otherwise (never loaded, or failed
    /// before) a new fetch starts and `LayerLoadStart` fires.
    pub fn load_layer(&mut self, name: &str) -> LayerRequest {
        let entry = self.entries.entry(name.to_string()).or_default();
        match entry.status {
            LayerStatus::Loaded => {
                if let Some(data) = &entry.data {
                    return LayerRequest::Ready(Arc::clone(data));
                }
                log::warn!("layer {} marked loaded without data; refetching", name);
            }
            LayerStatus::Loading => {
                log::debug!("joining in-flight load of {}", name);
                return LayerRequest::Pending;
            }
            LayerStatus::NotLoaded | LayerStatus::Failed => {}
        }

        entry.status = LayerStatus::Loading;
        entry.last_error = None;
        self.events.push(EngineEvent::LayerLoadStart { name: name.to_string() });
        log::debug!("fetching layer {}", name);

        let completion = LoadCompletion {
            name: name.to_string(),
            tx: Some(self.tx.clone()),
        };
        self.fetcher.fetch(name, completion);
        LayerRequest::Pending
    }

    /// Apply a fetch result for `name`.
    ///
    /// Returns None, and changes nothing, if no fetch for `name` is in flight.
    pub fn complete(&mut self, name: &str, result: LayerResult<LayerData>) -> Option<LoadFinished> {
        let Some(entry) = self.entries.get_mut(name).filter(|e| e.status == LayerStatus::Loading) else {
            log::warn!("ignoring completion for {} with no load in flight", name);
            return None;
        };

        let result = match result {
            Ok(data) => {
                let data = Arc::new(data);
                entry.status = LayerStatus::Loaded;
                entry.data = Some(Arc::clone(&data));
                log::info!("layer {} loaded ({} features)", name, data.features.len());
                Ok(data)
            }
            Err(e) => {
                entry.status = LayerStatus::Failed;
                entry.last_error = Some(e.clone());
                log::warn!("layer {} failed: {}", name, e);
                Err(e)
            }
        };

        self.events.push(EngineEvent::LayerLoadDone {
            name: name.to_string(),
            success: result.is_ok(),
        });
        Some(LoadFinished {
            name: name.to_string(),
            result,
        })
    }

    /// Apply every result delivered since the last poll (non-blocking).
    pub fn poll_completions(&mut self) -> Vec<LoadFinished> {
        let mut finished = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok((name, result)) => finished.extend(self.complete(&name, result)),
                // The cache holds a sender itself, so the channel never disconnects.
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        finished
    }

    pub fn status(&self, name: &str) -> LayerStatus {
        self.entries.get(name).map(|e| e.status).unwrap_or_default()
    }

    /// Cached data, if loaded.
    pub fn get(&self, name: &str) -> Option<Arc<LayerData>> {
        self.entries.get(name).and_then(|e| e.data.clone())
    }

    /// Error of the most recent failed fetch, cleared when a retry starts.
    pub fn last_error(&self, name: &str) -> Option<&LayerError> {
        self.entries.get(name).and_then(|e| e.last_error.as_ref())
    }

    /// Number of fetches in flight.
    pub fn in_flight(&self) -> usize {
        self.entries.values().filter(|e| e.status == LayerStatus::Loading).count()
    }

    /// Take events emitted since the last call.
    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        self.events.drain()
    }
}
