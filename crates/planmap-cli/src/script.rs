//! JSON action scripts replayed against a headless engine.

use kurbo::Point;
use planmap_core::geometry::multipolygon_from_vertices;
use planmap_core::{
    ConfigError, EngineConfig, EngineError, FileLayerFetcher, LegendError, MemoryViewport, PlanningMap,
    PolygonId, StaticColormaps, Viewport, ViewportEvent, ViewportId,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that stop a replay.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid script: {0}")]
    Script(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Invalid colormaps: {0}")]
    Colormaps(#[from] LegendError),
    #[error("Step {step}: no viewport {index}")]
    NoSuchViewport { step: usize, index: usize },
    #[error("Step {step}: no polygon {index}")]
    NoSuchPolygon { step: usize, index: usize },
}

/// Outcome of a failed step: engine errors are reported, the rest stop the run.
enum StepError {
    Engine(EngineError),
    Fatal(CliError),
}

impl From<EngineError> for StepError {
    fn from(e: EngineError) -> Self {
        StepError::Engine(e)
    }
}

impl From<CliError> for StepError {
    fn from(e: CliError) -> Self {
        StepError::Fatal(e)
    }
}

impl From<std::io::Error> for StepError {
    fn from(e: std::io::Error) -> Self {
        StepError::Fatal(e.into())
    }
}

fn default_wait_ms() -> u64 {
    5000
}

/// One scripted user action. Viewports and polygons are addressed by index.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    StartDrawing,
    AddVertex { x: f64, y: f64 },
    FinishDrawing,
    CancelDrawing,
    EditPolygon { index: usize, vertices: Vec<[f64; 2]> },
    DeletePolygon { index: usize },
    ClearAll,
    UploadGeojson { geojson: serde_json::Value },
    ShowLayer { viewport: usize, name: String },
    HideLayer { viewport: usize, name: String },
    /// Pan the primary viewport.
    Pan { x: f64, y: f64 },
    /// Zoom the primary viewport.
    Zoom { level: f64 },
    SetPrimary { viewport: usize },
    SetVisible { viewport: usize, visible: bool },
    Legend { colormap: String },
    /// Block until no layer load is in flight.
    WaitLayers {
        #[serde(default = "default_wait_ms")]
        timeout_ms: u64,
    },
}

pub struct ReplayOptions {
    pub script: PathBuf,
    pub config: Option<PathBuf>,
    pub layers: PathBuf,
    pub viewports: usize,
    pub colormaps: Option<PathBuf>,
}

/// Load everything named in `options`, run the script and write a transcript
/// to `out`.
pub fn replay(options: &ReplayOptions, out: &mut impl Write) -> Result<(), CliError> {
    let config = match &options.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let actions: Vec<Action> = serde_json::from_str(&fs::read_to_string(&options.script)?)?;

    let mut map = PlanningMap::new(config, Box::new(FileLayerFetcher::new(&options.layers)));
    if let Some(path) = &options.colormaps {
        let colormaps = StaticColormaps::from_json(&fs::read_to_string(path)?)?;
        map = map.with_colormaps(Box::new(colormaps));
    }

    let mut runner = Runner::new(map, options.viewports.max(1), out);
    for (step, action) in actions.iter().enumerate() {
        runner.apply(step, action)?;
    }
    runner.finish()
}

/// Drives a [`PlanningMap`] over in-memory viewports.
pub struct Runner<'a, W: Write> {
    map: PlanningMap,
    handles: Vec<MemoryViewport>,
    ids: Vec<ViewportId>,
    hidden: HashSet<ViewportId>,
    out: &'a mut W,
}

impl<'a, W: Write> Runner<'a, W> {
    pub fn new(mut map: PlanningMap, viewports: usize, out: &'a mut W) -> Self {
        let handles: Vec<MemoryViewport> = (0..viewports).map(|_| MemoryViewport::new()).collect();
        let ids = handles.iter().map(|h| map.add_viewport(Box::new(h.clone()))).collect();
        map.refresh_visibility(|_| true);
        Self {
            map,
            handles,
            ids,
            hidden: HashSet::new(),
            out,
        }
    }

    pub fn map(&self) -> &PlanningMap {
        &self.map
    }

    fn viewport(&self, step: usize, index: usize) -> Result<ViewportId, CliError> {
        self.ids
            .get(index)
            .copied()
            .ok_or(CliError::NoSuchViewport { step, index })
    }

    fn polygon(&self, step: usize, index: usize) -> Result<PolygonId, CliError> {
        self.map
            .session()
            .ids()
            .get(index)
            .copied()
            .ok_or(CliError::NoSuchPolygon { step, index })
    }

    fn primary_handle(&self) -> Option<(ViewportId, MemoryViewport)> {
        let primary = self.map.primary()?;
        let index = self.ids.iter().position(|&id| id == primary)?;
        Some((primary, self.handles[index].clone()))
    }

    /// Run one action, then report what it emitted.
    ///
    /// Engine errors are reported and the script continues; a bad index stops it.
    pub fn apply(&mut self, step: usize, action: &Action) -> Result<(), CliError> {
        log::debug!("step {}: {:?}", step, action);
        match self.dispatch(step, action) {
            Ok(()) => {}
            Err(StepError::Engine(e)) => writeln!(self.out, "[{}] error: {}", step, e)?,
            Err(StepError::Fatal(e)) => return Err(e),
        }
        self.map.poll();
        for event in self.map.poll_events() {
            writeln!(self.out, "[{}] event: {}", step, serde_json::to_string(&event)?)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, step: usize, action: &Action) -> Result<(), StepError> {
        match action {
            Action::StartDrawing => self.map.start_drawing()?,
            Action::AddVertex { x, y } => {
                let outcome = self.map.add_vertex(Point::new(*x, *y))?;
                writeln!(self.out, "[{}] vertex ({}, {}): {:?}", step, x, y, outcome)?;
            }
            Action::FinishDrawing => match self.map.finish_drawing()? {
                Some(id) => writeln!(self.out, "[{}] committed {}", step, id)?,
                None => writeln!(self.out, "[{}] discarded", step)?,
            },
            Action::CancelDrawing => self.map.cancel_drawing()?,
            Action::EditPolygon { index, vertices } => {
                let id = self.polygon(step, *index)?;
                let points: Vec<Point> = vertices.iter().map(|&[x, y]| Point::new(x, y)).collect();
                let outcome = self.map.edit_polygon(id, multipolygon_from_vertices(&points))?;
                writeln!(self.out, "[{}] edited {}: {:?}", step, id, outcome)?;
            }
            Action::DeletePolygon { index } => {
                let id = self.polygon(step, *index)?;
                self.map.delete_polygon(id)?;
            }
            Action::ClearAll => {
                let removed = self.map.clear_all();
                writeln!(self.out, "[{}] cleared {} polygons", step, removed)?;
            }
            Action::UploadGeojson { geojson } => {
                let ids = self.map.upload_geojson(&geojson.to_string())?;
                writeln!(self.out, "[{}] uploaded {} polygons", step, ids.len())?;
            }
            Action::ShowLayer { viewport, name } => {
                let id = self.viewport(step, *viewport)?;
                let status = self.map.show_layer(id, name)?;
                log::debug!("layer {} is {:?}", name, status);
            }
            Action::HideLayer { viewport, name } => {
                let id = self.viewport(step, *viewport)?;
                self.map.hide_layer(id, name);
            }
            Action::Pan { x, y } => {
                if let Some((id, mut handle)) = self.primary_handle() {
                    handle.set_center(Point::new(*x, *y));
                    self.map.handle_event(id, ViewportEvent::ViewChanged)?;
                }
            }
            Action::Zoom { level } => {
                if let Some((id, mut handle)) = self.primary_handle() {
                    handle.set_zoom(*level);
                    self.map.handle_event(id, ViewportEvent::ViewChanged)?;
                }
            }
            Action::SetPrimary { viewport } => {
                let id = self.viewport(step, *viewport)?;
                self.map.set_primary(id)?;
                self.refresh_visibility();
            }
            Action::SetVisible { viewport, visible } => {
                let id = self.viewport(step, *viewport)?;
                if *visible {
                    self.hidden.remove(&id);
                } else {
                    self.hidden.insert(id);
                }
                self.refresh_visibility();
            }
            Action::Legend { colormap } => {
                let legend = self.map.legend(colormap)?;
                for (color, label) in legend.entries() {
                    writeln!(self.out, "[{}] legend {}: {} {}", step, colormap, color, label)?;
                }
            }
            Action::WaitLayers { timeout_ms } => self.wait_layers(Duration::from_millis(*timeout_ms)),
        }
        Ok(())
    }

    fn refresh_visibility(&mut self) {
        let hidden = &self.hidden;
        self.map.refresh_visibility(|id| !hidden.contains(&id));
    }

    fn wait_layers(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.map.layers().in_flight() > 0 {
            self.map.poll();
            if Instant::now() >= deadline {
                log::warn!("{} layer loads still in flight", self.map.layers().in_flight());
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Write the final summary and the planning area as GeoJSON.
    pub fn finish(self) -> Result<(), CliError> {
        let session = self.map.session();
        writeln!(
            self.out,
            "polygons: {} total area: {}",
            session.len(),
            session.total_area()
        )?;
        for (index, handle) in self.handles.iter().enumerate() {
            writeln!(
                self.out,
                "viewport {}: {} mirrors, overlays {:?}, zoom {}",
                index,
                handle.mirror_ids().len(),
                handle.overlay_names(),
                handle.zoom()
            )?;
        }
        writeln!(self.out, "{}", self.map.to_geojson())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(actions: &str, viewports: usize) -> (String, usize) {
        let actions: Vec<Action> = serde_json::from_str(actions).unwrap();
        let map = PlanningMap::new(EngineConfig::default(), Box::new(FileLayerFetcher::new("layers")));
        let mut out = Vec::new();
        let mut runner = Runner::new(map, viewports, &mut out);
        for (step, action) in actions.iter().enumerate() {
            runner.apply(step, action).unwrap();
        }
        let polygons = runner.map().session().len();
        runner.finish().unwrap();
        (String::from_utf8(out).unwrap(), polygons)
    }

    const TWO_SQUARES: &str = r#"[
        {"action": "start_drawing"},
        {"action": "add_vertex", "x": 0, "y": 0},
        {"action": "add_vertex", "x": 0, "y": 10},
        {"action": "add_vertex", "x": 10, "y": 10},
        {"action": "add_vertex", "x": 10, "y": 0},
        {"action": "finish_drawing"},
        {"action": "start_drawing"},
        {"action": "add_vertex", "x": 20, "y": 20},
        {"action": "add_vertex", "x": 20, "y": 30},
        {"action": "add_vertex", "x": 30, "y": 30},
        {"action": "add_vertex", "x": 30, "y": 20},
        {"action": "finish_drawing"}
    ]"#;

    #[test]
    fn test_parse_actions() {
        let actions: Vec<Action> = serde_json::from_str(
            r#"[{"action": "zoom", "level": 3.5}, {"action": "wait_layers"},
                {"action": "edit_polygon", "index": 0, "vertices": [[0, 0], [1, 1], [1, 0]]}]"#,
        )
        .unwrap();
        assert_eq!(actions[0], Action::Zoom { level: 3.5 });
        assert_eq!(actions[1], Action::WaitLayers { timeout_ms: 5000 });
        assert!(matches!(&actions[2], Action::EditPolygon { vertices, .. } if vertices.len() == 3));
    }

    #[test]
    fn test_replay_disjoint_squares() {
        let (out, polygons) = run(TWO_SQUARES, 2);
        assert_eq!(polygons, 2);
        assert_eq!(out.matches("committed").count(), 2);
        assert!(out.contains("viewport 1: 2 mirrors"));
        assert!(out.contains("viewport 0: 0 mirrors"));
        assert!(out.contains("\"FeatureCollection\""));
    }

    #[test]
    fn test_replay_reports_overlap_and_errors() {
        let (out, polygons) = run(
            r#"[
                {"action": "start_drawing"},
                {"action": "add_vertex", "x": 0, "y": 0},
                {"action": "add_vertex", "x": 0, "y": 10},
                {"action": "add_vertex", "x": 10, "y": 10},
                {"action": "finish_drawing"},
                {"action": "start_drawing"},
                {"action": "add_vertex", "x": 1, "y": 8},
                {"action": "finish_drawing"},
                {"action": "finish_drawing"},
                {"action": "delete_polygon", "index": 0}
            ]"#,
            3,
        );
        assert_eq!(polygons, 0);
        assert!(out.contains("\"type\":\"overlap_warning\""));
        assert!(out.contains("Rejected"));
        assert!(out.contains("discarded"));
        assert!(out.contains("[8] error:"));
        assert_eq!(out.matches("no_polygons_remaining").count(), 1);
    }

    #[test]
    fn test_zoom_follows_primary() {
        let (out, _) = run(
            r#"[
                {"action": "set_visible", "viewport": 2, "visible": false},
                {"action": "zoom", "level": 7},
                {"action": "pan", "x": -120, "y": 38}
            ]"#,
            3,
        );
        assert!(out.contains("viewport 1: 0 mirrors, overlays [], zoom 7"));
        assert!(out.contains("viewport 2: 0 mirrors, overlays [], zoom 1"));
    }

    #[test]
    fn test_bad_index_stops_replay() {
        let map = PlanningMap::new(EngineConfig::default(), Box::new(FileLayerFetcher::new("layers")));
        let mut out = Vec::new();
        let mut runner = Runner::new(map, 1, &mut out);
        let err = runner.apply(0, &Action::DeletePolygon { index: 0 }).unwrap_err();
        assert!(matches!(err, CliError::NoSuchPolygon { step: 0, index: 0 }));
        let err = runner
            .apply(1, &Action::ShowLayer { viewport: 4, name: "counties".into() })
            .unwrap_err();
        assert!(matches!(err, CliError::NoSuchViewport { step: 1, index: 4 }));
    }

    #[test]
    fn test_replay_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let layers = dir.path().join("layers");
        fs::create_dir(&layers).unwrap();
        fs::write(
            layers.join("counties.geojson"),
            r#"{"type": "FeatureCollection", "features": [{"type": "Feature", "properties": {"NAME": "Alpine"},
                "geometry": {"type": "Polygon", "coordinates": [[[0,0],[0,50],[50,50],[50,0],[0,0]]]}}]}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("colormaps.json"),
            r##"[{"name": "turbo", "colors": [
                {"rgb": "#7a0403", "name": "High", "percentile": 1},
                {"rgb": "#30123b", "name": "Low", "percentile": 0}]}]"##,
        )
        .unwrap();
        fs::write(dir.path().join("config.json"), r#"{"min_polygon_area": 5.0}"#).unwrap();

        let script = dir.path().join("script.json");
        fs::write(
            &script,
            r#"[
                {"action": "show_layer", "viewport": 0, "name": "counties"},
                {"action": "show_layer", "viewport": 1, "name": "counties"},
                {"action": "wait_layers"},
                {"action": "legend", "colormap": "turbo"},
                {"action": "start_drawing"},
                {"action": "add_vertex", "x": 0, "y": 0},
                {"action": "add_vertex", "x": 0, "y": 2},
                {"action": "add_vertex", "x": 2, "y": 2},
                {"action": "finish_drawing"}
            ]"#,
        )
        .unwrap();

        let options = ReplayOptions {
            script,
            config: Some(dir.path().join("config.json")),
            layers,
            viewports: 2,
            colormaps: Some(dir.path().join("colormaps.json")),
        };
        let mut out = Vec::new();
        replay(&options, &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert_eq!(out.matches("layer_load_start").count(), 1);
        assert!(out.contains("\"success\":true"));
        assert!(out.contains("viewport 1: 0 mirrors, overlays [\"counties\"]"));
        assert!(out.contains("legend turbo: #30123b Low"));
        // Triangle of area 2 is under the configured minimum
        assert!(out.contains("discarded"));
    }

    #[test]
    fn test_missing_script_file() {
        let options = ReplayOptions {
            script: PathBuf::from("/nonexistent/script.json"),
            config: None,
            layers: PathBuf::from("layers"),
            viewports: 1,
            colormaps: None,
        };
        let mut out = Vec::new();
        assert!(matches!(replay(&options, &mut out), Err(CliError::Io(_))));
    }
}
