use std::fmt::Write as _;

use fleetsim_common::EntityKind;
use fleetsim_kernel::{EntityVisual, GuiOptions, SceneSnapshot, Shape};
use glam::DVec2;

/// Camera/view configuration for rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderView {
    /// World point at the center of the view.
    pub center: DVec2,
    /// Half-width of the visible area in meters.
    pub half_width: f64,
    /// Map size in character cells.
    pub columns: usize,
    pub rows: usize,
}

impl Default for RenderView {
    fn default() -> Self {
        Self {
            center: DVec2::ZERO,
            half_width: 80.0,
            columns: 60,
            rows: 20,
        }
    }
}

impl RenderView {
    /// View for `options`, centered on the followed vehicle when it exists
    /// in `scene`.
    pub fn follow(options: &GuiOptions, scene: &SceneSnapshot) -> Self {
        let center = options
            .follow_vehicle
            .as_deref()
            .and_then(|name| scene.vehicles().find(|v| v.name == name))
            .map_or(DVec2::ZERO, |v| v.pose.position);
        Self {
            center,
            half_width: options.camera_distance,
            ..Self::default()
        }
    }

    /// Character cell of a world point, if inside the view.
    pub fn cell(&self, p: DVec2) -> Option<(usize, usize)> {
        let half_height = self.half_width * self.rows as f64 / self.columns as f64 * 2.0;
        let rel = p - self.center;
        let u = (rel.x + self.half_width) / (2.0 * self.half_width);
        let v = (half_height - rel.y) / (2.0 * half_height);
        if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
            return None;
        }
        Some((
            (u * self.columns as f64) as usize,
            (v * self.rows as f64) as usize,
        ))
    }
}

/// Renderer-agnostic interface. All renderers implement this trait.
///
/// Renderers work from a detached [`SceneSnapshot`] and never see the world
/// itself, so rendering never holds the world lock.
pub trait Renderer {
    /// The output type produced by this renderer.
    type Output;

    /// Render one frame. `messages` is the status text set by the caller.
    fn render(&self, scene: &SceneSnapshot, view: &RenderView, messages: &str) -> Self::Output;
}

/// Text renderer: status header, top-down character map, entity list and
/// status messages.
#[derive(Debug, Default)]
pub struct DebugTextRenderer {
    /// Skip the character map.
    pub list_only: bool,
}

impl DebugTextRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, scene: &SceneSnapshot, view: &RenderView) -> String {
        let mut grid = vec![vec!['.'; view.columns]; view.rows];
        let mut plot = |e: &EntityVisual| {
            let glyph = match (e.kind, e.shape) {
                (_, Shape::Empty) => return,
                (EntityKind::Vehicle, _) => e.name.chars().next().unwrap_or('V'),
                (EntityKind::Block, _) => '#',
                (EntityKind::Element, _) => '+',
            };
            if let Some((col, row)) = view.cell(e.pose.position) {
                grid[row][col] = glyph;
            }
        };
        // Vehicles last so they are drawn on top.
        scene
            .entities
            .iter()
            .filter(|e| e.kind != EntityKind::Vehicle)
            .for_each(&mut plot);
        scene.vehicles().for_each(&mut plot);

        let mut out = String::with_capacity((view.columns + 1) * view.rows);
        for row in grid {
            out.extend(row);
            out.push('\n');
        }
        out
    }
}

impl Renderer for DebugTextRenderer {
    type Output = String;

    fn render(&self, scene: &SceneSnapshot, view: &RenderView, messages: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "=== t={:.3}s steps={} entities={} bodies={} ===",
            scene.simul_time,
            scene.step_count,
            scene.entities.len(),
            scene.body_count
        );
        let _ = writeln!(
            out,
            "Camera: center=({:.1}, {:.1}) half_width={:.1}",
            view.center.x, view.center.y, view.half_width
        );
        if !self.list_only {
            out.push_str(&self.map(scene, view));
        }
        for e in &scene.entities {
            let _ = write!(
                out,
                "  {} {} [{}] pos=({:.2}, {:.2}) yaw={:.1}deg",
                e.kind,
                e.name,
                e.class,
                e.pose.position.x,
                e.pose.position.y,
                e.pose.yaw.to_degrees()
            );
            for s in &e.sensors {
                let _ = write!(out, " {}@{:.2}", s.name, s.last_sample_time);
            }
            out.push('\n');
        }
        for line in messages.lines() {
            let _ = writeln!(out, "> {line}");
        }
        out
    }
}
