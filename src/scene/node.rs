// Node - Schedulable unit of work
//
// A node is shared between the update thread and the render thread as an
// `Arc<dyn Node>`. Anything `update` writes and `render` reads must sit
// behind the node's own synchronization.

use glam::{Affine2, Vec2};

/// Scheduling hints fixed at construction.
///
/// Times are measured costs in milliseconds, `-1.0` meaning not yet
/// calibrated. They are carried for future scheduling heuristics and are not
/// enforced by the scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    priority: f32,
    update_time: f32,
    render_time: f32,
}

impl Calibration {
    pub const UNCALIBRATED: Self = Self::new(-1.0, -1.0);

    pub const fn new(render_time: f32, update_time: f32) -> Self {
        Self::with_priority(render_time, update_time, 0.0)
    }

    pub const fn with_priority(render_time: f32, update_time: f32, priority: f32) -> Self {
        Self {
            priority,
            update_time,
            render_time,
        }
    }

    /// Lower runs first; equal priorities keep insertion order
    pub fn priority(&self) -> f32 {
        self.priority
    }

    pub fn update_time(&self) -> f32 {
        self.update_time
    }

    pub fn render_time(&self) -> f32 {
        self.render_time
    }

    pub fn is_calibrated(&self) -> bool {
        self.update_time >= 0.0 && self.render_time >= 0.0
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::UNCALIBRATED
    }
}

/// What a node gets to draw with
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderContext {
    pub thread_num: usize,
    /// Rate the render loop achieved on its previous cycle
    pub fps: f32,
    /// Visible area in world units
    pub viewport: Vec2,
    /// Camera space → normalized device coordinates
    pub camera_to_screen: Affine2,
}

impl RenderContext {
    /// Map a point in camera space to [-1, 1]²
    pub fn to_screen(&self, point: Vec2) -> Vec2 {
        self.camera_to_screen.transform_point2(point)
    }
}

/// The update/render capability every node variant implements.
pub trait Node: Send + Sync {
    fn calibration(&self) -> &Calibration {
        &Calibration::UNCALIBRATED
    }

    /// Called from the update thread
    fn update(&self, _thread_num: usize, _ups: f32) {}

    /// Called from the render thread
    fn render(&self, ctx: &RenderContext);
}
