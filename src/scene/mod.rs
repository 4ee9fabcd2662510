// Scene - Priority-ordered node collection
//
// Responsibilities:
// - Keep nodes sorted by priority, insertion order within a priority
// - Guard structural changes (add/remove) with one lock
// - Fan update and render passes out to the nodes
// - Own the viewport, camera and background of one screen
//
// Passes take the lock only long enough to copy the node list, then call
// the nodes without it. A node may therefore add or remove nodes from its
// own update/render; the change shows up on the next pass.

pub mod node;
pub mod stage;

pub use node::{Calibration, Node, RenderContext};
pub use stage::Stage;

use glam::{Affine2, Vec2, Vec4};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

/// World units visible vertically, whatever the window size
pub const VIEWPORT_HEIGHT: f32 = 1080.0;

pub const DEFAULT_BACKGROUND: Vec4 = Vec4::new(0.0, 0.0, 0.0, 1.0);

/// Lifecycle callbacks of a scene. Each fires at most once per scene.
///
/// Hooks run while the stage is switching scenes and must not call back
/// into the stage.
pub trait SceneHooks: Send + Sync {
    /// Before the first render
    fn on_present(&self, _scene: &Scene) {}

    /// Before the scene is replaced or the stage is cleared
    fn on_scene_change(&self, _scene: &Scene) {}
}

struct NoHooks;

impl SceneHooks for NoHooks {}

struct NodeEntry {
    priority: f32,
    node: Arc<dyn Node>,
}

#[derive(Debug, Clone, Copy)]
struct View {
    viewport: Vec2,
    world_to_screen: Affine2,
    camera: Affine2,
}

impl View {
    fn for_window(width: u32, height: u32) -> Self {
        let viewport = Vec2::new(width as f32 * VIEWPORT_HEIGHT / height as f32, VIEWPORT_HEIGHT);
        Self {
            viewport,
            world_to_screen: world_to_screen(viewport),
            camera: Affine2::IDENTITY,
        }
    }
}

/// Maps the viewport rectangle `[0, viewport]` onto `[-1, 1]²`
pub fn world_to_screen(viewport: Vec2) -> Affine2 {
    Affine2::from_scale(2.0 / viewport) * Affine2::from_translation(-viewport / 2.0)
}

pub struct Scene {
    name: String,
    nodes: Mutex<Vec<NodeEntry>>,
    background: Mutex<Vec4>,
    view: Mutex<View>,
    hooks: Box<dyn SceneHooks>,
    presented: AtomicBool,
    changed: AtomicBool,
    render_thread: OnceLock<ThreadId>,
}

impl Scene {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Mutex::new(Vec::new()),
            background: Mutex::new(DEFAULT_BACKGROUND),
            view: Mutex::new(View::for_window(1920, 1080)),
            hooks: Box::new(NoHooks),
            presented: AtomicBool::new(false),
            changed: AtomicBool::new(false),
            render_thread: OnceLock::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: impl SceneHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    pub fn with_background(self, color: Vec4) -> Self {
        *self.background.lock() = color;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // -------------------------------------------------------------------------
    // Structure
    // -------------------------------------------------------------------------

    /// Insert after the last node whose priority is not greater than the new
    /// node's, or at the front if there is none.
    pub fn add_node(&self, node: Arc<dyn Node>) {
        let priority = node.calibration().priority();
        let mut nodes = self.nodes.lock();

        let at = nodes
            .iter()
            .rposition(|entry| entry.priority.total_cmp(&priority).is_le())
            .map_or(0, |i| i + 1);
        nodes.insert(at, NodeEntry { priority, node });
    }

    /// Remove every entry of `node`. Returns how many were removed.
    pub fn remove_node(&self, node: &dyn Node) -> usize {
        let mut nodes = self.nodes.lock();
        let before = nodes.len();
        nodes.retain(|entry| !same_node(entry.node.as_ref(), node));
        before - nodes.len()
    }

    pub fn contains(&self, node: &dyn Node) -> bool {
        self.nodes.lock().iter().any(|entry| same_node(entry.node.as_ref(), node))
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }

    /// Current traversal order
    pub fn nodes(&self) -> Vec<Arc<dyn Node>> {
        self.nodes.lock().iter().map(|entry| Arc::clone(&entry.node)).collect()
    }

    // -------------------------------------------------------------------------
    // Passes
    // -------------------------------------------------------------------------

    pub fn update(&self, thread_num: usize, ups: f32) {
        for node in self.nodes() {
            node.update(thread_num, ups);
        }
    }

    /// Must always be called from the same thread.
    pub fn render(&self, thread_num: usize, fps: f32) {
        let current = thread::current().id();
        let owner = *self.render_thread.get_or_init(|| current);
        debug_assert_eq!(owner, current, "scene '{}' rendered from two threads", self.name);

        let ctx = self.render_context(thread_num, fps);
        for node in self.nodes() {
            node.render(&ctx);
        }
    }

    pub fn render_context(&self, thread_num: usize, fps: f32) -> RenderContext {
        let view = *self.view.lock();
        RenderContext {
            thread_num,
            fps,
            viewport: view.viewport,
            camera_to_screen: view.world_to_screen * view.camera,
        }
    }

    // -------------------------------------------------------------------------
    // View
    // -------------------------------------------------------------------------

    /// Keep the viewport 1080 units tall and match the window's aspect ratio.
    /// A zero-height (minimized) window is ignored.
    pub fn on_window_resize(&self, width: u32, height: u32) {
        if height == 0 {
            return;
        }
        let mut view = self.view.lock();
        let camera = view.camera;
        *view = View::for_window(width, height);
        view.camera = camera;
        log::debug!("Scene '{}' viewport {:?}", self.name, view.viewport);
    }

    pub fn viewport(&self) -> Vec2 {
        self.view.lock().viewport
    }

    pub fn world_to_screen(&self) -> Affine2 {
        self.view.lock().world_to_screen
    }

    pub fn set_camera(&self, camera: Affine2) {
        self.view.lock().camera = camera;
    }

    pub fn camera(&self) -> Affine2 {
        self.view.lock().camera
    }

    pub fn background(&self) -> Vec4 {
        *self.background.lock()
    }

    pub fn set_background(&self, color: Vec4) {
        *self.background.lock() = color;
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Fire `on_present` unless it already fired. Returns whether it ran.
    pub fn on_present(&self) -> bool {
        if self.presented.swap(true, Ordering::AcqRel) {
            log::warn!("Scene '{}' presented twice, hook skipped", self.name);
            return false;
        }
        log::info!("Presenting scene '{}'", self.name);
        self.hooks.on_present(self);
        true
    }

    /// Fire `on_scene_change` unless it already fired. Returns whether it ran.
    pub fn on_scene_change(&self) -> bool {
        if self.changed.swap(true, Ordering::AcqRel) {
            log::warn!("Scene '{}' torn down twice, hook skipped", self.name);
            return false;
        }
        log::info!("Leaving scene '{}'", self.name);
        self.hooks.on_scene_change(self);
        true
    }
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("name", &self.name)
            .field("nodes", &self.len())
            .field("background", &self.background())
            .finish()
    }
}

/// Node identity is the object, not its vtable
fn same_node(a: &dyn Node, b: &dyn Node) -> bool {
    std::ptr::eq(a as *const dyn Node as *const (), b as *const dyn Node as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Marker {
        id: usize,
        calibration: Calibration,
        seen: Arc<Mutex<Vec<usize>>>,
    }

    impl Marker {
        fn new(id: usize, priority: f32, seen: &Arc<Mutex<Vec<usize>>>) -> Arc<Self> {
            Arc::new(Self {
                id,
                calibration: Calibration::with_priority(-1.0, -1.0, priority),
                seen: Arc::clone(seen),
            })
        }
    }

    impl Node for Marker {
        fn calibration(&self) -> &Calibration {
            &self.calibration
        }

        fn update(&self, _thread_num: usize, _ups: f32) {
            self.seen.lock().push(self.id);
        }

        fn render(&self, _ctx: &RenderContext) {
            self.seen.lock().push(self.id);
        }
    }

    fn update_order(scene: &Scene, seen: &Arc<Mutex<Vec<usize>>>) -> Vec<usize> {
        seen.lock().clear();
        scene.update(0, 60.0);
        std::mem::take(&mut *seen.lock())
    }

    #[test]
    fn test_mixed_priorities_fifo_within_band() {
        let scene = Scene::new("order");
        let seen = Arc::new(Mutex::new(Vec::new()));

        scene.add_node(Marker::new(1, 2.0, &seen));
        scene.add_node(Marker::new(2, 1.0, &seen));
        scene.add_node(Marker::new(3, 1.0, &seen));

        assert_eq!(update_order(&scene, &seen), vec![2, 3, 1]);
    }

    #[test]
    fn test_ascending_additions_keep_order() {
        let scene = Scene::new("ascending");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let priorities = [0.0, 0.0, 0.5, 1.0, 1.0, 1.0, 3.0];
        for (id, p) in priorities.iter().enumerate() {
            scene.add_node(Marker::new(id, *p, &seen));
        }

        assert_eq!(update_order(&scene, &seen), (0..priorities.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_any_insertion_order_is_sorted_and_stable() {
        let scene = Scene::new("shuffled");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let priorities = [3.0, -1.0, 2.0, 3.0, 0.0, -1.0, 2.0, 0.0];
        for (id, p) in priorities.iter().enumerate() {
            scene.add_node(Marker::new(id, *p, &seen));
        }

        let mut expected: Vec<usize> = (0..priorities.len()).collect();
        expected.sort_by(|a, b| priorities[*a].total_cmp(&priorities[*b]));
        assert_eq!(update_order(&scene, &seen), expected);
    }

    #[test]
    fn test_remove_drops_every_entry() {
        let scene = Scene::new("remove");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let twice = Marker::new(7, 1.0, &seen);
        scene.add_node(Marker::new(1, 0.0, &seen));
        scene.add_node(twice.clone());
        scene.add_node(Marker::new(2, 2.0, &seen));
        scene.add_node(twice.clone());

        assert_eq!(scene.remove_node(twice.as_ref()), 2);
        assert!(!scene.contains(twice.as_ref()));
        assert_eq!(update_order(&scene, &seen), vec![1, 2]);
    }

    #[test]
    fn test_remove_non_member_is_noop() {
        let scene = Scene::new("noop");
        let seen = Arc::new(Mutex::new(Vec::new()));

        scene.add_node(Marker::new(1, 1.0, &seen));
        scene.add_node(Marker::new(2, 0.0, &seen));

        let stranger = Marker::new(9, 0.0, &seen);
        assert_eq!(scene.remove_node(stranger.as_ref()), 0);
        assert_eq!(update_order(&scene, &seen), vec![2, 1]);
    }

    #[test]
    fn test_node_can_add_nodes_during_update() {
        struct Spawner {
            scene: Arc<Scene>,
            seen: Arc<Mutex<Vec<usize>>>,
        }

        impl Node for Spawner {
            fn update(&self, _thread_num: usize, _ups: f32) {
                self.scene.add_node(Marker::new(5, 9.0, &self.seen));
            }
            fn render(&self, _ctx: &RenderContext) {}
        }

        let scene = Arc::new(Scene::new("spawn"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        scene.add_node(Arc::new(Spawner {
            scene: Arc::clone(&scene),
            seen: Arc::clone(&seen),
        }));

        assert!(update_order(&scene, &seen).is_empty());
        assert_eq!(scene.len(), 2);
        assert_eq!(update_order(&scene, &seen), vec![5]);
    }

    #[test]
    fn test_render_visits_in_priority_order() {
        let scene = Scene::new("render");
        let seen = Arc::new(Mutex::new(Vec::new()));
        scene.add_node(Marker::new(1, 1.0, &seen));
        scene.add_node(Marker::new(2, 0.0, &seen));

        scene.render(0, 60.0);
        assert_eq!(*seen.lock(), vec![2, 1]);
    }

    #[test]
    fn test_viewport_follows_aspect_ratio() {
        let scene = Scene::new("view");
        scene.on_window_resize(1280, 720);
        let viewport = scene.viewport();
        assert_relative_eq!(viewport.x, 1920.0);
        assert_relative_eq!(viewport.y, VIEWPORT_HEIGHT);

        scene.on_window_resize(800, 800);
        assert_relative_eq!(scene.viewport().x, 1080.0);

        scene.on_window_resize(800, 0);
        assert_relative_eq!(scene.viewport().x, 1080.0);
    }

    #[test]
    fn test_world_to_screen_maps_corners() {
        let m = world_to_screen(Vec2::new(1920.0, 1080.0));

        let low = m.transform_point2(Vec2::ZERO);
        assert_relative_eq!(low.x, -1.0, epsilon = 1e-5);
        assert_relative_eq!(low.y, -1.0, epsilon = 1e-5);

        let high = m.transform_point2(Vec2::new(1920.0, 1080.0));
        assert_relative_eq!(high.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(high.y, 1.0, epsilon = 1e-5);

        let centre = m.transform_point2(Vec2::new(960.0, 540.0));
        assert_relative_eq!(centre.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(centre.y, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_resize_keeps_camera() {
        let scene = Scene::new("resize");
        let camera = Affine2::from_translation(Vec2::new(10.0, 20.0));
        scene.set_camera(camera);
        scene.on_window_resize(1280, 720);
        assert_eq!(scene.camera(), camera);
    }

    #[test]
    fn test_camera_applies_before_projection() {
        let scene = Scene::new("camera");
        scene.on_window_resize(1920, 1080);
        scene.set_camera(Affine2::from_translation(Vec2::new(960.0, 540.0)));

        let ctx = scene.render_context(0, 60.0);
        let origin = ctx.to_screen(Vec2::ZERO);
        assert_relative_eq!(origin.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(origin.y, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_hooks_fire_once() {
        struct Counting(Arc<Mutex<Vec<&'static str>>>);
        impl SceneHooks for Counting {
            fn on_present(&self, _scene: &Scene) {
                self.0.lock().push("present");
            }
            fn on_scene_change(&self, _scene: &Scene) {
                self.0.lock().push("change");
            }
        }

        let calls = Arc::new(Mutex::new(Vec::new()));
        let scene = Scene::new("hooks").with_hooks(Counting(Arc::clone(&calls)));

        assert!(scene.on_present());
        assert!(!scene.on_present());
        assert!(scene.on_scene_change());
        assert!(!scene.on_scene_change());
        assert_eq!(*calls.lock(), vec!["present", "change"]);
    }

    // -------------------------------------------------------------------------
    // Concurrency
    // -------------------------------------------------------------------------

    struct Weighted(Calibration);

    impl Weighted {
        fn new(priority: f32) -> Arc<Self> {
            Arc::new(Self(Calibration::with_priority(-1.0, -1.0, priority)))
        }
    }

    impl Node for Weighted {
        fn calibration(&self) -> &Calibration {
            &self.0
        }

        fn render(&self, _ctx: &RenderContext) {}
    }

    /// Removes itself from its scene on its first update
    struct Leaver {
        calibration: Calibration,
        scene: std::sync::Weak<Scene>,
        updates: std::sync::atomic::AtomicUsize,
    }

    impl Node for Leaver {
        fn calibration(&self) -> &Calibration {
            &self.calibration
        }

        fn update(&self, _thread_num: usize, _ups: f32) {
            self.updates.fetch_add(1, Ordering::SeqCst);
            if let Some(scene) = self.scene.upgrade() {
                scene.remove_node(self);
            }
        }

        fn render(&self, _ctx: &RenderContext) {}
    }

    fn is_sorted(nodes: &[Arc<dyn Node>]) -> bool {
        nodes
            .windows(2)
            .all(|pair| pair[0].calibration().priority() <= pair[1].calibration().priority())
    }

    #[test]
    fn test_concurrent_adds_stay_sorted_during_passes() {
        const ADDERS: usize = 8;
        const PER_ADDER: usize = 250;

        let scene = Arc::new(Scene::new("crowd"));
        let done = Arc::new(AtomicBool::new(false));

        let traverser = {
            let scene = Arc::clone(&scene);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut passes = 0usize;
                while !done.load(Ordering::SeqCst) {
                    scene.update(1, 120.0);
                    scene.render(0, 60.0);
                    assert!(is_sorted(&scene.nodes()), "unsorted snapshot");
                    passes += 1;
                }
                passes
            })
        };

        let adders: Vec<_> = (0..ADDERS)
            .map(|t| {
                let scene = Arc::clone(&scene);
                thread::spawn(move || {
                    for i in 0..PER_ADDER {
                        let priority = ((t * 31 + i * 7) % 5) as f32 - 2.0;
                        scene.add_node(Weighted::new(priority));
                    }
                })
            })
            .collect();

        for adder in adders {
            adder.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
        traverser.join().unwrap();

        assert_eq!(scene.len(), ADDERS * PER_ADDER);
        assert!(is_sorted(&scene.nodes()));
    }

    #[test]
    fn test_nodes_remove_themselves_while_other_loop_renders() {
        let scene = Arc::new(Scene::new("leaving"));
        let leavers: Vec<Arc<Leaver>> = (0..100)
            .map(|i| {
                Arc::new(Leaver {
                    calibration: Calibration::with_priority(-1.0, -1.0, (i % 3) as f32),
                    scene: Arc::downgrade(&scene),
                    updates: std::sync::atomic::AtomicUsize::new(0),
                })
            })
            .collect();
        for leaver in &leavers {
            scene.add_node(leaver.clone());
        }
        for i in 0..50 {
            scene.add_node(Weighted::new((i % 4) as f32));
        }

        let done = Arc::new(AtomicBool::new(false));
        let renderer = {
            let scene = Arc::clone(&scene);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    scene.render(0, 60.0);
                    let nodes = scene.nodes();
                    assert!(is_sorted(&nodes), "unsorted snapshot");
                    assert!(nodes.len() >= 50 && nodes.len() <= 150);
                }
            })
        };

        let updater = {
            let scene = Arc::clone(&scene);
            thread::spawn(move || {
                for _ in 0..3 {
                    scene.update(1, 120.0);
                }
            })
        };
        updater.join().unwrap();
        done.store(true, Ordering::SeqCst);
        renderer.join().unwrap();

        assert_eq!(scene.len(), 50);
        for leaver in &leavers {
            assert!(!scene.contains(leaver.as_ref()));
            // Gone before the second pass took its snapshot
            assert_eq!(leaver.updates.load(Ordering::SeqCst), 1);
        }
    }
}
