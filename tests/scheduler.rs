// End-to-end runs of the scheduler with a headless window and a backend that
// only records what it was asked to do.

use approx::assert_relative_eq;
use glam::{Vec2, Vec4};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use twinloop::app::{OpenFlag, WindowEvent, RENDER_THREAD, UPDATE_THREAD};
use twinloop::config::{DebugConfig, TimingConfig, WindowConfig};
use twinloop::scene::DEFAULT_BACKGROUND;
use twinloop::{
    AppHandler, AppState, Application, Assets, Config, Context, EngineError, HeadlessWindow, Node, NullBackend,
    RenderBackend, RenderContext, Scene, SceneHooks, SharedConfig, Window,
};

type Log = Arc<Mutex<Vec<&'static str>>>;

fn settings() -> SharedConfig {
    SharedConfig::new(Config {
        timing: TimingConfig {
            max_fps: 500.0,
            max_ups: 200.0,
        },
        debug: DebugConfig {
            log_to_file: false,
            show_fps: false,
            watch_config: false,
            ..Default::default()
        },
        ..Default::default()
    })
}

fn push_once(log: &Log, entry: &'static str) {
    let mut log = log.lock();
    if !log.contains(&entry) {
        log.push(entry);
    }
}

// =============================================================================
// RECORDING BACKEND
// =============================================================================

#[derive(Debug, Default)]
struct BackendRecord {
    frames: u64,
    size: Option<(u32, u32)>,
    last_clear: Option<Vec4>,
    waited_idle: bool,
}

struct RecordingBackend(Arc<Mutex<BackendRecord>>);

impl RenderBackend for RecordingBackend {
    fn resize(&mut self, width: u32, height: u32) {
        self.0.lock().size = Some((width, height));
    }

    fn draw_frame(&mut self, clear: Vec4) -> anyhow::Result<bool> {
        let mut record = self.0.lock();
        record.frames += 1;
        record.last_clear = Some(clear);
        Ok(true)
    }

    fn wait_idle(&mut self) -> anyhow::Result<()> {
        self.0.lock().waited_idle = true;
        Ok(())
    }
}

// =============================================================================
// TRACKING NODE
// =============================================================================

struct Tracker {
    log: Log,
    renders: AtomicUsize,
    updates: AtomicUsize,
    render_threads: Mutex<HashSet<ThreadId>>,
    update_thread_names: Mutex<HashSet<String>>,
    thread_nums: Mutex<HashSet<(&'static str, usize)>>,
}

impl Tracker {
    fn new(log: Log) -> Self {
        Self {
            log,
            renders: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            render_threads: Mutex::new(HashSet::new()),
            update_thread_names: Mutex::new(HashSet::new()),
            thread_nums: Mutex::new(HashSet::new()),
        }
    }
}

impl Node for Tracker {
    fn update(&self, thread_num: usize, _ups: f32) {
        push_once(&self.log, "first-node-update");
        self.updates.fetch_add(1, Ordering::SeqCst);
        let name = thread::current().name().unwrap_or("<unnamed>").to_string();
        self.update_thread_names.lock().insert(name);
        self.thread_nums.lock().insert(("update", thread_num));
    }

    fn render(&self, ctx: &RenderContext) {
        push_once(&self.log, "first-render");
        self.renders.fetch_add(1, Ordering::SeqCst);
        self.render_threads.lock().insert(thread::current().id());
        self.thread_nums.lock().insert(("render", ctx.thread_num));
    }
}

struct HookLog(Log);

impl SceneHooks for HookLog {
    fn on_present(&self, _scene: &Scene) {
        self.0.lock().push("present");
    }

    fn on_scene_change(&self, _scene: &Scene) {
        self.0.lock().push("change");
    }
}

// =============================================================================
// HANDLER
// =============================================================================

const SCENE_BACKGROUND: Vec4 = Vec4::new(0.25, 0.5, 0.75, 1.0);

#[derive(Default)]
struct Recorder {
    log: Log,
    hooks: Log,
    /// Close once the tracker has seen this many updates and renders
    close_after: Option<usize>,
    present_scene: bool,
    panic_on_update: bool,
    tracker: OnceLock<Arc<Tracker>>,
    scene: OnceLock<Arc<Scene>>,
}

impl Recorder {
    fn closing_after(cycles: usize) -> Self {
        Self {
            close_after: Some(cycles),
            present_scene: true,
            ..Default::default()
        }
    }

    fn tracker(&self) -> &Tracker {
        self.tracker.get().expect("on_begin never ran")
    }

    fn log(&self) -> Vec<&'static str> {
        self.log.lock().clone()
    }
}

impl AppHandler for Recorder {
    fn on_begin(&self, ctx: &Context) {
        self.log.lock().push("begin");
        if !self.present_scene {
            return;
        }

        let tracker = Arc::new(Tracker::new(Arc::clone(&self.log)));
        let scene = Arc::new(
            Scene::new("tracked")
                .with_hooks(HookLog(Arc::clone(&self.hooks)))
                .with_background(SCENE_BACKGROUND),
        );
        scene.add_node(tracker.clone());
        ctx.present(Arc::clone(&scene));

        let _ = self.tracker.set(tracker);
        let _ = self.scene.set(scene);
    }

    fn on_update(&self, ctx: &Context, _ups: f32) {
        push_once(&self.log, "first-update");
        if self.panic_on_update {
            panic!("boom in update");
        }
        if let (Some(cycles), Some(tracker)) = (self.close_after, self.tracker.get()) {
            if tracker.updates.load(Ordering::SeqCst) >= cycles && tracker.renders.load(Ordering::SeqCst) >= cycles {
                ctx.request_close();
            }
        }
    }

    fn on_end(&self, _ctx: &Context) {
        self.log.lock().push("end");
    }
}

fn recording_backend() -> (Arc<Mutex<BackendRecord>>, impl FnOnce(&HeadlessWindow, &Context) -> anyhow::Result<RecordingBackend>) {
    let record = Arc::new(Mutex::new(BackendRecord::default()));
    let shared = Arc::clone(&record);
    (record, move |_: &HeadlessWindow, _: &Context| Ok(RecordingBackend(shared)))
}

// =============================================================================
// TESTS
// =============================================================================

#[test]
fn test_lifecycle_hooks_in_order() {
    let mut app = Application::new("lifecycle", Recorder::closing_after(3), settings(), Assets::new());
    let mut window = HeadlessWindow::new();
    let (record, make_backend) = recording_backend();

    app.run(&mut window, make_backend).unwrap();

    assert_eq!(app.state(), AppState::Stopped);
    assert!(!window.is_open());

    let log = app.handler().log();
    assert_eq!(log.first(), Some(&"begin"));
    assert_eq!(log.last(), Some(&"end"));
    for step in ["first-update", "first-node-update", "first-render"] {
        assert!(log.contains(&step), "{} missing from {:?}", step, log);
    }

    let position = |step| log.iter().position(|s| *s == step).unwrap();
    assert!(position("first-update") < position("first-node-update"));

    let record = record.lock();
    assert!(record.frames >= 3);
    assert!(record.waited_idle);
    assert_eq!(record.last_clear, Some(SCENE_BACKGROUND));
}

#[test]
fn test_loops_run_on_their_own_threads() {
    let mut app = Application::new("threads", Recorder::closing_after(3), settings(), Assets::new());
    let mut window = HeadlessWindow::new();
    let (_record, make_backend) = recording_backend();

    app.run(&mut window, make_backend).unwrap();

    let tracker = app.handler().tracker();
    let render_threads = tracker.render_threads.lock().clone();
    assert_eq!(render_threads, HashSet::from([thread::current().id()]));

    let update_names = tracker.update_thread_names.lock().clone();
    assert_eq!(update_names, HashSet::from(["update".to_string()]));

    let thread_nums = tracker.thread_nums.lock().clone();
    assert_eq!(
        thread_nums,
        HashSet::from([("render", RENDER_THREAD), ("update", UPDATE_THREAD)])
    );
}

#[test]
fn test_resize_reaches_scene_and_backend() {
    let handler = Recorder {
        present_scene: true,
        ..Default::default()
    };
    let mut app = Application::new("resize", handler, settings(), Assets::new());
    let mut window = HeadlessWindow::new()
        .with_event_at(
            2,
            WindowEvent::Resized {
                width: 800,
                height: 400,
            },
        )
        .with_frame_limit(5);
    let (record, make_backend) = recording_backend();

    app.run(&mut window, make_backend).unwrap();

    // Frame 5 only delivers the close
    let record = record.lock();
    assert_eq!(record.frames, 4);
    assert_eq!(record.size, Some((800, 400)));

    let scene = app.handler().scene.get().unwrap();
    let viewport: Vec2 = scene.viewport();
    assert_relative_eq!(viewport.x, 2160.0);
    assert_relative_eq!(viewport.y, 1080.0);

    // Presented in on_begin, torn down with the stage
    assert_eq!(*app.handler().hooks.lock(), vec!["present", "change"]);
}

#[test]
fn test_default_background_without_scene() {
    let mut app = Application::new("empty", Recorder::default(), settings(), Assets::new());
    let mut window = HeadlessWindow::new().with_frame_limit(3);
    let (record, make_backend) = recording_backend();

    app.run(&mut window, make_backend).unwrap();

    assert_eq!(record.lock().last_clear, Some(DEFAULT_BACKGROUND));
    let log = app.handler().log();
    assert_eq!(log.first(), Some(&"begin"));
    assert_eq!(log.last(), Some(&"end"));
    assert!(!log.contains(&"first-render"));
}

#[test]
fn test_second_run_is_rejected() {
    let mut app = Application::new("once", Recorder::default(), settings(), Assets::new());
    let mut window = HeadlessWindow::new().with_frame_limit(2);
    app.run(&mut window, |_, _| Ok(NullBackend::default())).unwrap();

    let mut window = HeadlessWindow::new().with_frame_limit(2);
    let result = app.run(&mut window, |_, _| Ok(NullBackend::default()));
    assert!(matches!(result, Err(EngineError::AlreadyRan)));

    // The rejected run never touched the new window
    assert!(!window.is_open());
    assert_eq!(window.frames(), 0);
    assert_eq!(app.handler().log().iter().filter(|s| **s == "begin").count(), 1);
}

#[test]
fn test_backend_failure_skips_begin() {
    let mut app = Application::new("no-gpu", Recorder::default(), settings(), Assets::new());
    let mut window = HeadlessWindow::new();

    let result = app.run(&mut window, |_, _| Err::<NullBackend, _>(anyhow::anyhow!("no vulkan driver")));

    match result {
        Err(EngineError::Backend(e)) => assert!(e.to_string().contains("no vulkan driver")),
        other => panic!("expected backend error, got {:?}", other),
    }
    assert_eq!(app.state(), AppState::Stopped);
    assert!(!window.is_open());
    assert!(app.handler().log().is_empty());
}

#[test]
fn test_window_failure_is_reported() {
    struct BrokenWindow(OpenFlag);

    impl Window for BrokenWindow {
        fn create(&mut self, _config: &WindowConfig) -> anyhow::Result<()> {
            anyhow::bail!("no display")
        }

        fn open_flag(&self) -> OpenFlag {
            self.0.clone()
        }

        fn update(&mut self) -> Vec<WindowEvent> {
            Vec::new()
        }

        fn size(&self) -> (u32, u32) {
            (0, 0)
        }
    }

    let mut app = Application::new("no-window", Recorder::default(), settings(), Assets::new());
    let mut window = BrokenWindow(OpenFlag::new());
    let result = app.run(&mut window, |_, _| Ok(NullBackend::default()));

    assert!(matches!(result, Err(EngineError::Window(_))));
    assert_eq!(app.state(), AppState::Stopped);
    assert!(app.handler().log().is_empty());
}

#[test]
fn test_update_panic_ends_run() {
    let handler = Recorder {
        panic_on_update: true,
        present_scene: true,
        ..Default::default()
    };
    let mut app = Application::new("panicky", handler, settings(), Assets::new());
    // No frame limit: only the panic can close the window
    let mut window = HeadlessWindow::new();
    let (record, make_backend) = recording_backend();

    let result = app.run(&mut window, make_backend);

    match result {
        Err(EngineError::UpdatePanicked(message)) => assert!(message.contains("boom in update"), "{}", message),
        other => panic!("expected update panic, got {:?}", other),
    }
    assert!(!window.is_open());
    assert_eq!(app.state(), AppState::Stopped);
    assert_eq!(app.handler().log().last(), Some(&"end"));
    assert!(record.lock().waited_idle);
    assert_eq!(*app.handler().hooks.lock(), vec!["present", "change"]);
}
