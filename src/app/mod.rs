// =============================================================================
// APPLICATION - Dual-threaded frame scheduler
// =============================================================================
//
// ┌─────────────────────────────┐     ┌──────────────────────────────┐
// │ render thread (caller)      │     │ update thread ("update")     │
// │  window.update()  (events)  │     │  handler.on_update(ups)      │
// │  scene.render(fps)          │     │  scene.update(ups)           │
// │  backend.draw_frame()       │     │  clock.sleep(min_ms/update)  │
// │  clock.sleep(min_ms/frame)  │     │                              │
// └─────────────┬───────────────┘     └───────────────┬──────────────┘
//               └──── window open flag + Stage ───────┘
//
// LIFECYCLE: Created → Running → Draining → Stopped
// 1. Create window, render backend and Context
// 2. on_begin (caller thread, before any update or render)
// 3. Spawn the update thread; the caller becomes the render loop
// 4. Window closes → both loops finish their current cycle
// 5. Join the update thread, on_end, tear down the stage
//
// A panic in either loop ends the run: the open flag is cleared so the
// other loop drains, and the update thread is always joined.
//
// =============================================================================

pub mod context;
pub mod window;
pub mod winit_window;

pub use context::Context;
pub use window::{HeadlessWindow, OpenFlag, Window, WindowEvent};
pub use winit_window::WinitWindow;

use crate::assets::Assets;
use crate::backend::RenderBackend;
use crate::clock::Clock;
use crate::config::SharedConfig;
use crate::error::{panic_message, EngineError};
use crate::scene::DEFAULT_BACKGROUND;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// `thread_num` passed to nodes by the render loop
pub const RENDER_THREAD: usize = 0;
/// `thread_num` passed to nodes by the update loop
pub const UPDATE_THREAD: usize = 1;

/// Game-specific behaviour plugged into the scheduler.
///
/// `on_update` runs on the update thread while the render thread reads the
/// same scenes, so any state it shares with nodes needs synchronization.
pub trait AppHandler: Send + Sync + 'static {
    /// Before the first update or render, on the thread that called `run`
    fn on_begin(&self, _ctx: &Context) {}

    /// Every update cycle, before the presented scene's nodes update
    fn on_update(&self, _ctx: &Context, _ups: f32) {}

    /// After the update thread has been joined
    fn on_end(&self, _ctx: &Context) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Created,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AppState::Created => "created",
            AppState::Running => "running",
            AppState::Draining => "draining",
            AppState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub struct Application<H: AppHandler> {
    name: String,
    handler: Arc<H>,
    settings: SharedConfig,
    assets: Option<Assets>,
    state: AppState,
}

impl<H: AppHandler> Application<H> {
    pub fn new(name: impl Into<String>, handler: H, settings: SharedConfig, assets: Assets) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
            settings,
            assets: Some(assets),
            state: AppState::Created,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> AppState {
        self.state
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Run until the window closes. An application runs at most once.
    ///
    /// `make_backend` is called on this thread once the window exists.
    pub fn run<W, B, F>(&mut self, window: &mut W, make_backend: F) -> Result<(), EngineError>
    where
        W: Window + ?Sized,
        B: RenderBackend,
        F: FnOnce(&W, &Context) -> anyhow::Result<B>,
    {
        if self.state != AppState::Created {
            return Err(EngineError::AlreadyRan);
        }

        let config = self.settings.snapshot();
        if let Err(e) = window.create(&config.window) {
            self.transition(AppState::Stopped);
            return Err(EngineError::Window(e));
        }

        let ctx = Arc::new(Context::new(
            self.name.clone(),
            self.settings.clone(),
            self.assets.take().unwrap_or_default(),
            window.open_flag(),
        ));
        let (width, height) = window.size();
        ctx.stage().resize(width, height);

        let mut backend = match make_backend(&*window, ctx.as_ref()) {
            Ok(backend) => backend,
            Err(e) => {
                window.open_flag().close();
                self.transition(AppState::Stopped);
                return Err(EngineError::Backend(e));
            }
        };

        self.handler.on_begin(&ctx);

        let mut update = match UpdateThread::spawn(Arc::clone(&self.handler), Arc::clone(&ctx)) {
            Ok(update) => update,
            Err(e) => {
                self.transition(AppState::Stopped);
                return Err(e);
            }
        };
        self.transition(AppState::Running);

        render_loop(window, &mut backend, &ctx, &config.window.title);

        self.transition(AppState::Draining);
        let update_result = update.join();

        if let Err(e) = backend.wait_idle() {
            log::warn!("Backend not idle at shutdown: {:#}", e);
        }
        self.handler.on_end(&ctx);
        ctx.stage().clear();
        drop(backend);

        self.transition(AppState::Stopped);

        update_result.map_err(|payload| {
            let message = panic_message(payload.as_ref());
            log::error!("Update thread panicked: {}", message);
            EngineError::UpdatePanicked(message)
        })
    }

    fn transition(&mut self, next: AppState) {
        log::info!("{}: {} → {}", self.name, self.state, next);
        self.state = next;
    }
}

// =============================================================================
// RENDER LOOP (caller thread)
// =============================================================================

fn render_loop<W, B>(window: &mut W, backend: &mut B, ctx: &Context, title: &str)
where
    W: Window + ?Sized,
    B: RenderBackend,
{
    // A render-side panic still has to stop the update loop
    let _close_on_panic = CloseOnPanic(window.open_flag());

    let mut clock = Clock::new();
    let mut fps = 0.0;
    let mut fps_title = FpsTitle::new(title);

    while window.is_open() {
        for event in window.update() {
            match event {
                WindowEvent::Resized { width, height } => {
                    ctx.stage().resize(width, height);
                    backend.resize(width, height);
                }
                WindowEvent::CloseRequested => log::debug!("Window close requested"),
            }
        }
        if !window.is_open() {
            break;
        }

        let background = match ctx.current_scene() {
            Some(scene) => {
                scene.render(RENDER_THREAD, fps);
                scene.background()
            }
            None => DEFAULT_BACKGROUND,
        };

        match backend.draw_frame(background) {
            Ok(true) => {
                if ctx.settings().show_fps() {
                    if let Some(title) = fps_title.frame(Instant::now()) {
                        window.set_title(&title);
                    }
                }
            }
            Ok(false) => {}
            Err(e) => log::error!("Render error: {:#}", e),
        }

        fps = clock.sleep(ctx.settings().min_ms_per_frame());
    }
}

// =============================================================================
// UPDATE THREAD
// =============================================================================

/// Joins on drop, so an unwinding render loop never leaves the update
/// thread running.
struct UpdateThread {
    handle: Option<JoinHandle<()>>,
    ctx: Arc<Context>,
}

impl UpdateThread {
    fn spawn<H: AppHandler>(handler: Arc<H>, ctx: Arc<Context>) -> Result<Self, EngineError> {
        let thread_ctx = Arc::clone(&ctx);
        let handle = thread::Builder::new()
            .name("update".into())
            .spawn(move || update_loop(handler.as_ref(), &thread_ctx))
            .map_err(|e| {
                ctx.request_close();
                EngineError::SpawnUpdate(e)
            })?;

        Ok(Self {
            handle: Some(handle),
            ctx,
        })
    }

    fn join(&mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

impl Drop for UpdateThread {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.ctx.request_close();
            let _ = handle.join();
        }
    }
}

fn update_loop<H: AppHandler + ?Sized>(handler: &H, ctx: &Context) {
    let _close_on_panic = CloseOnPanic(ctx.open_flag());

    let mut clock = Clock::new();
    let mut ups = 0.0;

    while ctx.is_open() {
        handler.on_update(ctx, ups);
        if let Some(scene) = ctx.current_scene() {
            scene.update(UPDATE_THREAD, ups);
        }
        ups = clock.sleep(ctx.settings().min_ms_per_update());
    }
    log::debug!("Update loop finished");
}

// =============================================================================
// PANIC POLICY
// =============================================================================

/// Clears the open flag if dropped while panicking
struct CloseOnPanic(OpenFlag);

impl Drop for CloseOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            log::error!(
                "{} loop panicked, closing window",
                thread::current().name().unwrap_or("render")
            );
            self.0.close();
        }
    }
}

// =============================================================================
// FPS TRACKING
// =============================================================================

/// Window title with the measured frame rate, refreshed once per second
struct FpsTitle {
    base: String,
    frame_count: u32,
    last_update: Instant,
    last_frame: Instant,
}

impl FpsTitle {
    fn new(base: &str) -> Self {
        let now = Instant::now();
        Self {
            base: base.to_string(),
            frame_count: 0,
            last_update: now,
            last_frame: now,
        }
    }

    /// Count a presented frame; returns a new title once per second
    fn frame(&mut self, now: Instant) -> Option<String> {
        let frame_time = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_update).as_secs_f32();
        if elapsed < 1.0 {
            return None;
        }

        let fps = self.frame_count as f32 / elapsed;
        self.frame_count = 0;
        self.last_update = now;
        Some(format!("{} - {:.0} FPS ({:.2}ms)", self.base, fps, frame_time * 1000.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fps_title_once_per_second() {
        let mut title = FpsTitle::new("Demo");
        let start = title.last_update;

        for i in 1..60 {
            assert!(title.frame(start + Duration::from_millis(i * 16)).is_none());
        }
        let text = title.frame(start + Duration::from_millis(1000)).unwrap();
        assert!(text.starts_with("Demo - 60 FPS"), "{}", text);
        assert_eq!(title.frame_count, 0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(AppState::Draining.to_string(), "draining");
    }
}
