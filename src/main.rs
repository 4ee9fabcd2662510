// =============================================================================
// TWINLOOP DEMO
// =============================================================================
//
// A title scene with a few orbiting markers. The update thread moves them and
// steps the background colour once per second; the render thread projects
// them and presents the cleared frame.
//
// Usage: twinloop-demo [--headless]
//   --headless  run 600 frames without a window or GPU
//
// Controls: ESC quits, F11 toggles fullscreen.
//
// =============================================================================

use glam::{Vec2, Vec4};
use parking_lot::Mutex;
use std::f32::consts::TAU;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use twinloop::app::RENDER_THREAD;
use twinloop::assets::ShaderStage;
use twinloop::config::{ConfigWatcher, DEFAULT_CONFIG_PATH};
use twinloop::scene::SceneHooks;
use twinloop::{
    error, logging, AppHandler, Application, Assets, Calibration, Config, Context, HeadlessWindow, Node, NullBackend,
    RenderContext, Scene, SharedConfig, TextureId, VulkanRenderer, WinitWindow,
};

const CHECKER: TextureId = TextureId("checker");

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() {
    let (config, load_error) = Config::load_or_default(DEFAULT_CONFIG_PATH);
    logging::init(&config, &config.window.title);
    if let Some(e) = load_error {
        log::warn!("Failed to load {}: {:#}. Using defaults.", DEFAULT_CONFIG_PATH, e);
    }
    log::info!("Starting {}", config.window.title);
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!(
        "Timing: {:.0} fps / {:.0} ups cap",
        config.timing.max_fps,
        config.timing.max_ups
    );

    let headless = std::env::args().any(|arg| arg == "--headless");
    let settings = SharedConfig::new(config.clone());

    // Dropped at the end of main, which stops watching
    let _watcher = if config.debug.watch_config {
        ConfigWatcher::spawn(DEFAULT_CONFIG_PATH, settings.clone())
            .map_err(|e| log::warn!("Config hot reload disabled: {:#}", e))
            .ok()
    } else {
        None
    };

    // Headless runs have no driver behind them, so they stand in for a
    // device without shader support; the Vulkan path always has it
    let assets = match demo_assets(!headless) {
        Ok(assets) => assets,
        Err(e) => error::fatal(&e),
    };

    let mut app = Application::new(config.window.title.clone(), Demo::new(), settings, assets);

    let result = if headless {
        let mut window = HeadlessWindow::new().with_frame_limit(600);
        app.run(&mut window, |_, _| Ok(NullBackend::default()))
    } else {
        let mut window = WinitWindow::new();
        app.run(&mut window, |window, ctx| VulkanRenderer::for_window(window, ctx))
    };

    if let Err(e) = result {
        error::fatal(&e);
    }
    log::info!("Goodbye");
}

fn demo_assets(shaders_supported: bool) -> Result<Assets, twinloop::assets::AssetError> {
    let mut assets = Assets::new().with_shader_support(shaders_supported);

    let pixels = (0..8u32 * 8)
        .flat_map(|i| {
            let on = ((i % 8) + (i / 8)) % 2 == 0;
            if on {
                [255, 255, 255, 255]
            } else {
                [32, 32, 32, 255]
            }
        })
        .collect();
    assets.add_texture(CHECKER, 8, 8, pixels)?;

    if shaders_supported {
        // Header-only module: magic, version 1.0, generator, bound, schema
        let words: [u32; 5] = [twinloop::assets::SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        assets.add_shader(twinloop::ShaderId("marker"), ShaderStage::Vertex, &bytes)?;
    }

    Ok(assets)
}

// =============================================================================
// HANDLER
// =============================================================================

struct Demo {
    started: Instant,
    title: OnceLock<Arc<Scene>>,
}

impl Demo {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            title: OnceLock::new(),
        }
    }
}

impl AppHandler for Demo {
    fn on_begin(&self, ctx: &Context) {
        let background = ctx.settings().snapshot().background();
        let scene = Arc::new(Scene::new("title").with_hooks(TitleHooks).with_background(background));

        let has_texture = ctx.assets().get(CHECKER).is_ok();
        for i in 0..6 {
            let phase = i as f32 / 6.0 * TAU;
            scene.add_node(Arc::new(Orbiter::new(phase, 0.25 + 0.05 * i as f32, i as f32)));
        }
        scene.add_node(Arc::new(FpsReporter::new(has_texture)));

        ctx.present(Arc::clone(&scene));
        let _ = self.title.set(scene);
    }

    fn on_update(&self, ctx: &Context, _ups: f32) {
        let Some(scene) = ctx.current_scene() else {
            return;
        };
        // One step per second keeps command buffer re-recording rare
        let step = self.started.elapsed().as_secs() as f32;
        let hue = (step * 0.1).fract();
        scene.set_background(hue_to_rgb(hue));
    }

    fn on_end(&self, ctx: &Context) {
        if let Some(scene) = self.title.get() {
            log::info!("Title scene ran with {} nodes", scene.len());
        }
        log::info!("{} finished", ctx.name());
    }
}

struct TitleHooks;

impl SceneHooks for TitleHooks {
    fn on_present(&self, scene: &Scene) {
        log::info!("'{}' on screen, viewport {:?}", scene.name(), scene.viewport());
    }

    fn on_scene_change(&self, scene: &Scene) {
        log::info!("'{}' leaving the screen", scene.name());
    }
}

fn hue_to_rgb(hue: f32) -> Vec4 {
    let channel = |offset: f32| 0.5 + 0.4 * ((hue + offset) * TAU).cos();
    Vec4::new(channel(0.0), channel(2.0 / 3.0), channel(1.0 / 3.0), 1.0)
}

// =============================================================================
// NODES
// =============================================================================

/// Circles the viewport centre; angle advances on the update thread.
struct Orbiter {
    calibration: Calibration,
    /// Revolutions per second
    speed: f32,
    angle: Mutex<f32>,
}

impl Orbiter {
    fn new(phase: f32, speed: f32, priority: f32) -> Self {
        Self {
            calibration: Calibration::with_priority(0.01, 0.01, priority),
            speed,
            angle: Mutex::new(phase),
        }
    }
}

impl Node for Orbiter {
    fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    fn update(&self, _thread_num: usize, ups: f32) {
        if ups <= 0.0 || !ups.is_finite() {
            return;
        }
        let mut angle = self.angle.lock();
        *angle = (*angle + self.speed * TAU / ups) % TAU;
    }

    fn render(&self, ctx: &RenderContext) {
        let angle = *self.angle.lock();
        let centre = ctx.viewport / 2.0;
        let world = centre + Vec2::from_angle(angle) * ctx.viewport.y * 0.3;
        let screen = ctx.to_screen(world);
        log::trace!("orbiter at {:?} (ndc {:?})", world, screen);
    }
}

/// Logs the achieved frame rate every few seconds.
struct FpsReporter {
    has_texture: bool,
    last_report: Mutex<Instant>,
}

impl FpsReporter {
    fn new(has_texture: bool) -> Self {
        Self {
            has_texture,
            last_report: Mutex::new(Instant::now()),
        }
    }
}

impl Node for FpsReporter {
    fn calibration(&self) -> &Calibration {
        const LAST: Calibration = Calibration::with_priority(-1.0, -1.0, 100.0);
        &LAST
    }

    fn render(&self, ctx: &RenderContext) {
        debug_assert_eq!(ctx.thread_num, RENDER_THREAD);
        let mut last = self.last_report.lock();
        if last.elapsed().as_secs() >= 5 {
            log::info!(
                "render {:.0} fps, viewport {:.0}x{:.0}, checker texture {}",
                ctx.fps,
                ctx.viewport.x,
                ctx.viewport.y,
                if self.has_texture { "loaded" } else { "missing" }
            );
            *last = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinloop::assets::AssetError;

    #[test]
    fn test_demo_assets_with_shader_support() {
        let assets = demo_assets(true).unwrap();
        assert!(assets.contains(CHECKER));
        assert!(assets.contains(twinloop::ShaderId("marker")));
    }

    #[test]
    fn test_demo_assets_without_shader_support() {
        let assets = demo_assets(false).unwrap();
        assert!(assets.contains(CHECKER));
        assert!(matches!(
            assets.get(twinloop::ShaderId("marker")),
            Err(AssetError::Missing { kind: "shader", .. })
        ));
    }
}
