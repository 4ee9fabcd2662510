// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.
//
// Both scheduling loops read the timing section once per iteration through
// a `SharedConfig`, so edits picked up by the `ConfigWatcher` take effect
// on the next cycle.

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub timing: TimingConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Twinloop".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Loop pacing. Rates are caps; a non-positive rate means uncapped.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    pub max_fps: f32,
    pub max_ups: f32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        let max_fps = 60.0;
        Self {
            max_fps,
            max_ups: max_fps * 2.0,
        }
    }
}

impl TimingConfig {
    /// Minimum milliseconds per rendered frame
    pub fn min_ms_per_frame(&self) -> f64 {
        min_ms_for_rate(self.max_fps)
    }

    /// Minimum milliseconds per update cycle
    pub fn min_ms_per_update(&self) -> f64 {
        min_ms_for_rate(self.max_ups)
    }
}

fn min_ms_for_rate(rate: f32) -> f64 {
    if rate > 0.0 && rate.is_finite() {
        1000.0 / rate as f64
    } else {
        0.0
    }
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    /// Default scene background (RGBA, 0-1 range)
    pub background: [f32; 4],
    pub max_frames_in_flight: usize,
    /// Physical device id to use instead of the first suitable one
    pub gpu_id: Option<u32>,
    pub require_compute: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            background: [0.1, 0.2, 0.8, 1.0],
            max_frames_in_flight: 2,
            gpu_id: None,
            require_compute: false,
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_dir: String,
    pub show_fps: bool,
    pub watch_config: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: true,
            log_dir: "logs".to_string(),
            show_fps: true,
            watch_config: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults on error.
    ///
    /// Runs before the logger exists, so the load error is handed back for
    /// the caller to report once logging is up.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::FIFO
            }
        }
    }

    pub fn background(&self) -> glam::Vec4 {
        glam::Vec4::from_array(self.graphics.background)
    }
}

// =============================================================================
// SHARED ACCESS
// =============================================================================

/// Configuration shared between the update thread, the render thread and the
/// file watcher.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig(Arc<RwLock<Config>>);

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }

    /// Copy of the current configuration
    pub fn snapshot(&self) -> Config {
        self.0.read().clone()
    }

    pub fn min_ms_per_frame(&self) -> f64 {
        self.0.read().timing.min_ms_per_frame()
    }

    pub fn min_ms_per_update(&self) -> f64 {
        self.0.read().timing.min_ms_per_update()
    }

    pub fn show_fps(&self) -> bool {
        self.0.read().debug.show_fps
    }

    /// Re-read `path`; on failure the current configuration is kept.
    pub fn reload_from(&self, path: &Path) -> Result<()> {
        let config = Config::load_from_path(path)?;
        let mut current = self.0.write();
        if *current != config {
            log::info!(
                "Config reloaded: {:.0} fps / {:.0} ups cap",
                config.timing.max_fps,
                config.timing.max_ups
            );
            *current = config;
        }
        Ok(())
    }
}

// =============================================================================
// HOT RELOAD
// =============================================================================

/// Watches the config file and swaps edits into a `SharedConfig`.
/// Dropping the watcher stops watching.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl ConfigWatcher {
    pub fn spawn<P: AsRef<Path>>(path: P, shared: SharedConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let watched = path.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    if let Err(e) = shared.reload_from(&watched) {
                        log::warn!("Ignoring config edit: {:#}", e);
                    }
                }
                Ok(_) => {}
                Err(e) => log::warn!("Config watch error: {}", e),
            }
        })
        .context("Failed to create config watcher")?;

        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", path))?;

        log::info!("Watching {:?} for changes", path);
        Ok(Self {
            _watcher: watcher,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
