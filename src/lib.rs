// =============================================================================
// TWINLOOP - Dual-threaded 2D frame scheduler on Vulkan
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Application (update thread + render thread, Clock-paced)       │
// │    └── Stage → Scene → Nodes (priority ordered)                 │
// │    └── RenderBackend                                            │
// │          └── Device (parent resource)                           │
// │                └── Swapchain, FrameSync, CommandPool (children) │
// └─────────────────────────────────────────────────────────────────┘
//
// =============================================================================

pub mod app;
pub mod assets;
pub mod backend;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod scene;

pub use app::{AppHandler, AppState, Application, Context, HeadlessWindow, Window, WinitWindow};
pub use assets::{Assets, FontId, ShaderId, TextureId};
pub use backend::{NullBackend, RenderBackend, VulkanRenderer};
pub use clock::Clock;
pub use config::{Config, SharedConfig};
pub use error::EngineError;
pub use scene::{Calibration, Node, RenderContext, Scene, SceneHooks, Stage};
