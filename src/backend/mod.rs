// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash. The Device is the parent of every
// device-scoped handle (swapchain, frame sync, command pool) and destroys
// them before itself.
//
// Everything in here is touched from the render thread only.

pub mod command_pool;
pub mod device;
pub mod queue_family;
pub mod renderer;
pub mod resource;
pub mod swapchain;
pub mod sync;

pub use command_pool::CommandPool;
pub use device::Device;
pub use queue_family::{DeviceCandidate, DeviceError, QueueFamilyIndices, QueueRequirements};
pub use renderer::VulkanRenderer;
pub use resource::{ChildResource, Children, ParentResource, ResourceError};
pub use swapchain::Swapchain;
pub use sync::FrameSync;

use anyhow::Result;
use glam::Vec4;

/// What the render loop drives once per frame
pub trait RenderBackend {
    /// The window's drawable size changed. Zero means minimized.
    fn resize(&mut self, width: u32, height: u32);

    /// Present one frame cleared to `clear`. Returns false when the frame
    /// was skipped (minimized, swapchain being rebuilt).
    fn draw_frame(&mut self, clear: Vec4) -> Result<bool>;

    /// Wait for the GPU to finish before teardown
    fn wait_idle(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Backend for runs without a GPU. Counts frames and nothing else.
#[derive(Debug, Default)]
pub struct NullBackend {
    pub frames: u64,
    pub size: (u32, u32),
}

impl RenderBackend for NullBackend {
    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    fn draw_frame(&mut self, _clear: Vec4) -> Result<bool> {
        self.frames += 1;
        Ok(true)
    }
}
