// Vulkan renderer - Frame submission
//
// FRAME FLOW:
// 1. Wait for the sync slot's previous frame
// 2. Acquire swapchain image
// 3. Submit the pre-recorded clear for that image
// 4. Present
//
// A changed background re-records the command pool; a resize or an
// out-of-date swapchain rebuilds the swapchain and the pool.

use super::{CommandPool, Device, FrameSync, RenderBackend, Swapchain};
use crate::app::{Context, Window};
use crate::config::Config;
use anyhow::{Context as _, Result};
use ash::vk;
use glam::Vec4;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

/// Field order matters for Drop: children first, device last.
pub struct VulkanRenderer {
    frame_sync: Vec<FrameSync>,
    command_pool: CommandPool,
    swapchain: Option<Swapchain>,
    device: Device,

    present_mode: vk::PresentModeKHR,
    /// Which sync slot we're currently using (0 to frame_sync.len()-1)
    current_frame: usize,
    wait_stages: [vk::PipelineStageFlags; 1],

    size: (u32, u32),
    /// Set when the window is resized - triggers swapchain recreation
    needs_resize: bool,
    /// Set when the window is minimized (size = 0) - skip rendering
    is_minimized: bool,
}

impl VulkanRenderer {
    /// Build a renderer for an application window.
    pub fn for_window<W: Window + ?Sized>(window: &W, ctx: &Context) -> Result<Self> {
        let (display, handle) = window
            .raw_handles()
            .context("Window has no native surface to render to")?;
        let (width, height) = window.size();
        Self::new(ctx.name(), display, handle, width, height, &ctx.settings().snapshot())
    }

    pub fn new(
        app_name: &str,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        width: u32,
        height: u32,
        config: &Config,
    ) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Device + surface
        // ─────────────────────────────────────────────────────────────────────
        // Validation layers only in debug builds
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let device = Device::new(app_name, enable_validation, display, window, &config.graphics)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Synchronization primitives (survive resizes)
        // ─────────────────────────────────────────────────────────────────────
        let max_frames = config.graphics.max_frames_in_flight.max(1);
        let frame_sync = (0..max_frames)
            .map(|_| FrameSync::new(&device))
            .collect::<Result<Vec<_>>>()?;

        let mut renderer = Self {
            frame_sync,
            command_pool: CommandPool::new(),
            swapchain: None,
            device,
            present_mode: config.present_mode(),
            current_frame: 0,
            wait_stages: [vk::PipelineStageFlags::TRANSFER],
            size: (width, height),
            needs_resize: false,
            is_minimized: false,
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Swapchain and command buffers
        // ─────────────────────────────────────────────────────────────────────
        renderer.create_swapchain_resources(config.background())?;

        log::info!("Vulkan initialized successfully!");
        Ok(renderer)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Create swapchain and command buffers. Called again on resize.
    fn create_swapchain_resources(&mut self, clear: Vec4) -> Result<()> {
        let (width, height) = self.size;

        // Don't create swapchain if window is minimized (size = 0)
        if width == 0 || height == 0 {
            self.is_minimized = true;
            return Ok(());
        }
        self.is_minimized = false;

        // The surface can only have one swapchain at a time
        self.command_pool.free_resources();
        if let Some(mut old) = self.swapchain.take() {
            old.free_resources();
        }

        let swapchain = Swapchain::new(&self.device, width, height, self.present_mode)?;
        self.command_pool.init(&self.device, &swapchain, clear)?;

        self.swapchain = Some(swapchain);
        self.needs_resize = false;
        Ok(())
    }

    fn recreate_swapchain(&mut self, clear: Vec4) -> Result<()> {
        // Wait for GPU to finish all work before destroying resources
        self.device.wait_idle()?;
        self.create_swapchain_resources(clear)
    }
}

impl RenderBackend for VulkanRenderer {
    fn resize(&mut self, width: u32, height: u32) {
        log::debug!("Window resized to {}x{}", width, height);
        self.size = (width, height);
        if width == 0 || height == 0 {
            self.is_minimized = true;
        } else {
            self.is_minimized = false;
            self.needs_resize = true;
        }
    }

    fn draw_frame(&mut self, clear: Vec4) -> Result<bool> {
        // Skip rendering if minimized
        if self.is_minimized {
            return Ok(false);
        }

        if self.needs_resize || self.swapchain.is_none() {
            self.recreate_swapchain(clear)?;
            if self.is_minimized {
                return Ok(false);
            }
        } else if clear != self.command_pool.clear_color() {
            // Buffers may still be in flight
            self.device.wait_idle()?;
            let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;
            self.command_pool.init(&self.device, swapchain, clear)?;
        }

        let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;
        let sync = self
            .frame_sync
            .get(self.current_frame)
            .context("Frame sync slot missing")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait for the frame that last used this slot
        // ─────────────────────────────────────────────────────────────────────
        sync.wait(&self.device)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire next swapchain image
        // ─────────────────────────────────────────────────────────────────────
        let image_index = match swapchain.acquire_next_image(u64::MAX, sync.image_available)? {
            Some((index, suboptimal)) => {
                // Suboptimal means swapchain still works but should be recreated
                if suboptimal {
                    self.needs_resize = true;
                }
                index
            }
            None => {
                // Fence stays signaled so the next wait does not block
                self.needs_resize = true;
                return Ok(false);
            }
        };

        sync.reset(&self.device)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Submit command buffer
        // ─────────────────────────────────────────────────────────────────────
        let command_buffers = [self.command_pool.command_buffer(image_index)?];
        let wait_semaphores = [sync.image_available];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .raw()
                .queue_submit(self.device.graphics_queue(), &[submit_info.build()], sync.in_flight_fence)
        }
        .context("Failed to submit frame")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Present the image
        // ─────────────────────────────────────────────────────────────────────
        if swapchain.present(self.device.present_queue(), image_index, &signal_semaphores)? {
            self.needs_resize = true;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Advance to next frame
        // ─────────────────────────────────────────────────────────────────────
        self.current_frame = (self.current_frame + 1) % self.frame_sync.len();

        Ok(true)
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle()
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        // Children go with the device
        self.device.free_resources();
        log::info!("Cleanup complete");
    }
}
