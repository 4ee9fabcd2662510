// Command pool - Pre-recorded clear commands
//
// One primary command buffer per swapchain image, each recorded once to
// clear its image to the scene background. Rebuilt through `init` whenever
// the swapchain or the clear color changes; `init` always frees the old pool
// first.

use super::resource::ChildResource;
use super::{Device, Swapchain};
use anyhow::{Context, Result};
use ash::vk;
use glam::Vec4;

pub struct CommandPool {
    resource: ChildResource<Device>,
    pool: vk::CommandPool,
    /// One command buffer per swapchain image
    command_buffers: Vec<vk::CommandBuffer>,
    clear_color: Vec4,
}

impl CommandPool {
    /// A pool that owns nothing yet
    pub fn new() -> Self {
        Self {
            resource: ChildResource::unbound(),
            pool: vk::CommandPool::null(),
            command_buffers: Vec::new(),
            clear_color: Vec4::ZERO,
        }
    }

    /// (Re)build the pool and record a clear of every swapchain image.
    pub fn init(&mut self, device: &Device, swapchain: &Swapchain, clear_color: Vec4) -> Result<()> {
        self.free_resources();

        let raw = device.raw();
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_family()?)
            // TRANSIENT: Command buffers are short-lived
            // RESET: Allow individual buffer reset
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { raw.create_command_pool(&pool_info, None) }.context("Failed to create command pool")?;

        // Destroying the pool frees its command buffers
        self.resource = {
            let raw = raw.clone();
            ChildResource::bind(device, "CommandPool", move || unsafe {
                raw.destroy_command_pool(pool, None);
            })
        };
        self.pool = pool;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(swapchain.images().len() as u32);

        self.command_buffers =
            unsafe { raw.allocate_command_buffers(&alloc_info) }.context("Failed to allocate command buffers")?;

        for (&cmd, &image) in self.command_buffers.iter().zip(swapchain.images()) {
            record_clear(raw, cmd, image, clear_color)?;
        }
        self.clear_color = clear_color;

        log::info!("Created {} pre-recorded command buffers", self.command_buffers.len());
        Ok(())
    }

    pub fn command_buffer(&self, image_index: u32) -> Result<vk::CommandBuffer> {
        self.resource.ensure_valid()?;
        self.command_buffers
            .get(image_index as usize)
            .copied()
            .with_context(|| format!("No command buffer for swapchain image {}", image_index))
    }

    pub fn clear_color(&self) -> Vec4 {
        self.clear_color
    }

    pub fn len(&self) -> usize {
        self.command_buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.command_buffers.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        self.resource.is_valid()
    }

    /// Idempotent
    pub fn free_resources(&mut self) {
        self.resource.free_resources();
        self.pool = vk::CommandPool::null();
        self.command_buffers.clear();
    }
}

impl Default for CommandPool {
    fn default() -> Self {
        Self::new()
    }
}

/// UNDEFINED → TRANSFER_DST, clear, TRANSFER_DST → PRESENT_SRC
fn record_clear(device: &ash::Device, cmd: vk::CommandBuffer, image: vk::Image, color: Vec4) -> Result<()> {
    let clear_color = vk::ClearColorValue {
        float32: color.to_array(),
    };

    // Which parts of the image to affect (all of it)
    let subresource_range = vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    };

    unsafe {
        let begin_info = vk::CommandBufferBeginInfo::builder();
        device.begin_command_buffer(cmd, &begin_info).context("Failed to begin command buffer")?;

        // ─────────────────────────────────────────────────────────────────
        // IMAGE LAYOUT TRANSITION: UNDEFINED -> TRANSFER_DST
        // ─────────────────────────────────────────────────────────────────
        let barrier_to_transfer = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED) // Old contents are discarded
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(subresource_range)
            .build();

        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier_to_transfer],
        );

        device.cmd_clear_color_image(
            cmd,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &clear_color,
            &[subresource_range],
        );

        // ─────────────────────────────────────────────────────────────────
        // IMAGE LAYOUT TRANSITION: TRANSFER_DST -> PRESENT_SRC
        // ─────────────────────────────────────────────────────────────────
        let barrier_to_present = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::empty())
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(subresource_range)
            .build();

        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier_to_present],
        );

        device.end_command_buffer(cmd).context("Failed to end command buffer")?;
    }

    Ok(())
}
