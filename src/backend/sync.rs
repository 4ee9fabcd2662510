// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync. One set per frame in
// flight, each set a child of the Device.

use super::resource::ChildResource;
use super::Device;
use anyhow::{Context, Result};
use ash::vk;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    resource: ChildResource<Device>,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &Device) -> Result<Self> {
        let raw = device.raw();
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED); // Start signaled

        let image_available =
            unsafe { raw.create_semaphore(&semaphore_info, None) }.context("Failed to create semaphore")?;

        let render_finished = match unsafe { raw.create_semaphore(&semaphore_info, None) } {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe { raw.destroy_semaphore(image_available, None) };
                return Err(e).context("Failed to create semaphore");
            }
        };

        let in_flight_fence = match unsafe { raw.create_fence(&fence_info, None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe {
                    raw.destroy_semaphore(image_available, None);
                    raw.destroy_semaphore(render_finished, None);
                }
                return Err(e).context("Failed to create fence");
            }
        };

        let resource = {
            let raw = raw.clone();
            ChildResource::bind(device, "FrameSync", move || unsafe {
                raw.destroy_semaphore(image_available, None);
                raw.destroy_semaphore(render_finished, None);
                raw.destroy_fence(in_flight_fence, None);
            })
        };

        Ok(Self {
            resource,
            image_available,
            render_finished,
            in_flight_fence,
        })
    }

    /// Block until the GPU is done with this slot's previous frame.
    pub fn wait(&self, device: &Device) -> Result<()> {
        self.resource.ensure_valid()?;
        unsafe { device.raw().wait_for_fences(&[self.in_flight_fence], true, u64::MAX) }
            .context("Failed to wait for frame fence")?;
        Ok(())
    }

    pub fn reset(&self, device: &Device) -> Result<()> {
        unsafe { device.raw().reset_fences(&[self.in_flight_fence]) }.context("Failed to reset frame fence")?;
        Ok(())
    }
}
