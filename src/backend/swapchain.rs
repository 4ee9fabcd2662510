// Swapchain - Window presentation
//
// Manages the chain of images we clear and present to the screen.
// A child of the Device: the surface can only carry one swapchain, so the
// old one must be freed before a replacement is created.

use super::resource::ChildResource;
use super::Device;
use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;

/// Frames are cleared by transfer, nothing renders into them
const IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::TRANSFER_DST;

pub struct Swapchain {
    resource: ChildResource<Device>,
    handle: vk::SwapchainKHR,
    loader: khr::Swapchain,
    images: Vec<vk::Image>,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    pub fn new(device: &Device, width: u32, height: u32, preferred_mode: vk::PresentModeKHR) -> Result<Self> {
        log::info!("Creating swapchain: {}x{}", width, height);

        let physical_device = device.physical_device();
        let surface = device.surface();
        let surface_loader = device.surface_loader();

        // Query surface capabilities
        let surface_caps = unsafe { surface_loader.get_physical_device_surface_capabilities(physical_device, surface) }
            .context("Failed to query surface capabilities")?;

        // Query supported formats
        let formats = unsafe { surface_loader.get_physical_device_surface_formats(physical_device, surface) }
            .context("Failed to query surface formats")?;

        // Query supported present modes
        let present_modes = unsafe { surface_loader.get_physical_device_surface_present_modes(physical_device, surface) }
            .context("Failed to query present modes")?;

        // Choose surface format (prefer SRGB)
        let surface_format = *formats
            .iter()
            .find(|f| f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .or_else(|| formats.first())
            .context("No suitable surface format")?;

        let present_mode = choose_present_mode(&present_modes, preferred_mode);
        log::info!("Present mode: {:?}", present_mode);

        let extent = choose_extent(&surface_caps, width, height);

        // Choose image count (one more than the minimum)
        let mut image_count = surface_caps.min_image_count + 1;
        if surface_caps.max_image_count > 0 && image_count > surface_caps.max_image_count {
            image_count = surface_caps.max_image_count;
        }

        // Graphics and present may live on different families
        let families = device.queues().unique_indices();
        let sharing_mode = if families.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };

        let loader = khr::Swapchain::new(device.instance(), device.raw());

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(IMAGE_USAGE)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(if families.len() > 1 { families.as_slice() } else { &[] })
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let handle = unsafe { loader.create_swapchain(&create_info, None) }.context("Failed to create swapchain")?;

        let images = match unsafe { loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(handle, None) };
                return Err(e).context("Failed to get swapchain images");
            }
        };

        log::info!("Created swapchain with {} images", images.len());

        let resource = {
            let loader = loader.clone();
            ChildResource::bind(device, "Swapchain", move || unsafe {
                loader.destroy_swapchain(handle, None);
            })
        };

        Ok(Self {
            resource,
            handle,
            loader,
            images,
            format: surface_format.format,
            extent,
            present_mode,
        })
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn is_valid(&self) -> bool {
        self.resource.is_valid()
    }

    /// Acquire next image for rendering. `None` means the swapchain is out
    /// of date and must be recreated.
    pub fn acquire_next_image(&self, timeout: u64, semaphore: vk::Semaphore) -> Result<Option<(u32, bool)>> {
        self.resource.ensure_valid()?;

        let result = unsafe { self.loader.acquire_next_image(self.handle, timeout, semaphore, vk::Fence::null()) };

        match result {
            Ok((index, suboptimal)) => Ok(Some((index, suboptimal))),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Present rendered image to screen. Returns true when the swapchain
    /// should be recreated.
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait_semaphores: &[vk::Semaphore]) -> Result<bool> {
        self.resource.ensure_valid()?;

        let swapchains = [self.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.loader.queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(e).context("Failed to present"),
        }
    }

    pub fn free_resources(&mut self) {
        self.resource.free_resources();
        self.handle = vk::SwapchainKHR::null();
        self.images.clear();
    }
}

/// Preferred mode if supported, else IMMEDIATE → MAILBOX → FIFO
fn choose_present_mode(available: &[vk::PresentModeKHR], preferred: vk::PresentModeKHR) -> vk::PresentModeKHR {
    [preferred, vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO) // FIFO is always supported
}

fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}
