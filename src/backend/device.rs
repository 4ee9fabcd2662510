// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Surface creation for the window
// - Physical device selection (first device with every required queue family)
// - Logical device + queue creation
// - Parent of every device-scoped handle: children are destroyed first
//
// Teardown order: children → logical device → surface → debug messenger →
// instance. `free_resources` runs it once; Drop calls it too.

use super::queue_family::{select_device, DeviceCandidate, QueueFamilyIndices, QueueRequirements};
use super::resource::{Children, ParentResource};
use crate::config::GraphicsConfig;
use anyhow::{Context, Result};
use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_char, CStr, CString};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const PORTABILITY_SUBSET: &CStr = c"VK_KHR_portability_subset";
#[cfg(target_os = "macos")]
const PORTABILITY_ENUMERATION: &CStr = c"VK_KHR_portability_enumeration";

/// Logical device plus everything it was created from
pub struct Device {
    raw: ash::Device,
    physical_device: vk::PhysicalDevice,
    instance: ash::Instance,
    _entry: Entry,

    surface: vk::SurfaceKHR,
    surface_loader: khr::Surface,

    // Queue handles
    queues: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    compute_queue: Option<vk::Queue>,

    // Debug utils (if validation enabled)
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,

    name: String,

    children: Children<Device>,
    destroyed: bool,
}

impl Device {
    /// Create a device able to present to the given window.
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Enable Vulkan validation layers
    /// * `graphics` - Device preference (`gpu_id`) and compute requirement
    pub fn new(
        app_name: &str,
        enable_validation: bool,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        graphics: &GraphicsConfig,
    ) -> Result<Self> {
        log::info!("Creating Vulkan device: {}", app_name);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Load Vulkan library and create the instance
        // ─────────────────────────────────────────────────────────────────────
        let entry = unsafe { Entry::load() }.context("Failed to load Vulkan library. Is Vulkan installed?")?;
        let instance = create_instance(&entry, app_name, enable_validation, display)?;

        // From here on every failure must undo what was created before it
        let debug_utils = if enable_validation {
            match setup_debug_messenger(&entry, &instance) {
                Ok(pair) => Some(pair),
                Err(e) => {
                    log::warn!("Validation messenger unavailable: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        let destroy_instance = |debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>| unsafe {
            if let Some((utils, messenger)) = debug_utils {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            instance.destroy_instance(None);
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Surface
        // ─────────────────────────────────────────────────────────────────────
        let surface_loader = khr::Surface::new(&entry, &instance);
        let surface = match unsafe { ash_window::create_surface(&entry, &instance, display, window, None) } {
            Ok(surface) => surface,
            Err(e) => {
                destroy_instance(debug_utils);
                return Err(e).context("Failed to create window surface");
            }
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Pick physical device, then create the logical device
        // ─────────────────────────────────────────────────────────────────────
        let requirements = QueueRequirements::PRESENT.with_compute(graphics.require_compute);
        let created = pick_physical_device(&instance, &surface_loader, surface, requirements, graphics.gpu_id)
            .and_then(|(physical_device, queues, name)| {
                let (raw, has_portability) = create_logical_device(&instance, physical_device, &queues)?;
                Ok((physical_device, queues, name, raw, has_portability))
            });

        let (physical_device, queues, name, raw, has_portability) = match created {
            Ok(created) => created,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                destroy_instance(debug_utils);
                return Err(e);
            }
        };

        // Indices are complete after selection; the fallbacks are never taken
        let graphics_family = queues.graphics.unwrap_or_default();
        let present_family = queues.present.unwrap_or(graphics_family);
        let graphics_queue = unsafe { raw.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { raw.get_device_queue(present_family, 0) };
        let compute_queue = queues.compute.map(|family| unsafe { raw.get_device_queue(family, 0) });

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!("Selected GPU: {} (id {:#06x})", name, properties.device_id);
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        if has_portability {
            log::info!("Enabled {}", PORTABILITY_SUBSET.to_string_lossy());
        }

        Ok(Self {
            raw,
            physical_device,
            instance,
            _entry: entry,
            surface,
            surface_loader,
            queues,
            graphics_queue,
            present_queue,
            compute_queue,
            debug_utils,
            name,
            children: Children::new("Device"),
            destroyed: false,
        })
    }

    pub fn raw(&self) -> &ash::Device {
        &self.raw
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn surface_loader(&self) -> &khr::Surface {
        &self.surface_loader
    }

    pub fn queues(&self) -> &QueueFamilyIndices {
        &self.queues
    }

    pub fn graphics_family(&self) -> Result<u32> {
        self.queues.graphics.context("Device has no graphics queue family")
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn compute_queue(&self) -> Option<vk::Queue> {
        self.compute_queue
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        unsafe { self.raw.device_wait_idle() }.context("vkDeviceWaitIdle failed")?;
        Ok(())
    }

    /// Destroy every child, then the device itself. Idempotent.
    pub fn free_resources(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        log::info!("Destroying Vulkan device...");

        if let Err(e) = unsafe { self.raw.device_wait_idle() } {
            log::warn!("Device not idle before teardown: {}", e);
        }

        let freed = self.children.free_all();
        log::debug!("Released {} device children", freed);

        unsafe {
            self.raw.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

impl ParentResource for Device {
    fn children(&self) -> &Children<Self> {
        &self.children
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.free_resources();
    }
}

// =============================================================================
// CREATION STEPS
// =============================================================================

fn create_instance(
    entry: &Entry,
    app_name: &str,
    enable_validation: bool,
    display: RawDisplayHandle,
) -> Result<ash::Instance> {
    let app_name_cstr = CString::new(app_name)?;
    let engine_name = CString::new("Twinloop")?;

    let app_info = vk::ApplicationInfo::builder()
        .application_name(&app_name_cstr)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(&engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_1);

    // Surface extensions for this window system
    let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display)
        .context("Window system has no Vulkan surface support")?
        .to_vec();
    if enable_validation {
        extensions.push(DebugUtils::name().as_ptr());
    }

    #[allow(unused_mut)]
    let mut flags = vk::InstanceCreateFlags::empty();
    #[cfg(target_os = "macos")]
    {
        extensions.push(PORTABILITY_ENUMERATION.as_ptr());
        flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    // Validation layers
    let layer_names = if enable_validation && layer_available(entry, VALIDATION_LAYER) {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        if enable_validation {
            log::warn!("Validation layer requested but not installed");
        }
        vec![]
    };

    let create_info = vk::InstanceCreateInfo::builder()
        .flags(flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.context("Failed to create Vulkan instance")?;

    Ok(instance)
}

fn layer_available(entry: &Entry, wanted: &CStr) -> bool {
    entry
        .enumerate_instance_layer_properties()
        .map(|layers| {
            layers
                .iter()
                .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == wanted)
        })
        .unwrap_or(false)
}

fn setup_debug_messenger(entry: &Entry, instance: &ash::Instance) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
    let debug_utils = DebugUtils::new(entry, instance);

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .context("Failed to create debug messenger")?;

    Ok((debug_utils, messenger))
}

/// Gather candidate facts for every physical device, in enumeration order,
/// and hand them to the selector.
fn pick_physical_device(
    instance: &ash::Instance,
    surface_loader: &khr::Surface,
    surface: vk::SurfaceKHR,
    requirements: QueueRequirements,
    preferred_id: Option<u32>,
) -> Result<(vk::PhysicalDevice, QueueFamilyIndices, String)> {
    let devices = unsafe { instance.enumerate_physical_devices() }.context("Failed to enumerate GPUs")?;

    if devices.is_empty() {
        anyhow::bail!("No Vulkan-capable GPU found");
    }

    let candidates: Vec<DeviceCandidate> = devices
        .iter()
        .map(|&device| describe_device(instance, surface_loader, surface, device))
        .collect();

    let (position, indices) = select_device(&candidates, requirements, preferred_id)?;
    Ok((devices[position], indices, candidates[position].name.clone()))
}

fn describe_device(
    instance: &ash::Instance,
    surface_loader: &khr::Surface,
    surface: vk::SurfaceKHR,
    device: vk::PhysicalDevice,
) -> DeviceCandidate {
    let props = unsafe { instance.get_physical_device_properties(device) };
    let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    // A failed query counts as "not supported"
    let present_support = (0..queue_families.len() as u32)
        .map(|i| unsafe { surface_loader.get_physical_device_surface_support(device, i, surface) }.unwrap_or(false))
        .collect();

    let has_required_extensions = device_extensions(instance, device)
        .iter()
        .any(|name| name.as_c_str() == khr::Swapchain::name());

    let swapchain_adequate = unsafe {
        let formats = surface_loader.get_physical_device_surface_formats(device, surface);
        let modes = surface_loader.get_physical_device_surface_present_modes(device, surface);
        matches!((formats, modes), (Ok(f), Ok(m)) if !f.is_empty() && !m.is_empty())
    };

    DeviceCandidate {
        id: props.device_id,
        name,
        queue_families,
        present_support,
        has_required_extensions,
        swapchain_adequate,
    }
}

fn device_extensions(instance: &ash::Instance, device: vk::PhysicalDevice) -> Vec<CString> {
    unsafe { instance.enumerate_device_extension_properties(device) }
        .unwrap_or_default()
        .iter()
        .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_owned())
        .collect()
}

/// One queue per unique family. Returns the device and whether the
/// portability subset was enabled.
fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queues: &QueueFamilyIndices,
) -> Result<(ash::Device, bool)> {
    let queue_priorities = [1.0];
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queues
        .unique_indices()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
                .build()
        })
        .collect();

    // Required device extensions
    let mut extensions = vec![khr::Swapchain::name().as_ptr()];
    let has_portability = device_extensions(instance, physical_device)
        .iter()
        .any(|name| name.as_c_str() == PORTABILITY_SUBSET);
    if has_portability {
        extensions.push(PORTABILITY_SUBSET.as_ptr());
    }

    let features = vk::PhysicalDeviceFeatures::default();
    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &create_info, None) }
        .context("Failed to create logical device")?;

    Ok((device, has_portability))
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
