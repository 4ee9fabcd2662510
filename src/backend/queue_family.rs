// Queue families & device selection
//
// Pure selection logic over facts gathered from the driver. Kept apart from
// device.rs so it can be exercised with crafted property records.
//
// Policy: first match, not best match. Families are scanned in order and the
// scan stops once every required capability has an index; devices are tried
// in enumeration order and the first qualifying one wins.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("no physical device supports the required queue families and extensions")]
    NoSuitableDevice,

    #[error("device not found: no suitable physical device with id {0:#06x}")]
    DeviceNotFound(u32),
}

/// Capabilities a device must offer besides graphics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueRequirements {
    pub present: bool,
    pub compute: bool,
}

impl QueueRequirements {
    /// Graphics only, for offscreen work
    pub const GRAPHICS: Self = Self {
        present: false,
        compute: false,
    };

    /// Graphics + presentation to a surface
    pub const PRESENT: Self = Self {
        present: true,
        compute: false,
    };

    pub const fn with_compute(mut self, compute: bool) -> Self {
        self.compute = compute;
        self
    }
}

impl Default for QueueRequirements {
    fn default() -> Self {
        Self::PRESENT
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub physical_device_id: u32,
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub compute: Option<u32>,
    requirements: QueueRequirements,
}

impl QueueFamilyIndices {
    pub fn new(physical_device_id: u32, requirements: QueueRequirements) -> Self {
        Self {
            physical_device_id,
            graphics: None,
            present: None,
            compute: None,
            requirements,
        }
    }

    /// Assign the first family index for each required capability.
    ///
    /// `supports_present(i)` is only asked while a present family is still
    /// missing.
    pub fn scan<F>(
        physical_device_id: u32,
        families: &[vk::QueueFamilyProperties],
        requirements: QueueRequirements,
        mut supports_present: F,
    ) -> Self
    where
        F: FnMut(u32) -> bool,
    {
        let mut indices = Self::new(physical_device_id, requirements);

        for (i, family) in families.iter().enumerate() {
            let i = i as u32;
            if family.queue_count == 0 {
                continue;
            }

            if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(i);
            }
            if requirements.present && indices.present.is_none() && supports_present(i) {
                indices.present = Some(i);
            }
            if requirements.compute
                && indices.compute.is_none()
                && family.queue_flags.contains(vk::QueueFlags::COMPUTE)
            {
                indices.compute = Some(i);
            }

            if indices.has_all_indices() {
                break;
            }
        }

        indices
    }

    pub fn requirements(&self) -> QueueRequirements {
        self.requirements
    }

    /// Every required index is populated
    pub fn has_all_indices(&self) -> bool {
        self.graphics.is_some()
            && (!self.requirements.present || self.present.is_some())
            && (!self.requirements.compute || self.compute.is_some())
    }

    /// Distinct family indices, ascending. One queue is created per entry.
    pub fn unique_indices(&self) -> Vec<u32> {
        let mut unique: Vec<u32> = [self.graphics, self.present, self.compute]
            .into_iter()
            .flatten()
            .collect();
        unique.sort_unstable();
        unique.dedup();
        unique
    }
}

/// What the driver told us about one physical device
#[derive(Debug, Clone, Default)]
pub struct DeviceCandidate {
    pub id: u32,
    pub name: String,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    /// Surface support per queue family, same indexing as `queue_families`
    pub present_support: Vec<bool>,
    pub has_required_extensions: bool,
    pub swapchain_adequate: bool,
}

impl DeviceCandidate {
    pub fn queue_indices(&self, requirements: QueueRequirements) -> QueueFamilyIndices {
        QueueFamilyIndices::scan(self.id, &self.queue_families, requirements, |i| {
            self.present_support.get(i as usize).copied().unwrap_or(false)
        })
    }

    pub fn is_suitable(&self, requirements: QueueRequirements) -> bool {
        self.queue_indices(requirements).has_all_indices()
            && self.has_required_extensions
            && (!requirements.present || self.swapchain_adequate)
    }
}

/// Pick the first suitable candidate, or the suitable candidate whose id is
/// `preferred_id` when one is given.
///
/// Returns the candidate's position and its queue indices.
pub fn select_device(
    candidates: &[DeviceCandidate],
    requirements: QueueRequirements,
    preferred_id: Option<u32>,
) -> Result<(usize, QueueFamilyIndices), DeviceError> {
    for (position, candidate) in candidates.iter().enumerate() {
        if preferred_id.is_some_and(|id| id != candidate.id) {
            continue;
        }

        let indices = candidate.queue_indices(requirements);
        if candidate.is_suitable(requirements) {
            log::info!(
                "Selected physical device {} '{}' (graphics={:?}, present={:?}, compute={:?})",
                candidate.id,
                candidate.name,
                indices.graphics,
                indices.present,
                indices.compute
            );
            return Ok((position, indices));
        }

        log::debug!("Physical device {} '{}' rejected", candidate.id, candidate.name);
    }

    Err(match preferred_id {
        Some(id) => DeviceError::DeviceNotFound(id),
        None => DeviceError::NoSuitableDevice,
    })
}
