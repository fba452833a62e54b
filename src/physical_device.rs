use crate::debug_utils::DebugNamer;
use crate::vulkan_raii::{Device, Surface};
use crate::Instance;
use ash::ext;
use ash::khr;
use ash::vk;
use std::rc::Rc;

#[derive(thiserror::Error, Debug)]
pub enum DeviceCreationError {
    #[error("failed to enumerate physical devices")]
    PhysicalDeviceEnumeration(#[source] vk::Result),
    #[error("failed to query surface support for a queue family")]
    SurfaceSupportQuery(#[source] vk::Result),
    #[error("no physical device has a graphics queue that can present to the window")]
    NoSuitablePhysicalDevice,
    #[error("failed to create the logical device")]
    DeviceCreation(#[source] vk::Result),
}

/// A graphics adapter and the queue family used for all of its work.
pub struct PhysicalDevice {
    pub inner: vk::PhysicalDevice,
    /// Supports graphics, transfer, and presenting to the surface.
    pub queue_family: u32,
    pub name: String,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl PhysicalDevice {
    /// Returns an index into [memory_types](vk::PhysicalDeviceMemoryProperties::memory_types)
    /// whose flags contain all of `desired`, or [None] when the device has
    /// no such memory.
    pub fn find_memory_type(&self, desired: vk::MemoryPropertyFlags) -> Option<u32> {
        let count = self.memory_properties.memory_type_count as usize;
        self.memory_properties.memory_types[..count]
            .iter()
            .position(|memory_type| memory_type.property_flags.contains(desired))
            .map(|i| i as u32)
    }

    /// Creates the logical device with one queue from [queue_family](Self::queue_family)
    /// and the swapchain extension enabled.
    pub fn create_device(&self, instance: &Instance) -> Result<Rc<Device>, DeviceCreationError> {
        profiling::scope!("logical device creation");
        let queue_priorities = [1.0];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(self.queue_family)
            .queue_priorities(&queue_priorities)];
        let extensions = [khr::swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();
        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);
        let device = unsafe { instance.inner.create_device(self.inner, &device_create_info, None) }
            .map_err(DeviceCreationError::DeviceCreation)?;

        let queue = unsafe { device.get_device_queue(self.queue_family, 0) };
        let swapchain_fns = khr::swapchain::Device::new(&instance.inner, &device);
        let debug = if instance.debug_utils_available {
            DebugNamer::new(ext::debug_utils::Device::new(&instance.inner, &device))
        } else {
            DebugNamer::disabled()
        };

        let device = Rc::new(Device {
            inner: device,
            queue,
            queue_family: self.queue_family,
            swapchain_fns,
            debug,
        });
        device.debug.name(device.inner.handle(), format_args!("main device ({})", self.name));
        device.debug.name(device.queue, format_args!("graphics+present queue"));
        Ok(device)
    }
}

/// Picks the first adapter that has a queue family with graphics and
/// transfer support which can also present to `surface`.
#[profiling::function]
pub fn get_physical_device(instance: &Instance, surface: &Surface) -> Result<PhysicalDevice, DeviceCreationError> {
    let physical_devices = unsafe { instance.inner.enumerate_physical_devices() }
        .map_err(DeviceCreationError::PhysicalDeviceEnumeration)?;
    for physical_device in physical_devices {
        let queue_families = unsafe { instance.inner.get_physical_device_queue_family_properties(physical_device) };
        for (queue_family, properties) in queue_families.iter().enumerate() {
            let required = vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER;
            if !properties.queue_flags.contains(required) {
                continue;
            }
            let queue_family = queue_family as u32;
            let presentable = unsafe {
                surface
                    .device
                    .get_physical_device_surface_support(physical_device, queue_family, surface.inner)
            }
            .map_err(DeviceCreationError::SurfaceSupportQuery)?;
            if !presentable {
                continue;
            }

            let properties = unsafe { instance.inner.get_physical_device_properties(physical_device) };
            let name = properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|_| String::from("unnamed adapter"));
            let memory_properties = unsafe { instance.inner.get_physical_device_memory_properties(physical_device) };
            log::info!("rendering with {name} (queue family {queue_family})");
            return Ok(PhysicalDevice {
                inner: physical_device,
                queue_family,
                name,
                memory_properties,
            });
        }
    }
    Err(DeviceCreationError::NoSuitablePhysicalDevice)
}
