//! Wrappers for Vulkan objects that enforce proper destruction order via
//! refcounting. Non-atomic refcounting ([Rc]s) is used because everything
//! here lives on the one thread that talks to the device.

use crate::debug_utils::DebugNamer;
use ash::khr;
use ash::vk;
use std::rc::Rc;

/// The logical device plus the one graphics+present queue this renderer
/// submits to. Every other wrapper holds an `Rc<Device>`, so the device
/// itself is destroyed last.
pub struct Device {
    pub inner: ash::Device,
    pub queue: vk::Queue,
    pub queue_family: u32,
    pub swapchain_fns: khr::swapchain::Device,
    /// Debug-utils object naming, a no-op when the extension is missing.
    pub debug: DebugNamer,
}

impl std::ops::Deref for Device {
    type Target = ash::Device;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe { self.inner.destroy_device(None) };
    }
}

impl Device {
    /// Wait until the device has finished all submitted work. Must be called
    /// after the present loop exits and before teardown starts destroying
    /// GPU objects.
    #[profiling::function]
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        unsafe { self.inner.device_wait_idle() }
    }
}

macro_rules! trivial_drop_impl {
    ($struct_name:ident, $destroy_func_name:ident) => {
        impl Drop for $struct_name {
            fn drop(&mut self) {
                profiling::scope!(concat!("vk::", stringify!($destroy_func_name)));
                unsafe { self.device.$destroy_func_name(self.inner, None) }
            }
        }
    };
}

pub struct Surface {
    pub inner: vk::SurfaceKHR,
    pub device: khr::surface::Instance,
}
trivial_drop_impl!(Surface, destroy_surface);

/// The raw swapchain handle. Owns the surface it presents to, so the
/// surface outlives it.
pub struct Swapchain {
    pub inner: vk::SwapchainKHR,
    pub device: khr::swapchain::Device,
    pub surface: Surface,
}
trivial_drop_impl!(Swapchain, destroy_swapchain);

/// A buffer bound to a [MemoryBlock](crate::MemoryBlock) carved from a
/// [MemoryHeap](crate::MemoryHeap). The heap keeps sole ownership of the
/// backing allocation; dropping this only destroys the buffer object.
pub struct Buffer {
    pub inner: vk::Buffer,
    pub device: Rc<Device>,
}
trivial_drop_impl!(Buffer, destroy_buffer);

/// Same ownership rules as [Buffer]: the backing memory belongs to the heap.
pub struct Image {
    pub inner: vk::Image,
    pub device: Rc<Device>,
}
trivial_drop_impl!(Image, destroy_image);

pub struct ImageView {
    pub inner: vk::ImageView,
    pub device: Rc<Device>,
}
trivial_drop_impl!(ImageView, destroy_image_view);

pub struct RenderPass {
    pub inner: vk::RenderPass,
    pub device: Rc<Device>,
}
trivial_drop_impl!(RenderPass, destroy_render_pass);

pub struct PipelineLayout {
    pub inner: vk::PipelineLayout,
    pub device: Rc<Device>,
}
trivial_drop_impl!(PipelineLayout, destroy_pipeline_layout);

pub struct Pipeline {
    pub inner: vk::Pipeline,
    pub device: Rc<Device>,
}
trivial_drop_impl!(Pipeline, destroy_pipeline);

pub struct ShaderModule {
    pub inner: vk::ShaderModule,
    pub device: Rc<Device>,
}
trivial_drop_impl!(ShaderModule, destroy_shader_module);

pub struct Framebuffer {
    pub inner: vk::Framebuffer,
    pub device: Rc<Device>,
}
trivial_drop_impl!(Framebuffer, destroy_framebuffer);

pub struct CommandPool {
    pub inner: vk::CommandPool,
    pub device: Rc<Device>,
}
trivial_drop_impl!(CommandPool, destroy_command_pool);

pub struct Semaphore {
    pub inner: vk::Semaphore,
    pub device: Rc<Device>,
}
trivial_drop_impl!(Semaphore, destroy_semaphore);

pub struct Fence {
    pub inner: vk::Fence,
    pub device: Rc<Device>,
}
trivial_drop_impl!(Fence, destroy_fence);
