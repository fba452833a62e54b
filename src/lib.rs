//! A small Vulkan renderer built around two pieces of real machinery: a
//! first-fit bump allocator for device memory ([MemoryHeap]) and a
//! multi-frame presentation pipeline ([Renderer]) that keeps CPU recording
//! and GPU execution overlapped without stomping on in-flight resources.
//!
//! Everything else (instance/device bootstrap, the window, pipeline state)
//! is deliberately thin glue around those two.

#[macro_export]
macro_rules! cstr {
    ($string:expr) => {
        unsafe { core::ffi::CStr::from_bytes_with_nul_unchecked(concat!($string, "\0").as_bytes()) }
    };
}

mod debug_utils;
pub use debug_utils::DebugNamer;

mod display_utils {
    use core::fmt::{Display, Formatter, Result};

    /// Wrapper around u64 for pretty-printing byte amounts with the
    /// appropriate size prefix (KiB, MiB, etc.).
    #[derive(Debug)]
    pub struct Bytes(pub u64);

    impl Display for Bytes {
        fn fmt(&self, fmt: &mut Formatter) -> Result {
            const KIBI: u64 = 1_024;
            const MEBI: u64 = KIBI * KIBI;
            const GIBI: u64 = MEBI * KIBI;
            match self.0 {
                bytes if bytes < KIBI => write!(fmt, "{bytes} bytes"),
                bytes if bytes < MEBI => write!(fmt, "{:.2} KiB", bytes as f32 / KIBI as f32),
                bytes if bytes < GIBI => write!(fmt, "{:.2} MiB", bytes as f32 / MEBI as f32),
                bytes => write!(fmt, "{:.2} GiB", bytes as f32 / GIBI as f32),
            }
        }
    }
}
pub use display_utils::Bytes;

mod frame_ring;
pub use frame_ring::{FrameRing, FrameRingError};

mod heap;
pub use heap::{MemoryBlock, MemoryHeap, MemoryHeapError, HEAP_BLOCK_SIZE, MAX_BLOCKS};

pub mod include_words;

mod instance;
pub use instance::{Instance, InstanceCreationError};

mod physical_device;
pub use physical_device::{get_physical_device, DeviceCreationError, PhysicalDevice};

mod pipeline;
pub use pipeline::{Framebuffers, PipelineCreationError, Pipelines};

mod renderer;
pub use renderer::{RenderError, Renderer};

mod surface {
    use ash::khr;
    use ash::vk;
    use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

    pub use crate::vulkan_raii::Surface;

    pub fn create_surface(
        instance: &crate::Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Surface, vk::Result> {
        profiling::scope!("window surface creation");
        let surface = unsafe { ash_window::create_surface(&instance.entry, &instance.inner, display, window, None) }?;
        let surface_fns = khr::surface::Instance::new(&instance.entry, &instance.inner);
        Ok(Surface {
            inner: surface,
            device: surface_fns,
        })
    }
}
pub use surface::{create_surface, Surface};

mod swapchain;
pub use swapchain::{Swapchain, SwapchainError, DEPTH_FORMAT, MAX_IMAGES, SWAPCHAIN_FORMAT};

mod vulkan_raii;
pub use vulkan_raii::{Buffer, Device, Image, ImageView};

pub use ash::vk;
