use crate::heap::{MemoryHeap, MemoryHeapError};
use crate::physical_device::PhysicalDevice;
use crate::vulkan_raii::{self, Device, Image, ImageView, Surface};
use ash::vk;
use arrayvec::ArrayVec;
use std::rc::Rc;

/// Upper bound on swapchain images. Drivers hand out 2-4 in practice.
pub const MAX_IMAGES: usize = 8;

/// The one swapchain format used everywhere. Universally supported, and
/// keeping it fixed lets the render pass be created before the swapchain.
pub const SWAPCHAIN_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

/// The depth buffer format. 16 bits is plenty at these depth ranges and is
/// supported as a depth attachment by every device.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D16_UNORM;

#[derive(thiserror::Error, Debug)]
pub enum SwapchainError {
    #[error("failed to query surface capabilities")]
    SurfaceCapabilitiesQuery(#[source] vk::Result),
    #[error("surface does not support the {SWAPCHAIN_FORMAT:?} + SRGB_NONLINEAR swapchain format")]
    SurfaceFormatUnsupported,
    #[error("failed to query surface formats")]
    SurfaceFormatQuery(#[source] vk::Result),
    #[error("failed to create swapchain")]
    SwapchainCreation(#[source] vk::Result),
    #[error("failed to get the images of the new swapchain")]
    SwapchainImageQuery(#[source] vk::Result),
    #[error("failed to create image view for a swapchain image")]
    ImageViewCreation(#[source] vk::Result),
    #[error("failed to create the depth buffer")]
    DepthImageCreation(#[source] MemoryHeapError),
    #[error("failed to create image view for the depth buffer")]
    DepthImageViewCreation(#[source] vk::Result),
}

/// The swapchain, its images' views, and the depth buffer shared by all of
/// them.
pub struct Swapchain {
    // Destruction order: views before the images they view, everything
    // before the swapchain (which in turn owns the surface).
    image_views: ArrayVec<ImageView, MAX_IMAGES>,
    depth_image_view: ImageView,
    _depth_image: Image,
    images: ArrayVec<vk::Image, MAX_IMAGES>,
    swapchain: vulkan_raii::Swapchain,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Creates a swapchain for `surface` and takes ownership of it. The
    /// depth buffer is carved out of `device_local_heap`.
    pub fn new(
        device: &Rc<Device>,
        physical_device: &PhysicalDevice,
        surface: Surface,
        extent: vk::Extent2D,
        device_local_heap: &mut MemoryHeap,
    ) -> Result<Swapchain, SwapchainError> {
        profiling::scope!("swapchain creation");
        let surface_capabilities = unsafe {
            surface
                .device
                .get_physical_device_surface_capabilities(physical_device.inner, surface.inner)
        }
        .map_err(SwapchainError::SurfaceCapabilitiesQuery)?;
        let surface_formats = unsafe {
            surface
                .device
                .get_physical_device_surface_formats(physical_device.inner, surface.inner)
        }
        .map_err(SwapchainError::SurfaceFormatQuery)?;
        if !surface_formats
            .iter()
            .any(|f| f.format == SWAPCHAIN_FORMAT && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        {
            return Err(SwapchainError::SurfaceFormatUnsupported);
        }

        // One more than the driver's minimum, so acquire rarely blocks on
        // the driver's own bookkeeping. max_image_count of 0 means no limit.
        let mut min_image_count = surface_capabilities.min_image_count + 1;
        if surface_capabilities.max_image_count != 0 {
            min_image_count = min_image_count.min(surface_capabilities.max_image_count);
        }

        let swapchain_create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.inner)
            .min_image_count(min_image_count)
            .image_format(SWAPCHAIN_FORMAT)
            .image_color_space(vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            // Graphics and present come from the same queue family.
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(vk::SurfaceTransformFlagsKHR::IDENTITY)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            // FIFO is the only present mode the implementation must support.
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true);
        let swapchain = unsafe { device.swapchain_fns.create_swapchain(&swapchain_create_info, None) }
            .map_err(SwapchainError::SwapchainCreation)?;
        let swapchain = vulkan_raii::Swapchain {
            inner: swapchain,
            device: device.swapchain_fns.clone(),
            surface,
        };
        device.debug.name(swapchain.inner, format_args!("main swapchain"));

        // The driver may create more images than requested.
        let images = unsafe { device.swapchain_fns.get_swapchain_images(swapchain.inner) }
            .map_err(SwapchainError::SwapchainImageQuery)?;
        assert!(
            images.len() < MAX_IMAGES,
            "driver created {} swapchain images, expected fewer than {MAX_IMAGES}",
            images.len(),
        );
        let images: ArrayVec<vk::Image, MAX_IMAGES> = images.into_iter().collect();
        log::debug!("created a {}x{} swapchain with {} images", extent.width, extent.height, images.len());

        let mut image_views = ArrayVec::new();
        for (i, image) in images.iter().enumerate() {
            let image_view_create_info = vk::ImageViewCreateInfo::default()
                .image(*image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(SWAPCHAIN_FORMAT)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .level_count(1)
                        .layer_count(1),
                );
            let image_view = unsafe { device.create_image_view(&image_view_create_info, None) }
                .map_err(SwapchainError::ImageViewCreation)?;
            let image_view = ImageView {
                inner: image_view,
                device: device.clone(),
            };
            device.debug.name(*image, format_args!("swapchain image {i}"));
            device.debug.name(image_view.inner, format_args!("swapchain image view {i}"));
            image_views.push(image_view);
        }

        let depth_image_create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let depth_image = device_local_heap
            .create_image(depth_image_create_info, format_args!("depth buffer"))
            .map_err(SwapchainError::DepthImageCreation)?;
        let depth_image_view_create_info = vk::ImageViewCreateInfo::default()
            .image(depth_image.inner)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::DEPTH)
                    .level_count(1)
                    .layer_count(1),
            );
        let depth_image_view = unsafe { device.create_image_view(&depth_image_view_create_info, None) }
            .map_err(SwapchainError::DepthImageViewCreation)?;
        let depth_image_view = ImageView {
            inner: depth_image_view,
            device: device.clone(),
        };
        device.debug.name(depth_image_view.inner, format_args!("depth buffer view"));

        Ok(Swapchain {
            image_views,
            depth_image_view,
            _depth_image: depth_image,
            images,
            swapchain,
            extent,
        })
    }

    pub fn inner(&self) -> vk::SwapchainKHR {
        self.swapchain.inner
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn view(&self, image_index: usize) -> vk::ImageView {
        self.image_views[image_index].inner
    }

    pub fn depth_view(&self) -> vk::ImageView {
        self.depth_image_view.inner
    }
}
