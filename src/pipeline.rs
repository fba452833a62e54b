use crate::swapchain::{Swapchain, DEPTH_FORMAT, MAX_IMAGES, SWAPCHAIN_FORMAT};
use crate::vulkan_raii::{Device, Framebuffer, Pipeline, PipelineLayout, RenderPass, ShaderModule};
use ash::vk;
use arrayvec::ArrayVec;
use std::rc::Rc;

#[derive(thiserror::Error, Debug)]
pub enum PipelineCreationError {
    #[error("failed to create render pass")]
    RenderPassCreation(#[source] vk::Result),
    #[error("failed to create shader module")]
    ShaderModuleCreation(#[source] vk::Result),
    #[error("failed to create pipeline layout")]
    PipelineLayoutCreation(#[source] vk::Result),
    #[error("failed to create graphics pipeline")]
    PipelineCreation(#[source] vk::Result),
    #[error("failed to create framebuffer")]
    FramebufferCreation(#[source] vk::Result),
}

/// The render pass, pipeline layout and the one graphics pipeline. These
/// depend only on the fixed attachment formats and the extent, not on the
/// swapchain's images, so they are created once up front.
pub struct Pipelines {
    pub render_pass: RenderPass,
    pub layout: PipelineLayout,
    pub pipeline: Pipeline,
}

impl Pipelines {
    pub fn new(
        device: &Rc<Device>,
        vertex_shader: &[u32],
        fragment_shader: &[u32],
        extent: vk::Extent2D,
    ) -> Result<Pipelines, PipelineCreationError> {
        profiling::scope!("pipeline creation");
        let render_pass = create_render_pass(device)?;
        device.debug.name(render_pass.inner, format_args!("main render pass"));

        let vertex_module_create_info = vk::ShaderModuleCreateInfo::default().code(vertex_shader);
        let vertex_module = unsafe { device.create_shader_module(&vertex_module_create_info, None) }
            .map_err(PipelineCreationError::ShaderModuleCreation)?;
        let vertex_module = ShaderModule {
            inner: vertex_module,
            device: device.clone(),
        };
        let fragment_module_create_info = vk::ShaderModuleCreateInfo::default().code(fragment_shader);
        let fragment_module = unsafe { device.create_shader_module(&fragment_module_create_info, None) }
            .map_err(PipelineCreationError::ShaderModuleCreation)?;
        let fragment_module = ShaderModule {
            inner: fragment_module,
            device: device.clone(),
        };

        // One mat4 transform, fed fresh every frame.
        let push_constant_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(core::mem::size_of::<glam::Mat4>() as u32)];
        let layout_create_info = vk::PipelineLayoutCreateInfo::default().push_constant_ranges(&push_constant_ranges);
        let layout = unsafe { device.create_pipeline_layout(&layout_create_info, None) }
            .map_err(PipelineCreationError::PipelineLayoutCreation)?;
        let layout = PipelineLayout {
            inner: layout,
            device: device.clone(),
        };
        device.debug.name(layout.inner, format_args!("main pipeline layout"));

        let main_cstr = crate::cstr!("main");
        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module.inner)
                .name(main_cstr),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module.inner)
                .name(main_cstr),
        ];

        // Interleaved position + color, both vec3.
        let vertex_binding_descriptions = [vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride((core::mem::size_of::<f32>() * 6) as u32)
            .input_rate(vk::VertexInputRate::VERTEX)];
        let vertex_attribute_descriptions = [
            vk::VertexInputAttributeDescription::default()
                .location(0)
                .binding(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(0),
            vk::VertexInputAttributeDescription::default()
                .location(1)
                .binding(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset((core::mem::size_of::<f32>() * 3) as u32),
        ];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_binding_descriptions)
            .vertex_attribute_descriptions(&vertex_attribute_descriptions);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default().topology(vk::PrimitiveTopology::TRIANGLE_LIST);

        // Static viewport covering the whole surface; the window is not
        // resizable, so there is no dynamic state.
        let viewports = [vk::Viewport::default()
            .width(extent.width as f32)
            .height(extent.height as f32)
            .max_depth(1.0)];
        let scissors = [vk::Rect2D::default().extent(extent)];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .max_depth_bounds(1.0);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&color_blend_attachments);

        let pipeline_create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .layout(layout.inner)
            .render_pass(render_pass.inner)
            .subpass(0);
        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_create_info], None)
        }
        .map_err(|(_, err)| PipelineCreationError::PipelineCreation(err))?;
        let pipeline = Pipeline {
            inner: pipelines[0],
            device: device.clone(),
        };
        device.debug.name(pipeline.inner, format_args!("main graphics pipeline"));

        Ok(Pipelines {
            render_pass,
            layout,
            pipeline,
        })
    }
}

fn create_render_pass(device: &Rc<Device>) -> Result<RenderPass, PipelineCreationError> {
    let attachments = [
        vk::AttachmentDescription::default()
            .format(SWAPCHAIN_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
        vk::AttachmentDescription::default()
            .format(DEPTH_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
    ];
    let color_attachment_refs = [vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
    let depth_attachment_ref = vk::AttachmentReference::default()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachment_refs)
        .depth_stencil_attachment(&depth_attachment_ref)];
    // The external dependencies order the layout transitions against the
    // semaphore waits around the pass: the transition out of UNDEFINED must
    // not start before the image is actually acquired, and presentation
    // must not read the image before the final transition is done.
    let dependencies = [
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::MEMORY_READ)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dependency_flags(vk::DependencyFlags::BY_REGION),
        vk::SubpassDependency::default()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ)
            .dependency_flags(vk::DependencyFlags::BY_REGION),
    ];
    let render_pass_create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);
    let render_pass = unsafe { device.create_render_pass(&render_pass_create_info, None) }
        .map_err(PipelineCreationError::RenderPassCreation)?;
    Ok(RenderPass {
        inner: render_pass,
        device: device.clone(),
    })
}

/// One framebuffer per swapchain image, each pairing that image's view with
/// the shared depth buffer.
pub struct Framebuffers {
    pub extent: vk::Extent2D,
    framebuffers: ArrayVec<Framebuffer, MAX_IMAGES>,
}

impl Framebuffers {
    pub fn new(device: &Rc<Device>, pipelines: &Pipelines, swapchain: &Swapchain) -> Result<Framebuffers, PipelineCreationError> {
        profiling::scope!("framebuffer creation");
        let extent = swapchain.extent();
        let mut framebuffers = ArrayVec::new();
        for i in 0..swapchain.image_count() {
            let attachments = [swapchain.view(i), swapchain.depth_view()];
            let framebuffer_create_info = vk::FramebufferCreateInfo::default()
                .render_pass(pipelines.render_pass.inner)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            let framebuffer = unsafe { device.create_framebuffer(&framebuffer_create_info, None) }
                .map_err(PipelineCreationError::FramebufferCreation)?;
            let framebuffer = Framebuffer {
                inner: framebuffer,
                device: device.clone(),
            };
            device.debug.name(framebuffer.inner, format_args!("swapchain framebuffer {i}"));
            framebuffers.push(framebuffer);
        }
        Ok(Framebuffers { extent, framebuffers })
    }

    pub fn get(&self, image_index: usize) -> vk::Framebuffer {
        self.framebuffers[image_index].inner
    }
}
