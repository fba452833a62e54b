//! The per-frame protocol: throttle, acquire, record, submit, present.

use crate::frame_ring::{FrameRing, FrameRingError};
use crate::pipeline::{Framebuffers, Pipelines};
use crate::swapchain::Swapchain;
use crate::vulkan_raii::{Buffer, Device};
use ash::vk;
use glam::Mat4;
use std::rc::Rc;

/// How long to wait on a frame fence or an acquire before giving up. A GPU
/// that takes ten seconds for one frame is hung, and ash reports the
/// expired timeout as an error, which ends the frame loop.
const FRAME_TIMEOUT_NS: u64 = 10_000_000_000;

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("failed to create the frame ring")]
    FrameRing(#[from] FrameRingError),
    #[error("failed to wait for an earlier frame's fence")]
    FenceWait(#[source] vk::Result),
    #[error("failed to reset a frame fence")]
    FenceReset(#[source] vk::Result),
    #[error("failed to acquire a swapchain image")]
    AcquireImage(#[source] vk::Result),
    #[error("failed to begin recording a frame's command buffer")]
    CommandBufferBegin(#[source] vk::Result),
    #[error("failed to finish recording a frame's command buffer")]
    CommandBufferEnd(#[source] vk::Result),
    #[error("failed to submit a frame's commands")]
    Submit(#[source] vk::Result),
    #[error("failed to present a rendered frame")]
    Present(#[source] vk::Result),
    /// The surface changed underneath the swapchain. The swapchain needs to
    /// be recreated, which with a fixed-size window means quitting.
    #[error("the swapchain no longer matches the surface")]
    SwapchainOutOfDate,
}

pub struct Renderer {
    device: Rc<Device>,
    frames: FrameRing,
}

impl Renderer {
    pub fn new(device: &Rc<Device>, frames_in_flight: usize, image_count: usize) -> Result<Renderer, RenderError> {
        Ok(Renderer {
            device: device.clone(),
            frames: FrameRing::new(device, frames_in_flight, image_count)?,
        })
    }

    /// Renders one frame and queues it for presentation.
    ///
    /// Walks the full frame protocol: wait on the current slot's fence so
    /// its previous submission has retired, acquire an image, record, wait
    /// out any other slot still rendering into that same image, then submit
    /// and present. Only the submit signals the slot's fence again, so the
    /// fence is reset right before it.
    #[profiling::function]
    pub fn render_frame(
        &mut self,
        swapchain: &Swapchain,
        pipelines: &Pipelines,
        framebuffers: &Framebuffers,
        vertex_buffer: &Buffer,
        vertex_count: u32,
        transform: Mat4,
    ) -> Result<(), RenderError> {
        let slot = self.frames.pacing.slot();
        let (image_acquired, commands_complete, fence, command_buffer) = {
            let slot = &self.frames.slots[slot];
            (
                slot.image_acquired.inner,
                slot.commands_complete.inner,
                slot.commands_complete_fence.inner,
                slot.command_buffer,
            )
        };

        {
            profiling::scope!("frame fence wait");
            unsafe { self.device.wait_for_fences(&[fence], true, FRAME_TIMEOUT_NS) }.map_err(RenderError::FenceWait)?;
        }
        self.frames.pacing.begin_frame();

        let image_index = {
            profiling::scope!("swapchain image acquire");
            let result = unsafe {
                self.device
                    .swapchain_fns
                    .acquire_next_image(swapchain.inner(), FRAME_TIMEOUT_NS, image_acquired, vk::Fence::null())
            };
            match result {
                // A suboptimal swapchain still presents correctly.
                Ok((image_index, _suboptimal)) => image_index,
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Err(RenderError::SwapchainOutOfDate),
                Err(err) => return Err(RenderError::AcquireImage(err)),
            }
        };

        self.record(command_buffer, pipelines, framebuffers, image_index as usize, vertex_buffer, vertex_count, transform)?;

        // The acquired image may still be in flight from a frame submitted
        // through another slot. That slot's fence is the only thing that
        // proves those commands are done.
        if let Some(hazard_slot) = self.frames.pacing.image_hazard(image_index as usize) {
            profiling::scope!("image hazard fence wait");
            let hazard_fence = self.frames.slots[hazard_slot].commands_complete_fence.inner;
            unsafe { self.device.wait_for_fences(&[hazard_fence], true, FRAME_TIMEOUT_NS) }.map_err(RenderError::FenceWait)?;
        }

        unsafe { self.device.reset_fences(&[fence]) }.map_err(RenderError::FenceReset)?;
        {
            profiling::scope!("queue submit");
            let wait_semaphores = [image_acquired];
            // The pass's first external dependency chains off this stage,
            // so only the color output waits for the acquire.
            let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let command_buffers = [command_buffer];
            let signal_semaphores = [commands_complete];
            let submit_info = vk::SubmitInfo::default()
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages)
                .command_buffers(&command_buffers)
                .signal_semaphores(&signal_semaphores);
            unsafe { self.device.queue_submit(self.device.queue, &[submit_info], fence) }.map_err(RenderError::Submit)?;
        }
        self.frames.pacing.end_frame(image_index as usize);

        {
            profiling::scope!("queue present");
            let wait_semaphores = [commands_complete];
            let swapchains = [swapchain.inner()];
            let image_indices = [image_index];
            let present_info = vk::PresentInfoKHR::default()
                .wait_semaphores(&wait_semaphores)
                .swapchains(&swapchains)
                .image_indices(&image_indices);
            let result = unsafe { self.device.swapchain_fns.queue_present(self.device.queue, &present_info) };
            match result {
                Ok(_suboptimal) => {}
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Err(RenderError::SwapchainOutOfDate),
                Err(err) => return Err(RenderError::Present(err)),
            }
        }

        Ok(())
    }

    fn record(
        &self,
        command_buffer: vk::CommandBuffer,
        pipelines: &Pipelines,
        framebuffers: &Framebuffers,
        image_index: usize,
        vertex_buffer: &Buffer,
        vertex_count: u32,
        transform: Mat4,
    ) -> Result<(), RenderError> {
        profiling::scope!("command buffer recording");
        // The pool was created with RESET_COMMAND_BUFFER, so beginning a
        // buffer implicitly resets it.
        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) }.map_err(RenderError::CommandBufferBegin)?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];
        let render_pass_begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(pipelines.render_pass.inner)
            .framebuffer(framebuffers.get(image_index))
            .render_area(vk::Rect2D::default().extent(framebuffers.extent))
            .clear_values(&clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(command_buffer, &render_pass_begin_info, vk::SubpassContents::INLINE);
            self.device
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipelines.pipeline.inner);
            self.device.cmd_push_constants(
                command_buffer,
                pipelines.layout.inner,
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::bytes_of(&transform),
            );
            self.device.cmd_bind_vertex_buffers(command_buffer, 0, &[vertex_buffer.inner], &[0]);
            self.device.cmd_draw(command_buffer, vertex_count, 1, 0, 0);
            self.device.cmd_end_render_pass(command_buffer);
        }

        unsafe { self.device.end_command_buffer(command_buffer) }.map_err(RenderError::CommandBufferEnd)?;
        Ok(())
    }
}
