//! Per-frame synchronization objects and the pacing logic that decides
//! which fences gate which frame.
//!
//! A [FrameRing] holds N slots of {semaphores, fence, command buffer} and
//! cycles through them so the CPU can record frame K+1 while the GPU still
//! works on frame K. The index of the slot and the index of the swapchain
//! image a frame renders into are unrelated: the slot comes from a simple
//! rotating cursor, the image from `vkAcquireNextImageKHR`, and the two
//! sequences drift apart as soon as acquisition order varies. [FramePacing]
//! tracks both so a frame never touches a resource the GPU has not
//! finished with.

use crate::vulkan_raii::{CommandPool, Device, Fence, Semaphore};
use crate::swapchain::MAX_IMAGES;
use ash::vk;
use arrayvec::ArrayVec;
use std::rc::Rc;

/// Upper bound on frames in flight.
pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

#[derive(thiserror::Error, Debug)]
pub enum FrameRingError {
    #[error("failed to create command pool for frame recording")]
    CommandPoolCreation(#[source] vk::Result),
    #[error("failed to allocate per-frame command buffers")]
    CommandBufferAllocation(#[source] vk::Result),
    #[error("failed to create per-frame semaphore")]
    SemaphoreCreation(#[source] vk::Result),
    #[error("failed to create per-frame fence")]
    FenceCreation(#[source] vk::Result),
}

/// The synchronization objects and command buffer used by one in-flight
/// frame.
pub struct FrameSlot {
    /// Signaled by the acquire call, waited on by the queue submission.
    pub image_acquired: Semaphore,
    /// Signaled by the queue submission, waited on by present.
    pub commands_complete: Semaphore,
    /// Signaled by the queue submission, waited on by the CPU before the
    /// slot is reused.
    pub commands_complete_fence: Fence,
    pub command_buffer: vk::CommandBuffer,
}

pub struct FrameRing {
    pub slots: ArrayVec<FrameSlot, MAX_FRAMES_IN_FLIGHT>,
    pub pacing: FramePacing,
    // Declared after the slots so the command buffers outlive their pool
    // only on paper; Vulkan frees them with the pool either way.
    _command_pool: CommandPool,
}

impl FrameRing {
    pub fn new(device: &Rc<Device>, slot_count: usize, image_count: usize) -> Result<FrameRing, FrameRingError> {
        profiling::scope!("frame ring creation");
        assert!(0 < slot_count && slot_count <= MAX_FRAMES_IN_FLIGHT);

        let pool_create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(device.queue_family);
        let command_pool = unsafe { device.create_command_pool(&pool_create_info, None) }
            .map_err(FrameRingError::CommandPoolCreation)?;
        let command_pool = CommandPool {
            inner: command_pool,
            device: device.clone(),
        };
        device.debug.name(command_pool.inner, format_args!("frame ring command pool"));

        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool.inner)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(slot_count as u32);
        let command_buffers =
            unsafe { device.allocate_command_buffers(&allocate_info) }.map_err(FrameRingError::CommandBufferAllocation)?;

        let semaphore_create_info = vk::SemaphoreCreateInfo::default();
        // Created signaled so that the very first wait on each slot passes
        // without a matching submission.
        let fence_create_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let mut slots = ArrayVec::new();
        for (i, command_buffer) in command_buffers.into_iter().enumerate() {
            let image_acquired = unsafe { device.create_semaphore(&semaphore_create_info, None) }
                .map_err(FrameRingError::SemaphoreCreation)?;
            let image_acquired = Semaphore {
                inner: image_acquired,
                device: device.clone(),
            };
            let commands_complete = unsafe { device.create_semaphore(&semaphore_create_info, None) }
                .map_err(FrameRingError::SemaphoreCreation)?;
            let commands_complete = Semaphore {
                inner: commands_complete,
                device: device.clone(),
            };
            let commands_complete_fence =
                unsafe { device.create_fence(&fence_create_info, None) }.map_err(FrameRingError::FenceCreation)?;
            let commands_complete_fence = Fence {
                inner: commands_complete_fence,
                device: device.clone(),
            };
            device.debug.name(image_acquired.inner, format_args!("image acquired semaphore (slot {i})"));
            device
                .debug
                .name(commands_complete.inner, format_args!("commands complete semaphore (slot {i})"));
            device
                .debug
                .name(commands_complete_fence.inner, format_args!("commands complete fence (slot {i})"));
            device.debug.name(command_buffer, format_args!("frame command buffer (slot {i})"));
            slots.push(FrameSlot {
                image_acquired,
                commands_complete,
                commands_complete_fence,
                command_buffer,
            });
        }

        Ok(FrameRing {
            slots,
            pacing: FramePacing::new(slot_count, image_count),
            _command_pool: command_pool,
        })
    }

    pub fn current_slot(&self) -> &FrameSlot {
        &self.slots[self.pacing.slot()]
    }
}

/// Pure bookkeeping for the frame loop: which slot is next, which
/// submissions are still unretired, and which slot last rendered into each
/// swapchain image.
///
/// Submissions are numbered with a monotonic serial. Waiting on a slot's
/// fence retires exactly the submission recorded for that slot, and the
/// caller reports that retirement back via [begin_frame](Self::begin_frame)'s
/// return value. This struct touches no Vulkan handles, which is what keeps
/// the frame-ordering logic testable without a GPU.
pub struct FramePacing {
    cursor: usize,
    next_serial: u64,
    /// Serial of the still-in-flight submission per slot, if any.
    in_flight: ArrayVec<Option<u64>, MAX_FRAMES_IN_FLIGHT>,
    /// For each swapchain image, the slot and serial of the submission that
    /// last rendered into it.
    image_owners: ArrayVec<Option<(usize, u64)>, MAX_IMAGES>,
}

impl FramePacing {
    pub fn new(slot_count: usize, image_count: usize) -> FramePacing {
        assert!(0 < slot_count && slot_count <= MAX_FRAMES_IN_FLIGHT);
        assert!(0 < image_count && image_count <= MAX_IMAGES);
        let mut in_flight = ArrayVec::new();
        for _ in 0..slot_count {
            in_flight.push(None);
        }
        let mut image_owners = ArrayVec::new();
        for _ in 0..image_count {
            image_owners.push(None);
        }
        FramePacing {
            cursor: 0,
            next_serial: 1,
            in_flight,
            image_owners,
        }
    }

    /// The slot the next frame will use.
    pub fn slot(&self) -> usize {
        self.cursor
    }

    /// Starts a frame on the current slot. Returns the serial of the
    /// submission that the slot's fence wait has just retired, if the slot
    /// had one in flight.
    pub fn begin_frame(&mut self) -> Option<u64> {
        self.in_flight[self.cursor].take()
    }

    /// Reports that the current frame will render into `image`. If the
    /// image's previous submission came from a different slot and is still
    /// unretired, returns that slot: its fence must be waited on before the
    /// image is written again.
    pub fn image_hazard(&self, image: usize) -> Option<usize> {
        let (owner_slot, serial) = self.image_owners[image]?;
        if owner_slot != self.cursor && self.in_flight[owner_slot] == Some(serial) {
            Some(owner_slot)
        } else {
            None
        }
    }

    /// Records the submission of the current frame into `image` and
    /// advances to the next slot. Returns the submission's serial.
    pub fn end_frame(&mut self, image: usize) -> u64 {
        let serial = self.next_serial;
        self.next_serial += 1;
        debug_assert!(self.in_flight[self.cursor].is_none(), "frame submitted without begin_frame");
        self.in_flight[self.cursor] = Some(serial);
        self.image_owners[image] = Some((self.cursor, serial));
        self.cursor = (self.cursor + 1) % self.in_flight.len();
        serial
    }
}

#[cfg(test)]
mod tests {
    use super::FramePacing;

    /// A stand-in for the GPU's side of the fence protocol: submissions
    /// complete strictly in order, and waiting on a slot's fence completes
    /// everything up to and including that slot's submission.
    struct MockGpu {
        completed: u64,
    }

    impl MockGpu {
        fn new() -> MockGpu {
            MockGpu { completed: 0 }
        }

        fn wait(&mut self, serial: u64) {
            // In-order queue: finishing a submission finishes all earlier
            // ones too.
            self.completed = self.completed.max(serial);
        }

        fn is_done(&self, serial: u64) -> bool {
            serial <= self.completed
        }
    }

    #[test]
    fn slot_fence_gates_slot_reuse() {
        let mut gpu = MockGpu::new();
        let mut pacing = FramePacing::new(2, 3);
        let mut pending = [None::<u64>; 2];

        for frame in 0..12 {
            let slot = pacing.slot();
            if let Some(retired) = pacing.begin_frame() {
                gpu.wait(retired);
            }
            // After the fence wait, the slot's previous submission must have
            // completed or its command buffer would be reset mid-execution.
            if let Some(previous) = pending[slot] {
                assert!(gpu.is_done(previous), "slot {slot} reused before submission {previous} completed");
            }
            let image = frame % 3;
            let serial = pacing.end_frame(image);
            pending[slot] = Some(serial);
        }
    }

    #[test]
    fn long_runs_never_outpace_the_ring() {
        // 3 * image_count iterations with fewer slots than images: every
        // wrap of both the slot cursor and the image sequence is exercised.
        let mut gpu = MockGpu::new();
        let mut pacing = FramePacing::new(2, 2);
        let mut pending = [None::<u64>; 2];
        for frame in 0..6 {
            let slot = pacing.slot();
            if let Some(retired) = pacing.begin_frame() {
                gpu.wait(retired);
            }
            if let Some(previous) = pending[slot] {
                assert!(gpu.is_done(previous));
            }
            if let Some(hazard_slot) = pacing.image_hazard(frame % 2) {
                let serial = pending[hazard_slot].unwrap();
                gpu.wait(serial);
            }
            pending[slot] = Some(pacing.end_frame(frame % 2));
        }
    }

    #[test]
    fn image_reuse_by_another_slot_is_a_hazard() {
        let mut pacing = FramePacing::new(2, 3);
        // Slot 0 renders into image 0, slot 1 into image 1, neither retired.
        pacing.begin_frame();
        pacing.end_frame(0);
        pacing.begin_frame();
        pacing.end_frame(1);
        // Slot 0 now acquires image 1, which slot 1 still has in flight.
        pacing.begin_frame();
        assert_eq!(Some(1), pacing.image_hazard(1));
    }

    #[test]
    fn same_slot_or_retired_submissions_are_not_hazards() {
        let mut pacing = FramePacing::new(2, 2);
        // Never-rendered images carry no hazard.
        assert_eq!(None, pacing.image_hazard(0));

        pacing.begin_frame();
        pacing.end_frame(0); // slot 0, serial 1
        pacing.begin_frame();
        pacing.end_frame(1); // slot 1, serial 2

        // Back on slot 0. begin_frame retires serial 1, so re-acquiring
        // image 0 (owned by slot 0's own retired submission) is clean.
        assert_eq!(Some(1), pacing.begin_frame());
        assert_eq!(None, pacing.image_hazard(0));
        // Image 1 is still owned by slot 1's unretired submission.
        assert_eq!(Some(1), pacing.image_hazard(1));
        pacing.end_frame(1);

        // Slot 1's submission retires when its fence is next waited on, and
        // the hazard on anything it owned disappears.
        assert_eq!(Some(2), pacing.begin_frame());
        assert_eq!(None, pacing.image_hazard(0));
    }

    #[test]
    fn slot_and_image_indices_drift_independently() {
        let mut pacing = FramePacing::new(2, 3);
        // Acquisition order 0, 2, 2, 1: the slot cursor just alternates
        // 0, 1, 0, 1 regardless.
        for (expected_slot, image) in [(0, 0), (1, 2), (0, 2), (1, 1)] {
            assert_eq!(expected_slot, pacing.slot());
            pacing.begin_frame();
            pacing.end_frame(image);
        }
    }
}
