//! A first-fit bump allocator for device memory.
//!
//! A [MemoryHeap] manages memory of exactly one memory-type class. It grows
//! by fixed-size top-level allocations ([HEAP_BLOCK_SIZE]) and carves them
//! into aligned sub-ranges on demand. Carved ranges are never reclaimed
//! individually; the whole pool is released when the heap is dropped. That
//! trade is intentional: everything allocated here is allocated once during
//! startup and lives for the rest of the process.

use crate::vulkan_raii::{Buffer, Device, Image};
use ash::vk;
use arrayvec::ArrayVec;
use core::fmt::Arguments;
use std::ptr;
use std::rc::Rc;

/// The size of every top-level device allocation. Requests are carved out
/// of these; a single request larger than this is a caller bug.
pub const HEAP_BLOCK_SIZE: vk::DeviceSize = 256 * 1024 * 1024;

/// Upper bound on top-level allocations per heap.
pub const MAX_BLOCKS: usize = 8;

#[derive(thiserror::Error, Debug)]
pub enum MemoryHeapError {
    #[error("vulkan memory allocation failed (heap {1}, size: {2})")]
    Allocate(#[source] vk::Result, String, crate::Bytes),
    #[error("mapping vulkan memory failed (heap {1})")]
    Map(#[source] vk::Result, String),
    #[error("failed to create buffer (probably out of host or device memory)")]
    BufferCreation(#[source] vk::Result),
    #[error("failed to bind buffer to heap memory")]
    BufferBinding(#[source] vk::Result),
    #[error("failed to create image (probably out of host or device memory)")]
    ImageCreation(#[source] vk::Result),
    #[error("failed to bind image to heap memory")]
    ImageBinding(#[source] vk::Result),
}

/// A contiguous byte range inside one top-level allocation. Plain
/// descriptor; the [MemoryHeap] that produced it remains the sole owner of
/// the underlying `vk::DeviceMemory`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryBlock {
    pub memory: vk::DeviceMemory,
    pub offset: vk::DeviceSize,
    pub length: vk::DeviceSize,
}

pub struct MemoryHeap {
    device: Rc<Device>,
    memory_type: u32,
    blocks: ArrayVec<MemoryBlock, MAX_BLOCKS>,
    debug_identifier: String,
}

impl Drop for MemoryHeap {
    fn drop(&mut self) {
        // Several blocks may have been carved from one allocation; free each
        // distinct handle exactly once.
        for i in 0..self.blocks.len() {
            let memory = self.blocks[i].memory;
            if self.blocks[..i].iter().any(|block| block.memory == memory) {
                continue;
            }
            unsafe { self.device.free_memory(memory, None) };
        }
    }
}

impl MemoryHeap {
    /// Creates an empty heap for the given memory type (resolve one with
    /// [PhysicalDevice::find_memory_type](crate::PhysicalDevice::find_memory_type)).
    /// No device memory is allocated until the first [allocate](Self::allocate).
    pub fn new(device: &Rc<Device>, memory_type: u32, debug_identifier_args: Arguments) -> MemoryHeap {
        MemoryHeap {
            device: device.clone(),
            memory_type,
            blocks: ArrayVec::new(),
            debug_identifier: format!("{debug_identifier_args}"),
        }
    }

    /// Carves an aligned range for `requirements` out of this heap, growing
    /// it by one fixed-size device allocation if nothing fits.
    ///
    /// Panics if the requirements cannot be satisfied by this heap at all:
    /// a type mask excluding the heap's memory type, a non-power-of-two
    /// alignment, a request larger than [HEAP_BLOCK_SIZE], or a heap already
    /// at [MAX_BLOCKS]. Those are programming errors, not runtime
    /// conditions. Device out-of-memory is the one recoverable-by-nobody
    /// case reported as an [Err].
    pub fn allocate(&mut self, requirements: &vk::MemoryRequirements) -> Result<MemoryBlock, MemoryHeapError> {
        assert!(
            requirements.memory_type_bits & (1 << self.memory_type) != 0,
            "memory type {} ({}) cannot back this resource (type mask {:#b})",
            self.memory_type,
            self.debug_identifier,
            requirements.memory_type_bits,
        );
        assert!(
            requirements.size <= HEAP_BLOCK_SIZE,
            "request of {} exceeds the fixed allocation size of {} ({})",
            crate::Bytes(requirements.size),
            crate::Bytes(HEAP_BLOCK_SIZE),
            self.debug_identifier,
        );

        if let Some(block) = first_fit(&mut self.blocks, requirements.size, requirements.alignment) {
            return Ok(block);
        }
        self.grow()?;
        // The fresh block starts at offset 0 and spans HEAP_BLOCK_SIZE, so
        // any request that passed the size assert above fits it.
        Ok(first_fit(&mut self.blocks, requirements.size, requirements.alignment).unwrap())
    }

    fn grow(&mut self) -> Result<(), MemoryHeapError> {
        profiling::scope!("gpu memory heap growth");
        assert!(
            !self.blocks.is_full(),
            "memory heap {} already holds {MAX_BLOCKS} top-level allocations",
            self.debug_identifier,
        );
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(HEAP_BLOCK_SIZE)
            .memory_type_index(self.memory_type);
        log::trace!(
            "vk::allocate_memory({} bytes, type {}) for {}",
            HEAP_BLOCK_SIZE,
            self.memory_type,
            self.debug_identifier
        );
        let memory = unsafe { self.device.allocate_memory(&alloc_info, None) }.map_err(|err| {
            MemoryHeapError::Allocate(err, self.debug_identifier.clone(), crate::Bytes(HEAP_BLOCK_SIZE))
        })?;
        self.device
            .debug
            .name(memory, format_args!("{} block {}", self.debug_identifier, self.blocks.len()));
        self.blocks.push(MemoryBlock {
            memory,
            offset: 0,
            length: HEAP_BLOCK_SIZE,
        });
        Ok(())
    }

    /// Creates a buffer backed by this heap and, when `contents` is
    /// non-empty, maps the carved range and writes them. Writing requires
    /// the heap's memory type to be host-visible and host-coherent.
    #[profiling::function]
    pub fn create_buffer(
        &mut self,
        buffer_create_info: vk::BufferCreateInfo,
        contents: &[u8],
        name: Arguments,
    ) -> Result<Buffer, MemoryHeapError> {
        let buffer = unsafe { self.device.create_buffer(&buffer_create_info, None) }.map_err(MemoryHeapError::BufferCreation)?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let block = match self.allocate(&requirements) {
            Ok(block) => block,
            Err(err) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };
        if let Err(err) =
            unsafe { self.device.bind_buffer_memory(buffer, block.memory, block.offset) }.map_err(MemoryHeapError::BufferBinding)
        {
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(err);
        }

        if !contents.is_empty() {
            profiling::scope!("one-time buffer upload");
            let mapped = unsafe {
                self.device
                    .map_memory(block.memory, block.offset, contents.len() as vk::DeviceSize, vk::MemoryMapFlags::empty())
            };
            match mapped {
                Ok(mapped) => unsafe {
                    ptr::copy_nonoverlapping(contents.as_ptr(), mapped.cast::<u8>(), contents.len());
                    self.device.unmap_memory(block.memory);
                },
                Err(err) => {
                    unsafe { self.device.destroy_buffer(buffer, None) };
                    return Err(MemoryHeapError::Map(err, self.debug_identifier.clone()));
                }
            }
        }

        self.device.debug.name(buffer, name);
        Ok(Buffer {
            inner: buffer,
            device: self.device.clone(),
        })
    }

    /// Creates an image backed by this heap.
    #[profiling::function]
    pub fn create_image(&mut self, image_create_info: vk::ImageCreateInfo, name: Arguments) -> Result<Image, MemoryHeapError> {
        let image = unsafe { self.device.create_image(&image_create_info, None) }.map_err(MemoryHeapError::ImageCreation)?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let block = match self.allocate(&requirements) {
            Ok(block) => block,
            Err(err) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(err);
            }
        };
        if let Err(err) =
            unsafe { self.device.bind_image_memory(image, block.memory, block.offset) }.map_err(MemoryHeapError::ImageBinding)
        {
            unsafe { self.device.destroy_image(image, None) };
            return Err(err);
        }
        self.device.debug.name(image, name);
        Ok(Image {
            inner: image,
            device: self.device.clone(),
        })
    }
}

/// Scans `blocks` in insertion order and carves the requested range out of
/// the first one that fits, shrinking that block in place. The shrunk block
/// stays in the list even at length zero, so the heap keeps a record of
/// every top-level allocation it owns.
fn first_fit(blocks: &mut [MemoryBlock], size: vk::DeviceSize, alignment: vk::DeviceSize) -> Option<MemoryBlock> {
    for block in blocks.iter_mut() {
        let aligned_offset = align_up(block.offset, alignment);
        let padding = aligned_offset - block.offset;
        let needed = size + padding;
        if block.length >= needed {
            let carved = MemoryBlock {
                memory: block.memory,
                offset: aligned_offset,
                length: size,
            };
            block.offset += needed;
            block.length -= needed;
            return Some(carved);
        }
    }
    None
}

fn align_up(size: u64, align: u64) -> u64 {
    assert!(align.is_power_of_two(), "alignment must be a power of two, got {align}");
    (size + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::{align_up, first_fit, MemoryBlock, HEAP_BLOCK_SIZE};
    use ash::vk;

    fn fresh_block() -> MemoryBlock {
        MemoryBlock {
            memory: vk::DeviceMemory::null(),
            offset: 0,
            length: HEAP_BLOCK_SIZE,
        }
    }

    #[test]
    fn align_up_works() {
        assert_eq!(16, align_up(15, 8));
        assert_eq!(16, align_up(9, 8));
        assert_eq!(64, align_up(9, 64));
        assert_eq!(64 * 3, align_up(64 * 3 - 1, 64));
        assert_eq!(64 * 3, align_up(64 * 3 - 63, 64));
        assert_eq!(64 * 3, align_up(64 * 3, 64));
        assert_eq!(0, align_up(0, 64));
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn non_power_of_two_alignment_is_a_fault() {
        align_up(128, 48);
    }

    #[test]
    fn carved_offsets_are_always_aligned() {
        let mut blocks = [fresh_block()];
        for (size, alignment) in [(3, 1), (100, 256), (1, 2), (4096, 4096), (17, 64), (1, 65536)] {
            let block = first_fit(&mut blocks, size, alignment).unwrap();
            assert_eq!(0, block.offset % alignment, "offset {} not aligned to {}", block.offset, alignment);
            assert_eq!(size, block.length);
        }
    }

    #[test]
    fn sequences_that_fit_never_need_a_second_allocation() {
        // 1 MiB of requests against a 256 MiB block: the scan must find room
        // in the existing block every time (no request returns None, which is
        // what triggers a top-level allocation in MemoryHeap::allocate).
        let mut blocks = [fresh_block()];
        for _ in 0..256 {
            assert!(first_fit(&mut blocks, 4096, 256).is_some());
        }
    }

    #[test]
    fn oversized_requests_are_never_truncated() {
        let mut blocks = [fresh_block()];
        assert!(first_fit(&mut blocks, HEAP_BLOCK_SIZE + 1, 1).is_none());
        // The failed scan must leave the block untouched.
        assert_eq!(HEAP_BLOCK_SIZE, blocks[0].length);
        assert_eq!(0, blocks[0].offset);
    }

    #[test]
    fn every_byte_stays_accounted_for() {
        let mut blocks = [fresh_block()];
        let mut handed_out = 0;
        for (size, alignment) in [(1, 1), (1000, 512), (12345, 4), (7, 128), (1 << 20, 1 << 16)] {
            let before = blocks[0].offset;
            let block = first_fit(&mut blocks, size, alignment).unwrap();
            // Carved range plus its alignment padding ...
            handed_out += (block.offset - before) + block.length;
        }
        // ... plus the shrinking remainder covers the allocation exactly.
        assert_eq!(HEAP_BLOCK_SIZE, handed_out + blocks[0].length);
    }

    #[test]
    fn back_to_back_aligned_requests_pack_tightly() {
        // Two 1024-byte, 256-aligned requests: the second lands at offset
        // 1024 with no padding, both in the same allocation, and the heap
        // still holds just the one (shrunk) block.
        let mut blocks = arrayvec::ArrayVec::<MemoryBlock, { super::MAX_BLOCKS }>::new();
        blocks.push(fresh_block());
        let first = first_fit(&mut blocks, 1024, 256).unwrap();
        let second = first_fit(&mut blocks, 1024, 256).unwrap();
        assert_eq!(0, first.offset);
        assert_eq!(1024, second.offset);
        assert_eq!(first.memory, second.memory);
        assert_eq!(1, blocks.len());
        assert_eq!(2048, blocks[0].offset);
        assert_eq!(HEAP_BLOCK_SIZE - 2048, blocks[0].length);
    }

    #[test]
    fn zero_length_remainders_are_kept() {
        let mut blocks = [MemoryBlock {
            memory: vk::DeviceMemory::null(),
            offset: 0,
            length: 4096,
        }];
        let block = first_fit(&mut blocks, 4096, 1).unwrap();
        assert_eq!(4096, block.length);
        // The exhausted block stays behind so the allocation handle is still
        // reachable at teardown.
        assert_eq!(0, blocks[0].length);
        assert_eq!(4096, blocks[0].offset);
    }
}
