//! Physical memory of the machine.

use exo6_syscall::error::SyscallError;
use exo6_types::{addr::PhysPageNum, layout::PAGE_SIZE};
use page_alloc::PageFrameAllocator;

pub(crate) mod page_table;

/// Frames of physical memory together with their allocator.
pub(crate) struct PhysMemory {
    frames: Vec<[u8; PAGE_SIZE]>,
    allocator: PageFrameAllocator,
}

impl PhysMemory {
    pub(crate) fn new(total_pages: usize) -> Self {
        Self {
            frames: vec![[0; PAGE_SIZE]; total_pages],
            allocator: PageFrameAllocator::new(total_pages),
        }
    }

    /// Allocates one zeroed frame, owned by the caller.
    pub(crate) fn alloc_zeroed(&mut self) -> Result<PhysPageNum, SyscallError> {
        let frame = self.allocator.alloc().ok_or(SyscallError::NoMemory)?;
        self.frames[frame].fill(0);
        Ok(PhysPageNum::new(frame))
    }

    pub(crate) fn increment_ref(&mut self, ppn: PhysPageNum) {
        self.allocator.increment_ref(ppn.value());
    }

    /// Drops one reference to `ppn`; the frame is freed with its last one.
    pub(crate) fn decrement_ref(&mut self, ppn: PhysPageNum) {
        self.allocator.decrement_ref(ppn.value());
    }

    pub(crate) fn ref_count(&self, ppn: PhysPageNum) -> u32 {
        self.allocator.ref_count(ppn.value())
    }

    pub(crate) fn free_pages(&self) -> usize {
        self.allocator.free_pages()
    }

    pub(crate) fn page(&self, ppn: PhysPageNum) -> &[u8; PAGE_SIZE] {
        &self.frames[ppn.value()]
    }

    pub(crate) fn page_mut(&mut self, ppn: PhysPageNum) -> &mut [u8; PAGE_SIZE] {
        &mut self.frames[ppn.value()]
    }
}
