use alloc::vec::Vec;

/// Bookkeeping for a single frame.
#[derive(Debug, Clone, Copy)]
struct FrameState {
    /// Number of mappings (or other owners) referring to the frame.
    ///
    /// A value of `0` indicates the frame is free.
    ref_count: u32,
    /// Next frame in the free list, valid only while the frame is free.
    next_free: Option<usize>,
}

/// A reference-counting allocator of physical page frames.
///
/// Frames are identified by their index. Free frames are linked into a free
/// list; an allocated frame stays allocated until its reference count drops
/// back to zero.
#[derive(Debug)]
pub struct PageFrameAllocator {
    /// State of every frame managed by the allocator.
    states: Vec<FrameState>,
    /// The head of the free list.
    free_list: Option<usize>,
    /// The number of free frames currently available for allocation.
    free_pages: usize,
}

impl PageFrameAllocator {
    /// Creates an allocator managing `total_pages` frames, all free.
    ///
    /// Frames are handed out in ascending index order.
    #[must_use]
    pub fn new(total_pages: usize) -> Self {
        let states = (0..total_pages)
            .map(|i| FrameState {
                ref_count: 0,
                next_free: (i + 1 < total_pages).then_some(i + 1),
            })
            .collect();

        Self {
            states,
            free_list: (total_pages > 0).then_some(0),
            free_pages: total_pages,
        }
    }

    /// Returns the total number of frames managed by the allocator.
    ///
    /// This includes both allocated and free frames.
    #[must_use]
    pub fn total_pages(&self) -> usize {
        self.states.len()
    }

    /// Returns the number of free frames currently available for allocation.
    #[must_use]
    pub fn free_pages(&self) -> usize {
        self.free_pages
    }

    /// Allocates a frame.
    ///
    /// The returned frame has a reference count of one, owned by the caller.
    /// Returns `None` if no frames are available.
    pub fn alloc(&mut self) -> Option<usize> {
        let frame = self.free_list.take()?;
        let state = &mut self.states[frame];
        assert_eq!(state.ref_count, 0, "frame {frame} on the free list is in use");
        self.free_list = state.next_free.take();
        state.ref_count = 1;
        self.free_pages -= 1;
        Some(frame)
    }

    /// Returns the reference count of `frame`.
    ///
    /// # Panics
    ///
    /// Panics if `frame` is out of range.
    #[must_use]
    pub fn ref_count(&self, frame: usize) -> u32 {
        self.states[frame].ref_count
    }

    /// Adds a reference to an allocated frame.
    ///
    /// Returns the previous value of the reference count.
    ///
    /// # Panics
    ///
    /// Panics if `frame` is free or out of range.
    pub fn increment_ref(&mut self, frame: usize) -> u32 {
        let state = &mut self.states[frame];
        assert!(state.ref_count > 0, "frame {frame} is not allocated");
        let prev = state.ref_count;
        state.ref_count = prev.checked_add(1).expect("frame reference count overflow");
        prev
    }

    /// Drops a reference to an allocated frame, freeing it when the last
    /// reference goes away.
    ///
    /// Returns the previous value of the reference count.
    ///
    /// # Panics
    ///
    /// Panics if `frame` is already free or out of range.
    pub fn decrement_ref(&mut self, frame: usize) -> u32 {
        let state = &mut self.states[frame];
        assert!(state.ref_count > 0, "frame {frame} already freed");
        let prev = state.ref_count;
        state.ref_count -= 1;
        if state.ref_count == 0 {
            state.next_free = self.free_list;
            self.free_list = Some(frame);
            self.free_pages += 1;
        }
        prev
    }
}
