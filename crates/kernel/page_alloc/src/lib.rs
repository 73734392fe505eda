#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod page_frame_allocator;

pub use self::page_frame_allocator::PageFrameAllocator;
