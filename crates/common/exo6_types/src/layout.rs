//! User-visible virtual memory layout.
//!
//! ```text
//!  UTOP, UXSTACKTOP -> +------------------------------+ 0xeec00000
//!                      |     user exception stack     | PAGE_SIZE
//!                      +------------------------------+ 0xeebff000
//!                      |        empty (guard)         | PAGE_SIZE
//!          USTACKTOP ->+------------------------------+ 0xeebfe000
//!                      |      normal user stack       |
//!                      +------------------------------+
//!                      :                              :
//!              UTEXT ->+------------------------------+ 0x00800000
//!             PFTEMP ->|  page-fault scratch page     | 0x007ff000
//!                      :                              :
//!              UTEMP ->+------------------------------+ 0x00400000
//!                      :                              :
//!                    0 +------------------------------+
//! ```

use crate::addr::VirtAddr;

/// Bytes per page.
pub const PAGE_SIZE: usize = 4096;

/// Bits of offset within a page.
pub const PAGE_SHIFT: usize = 12;

/// Entries per page directory.
pub const NPDENTRIES: usize = 1024;

/// Entries per page table.
pub const NPTENTRIES: usize = 1024;

/// Bytes mapped by one page directory entry.
pub const PT_SIZE: usize = PAGE_SIZE * NPTENTRIES;

/// Bits of offset within the range mapped by one page directory entry.
pub const PD_SHIFT: usize = 22;

/// Top of user-accessible memory; everything above belongs to the kernel.
pub const UTOP: VirtAddr = VirtAddr::new(0xeec0_0000);

/// Top of the one-page user exception stack.
pub const UXSTACKTOP: VirtAddr = UTOP;

/// Bottom of the user exception stack page.
pub const UXSTACK_BOTTOM: VirtAddr = VirtAddr::new(UXSTACKTOP.addr() - PAGE_SIZE);

/// Top of the normal user stack, below a guard page.
pub const USTACKTOP: VirtAddr = VirtAddr::new(UTOP.addr() - 2 * PAGE_SIZE);

/// Where user programs generally begin.
pub const UTEXT: VirtAddr = VirtAddr::new(2 * PT_SIZE);

/// Temporary mappings used by user-level helpers.
pub const UTEMP: VirtAddr = VirtAddr::new(PT_SIZE);

/// Scratch page used while resolving copy-on-write faults.
pub const PFTEMP: VirtAddr = VirtAddr::new(UTEMP.addr() + PT_SIZE - PAGE_SIZE);
