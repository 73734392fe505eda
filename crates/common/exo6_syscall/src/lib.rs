#![cfg_attr(not(test), no_std)]

use bitflags::bitflags;
use dataview::Pod;
use exo6_types::{
    addr::{PhysPageNum, VirtAddr},
    env::EnvId,
};
use strum::{Display, FromRepr};

pub use self::kernel::{Continuation, Kernel, Trap, UserMemory};

pub mod error;
mod kernel;

bitflags! {
    /// Permission and marker bits of a user page mapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[repr(transparent)]
    pub struct PteFlags: u32 {
        /// Present.
        const P = 0x001;
        /// Writable.
        const W = 0x002;
        /// User accessible.
        const U = 0x004;

        /// Bits the hardware ignores and user code may use freely.
        const AVAIL = 0xe00;

        /// Copy-on-write.
        ///
        /// Logically writable, but must be privatized on first write. Only
        /// ever set together with a cleared [`PteFlags::W`].
        const COW = 0x800;

        /// Bits a system call is allowed to set.
        const SYSCALL = Self::AVAIL.bits() | Self::P.bits() | Self::W.bits() | Self::U.bits();

        const UP = Self::U.bits() | Self::P.bits();
        const UWP = Self::U.bits() | Self::W.bits() | Self::P.bits();
    }
}

bitflags! {
    /// Access kind reported with a page fault.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct FaultErr: u32 {
        /// The page was present; the fault is a protection violation.
        const PRESENT = 0x1;
        /// The faulting access was a write.
        const WRITE = 0x2;
        /// The fault happened in user mode.
        const USER = 0x4;
    }
}

/// Typed view of one present user page table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDesc {
    /// Frame backing the page.
    pub frame: PhysPageNum,
    /// Permission and marker bits of the mapping.
    pub perm: PteFlags,
}

impl PageDesc {
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.perm.contains(PteFlags::W)
    }

    #[must_use]
    pub fn is_cow(&self) -> bool {
        self.perm.contains(PteFlags::COW)
    }

    #[must_use]
    pub fn is_user(&self) -> bool {
        self.perm.contains(PteFlags::U)
    }
}

/// Fault context the kernel pushes onto the user exception stack.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod)]
pub struct UTrapframe {
    fault_va: usize,
    err: u32,
    padding: [u8; 4],
}

impl UTrapframe {
    #[must_use]
    pub fn new(fault_va: VirtAddr, err: FaultErr) -> Self {
        Self {
            fault_va: fault_va.addr(),
            err: err.bits(),
            padding: [0; 4],
        }
    }

    #[must_use]
    pub fn fault_va(&self) -> VirtAddr {
        VirtAddr::new(self.fault_va)
    }

    #[must_use]
    pub fn err(&self) -> FaultErr {
        FaultErr::from_bits_retain(self.err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, Display)]
#[repr(u32)]
#[strum(serialize_all = "snake_case")]
pub enum EnvStatus {
    Free = 0,
    Runnable = 2,
    NotRunnable = 4,
}

/// Read-only record describing an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvInfo {
    pub id: EnvId,
    pub parent: Option<EnvId>,
    pub status: EnvStatus,
}

/// Environment a primitive acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvTarget {
    /// The calling environment.
    Current,
    Env(EnvId),
}

/// Result of `exofork`, as seen by each of the two continuations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExoFork {
    /// Returned to the caller, with the id of the new, not yet runnable, child.
    Parent(EnvId),
    /// Delivered to the child when it is first resumed.
    Child,
}

/// User-space entry point the kernel jumps to when delivering a page fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpcallEntry(VirtAddr);

impl UpcallEntry {
    #[must_use]
    pub const fn new(addr: VirtAddr) -> Self {
        Self(addr)
    }

    #[must_use]
    pub const fn addr(self) -> VirtAddr {
        self.0
    }
}

/// Kernel primitives, named as they appear in diagnostics (`sys_<name>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, Display)]
#[repr(usize)]
#[strum(serialize_all = "snake_case")]
pub enum SyscallCode {
    EnvInfo = 1,
    EnvDestroy,
    PageAlloc,
    PageMap,
    PageUnmap,
    Exofork,
    EnvSetStatus,
    EnvSetPgfaultUpcall,
}
