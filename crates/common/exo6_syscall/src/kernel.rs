use exo6_types::{addr::VirtAddr, env::EnvId};

use crate::{
    EnvInfo, EnvStatus, EnvTarget, ExoFork, FaultErr, PageDesc, PteFlags, UpcallEntry,
    error::SyscallError,
};

/// The primitives a minimal exokernel exposes to user space.
///
/// Every call acts on behalf of the calling environment; `EnvTarget::Current`
/// names it. Other environments may only be named if they are immediate
/// children of the caller.
pub trait Kernel {
    /// Returns the id of the calling environment.
    fn getenvid(&self) -> EnvId;

    /// Reads the kernel's record of `env`.
    fn env_info(&self, env: EnvId) -> Result<EnvInfo, SyscallError>;

    /// Destroys `env`, releasing every page it maps.
    fn env_destroy(&self, env: EnvTarget) -> Result<(), SyscallError>;

    /// Allocates a zeroed frame and maps it at `va` in `env` with `perm`.
    ///
    /// Any page already mapped at `va` is unmapped as a side effect.
    fn page_alloc(&self, env: EnvTarget, va: VirtAddr, perm: PteFlags)
    -> Result<(), SyscallError>;

    /// Maps the frame at `src_va` in `src_env` at `dst_va` in `dst_env`.
    ///
    /// Any page already mapped at `dst_va` is superseded.
    fn page_map(
        &self,
        src_env: EnvTarget,
        src_va: VirtAddr,
        dst_env: EnvTarget,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> Result<(), SyscallError>;

    /// Unmaps the page at `va` in `env`; a no-op if nothing is mapped.
    fn page_unmap(&self, env: EnvTarget, va: VirtAddr) -> Result<(), SyscallError>;

    /// Creates an empty, not runnable child of the caller.
    ///
    /// The caller always sees [`ExoFork::Parent`]; the child observes
    /// [`ExoFork::Child`] through its first [`Continuation`].
    fn exofork(&self) -> Result<ExoFork, SyscallError>;

    fn env_set_status(&self, env: EnvTarget, status: EnvStatus) -> Result<(), SyscallError>;

    /// Registers the entry point the kernel upcalls on a user page fault.
    fn env_set_pgfault_upcall(
        &self,
        env: EnvTarget,
        entry: UpcallEntry,
    ) -> Result<(), SyscallError>;

    /// Returns whether the page directory entry covering `va` is present in
    /// the caller's address space.
    fn pde_present(&self, va: VirtAddr) -> bool;

    /// Returns the caller's mapping of the page containing `va`, if present.
    fn page_desc(&self, va: VirtAddr) -> Option<PageDesc>;
}

/// The state an environment picks up from when it is scheduled.
#[derive(Debug, Clone)]
pub struct Continuation<K> {
    /// Handle the environment makes its system calls through.
    pub kernel: K,
    /// Return value of an `exofork` call the environment has not observed
    /// yet.
    ///
    /// Only set on the first resume of a child created by `exofork`, where it
    /// is always [`ExoFork::Child`].
    pub exofork: Option<ExoFork>,
}

/// How the hardware reports a faulting user memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Trap {
    /// The kernel pushed a `UTrapframe` at `utf` on the exception stack and
    /// transferred control to `entry`.
    #[error("page fault upcall to {:#x}", .entry.addr())]
    Upcall { entry: UpcallEntry, utf: VirtAddr },
    /// The fault could not be delivered and the kernel destroyed the
    /// environment.
    #[error("unhandled page fault at {fault_va:#x} ({err:?})")]
    Killed { fault_va: VirtAddr, err: FaultErr },
}

/// Loads and stores through the caller's page tables.
pub trait UserMemory {
    /// Copies `buf.len()` bytes starting at `va` into `buf`.
    fn read(&self, va: VirtAddr, buf: &mut [u8]) -> Result<(), Trap>;

    /// Copies `data` to memory starting at `va`.
    fn write(&self, va: VirtAddr, data: &[u8]) -> Result<(), Trap>;
}
