use exo6_syscall::{SyscallCode, Trap, error::SyscallError};
use exo6_types::addr::VirtAddr;

use crate::fork::{ForkError, PageFaultError};

/// A kernel primitive that returned an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("sys_{}: {} (error code {})", .call, .error, .error.code())]
pub struct SyscallFailed {
    pub call: SyscallCode,
    pub error: SyscallError,
}

/// Errors reported by the user runtime.
///
/// Every error except [`Exo6Error::Aborted`] is fatal: the runtime destroys
/// the environment before returning it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Exo6Error {
    #[error(transparent)]
    Syscall(#[from] SyscallFailed),
    #[error("page fault handler failed: {0}")]
    PageFault(#[from] PageFaultError),
    #[error("fork failed: {0}")]
    Fork(#[from] ForkError),
    #[error(transparent)]
    Trap(#[from] Trap),
    #[error("page fault at {fault_va:#x} with no handler registered")]
    NoHandler { fault_va: VirtAddr },
    #[error("upcall to unknown entry {0:#x}")]
    UnknownUpcall(VirtAddr),
    #[error("page fault at {va:#x} persists after its handler returned")]
    FaultNotResolved { va: VirtAddr },
    #[error("environment has been aborted")]
    Aborted,
}
