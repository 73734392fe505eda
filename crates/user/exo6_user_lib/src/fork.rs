//! Copy-on-write fork, implemented entirely in user space.
//!
//! `fork` shares every mapped page of the parent with the child and marks the
//! writable ones copy-on-write in both. The first write to such a page in
//! either environment faults into [`pgfault`], which gives the writer its own
//! copy.

use exo6_syscall::{
    EnvStatus, EnvTarget, ExoFork, FaultErr, Kernel, PteFlags, Trap, UTrapframe, UserMemory,
};
use exo6_types::{
    addr::{PageNum, VirtAddr},
    env::EnvId,
    layout::{PAGE_SIZE, PFTEMP, UXSTACK_BOTTOM},
};
use strum::Display;

use crate::{
    env::{PGFAULT_UPCALL, UserEnv},
    error::SyscallFailed,
    syscall,
};

/// Why a page fault could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PageFaultError {
    #[error("faulting access at {va:#x} was not a write ({err:?})")]
    NotWrite { va: VirtAddr, err: FaultErr },
    #[error("faulting access at {va:#x} was not to a copy-on-write page")]
    NotCopyOnWrite { va: VirtAddr },
    #[error(transparent)]
    Syscall(#[from] SyscallFailed),
    #[error(transparent)]
    Trap(#[from] Trap),
}

/// Progress of a [`fork`], reported with its failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ForkStage {
    #[strum(serialize = "registering page fault handler")]
    RegisteringHandler,
    #[strum(serialize = "creating child")]
    CreatingChild,
    #[strum(serialize = "copying pages")]
    CopyingPages,
    #[strum(serialize = "installing page fault upcall")]
    InstallingUpcall,
    #[strum(serialize = "installing exception stack")]
    InstallingExceptionStack,
    #[strum(serialize = "activating child")]
    Activating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ForkError {
    #[error("{stage}: {error}")]
    Syscall {
        stage: ForkStage,
        error: SyscallFailed,
    },
    #[error("page {va:#x} is not mapped")]
    PageNotMapped { va: VirtAddr },
    #[error("unsupported operation")]
    Unsupported,
}

trait StageExt<T> {
    fn at(self, stage: ForkStage) -> Result<T, ForkError>;
}

impl<T> StageExt<T> for Result<T, SyscallFailed> {
    fn at(self, stage: ForkStage) -> Result<T, ForkError> {
        self.map_err(|error| ForkError::Syscall { stage, error })
    }
}

/// Return value of [`fork`], different in each of the two environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkResult {
    Parent { child: EnvId },
    Child,
}

impl ForkResult {
    #[must_use]
    pub fn as_parent(&self) -> Option<EnvId> {
        match self {
            Self::Parent { child } => Some(*child),
            Self::Child => None,
        }
    }

    #[must_use]
    pub fn is_parent(&self) -> bool {
        matches!(self, Self::Parent { .. })
    }

    #[must_use]
    pub fn is_child(&self) -> bool {
        matches!(self, Self::Child)
    }
}

/// Page fault handler that privatizes copy-on-write pages.
///
/// Only write faults on pages marked [`PteFlags::COW`] are resolved. The
/// faulting page is copied into a fresh frame through [`PFTEMP`], which is
/// then mapped writable over the faulting page.
pub fn pgfault<K>(kernel: &K, utf: &UTrapframe) -> Result<(), PageFaultError>
where
    K: Kernel + UserMemory,
{
    let va = utf.fault_va();
    let err = utf.err();
    if !err.contains(FaultErr::WRITE) {
        return Err(PageFaultError::NotWrite { va, err });
    }
    let page = va.page_rounddown();
    if !kernel.page_desc(page).is_some_and(|desc| desc.is_cow()) {
        return Err(PageFaultError::NotCopyOnWrite { va });
    }

    let cur = EnvTarget::Current;
    syscall::page_alloc(kernel, cur, PFTEMP, PteFlags::UWP)?;
    let mut buf = [0; PAGE_SIZE];
    kernel.read(page, &mut buf)?;
    kernel.write(PFTEMP, &buf)?;
    syscall::page_map(kernel, cur, PFTEMP, cur, page, PteFlags::UWP)?;
    syscall::page_unmap(kernel, cur, PFTEMP)?;

    log::debug!(
        "[{}] copied page {page:#x} on write to {va:#x}",
        kernel.getenvid()
    );
    Ok(())
}

/// Maps page `pn` of the caller into `child` at the same address.
///
/// Writable and copy-on-write pages become copy-on-write in both
/// environments; the caller's own mapping is always re-marked, even if it
/// already was copy-on-write. Read-only pages are shared as they are.
pub fn duppage<K>(kernel: &K, child: EnvId, pn: PageNum) -> Result<(), ForkError>
where
    K: Kernel + ?Sized,
{
    let va = pn.addr();
    let desc = kernel.page_desc(va).ok_or(ForkError::PageNotMapped { va })?;
    let perm = desc.perm & PteFlags::SYSCALL;
    let (cur, dst) = (EnvTarget::Current, EnvTarget::Env(child));

    if desc.is_writable() || desc.is_cow() {
        let perm = (perm - PteFlags::W) | PteFlags::COW;
        // Child first, then our own mapping.
        syscall::page_map(kernel, cur, va, dst, va, perm).at(ForkStage::CopyingPages)?;
        syscall::page_map(kernel, cur, va, cur, va, perm).at(ForkStage::CopyingPages)?;
    } else {
        syscall::page_map(kernel, cur, va, dst, va, perm).at(ForkStage::CopyingPages)?;
    }
    Ok(())
}

/// Duplicates every mapped page below the exception stack into `child`.
fn copy_address_space<K>(kernel: &K, child: EnvId) -> Result<(), ForkError>
where
    K: Kernel + ?Sized,
{
    let mut va = VirtAddr::ZERO;
    while va < UXSTACK_BOTTOM {
        if !kernel.pde_present(va) {
            let Some(next) = va.next_page_table() else {
                break;
            };
            va = next;
            continue;
        }
        if kernel.page_desc(va).is_some() {
            duppage(kernel, child, va.page_num())?;
        }
        let Some(next) = va.byte_add(PAGE_SIZE) else {
            break;
        };
        va = next;
    }
    Ok(())
}

/// Populates a child created by `exofork` and makes it runnable.
fn populate_child<K>(kernel: &K, parent: EnvId, child: EnvId) -> Result<(), ForkError>
where
    K: Kernel + ?Sized,
{
    let dst = EnvTarget::Env(child);

    log::debug!("[{parent}] fork {child}: {}", ForkStage::CopyingPages);
    copy_address_space(kernel, child)?;

    let stage = ForkStage::InstallingUpcall;
    log::debug!("[{parent}] fork {child}: {stage}");
    syscall::env_set_pgfault_upcall(kernel, dst, PGFAULT_UPCALL).at(stage)?;

    let stage = ForkStage::InstallingExceptionStack;
    log::debug!("[{parent}] fork {child}: {stage}");
    syscall::page_alloc(kernel, dst, UXSTACK_BOTTOM, PteFlags::UWP).at(stage)?;

    let stage = ForkStage::Activating;
    log::debug!("[{parent}] fork {child}: {stage}");
    syscall::env_set_status(kernel, dst, EnvStatus::Runnable).at(stage)?;
    Ok(())
}

/// Creates a child environment sharing the caller's memory copy-on-write.
///
/// Returns [`ForkResult::Parent`] in the caller and [`ForkResult::Child`] in
/// the child. If anything fails after the child was created, the child is
/// destroyed before the error is returned, so it never runs.
pub fn fork<K>(env: &mut UserEnv<K>) -> Result<ForkResult, ForkError>
where
    K: Kernel + UserMemory,
{
    let parent = env.id();

    let stage = ForkStage::RegisteringHandler;
    log::debug!("[{parent}] fork: {stage}");
    env.try_set_pgfault_handler(pgfault::<K>).at(stage)?;

    let stage = ForkStage::CreatingChild;
    log::debug!("[{parent}] fork: {stage}");
    let ret = match env.take_exofork() {
        Some(ret) => ret,
        None => syscall::exofork(env.kernel()).at(stage)?,
    };
    let child = match ret {
        ExoFork::Parent(child) => child,
        ExoFork::Child => {
            env.refresh_this_env().at(stage)?;
            log::debug!("[{}] fork: running as child of {parent}", env.id());
            return Ok(ForkResult::Child);
        }
    };

    if let Err(e) = populate_child(env.kernel(), parent, child) {
        log::debug!("[{parent}] fork {child}: {e}, destroying child");
        if let Err(e) = syscall::env_destroy(env.kernel(), EnvTarget::Env(child)) {
            log::warn!("[{parent}] {e}");
        }
        return Err(e);
    }
    Ok(ForkResult::Parent { child })
}

/// Fork sharing all memory except the stack.
///
/// Not supported; always fails without side effects.
pub fn sfork<K>(_env: &mut UserEnv<K>) -> Result<ForkResult, ForkError>
where
    K: Kernel + UserMemory,
{
    Err(ForkError::Unsupported)
}
