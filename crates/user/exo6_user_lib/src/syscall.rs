//! System call wrappers that tag failures with the primitive that failed.

use exo6_syscall::{
    EnvInfo, EnvStatus, EnvTarget, ExoFork, Kernel, PteFlags, SyscallCode, UpcallEntry,
    error::SyscallError,
};
use exo6_types::{addr::VirtAddr, env::EnvId};

use crate::error::SyscallFailed;

fn wrap<T>(call: SyscallCode, res: Result<T, SyscallError>) -> Result<T, SyscallFailed> {
    res.map_err(|error| SyscallFailed { call, error })
}

pub fn env_info<K>(kernel: &K, env: EnvId) -> Result<EnvInfo, SyscallFailed>
where
    K: Kernel + ?Sized,
{
    wrap(SyscallCode::EnvInfo, kernel.env_info(env))
}

pub fn env_destroy<K>(kernel: &K, env: EnvTarget) -> Result<(), SyscallFailed>
where
    K: Kernel + ?Sized,
{
    wrap(SyscallCode::EnvDestroy, kernel.env_destroy(env))
}

pub fn page_alloc<K>(
    kernel: &K,
    env: EnvTarget,
    va: VirtAddr,
    perm: PteFlags,
) -> Result<(), SyscallFailed>
where
    K: Kernel + ?Sized,
{
    wrap(SyscallCode::PageAlloc, kernel.page_alloc(env, va, perm))
}

pub fn page_map<K>(
    kernel: &K,
    src_env: EnvTarget,
    src_va: VirtAddr,
    dst_env: EnvTarget,
    dst_va: VirtAddr,
    perm: PteFlags,
) -> Result<(), SyscallFailed>
where
    K: Kernel + ?Sized,
{
    wrap(
        SyscallCode::PageMap,
        kernel.page_map(src_env, src_va, dst_env, dst_va, perm),
    )
}

pub fn page_unmap<K>(kernel: &K, env: EnvTarget, va: VirtAddr) -> Result<(), SyscallFailed>
where
    K: Kernel + ?Sized,
{
    wrap(SyscallCode::PageUnmap, kernel.page_unmap(env, va))
}

pub fn exofork<K>(kernel: &K) -> Result<ExoFork, SyscallFailed>
where
    K: Kernel + ?Sized,
{
    wrap(SyscallCode::Exofork, kernel.exofork())
}

pub fn env_set_status<K>(kernel: &K, env: EnvTarget, status: EnvStatus) -> Result<(), SyscallFailed>
where
    K: Kernel + ?Sized,
{
    wrap(SyscallCode::EnvSetStatus, kernel.env_set_status(env, status))
}

pub fn env_set_pgfault_upcall<K>(
    kernel: &K,
    env: EnvTarget,
    entry: UpcallEntry,
) -> Result<(), SyscallFailed>
where
    K: Kernel + ?Sized,
{
    wrap(
        SyscallCode::EnvSetPgfaultUpcall,
        kernel.env_set_pgfault_upcall(env, entry),
    )
}
