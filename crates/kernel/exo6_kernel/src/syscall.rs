//! System call implementations.
//!
//! Every function here runs with the machine lock held, so each call is
//! atomic with respect to every other environment.

use std::mem;

use exo6_syscall::{
    EnvInfo, EnvStatus, EnvTarget, ExoFork, PageDesc, PteFlags, UpcallEntry, error::SyscallError,
};
use exo6_types::{
    addr::{PhysPageNum, VirtAddr},
    env::EnvId,
    layout::UTOP,
};

use crate::{env::Env, machine::MachineState, memory::page_table::PtEntry};

fn check_va(va: VirtAddr) -> Result<(), SyscallError> {
    if !va.is_page_aligned() || va >= UTOP {
        return Err(SyscallError::Invalid);
    }
    Ok(())
}

fn check_perm(perm: PteFlags) -> Result<(), SyscallError> {
    if !perm.contains(PteFlags::UP) || !PteFlags::SYSCALL.contains(perm) {
        return Err(SyscallError::Invalid);
    }
    Ok(())
}

impl MachineState {
    fn env(&self, id: EnvId) -> Result<&Env, SyscallError> {
        self.envs.get(id).ok_or(SyscallError::BadEnv)
    }

    /// Resolves `target` on behalf of `caller`.
    ///
    /// A target other than the caller itself must be one of its immediate
    /// children.
    fn resolve(&self, caller: EnvId, target: EnvTarget) -> Result<EnvId, SyscallError> {
        let caller = self.env(caller)?.id;
        match target {
            EnvTarget::Current => Ok(caller),
            EnvTarget::Env(id) if id == caller => Ok(caller),
            EnvTarget::Env(id) => {
                let env = self.env(id)?;
                if env.parent != Some(caller) {
                    return Err(SyscallError::BadEnv);
                }
                Ok(id)
            }
        }
    }

    /// Maps `ppn` at `va` in `env`, taking over one reference the caller
    /// holds on the frame. A page previously mapped there is released.
    fn insert_page(&mut self, env: EnvId, va: VirtAddr, ppn: PhysPageNum, perm: PteFlags) {
        let Self { mem: memory, envs } = self;
        let Some(env) = envs.get_mut(env) else {
            memory.decrement_ref(ppn);
            return;
        };
        let mut old = mem::replace(env.pgdir.entry_mut(va), PtEntry::new(ppn, perm));
        if let Some(old) = old.take() {
            memory.decrement_ref(old.phys_page_num());
        }
    }

    /// Releases every frame mapped by `env`.
    pub(crate) fn destroy_env(&mut self, id: EnvId) {
        let Some(env) = self.envs.remove(id) else {
            return;
        };
        for (_va, pte) in env.pgdir.leaves() {
            self.mem.decrement_ref(pte.phys_page_num());
        }
        log::debug!("[{id}] free env {id}");
    }

    pub(crate) fn sys_env_info(&self, caller: EnvId, id: EnvId) -> Result<EnvInfo, SyscallError> {
        log::trace!("[{caller}] sys_env_info({id})");
        self.env(caller)?;
        Ok(self.env(id)?.info())
    }

    pub(crate) fn sys_env_destroy(
        &mut self,
        caller: EnvId,
        target: EnvTarget,
    ) -> Result<(), SyscallError> {
        log::trace!("[{caller}] sys_env_destroy({target:?})");
        let id = self.resolve(caller, target)?;
        if id == caller {
            log::debug!("[{caller}] exiting gracefully");
        } else {
            log::debug!("[{caller}] destroying {id}");
        }
        self.destroy_env(id);
        Ok(())
    }

    pub(crate) fn sys_page_alloc(
        &mut self,
        caller: EnvId,
        target: EnvTarget,
        va: VirtAddr,
        perm: PteFlags,
    ) -> Result<(), SyscallError> {
        log::trace!("[{caller}] sys_page_alloc({target:?}, {va:#x}, {perm:?})");
        let id = self.resolve(caller, target)?;
        check_va(va)?;
        check_perm(perm)?;

        let ppn = self.mem.alloc_zeroed()?;
        self.insert_page(id, va, ppn, perm);
        Ok(())
    }

    pub(crate) fn sys_page_map(
        &mut self,
        caller: EnvId,
        src_env: EnvTarget,
        src_va: VirtAddr,
        dst_env: EnvTarget,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> Result<(), SyscallError> {
        log::trace!(
            "[{caller}] sys_page_map({src_env:?}, {src_va:#x}, {dst_env:?}, {dst_va:#x}, {perm:?})"
        );
        let src = self.resolve(caller, src_env)?;
        let dst = self.resolve(caller, dst_env)?;
        check_va(src_va)?;
        check_va(dst_va)?;
        check_perm(perm)?;

        let src_pte = self
            .env(src)?
            .pgdir
            .lookup(src_va)
            .ok_or(SyscallError::Invalid)?;
        if perm.contains(PteFlags::W) && !src_pte.flags().contains(PteFlags::W) {
            return Err(SyscallError::Invalid);
        }

        // Take the new reference before the old mapping is released, so
        // remapping a page onto itself never frees its frame.
        let ppn = src_pte.phys_page_num();
        self.mem.increment_ref(ppn);
        self.insert_page(dst, dst_va, ppn, perm);
        Ok(())
    }

    pub(crate) fn sys_page_unmap(
        &mut self,
        caller: EnvId,
        target: EnvTarget,
        va: VirtAddr,
    ) -> Result<(), SyscallError> {
        log::trace!("[{caller}] sys_page_unmap({target:?}, {va:#x})");
        let id = self.resolve(caller, target)?;
        check_va(va)?;

        let Self { mem: memory, envs } = self;
        let old = envs
            .get_mut(id)
            .and_then(|env| env.pgdir.existing_entry_mut(va))
            .and_then(PtEntry::take);
        if let Some(old) = old {
            memory.decrement_ref(old.phys_page_num());
        }
        Ok(())
    }

    pub(crate) fn sys_exofork(&mut self, caller: EnvId) -> Result<ExoFork, SyscallError> {
        log::trace!("[{caller}] sys_exofork()");
        self.env(caller)?;
        let child = self.envs.alloc(Some(caller))?;
        child.pending_exofork = true;
        let child = child.id;
        log::debug!("[{caller}] new env {child}");
        Ok(ExoFork::Parent(child))
    }

    pub(crate) fn sys_env_set_status(
        &mut self,
        caller: EnvId,
        target: EnvTarget,
        status: EnvStatus,
    ) -> Result<(), SyscallError> {
        log::trace!("[{caller}] sys_env_set_status({target:?}, {status})");
        let id = self.resolve(caller, target)?;
        if !matches!(status, EnvStatus::Runnable | EnvStatus::NotRunnable) {
            return Err(SyscallError::Invalid);
        }
        self.envs.get_mut(id).ok_or(SyscallError::BadEnv)?.status = status;
        Ok(())
    }

    pub(crate) fn sys_env_set_pgfault_upcall(
        &mut self,
        caller: EnvId,
        target: EnvTarget,
        entry: UpcallEntry,
    ) -> Result<(), SyscallError> {
        log::trace!(
            "[{caller}] sys_env_set_pgfault_upcall({target:?}, {:#x})",
            entry.addr()
        );
        let id = self.resolve(caller, target)?;
        self.envs.get_mut(id).ok_or(SyscallError::BadEnv)?.pgfault_upcall = Some(entry);
        Ok(())
    }

    pub(crate) fn pde_present(&self, env: EnvId, va: VirtAddr) -> bool {
        self.envs
            .get(env)
            .is_some_and(|env| env.pgdir.pde_present(va))
    }

    pub(crate) fn page_desc(&self, env: EnvId, va: VirtAddr) -> Option<PageDesc> {
        let pte = self.envs.get(env)?.pgdir.lookup(va.page_rounddown())?;
        Some(PageDesc {
            frame: pte.phys_page_num(),
            perm: pte.flags(),
        })
    }
}
