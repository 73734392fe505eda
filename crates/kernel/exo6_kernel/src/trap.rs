//! User memory accesses and page-fault delivery.

use dataview::PodMethods as _;
use exo6_syscall::{FaultErr, PteFlags, Trap, UTrapframe};
use exo6_types::{
    addr::{PhysPageNum, VirtAddr},
    env::EnvId,
    layout::{PAGE_SIZE, UXSTACK_BOTTOM, UXSTACKTOP},
};

use crate::machine::MachineState;

/// Where the kernel pushes the [`UTrapframe`] of a delivered fault.
pub const UTF_ADDR: VirtAddr = VirtAddr::new(UXSTACKTOP.addr() - size_of::<UTrapframe>());

impl MachineState {
    /// Translates `va` for a user access of kind `access`.
    ///
    /// On failure, returns the fault error code the hardware would report.
    fn translate(
        &self,
        env: EnvId,
        va: VirtAddr,
        access: FaultErr,
    ) -> Result<PhysPageNum, FaultErr> {
        let required = if access.contains(FaultErr::WRITE) {
            PteFlags::UWP
        } else {
            PteFlags::UP
        };
        match self.envs.get(env).and_then(|env| env.pgdir.lookup(va)) {
            Some(pte) if pte.flags().contains(required) => Ok(pte.phys_page_num()),
            Some(_) => Err(access | FaultErr::PRESENT),
            None => Err(access),
        }
    }

    /// Delivers a page fault at `fault_va` to `env`.
    ///
    /// The environment is destroyed if it has no upcall registered or its
    /// exception stack is not mapped writable.
    fn page_fault(&mut self, env: EnvId, fault_va: VirtAddr, err: FaultErr) -> Trap {
        let target = self.envs.get(env).and_then(|e| {
            let entry = e.pgfault_upcall?;
            let xstack = e
                .pgdir
                .lookup(UXSTACK_BOTTOM)
                .filter(|pte| pte.flags().contains(PteFlags::UWP))?;
            Some((entry, xstack.phys_page_num()))
        });
        let Some((entry, xstack)) = target else {
            log::warn!("[{env}] user fault va {fault_va:#x} ({err:?}), killed");
            self.destroy_env(env);
            return Trap::Killed { fault_va, err };
        };

        let utf = UTrapframe::new(fault_va, err);
        self.mem.page_mut(xstack)[UTF_ADDR.page_offset()..].copy_from_slice(utf.as_bytes());
        log::trace!(
            "[{env}] page fault va {fault_va:#x} ({err:?}), upcall {:#x}",
            entry.addr()
        );
        Trap::Upcall {
            entry,
            utf: UTF_ADDR,
        }
    }

    pub(crate) fn user_read(
        &mut self,
        env: EnvId,
        va: VirtAddr,
        buf: &mut [u8],
    ) -> Result<(), Trap> {
        let mut done = 0;
        while done < buf.len() {
            let cur = VirtAddr::new(va.addr().wrapping_add(done));
            let offset = cur.page_offset();
            let n = usize::min(buf.len() - done, PAGE_SIZE - offset);
            let ppn = self
                .translate(env, cur.page_rounddown(), FaultErr::USER)
                .map_err(|err| self.page_fault(env, cur, err))?;
            buf[done..done + n].copy_from_slice(&self.mem.page(ppn)[offset..offset + n]);
            done += n;
        }
        Ok(())
    }

    pub(crate) fn user_write(
        &mut self,
        env: EnvId,
        va: VirtAddr,
        data: &[u8],
    ) -> Result<(), Trap> {
        let mut done = 0;
        while done < data.len() {
            let cur = VirtAddr::new(va.addr().wrapping_add(done));
            let offset = cur.page_offset();
            let n = usize::min(data.len() - done, PAGE_SIZE - offset);
            let ppn = self
                .translate(env, cur.page_rounddown(), FaultErr::USER | FaultErr::WRITE)
                .map_err(|err| self.page_fault(env, cur, err))?;
            self.mem.page_mut(ppn)[offset..offset + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }
        Ok(())
    }
}
