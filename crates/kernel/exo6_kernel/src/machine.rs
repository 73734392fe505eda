use std::{
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use exo6_kernel_params::{NENV, NFRAMES};
use exo6_syscall::{
    Continuation, EnvInfo, EnvStatus, EnvTarget, ExoFork, Kernel, PageDesc, PteFlags, Trap,
    UpcallEntry, UserMemory, error::SyscallError,
};
use exo6_types::{
    addr::{PhysPageNum, VirtAddr},
    env::EnvId,
};

use crate::{env::EnvTable, memory::PhysMemory};

/// Sizing of a [`Machine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    /// Number of physical page frames.
    pub frames: usize,
    /// Number of environment slots, between 1 and `1 << ENV_GEN_SHIFT`.
    pub envs: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            frames: NFRAMES,
            envs: NENV,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    #[error("no such environment {0}")]
    NoSuchEnv(EnvId),
    #[error("environment {0} is not runnable")]
    NotRunnable(EnvId),
    #[error("cannot create environment: {0}")]
    Syscall(#[from] SyscallError),
}

/// Kernel state shared by every environment of a machine.
pub(crate) struct MachineState {
    pub(crate) mem: PhysMemory,
    pub(crate) envs: EnvTable,
}

impl MachineState {
    pub(crate) fn new(config: MachineConfig) -> Self {
        Self {
            mem: PhysMemory::new(config.frames),
            envs: EnvTable::new(config.envs),
        }
    }
}

/// A simulated machine running the exokernel.
///
/// Cloning a `Machine` yields another handle to the same machine.
#[derive(Clone)]
pub struct Machine(Arc<Mutex<MachineState>>);

impl Machine {
    /// Creates a machine with every frame free and no environments.
    ///
    /// # Panics
    ///
    /// Panics if `config.envs` is zero or exceeds the number of slots an
    /// [`EnvId`] can encode.
    #[must_use]
    pub fn new(config: MachineConfig) -> Self {
        Self(Arc::new(Mutex::new(MachineState::new(config))))
    }

    fn lock(&self) -> MutexGuard<'_, MachineState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, env: EnvId) -> SimKernel {
        SimKernel {
            machine: self.clone(),
            env,
        }
    }

    /// Creates a runnable environment with no parent and an empty address
    /// space, and returns the kernel handle it runs with.
    pub fn spawn(&self) -> Result<SimKernel, MachineError> {
        let mut state = self.lock();
        let env = state.envs.alloc(None)?;
        env.status = EnvStatus::Runnable;
        let id = env.id;
        drop(state);
        log::debug!("[00000000] new env {id}");
        Ok(self.handle(id))
    }

    /// Resumes `env`, returning the continuation it runs from.
    ///
    /// Only runnable environments may be resumed. The first resume of a
    /// child created by `exofork` carries [`ExoFork::Child`], the `exofork`
    /// return the child has not observed yet; later resumes carry nothing.
    pub fn resume(&self, env: EnvId) -> Result<Continuation<SimKernel>, MachineError> {
        let mut state = self.lock();
        let record = state
            .envs
            .get_mut(env)
            .ok_or(MachineError::NoSuchEnv(env))?;
        if record.status != EnvStatus::Runnable {
            return Err(MachineError::NotRunnable(env));
        }
        let exofork = mem::take(&mut record.pending_exofork).then_some(ExoFork::Child);
        drop(state);
        Ok(Continuation {
            kernel: self.handle(env),
            exofork,
        })
    }

    /// Returns the status of `env`, or `None` if it does not exist.
    #[must_use]
    pub fn env_status(&self, env: EnvId) -> Option<EnvStatus> {
        self.lock().envs.get(env).map(|env| env.status)
    }

    /// Returns the mapping of the page containing `va` in `env`.
    #[must_use]
    pub fn page_desc(&self, env: EnvId, va: VirtAddr) -> Option<PageDesc> {
        self.lock().page_desc(env, va)
    }

    #[must_use]
    pub fn frame_ref_count(&self, ppn: PhysPageNum) -> u32 {
        self.lock().mem.ref_count(ppn)
    }

    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.lock().mem.free_pages()
    }
}

/// The kernel as seen from one environment.
#[derive(Clone)]
pub struct SimKernel {
    machine: Machine,
    env: EnvId,
}

impl Kernel for SimKernel {
    fn getenvid(&self) -> EnvId {
        self.env
    }

    fn env_info(&self, env: EnvId) -> Result<EnvInfo, SyscallError> {
        self.machine.lock().sys_env_info(self.env, env)
    }

    fn env_destroy(&self, env: EnvTarget) -> Result<(), SyscallError> {
        self.machine.lock().sys_env_destroy(self.env, env)
    }

    fn page_alloc(
        &self,
        env: EnvTarget,
        va: VirtAddr,
        perm: PteFlags,
    ) -> Result<(), SyscallError> {
        self.machine.lock().sys_page_alloc(self.env, env, va, perm)
    }

    fn page_map(
        &self,
        src_env: EnvTarget,
        src_va: VirtAddr,
        dst_env: EnvTarget,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> Result<(), SyscallError> {
        self.machine
            .lock()
            .sys_page_map(self.env, src_env, src_va, dst_env, dst_va, perm)
    }

    fn page_unmap(&self, env: EnvTarget, va: VirtAddr) -> Result<(), SyscallError> {
        self.machine.lock().sys_page_unmap(self.env, env, va)
    }

    fn exofork(&self) -> Result<ExoFork, SyscallError> {
        self.machine.lock().sys_exofork(self.env)
    }

    fn env_set_status(&self, env: EnvTarget, status: EnvStatus) -> Result<(), SyscallError> {
        self.machine.lock().sys_env_set_status(self.env, env, status)
    }

    fn env_set_pgfault_upcall(
        &self,
        env: EnvTarget,
        entry: UpcallEntry,
    ) -> Result<(), SyscallError> {
        self.machine
            .lock()
            .sys_env_set_pgfault_upcall(self.env, env, entry)
    }

    fn pde_present(&self, va: VirtAddr) -> bool {
        self.machine.lock().pde_present(self.env, va)
    }

    fn page_desc(&self, va: VirtAddr) -> Option<PageDesc> {
        self.machine.lock().page_desc(self.env, va)
    }
}

impl UserMemory for SimKernel {
    fn read(&self, va: VirtAddr, buf: &mut [u8]) -> Result<(), Trap> {
        self.machine.lock().user_read(self.env, va, buf)
    }

    fn write(&self, va: VirtAddr, data: &[u8]) -> Result<(), Trap> {
        self.machine.lock().user_write(self.env, va, data)
    }
}
