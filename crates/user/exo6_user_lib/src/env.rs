//! Per-environment runtime: identity, page fault dispatch and abort.

use core::fmt;

use dataview::PodMethods as _;
use exo6_syscall::{
    Continuation, EnvInfo, EnvTarget, ExoFork, Kernel, PteFlags, Trap, UTrapframe, UpcallEntry,
    UserMemory,
};
use exo6_types::{
    addr::VirtAddr,
    env::EnvId,
    layout::{PAGE_SIZE, UTEXT, UXSTACK_BOTTOM},
};

use crate::{
    error::{Exo6Error, SyscallFailed},
    fork::{self, ForkResult, PageFaultError},
    syscall,
};

/// Entry point of the library's page fault upcall.
///
/// The kernel transfers control here with a `UTrapframe` on the exception
/// stack; the runtime then calls the registered handler.
pub const PGFAULT_UPCALL: UpcallEntry = UpcallEntry::new(UTEXT);

/// A user-level page fault handler.
///
/// Returning `Ok` means the fault has been resolved and the faulting access
/// may be retried.
pub type PgFaultHandler<K> = fn(&K, &UTrapframe) -> Result<(), PageFaultError>;

/// Page fault handling registered by an environment.
pub struct PgFaultConfig<K> {
    handler: Option<PgFaultHandler<K>>,
}

impl<K> PgFaultConfig<K> {
    #[must_use]
    pub fn handler(&self) -> Option<PgFaultHandler<K>> {
        self.handler
    }
}

impl<K> Clone for PgFaultConfig<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for PgFaultConfig<K> {}

impl<K> Default for PgFaultConfig<K> {
    fn default() -> Self {
        Self { handler: None }
    }
}

impl<K> fmt::Debug for PgFaultConfig<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgFaultConfig")
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// The part of an environment's memory owned by the runtime.
///
/// A forked child starts with a copy of its parent's state.
pub struct RuntimeState<K> {
    this_env: EnvInfo,
    pgfault: PgFaultConfig<K>,
}

impl<K> RuntimeState<K> {
    #[must_use]
    pub fn this_env(&self) -> &EnvInfo {
        &self.this_env
    }

    #[must_use]
    pub fn pgfault(&self) -> &PgFaultConfig<K> {
        &self.pgfault
    }
}

impl<K> Clone for RuntimeState<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for RuntimeState<K> {}

impl<K> fmt::Debug for RuntimeState<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeState")
            .field("this_env", &self.this_env)
            .field("pgfault", &self.pgfault)
            .finish()
    }
}

/// A running environment: its kernel handle plus runtime state.
pub struct UserEnv<K> {
    kernel: K,
    state: RuntimeState<K>,
    /// `exofork` return this environment has yet to observe.
    exofork: Option<ExoFork>,
    aborted: bool,
}

impl<K> UserEnv<K>
where
    K: Kernel + UserMemory,
{
    /// Starts the runtime of a freshly created environment.
    pub fn new(kernel: K) -> Result<Self, Exo6Error> {
        let this_env = syscall::env_info(&kernel, kernel.getenvid())?;
        Ok(Self {
            kernel,
            state: RuntimeState {
                this_env,
                pgfault: PgFaultConfig::default(),
            },
            exofork: None,
            aborted: false,
        })
    }

    /// Continues an environment whose runtime state already exists, such as a
    /// child created by [`fork`](Self::fork).
    ///
    /// A child resumed with [`ExoFork::Child`] completes its pending `fork`
    /// on the next call to [`fork`](Self::fork).
    #[must_use]
    pub fn resume(cont: Continuation<K>, state: RuntimeState<K>) -> Self {
        Self {
            kernel: cont.kernel,
            state,
            exofork: cont.exofork,
            aborted: false,
        }
    }

    #[must_use]
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    #[must_use]
    pub fn state(&self) -> &RuntimeState<K> {
        &self.state
    }

    /// Returns the identity record of this environment.
    #[must_use]
    pub fn this_env(&self) -> &EnvInfo {
        &self.state.this_env
    }

    #[must_use]
    pub fn id(&self) -> EnvId {
        self.state.this_env.id
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    fn ensure_alive(&self) -> Result<(), Exo6Error> {
        if self.aborted {
            return Err(Exo6Error::Aborted);
        }
        Ok(())
    }

    /// Destroys the environment after a fatal error and latches the runtime.
    fn abort(&mut self, error: Exo6Error) -> Exo6Error {
        log::error!("[{}] {error}", self.id());
        self.aborted = true;
        if !matches!(error, Exo6Error::Trap(Trap::Killed { .. })) {
            if let Err(e) = syscall::env_destroy(&self.kernel, EnvTarget::Current) {
                log::warn!("[{}] {e}", self.id());
            }
        }
        error
    }

    /// Takes the `exofork` return delivered with this environment's
    /// continuation.
    pub(crate) fn take_exofork(&mut self) -> Option<ExoFork> {
        self.exofork.take()
    }

    /// Re-reads the identity record from the kernel.
    pub(crate) fn refresh_this_env(&mut self) -> Result<(), SyscallFailed> {
        self.state.this_env = syscall::env_info(&self.kernel, self.kernel.getenvid())?;
        Ok(())
    }

    /// Registers `handler` without aborting on failure.
    ///
    /// The first registration also allocates the exception stack and
    /// installs the upcall entry.
    pub(crate) fn try_set_pgfault_handler(
        &mut self,
        handler: PgFaultHandler<K>,
    ) -> Result<(), SyscallFailed> {
        if self.state.pgfault.handler.is_none() {
            syscall::page_alloc(
                &self.kernel,
                EnvTarget::Current,
                UXSTACK_BOTTOM,
                PteFlags::UWP,
            )?;
            syscall::env_set_pgfault_upcall(&self.kernel, EnvTarget::Current, PGFAULT_UPCALL)?;
        }
        self.state.pgfault.handler = Some(handler);
        Ok(())
    }

    /// Registers the page fault handler of this environment.
    pub fn set_pgfault_handler(&mut self, handler: PgFaultHandler<K>) -> Result<(), Exo6Error> {
        self.ensure_alive()?;
        self.try_set_pgfault_handler(handler)
            .map_err(|e| self.abort(e.into()))
    }

    /// Delivers a trap to the registered handler.
    fn dispatch(&self, trap: Trap) -> Result<VirtAddr, Exo6Error> {
        let Trap::Upcall { entry, utf } = trap else {
            return Err(trap.into());
        };
        if entry != PGFAULT_UPCALL {
            return Err(Exo6Error::UnknownUpcall(entry.addr()));
        }

        let mut frame = UTrapframe::zeroed();
        self.kernel.read(utf, frame.as_bytes_mut())?;
        let fault_va = frame.fault_va();
        let handler = self
            .state
            .pgfault
            .handler
            .ok_or(Exo6Error::NoHandler { fault_va })?;
        handler(&self.kernel, &frame)?;
        Ok(fault_va)
    }

    /// Performs one access that stays within a page, resolving at most one
    /// page fault.
    fn access<F>(&mut self, mut op: F) -> Result<(), Exo6Error>
    where
        F: FnMut(&K) -> Result<(), Trap>,
    {
        let Err(trap) = op(&self.kernel) else {
            return Ok(());
        };
        let va = self.dispatch(trap).map_err(|e| self.abort(e))?;
        match op(&self.kernel) {
            Ok(()) => Ok(()),
            Err(trap @ Trap::Killed { .. }) => Err(self.abort(trap.into())),
            Err(Trap::Upcall { .. }) => Err(self.abort(Exo6Error::FaultNotResolved { va })),
        }
    }

    /// Loads `buf.len()` bytes starting at `va`.
    pub fn read(&mut self, va: VirtAddr, buf: &mut [u8]) -> Result<(), Exo6Error> {
        self.ensure_alive()?;
        let mut done = 0;
        while done < buf.len() {
            let cur = VirtAddr::new(va.addr().wrapping_add(done));
            let n = usize::min(buf.len() - done, PAGE_SIZE - cur.page_offset());
            let chunk = &mut buf[done..done + n];
            self.access(|kernel| kernel.read(cur, chunk))?;
            done += n;
        }
        Ok(())
    }

    /// Stores `data` starting at `va`.
    pub fn write(&mut self, va: VirtAddr, data: &[u8]) -> Result<(), Exo6Error> {
        self.ensure_alive()?;
        let mut done = 0;
        while done < data.len() {
            let cur = VirtAddr::new(va.addr().wrapping_add(done));
            let n = usize::min(data.len() - done, PAGE_SIZE - cur.page_offset());
            let chunk = &data[done..done + n];
            self.access(|kernel| kernel.write(cur, chunk))?;
            done += n;
        }
        Ok(())
    }

    /// Creates a copy-on-write child of this environment.
    ///
    /// A failure is fatal: the child is destroyed and so is this environment.
    pub fn fork(&mut self) -> Result<ForkResult, Exo6Error> {
        self.ensure_alive()?;
        fork::fork(self).map_err(|e| self.abort(e.into()))
    }

    /// Destroys this environment.
    pub fn exit(&mut self) -> Result<(), Exo6Error> {
        self.ensure_alive()?;
        log::debug!("[{}] exit", self.id());
        self.aborted = true;
        syscall::env_destroy(&self.kernel, EnvTarget::Current)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use exo6_kernel::{Machine, MachineConfig, SimKernel};
    use exo6_syscall::{SyscallCode, error::SyscallError};

    use super::*;

    const VA: VirtAddr = VirtAddr::new(0x1000);

    fn boot(frames: usize) -> (Machine, UserEnv<SimKernel>) {
        let machine = Machine::new(MachineConfig { frames, envs: 4 });
        let env = UserEnv::new(machine.spawn().unwrap()).unwrap();
        (machine, env)
    }

    fn ignore(_: &SimKernel, _: &UTrapframe) -> Result<(), PageFaultError> {
        Ok(())
    }

    fn map_zero_page(kernel: &SimKernel, utf: &UTrapframe) -> Result<(), PageFaultError> {
        let page = utf.fault_va().page_rounddown();
        syscall::page_alloc(kernel, EnvTarget::Current, page, PteFlags::UWP)?;
        Ok(())
    }

    #[test]
    fn identity_record() {
        let (machine, env) = boot(8);
        assert_eq!(env.this_env().parent, None);
        assert_eq!(Some(env.this_env().status), machine.env_status(env.id()));
    }

    #[test]
    fn first_registration_sets_up_exception_stack() {
        let (machine, mut env) = boot(8);
        env.set_pgfault_handler(ignore).unwrap();
        let xstack = machine.page_desc(env.id(), UXSTACK_BOTTOM).unwrap();
        assert_eq!(xstack.perm, PteFlags::UWP);

        env.set_pgfault_handler(map_zero_page).unwrap();
        assert_eq!(
            machine.page_desc(env.id(), UXSTACK_BOTTOM).unwrap().frame,
            xstack.frame
        );
        assert!(env.state().pgfault().handler().is_some());
    }

    #[test]
    fn handler_resolves_fault_and_access_is_retried() {
        let (_machine, mut env) = boot(8);
        env.set_pgfault_handler(map_zero_page).unwrap();

        env.write(VA.byte_add(0xffe).unwrap(), b"span").unwrap();
        let mut buf = [0; 4];
        env.read(VA.byte_add(0xffe).unwrap(), &mut buf).unwrap();
        assert_eq!(&buf, b"span");
    }

    #[test]
    fn unresolved_fault_aborts() {
        let (machine, mut env) = boot(8);
        env.set_pgfault_handler(ignore).unwrap();
        let id = env.id();

        assert_eq!(
            env.write(VA, b"x"),
            Err(Exo6Error::FaultNotResolved { va: VA })
        );
        assert!(env.is_aborted());
        assert_eq!(machine.env_status(id), None);
        assert_eq!(env.read(VA, &mut [0; 1]), Err(Exo6Error::Aborted));
    }

    #[test]
    fn fault_without_handler_is_killed() {
        let (machine, mut env) = boot(8);
        let id = env.id();
        assert!(matches!(
            env.read(VA, &mut [0; 1]),
            Err(Exo6Error::Trap(Trap::Killed { .. }))
        ));
        assert!(env.is_aborted());
        assert_eq!(machine.env_status(id), None);
    }

    #[test]
    fn registration_failure_aborts() {
        let (machine, mut env) = boot(0);
        let id = env.id();
        assert_eq!(
            env.set_pgfault_handler(ignore),
            Err(Exo6Error::Syscall(SyscallFailed {
                call: SyscallCode::PageAlloc,
                error: SyscallError::NoMemory,
            }))
        );
        assert_eq!(machine.env_status(id), None);
    }

    #[test]
    fn exit_destroys_env() {
        let (machine, mut env) = boot(8);
        let id = env.id();
        env.exit().unwrap();
        assert_eq!(machine.env_status(id), None);
        assert_eq!(env.exit(), Err(Exo6Error::Aborted));
    }
}
