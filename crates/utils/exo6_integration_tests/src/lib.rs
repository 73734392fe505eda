//! End-to-end harness: boots a machine with a root environment and drives
//! both continuations of a fork.

use anyhow::{Context as _, ensure};
use exo6_kernel::{Machine, MachineConfig, SimKernel};
use exo6_syscall::{EnvTarget, Kernel as _, PteFlags};
use exo6_types::{
    addr::VirtAddr,
    env::EnvId,
    layout::{PAGE_SIZE, USTACKTOP, UTEXT},
};
use exo6_user_lib::{ForkResult, RuntimeState, UserEnv};

pub mod helper;

pub type Env = UserEnv<SimKernel>;

/// Top page of the normal user stack, mapped writable in the root environment.
pub const STACK: VirtAddr = VirtAddr::new(USTACKTOP.addr() - PAGE_SIZE);

/// First text page, mapped read-only in the root environment.
pub const TEXT: VirtAddr = UTEXT;

/// Frames the root environment owns right after [`boot`].
pub const BOOT_FRAMES: usize = 2;

/// Boots a machine and starts its root environment.
pub fn boot(config: MachineConfig) -> Result<(Machine, Env), anyhow::Error> {
    let machine = Machine::new(config);
    let kernel = machine.spawn()?;
    kernel
        .page_alloc(EnvTarget::Current, STACK, PteFlags::UWP)
        .context("map stack")?;
    kernel
        .page_alloc(EnvTarget::Current, TEXT, PteFlags::UP)
        .context("map text")?;
    let env = UserEnv::new(kernel)?;
    Ok((machine, env))
}

/// Maps fresh writable pages at `va` and the `count - 1` pages above it.
pub fn map_pages(env: &Env, va: VirtAddr, count: usize) -> Result<(), anyhow::Error> {
    for i in 0..count {
        let page = va
            .byte_add(i * PAGE_SIZE)
            .context("address overflow")?;
        env.kernel()
            .page_alloc(EnvTarget::Current, page, PteFlags::UWP)
            .with_context(|| format!("map {page:#x}"))?;
    }
    Ok(())
}

/// Continues `child` from the state its parent had when it forked.
///
/// The child's pending `fork` is completed, so the returned runtime is the
/// child continuation right after `fork` returned [`ForkResult::Child`].
pub fn resume_child(
    machine: &Machine,
    child: EnvId,
    state: RuntimeState<SimKernel>,
) -> Result<Env, anyhow::Error> {
    let cont = machine.resume(child)?;
    ensure!(
        cont.exofork.is_some(),
        "child {child} has already been resumed"
    );
    let mut env = UserEnv::resume(cont, state);
    let res = env.fork()?;
    ensure!(res == ForkResult::Child, "child {child} saw {res:?}");
    ensure!(env.id() == child, "child resumed as {}", env.id());
    Ok(env)
}

/// Forks `parent` and resumes the child.
pub fn fork_and_resume(machine: &Machine, parent: &mut Env) -> Result<Env, anyhow::Error> {
    let child = parent
        .fork()?
        .as_parent()
        .context("fork returned to the child in the parent")?;
    resume_child(machine, child, *parent.state())
}

pub fn read_bytes(env: &mut Env, va: VirtAddr, len: usize) -> Result<Vec<u8>, anyhow::Error> {
    let mut buf = vec![0; len];
    env.read(va, &mut buf)?;
    Ok(buf)
}
