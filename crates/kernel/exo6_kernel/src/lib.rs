//! A minimal exokernel, hosted in memory.
//!
//! The kernel exports physical pages, page mappings, environments and page
//! fault upcalls, and nothing else. Each environment talks to it through a
//! [`SimKernel`] handle, which implements the [`Kernel`](exo6_syscall::Kernel)
//! system calls and the [`UserMemory`](exo6_syscall::UserMemory) accesses of
//! that environment.

pub use self::{
    machine::{Machine, MachineConfig, MachineError, SimKernel},
    trap::UTF_ADDR,
};

mod env;
mod machine;
mod memory;
mod syscall;
mod trap;

#[cfg(test)]
mod tests {
    use exo6_syscall::{EnvStatus, EnvTarget, ExoFork, Kernel as _, PteFlags, UserMemory as _};
    use exo6_types::addr::VirtAddr;

    use super::*;

    #[test]
    fn spawn_and_resume() {
        let machine = Machine::new(MachineConfig { frames: 4, envs: 4 });
        let root = machine.spawn().unwrap();
        let id = root.getenvid();
        assert_eq!(machine.env_status(id), Some(EnvStatus::Runnable));

        let ExoFork::Parent(child) = root.exofork().unwrap() else {
            panic!("exofork returned to child");
        };
        assert!(matches!(
            machine.resume(child),
            Err(MachineError::NotRunnable(c)) if c == child
        ));
        root.env_set_status(EnvTarget::Env(child), EnvStatus::Runnable)
            .unwrap();
        let first = machine.resume(child).unwrap();
        assert_eq!(first.exofork, Some(ExoFork::Child));
        let child = first.kernel;
        assert_eq!(child.env_info(child.getenvid()).unwrap().parent, Some(id));

        assert_eq!(machine.resume(child.getenvid()).unwrap().exofork, None);
        let ExoFork::Parent(grandchild) = child.exofork().unwrap() else {
            panic!("exofork returned to child");
        };
        assert_eq!(
            child.env_info(grandchild).unwrap().parent,
            Some(child.getenvid())
        );
    }

    #[test]
    fn handles_share_memory() {
        let machine = Machine::new(MachineConfig::default());
        let root = machine.spawn().unwrap();
        let va = VirtAddr::new(0x1000);
        root.page_alloc(EnvTarget::Current, va, PteFlags::UWP)
            .unwrap();

        let other = machine.resume(root.getenvid()).unwrap().kernel;
        other.write(va, b"hello").unwrap();
        let mut buf = [0; 5];
        root.read(va, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        let frame = machine.page_desc(root.getenvid(), va).unwrap().frame;
        assert_eq!(machine.frame_ref_count(frame), 1);
        assert_eq!(machine.free_frames(), MachineConfig::default().frames - 1);
    }

    #[test]
    fn destroyed_env_cannot_resume() {
        let machine = Machine::new(MachineConfig::default());
        let root = machine.spawn().unwrap();
        let id = root.getenvid();
        root.env_destroy(EnvTarget::Current).unwrap();
        assert!(matches!(machine.resume(id), Err(MachineError::NoSuchEnv(_))));
        assert_eq!(machine.env_status(id), None);
        assert!(!root.pde_present(VirtAddr::new(0x1000)));
    }

    #[test]
    #[should_panic = "nenv=0"]
    fn machine_without_env_slots_panics() {
        let _ = Machine::new(MachineConfig { frames: 4, envs: 0 });
    }

    #[test]
    fn env_table_exhaustion() {
        let machine = Machine::new(MachineConfig { frames: 4, envs: 1 });
        machine.spawn().unwrap();
        assert!(matches!(
            machine.spawn(),
            Err(MachineError::Syscall(exo6_syscall::error::SyscallError::NoFreeEnv))
        ));
    }
}
