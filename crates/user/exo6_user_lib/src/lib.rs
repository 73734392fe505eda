//! User-space library of exo6 environments.
//!
//! The kernel only knows about pages, mappings and upcalls. This library
//! builds process-level services on top of them: page fault dispatch to a
//! user handler ([`env`]) and copy-on-write [`fork`].

#![cfg_attr(not(test), no_std)]

pub use self::{
    env::{PGFAULT_UPCALL, PgFaultConfig, PgFaultHandler, RuntimeState, UserEnv},
    error::{Exo6Error, SyscallFailed},
    fork::{ForkError, ForkResult, ForkStage, PageFaultError},
};

pub mod env;
pub mod error;
pub mod fork;
pub mod syscall;
