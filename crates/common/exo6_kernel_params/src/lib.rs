#![no_std]

/// Maximum number of environments.
pub const NENV: usize = 1024;

/// Default number of physical page frames in a machine.
pub const NFRAMES: usize = 512;

/// Bits of an environment id below the generation counter.
pub const ENV_GEN_SHIFT: u32 = 12;
