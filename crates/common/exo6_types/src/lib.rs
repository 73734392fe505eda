#![cfg_attr(not(test), no_std)]

pub mod addr;
pub mod env;
pub mod layout;
