//! Environment table.

use exo6_kernel_params::ENV_GEN_SHIFT;
use exo6_syscall::{EnvInfo, EnvStatus, UpcallEntry, error::SyscallError};
use exo6_types::env::EnvId;

use crate::memory::page_table::PageDirectory;

pub(crate) struct Env {
    pub(crate) id: EnvId,
    pub(crate) parent: Option<EnvId>,
    pub(crate) status: EnvStatus,
    pub(crate) pgdir: PageDirectory,
    pub(crate) pgfault_upcall: Option<UpcallEntry>,
    /// Set on a child created by `exofork` until it is first resumed.
    pub(crate) pending_exofork: bool,
}

impl Env {
    pub(crate) fn info(&self) -> EnvInfo {
        EnvInfo {
            id: self.id,
            parent: self.parent,
            status: self.status,
        }
    }
}

#[derive(Default)]
struct EnvSlot {
    generation: u32,
    env: Option<Env>,
}

/// Fixed-size table of environments.
///
/// An id encodes the slot index in its low [`ENV_GEN_SHIFT`] bits and a
/// per-slot generation above them, so an id of a destroyed environment never
/// names the slot's next occupant.
pub(crate) struct EnvTable {
    slots: Vec<EnvSlot>,
}

impl EnvTable {
    pub(crate) fn new(nenv: usize) -> Self {
        assert!(nenv > 0 && nenv <= 1 << ENV_GEN_SHIFT, "nenv={nenv}");
        Self {
            slots: (0..nenv).map(|_| EnvSlot::default()).collect(),
        }
    }

    fn slot_index(id: EnvId) -> usize {
        (u32::from(id) & ((1 << ENV_GEN_SHIFT) - 1)) as usize
    }

    /// Allocates a new, not runnable environment with an empty address space.
    #[expect(clippy::cast_possible_truncation)]
    pub(crate) fn alloc(&mut self, parent: Option<EnvId>) -> Result<&mut Env, SyscallError> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.env.is_none())
            .ok_or(SyscallError::NoFreeEnv)?;

        slot.generation = match slot.generation.wrapping_add(1) {
            generation if generation >> (u32::BITS - ENV_GEN_SHIFT) != 0 => 1,
            generation => generation,
        };
        let raw = (slot.generation << ENV_GEN_SHIFT) | index as u32;
        let id = EnvId::from_raw(raw).ok_or(SyscallError::Unspecified)?;

        Ok(slot.env.insert(Env {
            id,
            parent,
            status: EnvStatus::NotRunnable,
            pgdir: PageDirectory::new(),
            pgfault_upcall: None,
            pending_exofork: false,
        }))
    }

    pub(crate) fn get(&self, id: EnvId) -> Option<&Env> {
        self.slots
            .get(Self::slot_index(id))?
            .env
            .as_ref()
            .filter(|env| env.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: EnvId) -> Option<&mut Env> {
        self.slots
            .get_mut(Self::slot_index(id))?
            .env
            .as_mut()
            .filter(|env| env.id == id)
    }

    /// Removes `id` from the table, returning it so its pages can be released.
    pub(crate) fn remove(&mut self, id: EnvId) -> Option<Env> {
        let slot = self.slots.get_mut(Self::slot_index(id))?;
        if slot.env.as_ref().is_some_and(|env| env.id == id) {
            slot.env.take()
        } else {
            None
        }
    }
}
