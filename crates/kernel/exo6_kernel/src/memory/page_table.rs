//! Two-level page tables of user address spaces.

use exo6_syscall::PteFlags;
use exo6_types::{
    addr::{PhysPageNum, VirtAddr},
    layout::{NPDENTRIES, NPTENTRIES, PAGE_SHIFT, PT_SIZE},
};

/// A single leaf page table entry: frame number and [`PteFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PtEntry(usize);

impl PtEntry {
    const FLAGS_MASK: usize = (1 << PAGE_SHIFT) - 1;
    const EMPTY: Self = Self(0);

    /// Creates a present entry for `ppn` with the given flags.
    ///
    /// # Panics
    ///
    /// Panics if `flags` does not include [`PteFlags::P`].
    pub(crate) fn new(ppn: PhysPageNum, flags: PteFlags) -> Self {
        assert!(flags.contains(PteFlags::P), "flags: {flags:?}");
        Self((ppn.value() << PAGE_SHIFT) | (flags.bits() as usize & Self::FLAGS_MASK))
    }

    pub(crate) fn is_present(self) -> bool {
        self.flags().contains(PteFlags::P)
    }

    #[expect(clippy::cast_possible_truncation)]
    pub(crate) fn flags(self) -> PteFlags {
        PteFlags::from_bits_retain((self.0 & Self::FLAGS_MASK) as u32)
    }

    pub(crate) fn phys_page_num(self) -> PhysPageNum {
        PhysPageNum::new(self.0 >> PAGE_SHIFT)
    }

    /// Clears this entry, returning the previous one if it was present.
    pub(crate) fn take(&mut self) -> Option<Self> {
        let old = *self;
        *self = Self::EMPTY;
        old.is_present().then_some(old)
    }
}

struct PageTableEntries([PtEntry; NPTENTRIES]);

/// Page directory of one address space.
///
/// Page tables are created on demand the first time an address they cover is
/// mapped, and stay until the directory is dropped.
pub(crate) struct PageDirectory {
    tables: Vec<Option<Box<PageTableEntries>>>,
}

impl PageDirectory {
    pub(crate) fn new() -> Self {
        Self {
            tables: (0..NPDENTRIES).map(|_| None).collect(),
        }
    }

    fn table(&self, va: VirtAddr) -> Option<&PageTableEntries> {
        self.tables.get(va.pd_index())?.as_deref()
    }

    /// Returns whether the directory entry covering `va` is present.
    pub(crate) fn pde_present(&self, va: VirtAddr) -> bool {
        self.table(va).is_some()
    }

    /// Returns the present leaf entry mapping `va`.
    pub(crate) fn lookup(&self, va: VirtAddr) -> Option<PtEntry> {
        let pte = self.table(va)?.0[va.pt_index()];
        pte.is_present().then_some(pte)
    }

    /// Returns the leaf entry slot for `va`, creating its page table if
    /// needed.
    ///
    /// # Panics
    ///
    /// Panics if `va` lies outside the range covered by the directory.
    pub(crate) fn entry_mut(&mut self, va: VirtAddr) -> &mut PtEntry {
        let table = self.tables[va.pd_index()]
            .get_or_insert_with(|| Box::new(PageTableEntries([PtEntry::EMPTY; NPTENTRIES])));
        &mut table.0[va.pt_index()]
    }

    /// Returns the leaf entry slot for `va` if its page table exists.
    pub(crate) fn existing_entry_mut(&mut self, va: VirtAddr) -> Option<&mut PtEntry> {
        let table = self.tables.get_mut(va.pd_index())?.as_deref_mut()?;
        Some(&mut table.0[va.pt_index()])
    }

    /// Iterates over every present leaf entry together with its address.
    pub(crate) fn leaves(&self) -> impl Iterator<Item = (VirtAddr, PtEntry)> + '_ {
        self.tables
            .iter()
            .enumerate()
            .filter_map(|(pdx, table)| Some((pdx, table.as_deref()?)))
            .flat_map(|(pdx, table)| {
                table
                    .0
                    .iter()
                    .enumerate()
                    .filter(|(_, pte)| pte.is_present())
                    .map(move |(ptx, pte)| {
                        let va = VirtAddr::new(pdx * PT_SIZE + (ptx << PAGE_SHIFT));
                        (va, *pte)
                    })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_encodes_frame_and_flags() {
        let pte = PtEntry::new(PhysPageNum::new(7), PteFlags::UP | PteFlags::COW);
        assert!(pte.is_present());
        assert_eq!(pte.phys_page_num(), PhysPageNum::new(7));
        assert_eq!(pte.flags(), PteFlags::UP | PteFlags::COW);
    }

    #[test]
    fn take_clears_entry() {
        let mut pte = PtEntry::new(PhysPageNum::new(1), PteFlags::UWP);
        assert!(pte.take().is_some());
        assert!(!pte.is_present());
        assert!(pte.take().is_none());
    }

    #[test]
    fn tables_are_created_on_demand() {
        let mut pgdir = PageDirectory::new();
        let va = VirtAddr::new(0x0080_2000);
        assert!(!pgdir.pde_present(va));
        assert!(pgdir.existing_entry_mut(va).is_none());

        *pgdir.entry_mut(va) = PtEntry::new(PhysPageNum::new(3), PteFlags::UWP);
        assert!(pgdir.pde_present(va));
        assert!(pgdir.pde_present(VirtAddr::new(0x0080_0000)));
        assert!(pgdir.lookup(VirtAddr::new(0x0080_1000)).is_none());
        assert_eq!(
            pgdir.lookup(va).map(PtEntry::phys_page_num),
            Some(PhysPageNum::new(3))
        );
    }

    #[test]
    fn leaves_report_addresses() {
        let mut pgdir = PageDirectory::new();
        *pgdir.entry_mut(VirtAddr::new(0x1000)) = PtEntry::new(PhysPageNum::new(1), PteFlags::UP);
        *pgdir.entry_mut(VirtAddr::new(0x0040_3000)) =
            PtEntry::new(PhysPageNum::new(2), PteFlags::UWP);

        let leaves: Vec<_> = pgdir
            .leaves()
            .map(|(va, pte)| (va, pte.phys_page_num().value()))
            .collect();
        assert_eq!(
            leaves,
            [(VirtAddr::new(0x1000), 1), (VirtAddr::new(0x0040_3000), 2)]
        );
    }
}
