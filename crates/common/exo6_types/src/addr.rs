use core::fmt;

use crate::layout::{NPTENTRIES, PAGE_SHIFT, PAGE_SIZE, PD_SHIFT, PT_SIZE};

const fn page_roundup(addr: usize) -> Option<usize> {
    match addr.checked_add(PAGE_SIZE - 1) {
        Some(addr) => Some(addr & !(PAGE_SIZE - 1)),
        None => None,
    }
}

const fn page_rounddown(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

struct Hex(usize);
impl fmt::Debug for Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

macro_rules! impl_fmt {
    ($ty:ident) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.debug_tuple(stringify!($ty)).field(&Hex(self.0)).finish()
            }
        }
        impl fmt::LowerHex for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }
        impl fmt::UpperHex for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                fmt::UpperHex::fmt(&self.0, f)
            }
        }
    };
}

/// Virtual address in a user address space.
///
/// The address space uses a two-level translation:
/// ```text
///     22..=31 -- 10 bits of page directory index.
///     12..=21 -- 10 bits of page table index.
///      0..=11 -- 12 bits byte offset within the page.
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtAddr(usize);
impl_fmt!(VirtAddr);

/// Virtual page number (a virtual address shifted right by [`PAGE_SHIFT`]).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageNum(usize);
impl_fmt!(PageNum);

/// Physical page number: the index of a frame in physical memory.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysPageNum(usize);
impl_fmt!(PhysPageNum);

impl PhysPageNum {
    #[must_use]
    pub const fn new(value: usize) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> usize {
        self.0
    }
}

impl VirtAddr {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    #[must_use]
    pub const fn addr(self) -> usize {
        self.0
    }

    #[must_use]
    pub const fn page_rounddown(self) -> Self {
        Self(page_rounddown(self.0))
    }

    #[must_use]
    pub const fn page_roundup(self) -> Option<Self> {
        match page_roundup(self.0) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }

    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 % PAGE_SIZE == 0
    }

    /// Returns the byte offset of this address within its page.
    #[must_use]
    pub const fn page_offset(self) -> usize {
        self.0 % PAGE_SIZE
    }

    #[must_use]
    pub const fn byte_add(self, bytes: usize) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }

    #[must_use]
    pub const fn page_num(self) -> PageNum {
        PageNum(self.0 >> PAGE_SHIFT)
    }

    /// Returns the page directory index of this address.
    #[must_use]
    pub const fn pd_index(self) -> usize {
        self.0 >> PD_SHIFT
    }

    /// Returns the page table index of this address.
    #[must_use]
    pub const fn pt_index(self) -> usize {
        (self.0 >> PAGE_SHIFT) & (NPTENTRIES - 1)
    }

    /// Returns the first address mapped by the next page directory entry.
    #[must_use]
    pub const fn next_page_table(self) -> Option<Self> {
        match (self.0 & !(PT_SIZE - 1)).checked_add(PT_SIZE) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }
}

impl PageNum {
    #[must_use]
    pub const fn new(value: usize) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> usize {
        self.0
    }

    /// Returns the address of the first byte of this page.
    #[must_use]
    pub const fn addr(self) -> VirtAddr {
        VirtAddr(self.0 << PAGE_SHIFT)
    }
}

impl From<PageNum> for VirtAddr {
    fn from(value: PageNum) -> Self {
        value.addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{PFTEMP, UTOP, UXSTACK_BOTTOM};

    #[test]
    fn rounding() {
        let va = VirtAddr::new(0x1234);
        assert_eq!(va.page_rounddown(), VirtAddr::new(0x1000));
        assert_eq!(va.page_roundup(), Some(VirtAddr::new(0x2000)));
        assert_eq!(va.page_offset(), 0x234);
        assert!(!va.is_page_aligned());
        assert!(VirtAddr::new(usize::MAX).page_roundup().is_none());
    }

    #[test]
    fn table_indices() {
        let va = VirtAddr::new(0x0080_3000);
        assert_eq!(va.pd_index(), 2);
        assert_eq!(va.pt_index(), 3);
        assert_eq!(va.next_page_table(), Some(VirtAddr::new(0x00c0_0000)));
        assert_eq!(UTOP.pd_index(), 0x3bb);
    }

    #[test]
    fn page_numbers() {
        assert_eq!(PFTEMP.page_num().addr(), PFTEMP);
        assert_eq!(UXSTACK_BOTTOM.page_num().value(), 0xeebff);
        assert_eq!(VirtAddr::from(PageNum::new(2)), VirtAddr::new(0x2000));
    }

    #[test]
    fn debug_format() {
        assert_eq!(format!("{:?}", VirtAddr::new(0x1000)), "VirtAddr(1000)");
        assert_eq!(format!("{:#x}", VirtAddr::new(0x1000)), "0x1000");
    }
}
