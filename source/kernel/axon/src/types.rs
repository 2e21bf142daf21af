// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Address newtypes shared by the frame allocator, page tables and syscalls
//! OWNERS: @kernel-team
//! PUBLIC API: PhysAddr, PhysPageNum, VirtAddr
//! DEPENDS_ON: mm::layout (PAGE_SIZE, PAGE_SHIFT)
//! INVARIANTS: Conversions never change the page a value refers to; VPN slices are 9 bits wide

use core::fmt;

use crate::mm::layout::{PAGE_SHIFT, PAGE_SIZE};

const VPN_BITS: usize = 9;
const VPN_MASK: usize = (1 << VPN_BITS) - 1;

/// Physical byte address.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(pub usize);

/// Physical page number (`PhysAddr >> 12`).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysPageNum(pub usize);

/// Virtual byte address in an Sv39 address space.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(pub usize);

impl PhysAddr {
    #[inline]
    pub const fn page_number(self) -> PhysPageNum {
        PhysPageNum(self.0 >> PAGE_SHIFT)
    }

    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
}

impl PhysPageNum {
    #[inline]
    pub const fn addr(self) -> PhysAddr {
        PhysAddr(self.0 << PAGE_SHIFT)
    }
}

impl fmt::Debug for PhysPageNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ppn:{:#x}", self.0)
    }
}

impl VirtAddr {
    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    /// Index into the page-table node at `level` (2 = root, 0 = leaf level).
    #[inline]
    pub const fn vpn_index(self, level: usize) -> usize {
        (self.0 >> (PAGE_SHIFT + VPN_BITS * level)) & VPN_MASK
    }

    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }

    #[inline]
    pub const fn floor(self) -> Self {
        Self(align_down(self.0))
    }

    /// Returns true if bits 63..39 replicate bit 38.
    #[inline]
    pub const fn is_canonical(self) -> bool {
        let upper = self.0 >> 38;
        upper == 0 || upper == usize::MAX >> 38
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[inline]
pub const fn align_down(value: usize) -> usize {
    value & !(PAGE_SIZE - 1)
}

/// Rounds up to the next page boundary; `None` on overflow.
#[inline]
pub const fn align_up(value: usize) -> Option<usize> {
    match value.checked_add(PAGE_SIZE - 1) {
        Some(v) => Some(align_down(v)),
        None => None,
    }
}
