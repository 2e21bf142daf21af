// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Sv39 page tables built from pool frames, with on-demand intermediate nodes.
//!
//! A [`PageTable`] is a handle on its root frame. Every node lives in a frame of the
//! [`FramePool`], so all operations take the pool explicitly.

use bitflags::bitflags;

use crate::types::{align_down, align_up, PhysAddr, PhysPageNum, VirtAddr};

use super::frame::{FrameError, FramePool};
use super::layout::{PAGE_SHIFT, PAGE_SIZE, PT_ENTRIES};
use super::memory::PhysMemory;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// Flags stored in the low byte of an Sv39 PTE.
    pub struct PageFlags: u64 {
        const VALID = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const EXECUTE = 1 << 3;
        const USER = 1 << 4;
        const GLOBAL = 1 << 5;
        const ACCESSED = 1 << 6;
        const DIRTY = 1 << 7;
    }
}

const LEAF_PERMS: PageFlags = PageFlags::READ.union(PageFlags::WRITE).union(PageFlags::EXECUTE);
const PTE_PPN_SHIFT: u32 = 10;
const PTE_PPN_MASK: u64 = (1 << 44) - 1;
const SATP_MODE_SV39: usize = 8 << 60;
const LEVELS: usize = 3;
const INDEX_BITS: usize = 9;

/// Error returned when walking or manipulating page tables.
#[must_use = "page-table errors must be handled"]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapError {
    /// No valid entry on the path and creation was not requested.
    NotFound,
    /// A table node or data frame could not be allocated.
    OutOfMemory,
    /// Address is not a canonical Sv39 address.
    OutOfRange,
    /// A valid leaf already covers `va`.
    Overlap { va: usize },
    /// Flags do not describe a valid leaf entry.
    InvalidFlags,
    /// User access to `va` is not permitted by the mapping.
    Fault { va: usize },
}

impl From<FrameError> for MapError {
    fn from(_: FrameError) -> Self {
        MapError::OutOfMemory
    }
}

/// Kind of access a kernel-side user copy performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    const fn required(self) -> PageFlags {
        match self {
            Access::Read => PageFlags::USER.union(PageFlags::READ),
            Access::Write => PageFlags::USER.union(PageFlags::WRITE),
        }
    }
}

#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    pub const EMPTY: Self = Self(0);

    pub const fn new(ppn: PhysPageNum, flags: PageFlags) -> Self {
        Self(((ppn.0 as u64 & PTE_PPN_MASK) << PTE_PPN_SHIFT) | flags.bits())
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn ppn(self) -> PhysPageNum {
        PhysPageNum(((self.0 >> PTE_PPN_SHIFT) & PTE_PPN_MASK) as usize)
    }

    pub const fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0)
    }

    pub const fn is_valid(self) -> bool {
        self.flags().contains(PageFlags::VALID)
    }

    /// Valid entry with at least one of R/W/X; anything else valid points at a node.
    pub const fn is_leaf(self) -> bool {
        self.is_valid() && self.flags().intersects(LEAF_PERMS)
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PTE({:?}, {:?})", self.ppn(), self.flags())
    }
}

/// Location of one entry inside a table node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PteSlot {
    pub table: PhysPageNum,
    pub index: usize,
}

impl PteSlot {
    pub fn read<M: PhysMemory>(self, pool: &FramePool<M>) -> PageTableEntry {
        pool.frame(self.table).entries()[self.index]
    }

    pub fn write<M: PhysMemory>(self, pool: &mut FramePool<M>, entry: PageTableEntry) {
        pool.frame_mut(self.table).entries_mut()[self.index] = entry;
    }
}

/// Three-level Sv39 table identified by its root frame.
#[derive(Debug, PartialEq, Eq)]
pub struct PageTable {
    root: PhysPageNum,
}

impl PageTable {
    /// Allocates a zeroed root frame.
    pub fn new<M: PhysMemory>(pool: &mut FramePool<M>) -> Result<Self, MapError> {
        Ok(Self { root: pool.allocate_zeroed()? })
    }

    pub const fn root(&self) -> PhysPageNum {
        self.root
    }

    /// Value to load into `satp` to activate this table.
    pub const fn satp(&self) -> usize {
        SATP_MODE_SV39 | self.root.0
    }

    /// Locates the level-0 entry for `va`, installing zeroed intermediate nodes when `create`.
    pub fn walk<M: PhysMemory>(
        &self,
        pool: &mut FramePool<M>,
        va: VirtAddr,
        create: bool,
    ) -> Result<PteSlot, MapError> {
        if !create {
            return self.find(pool, va);
        }
        if !va.is_canonical() {
            return Err(MapError::OutOfRange);
        }
        let mut table = self.root;
        for level in (1..LEVELS).rev() {
            let slot = PteSlot { table, index: va.vpn_index(level) };
            let entry = slot.read(pool);
            if entry.is_leaf() {
                return Err(MapError::Overlap { va: va.floor().raw() });
            }
            table = if entry.is_valid() {
                entry.ppn()
            } else {
                let node = pool.allocate_zeroed()?;
                slot.write(pool, PageTableEntry::new(node, PageFlags::VALID));
                node
            };
        }
        Ok(PteSlot { table, index: va.vpn_index(0) })
    }

    /// Read-only walk; fails with `NotFound` on the first invalid intermediate entry.
    pub fn find<M: PhysMemory>(
        &self,
        pool: &FramePool<M>,
        va: VirtAddr,
    ) -> Result<PteSlot, MapError> {
        if !va.is_canonical() {
            return Err(MapError::OutOfRange);
        }
        let mut table = self.root;
        for level in (1..LEVELS).rev() {
            let entry = PteSlot { table, index: va.vpn_index(level) }.read(pool);
            if !entry.is_valid() {
                return Err(MapError::NotFound);
            }
            if entry.is_leaf() {
                return Err(MapError::Overlap { va: va.floor().raw() });
            }
            table = entry.ppn();
        }
        Ok(PteSlot { table, index: va.vpn_index(0) })
    }

    /// Maps every page of `[floor(va), ceil(va + len))` onto consecutive frames starting at
    /// `floor(pa)`. Stops at the first page that is already mapped; earlier pages stay mapped.
    pub fn map<M: PhysMemory>(
        &self,
        pool: &mut FramePool<M>,
        va: VirtAddr,
        pa: PhysAddr,
        len: usize,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        let perms = flags.difference(PageFlags::VALID);
        if !perms.intersects(LEAF_PERMS)
            || (perms.contains(PageFlags::WRITE) && !perms.contains(PageFlags::READ))
        {
            return Err(MapError::InvalidFlags);
        }
        if len == 0 {
            return Ok(());
        }
        let end = va.raw().checked_add(len).and_then(align_up).ok_or(MapError::OutOfRange)?;
        let mut frame = PhysAddr(align_down(pa.0)).page_number();
        for page in (va.floor().raw()..end).step_by(PAGE_SIZE) {
            let slot = self.walk(pool, VirtAddr(page), true)?;
            let existing = slot.read(pool);
            if existing.is_valid() {
                log_error!(target: "mm", "remap of {:#x} refused (maps {:?})", page, existing.ppn());
                return Err(MapError::Overlap { va: page });
            }
            slot.write(pool, PageTableEntry::new(frame, perms | PageFlags::VALID));
            frame = PhysPageNum(frame.0 + 1);
        }
        Ok(())
    }

    /// Returns the valid leaf entry covering `va`.
    pub fn lookup<M: PhysMemory>(&self, pool: &FramePool<M>, va: VirtAddr) -> Option<PageTableEntry> {
        let entry = self.find(pool, va).ok()?.read(pool);
        entry.is_leaf().then_some(entry)
    }

    pub fn translate<M: PhysMemory>(&self, pool: &FramePool<M>, va: VirtAddr) -> Option<PhysAddr> {
        self.lookup(pool, va).map(|entry| PhysAddr(entry.ppn().addr().0 + va.page_offset()))
    }

    /// Resolves `va` for a kernel-side copy on behalf of user code.
    pub fn user_page<M: PhysMemory>(
        &self,
        pool: &FramePool<M>,
        va: VirtAddr,
        access: Access,
    ) -> Result<PhysPageNum, MapError> {
        match self.lookup(pool, va) {
            Some(entry) if entry.flags().contains(access.required()) => Ok(entry.ppn()),
            _ => Err(MapError::Fault { va: va.raw() }),
        }
    }

    /// Shares every valid root entry of `kernel` with this table.
    pub fn clone_kernel_mappings<M: PhysMemory>(&self, pool: &mut FramePool<M>, kernel: &PageTable) {
        for index in 0..PT_ENTRIES {
            let entry = PteSlot { table: kernel.root, index }.read(pool);
            if entry.is_valid() {
                PteSlot { table: self.root, index }.write(pool, entry);
            }
        }
    }

    /// Returns user frames, private nodes and the root to the pool. Subtrees shared with
    /// `kernel` are left alone. Yields the number of frames given back.
    pub fn release<M: PhysMemory>(self, pool: &mut FramePool<M>, kernel: &PageTable) -> usize {
        let mut released = 0;
        for index in 0..PT_ENTRIES {
            let entry = PteSlot { table: self.root, index }.read(pool);
            let shared = PteSlot { table: kernel.root, index }.read(pool) == entry;
            if entry.is_valid() && !entry.is_leaf() && !shared {
                released += release_node(pool, entry.ppn(), LEVELS - 2);
            }
        }
        released + give_back(pool, self.root)
    }
}

fn release_node<M: PhysMemory>(pool: &mut FramePool<M>, node: PhysPageNum, level: usize) -> usize {
    let mut released = 0;
    for index in 0..PT_ENTRIES {
        let entry = PteSlot { table: node, index }.read(pool);
        if entry.is_leaf() {
            if entry.flags().contains(PageFlags::USER) {
                released += give_back(pool, entry.ppn());
            }
        } else if entry.is_valid() && level > 0 {
            released += release_node(pool, entry.ppn(), level - 1);
        }
    }
    released + give_back(pool, node)
}

fn give_back<M: PhysMemory>(pool: &mut FramePool<M>, ppn: PhysPageNum) -> usize {
    usize::from(pool.deallocate(ppn).is_ok())
}

/// Copies every user page of `src` below `len` into fresh frames mapped at the same virtual
/// address with the same flags in `dst`. Returns the number of pages copied.
///
/// Non-user leaves are skipped: `dst` is expected to already carry the kernel mappings.
pub fn duplicate_address_space<M: PhysMemory>(
    pool: &mut FramePool<M>,
    src: &PageTable,
    dst: &PageTable,
    len: usize,
) -> Result<usize, MapError> {
    duplicate_node(pool, src.root, LEVELS - 1, 0, len, dst)
}

fn duplicate_node<M: PhysMemory>(
    pool: &mut FramePool<M>,
    node: PhysPageNum,
    level: usize,
    base: usize,
    limit: usize,
    dst: &PageTable,
) -> Result<usize, MapError> {
    let span = 1usize << (PAGE_SHIFT + INDEX_BITS * level);
    let mut copied = 0;
    for index in 0..PT_ENTRIES {
        let va = base + index * span;
        if va >= limit {
            break;
        }
        let entry = PteSlot { table: node, index }.read(pool);
        if !entry.is_valid() {
            continue;
        }
        if !entry.is_leaf() {
            if level > 0 {
                copied += duplicate_node(pool, entry.ppn(), level - 1, va, limit, dst)?;
            }
            continue;
        }
        if level != 0 || !entry.flags().contains(PageFlags::USER) {
            continue;
        }
        let frame = pool.allocate()?;
        pool.copy_frame(entry.ppn(), frame);
        if let Err(err) = dst.map(pool, VirtAddr(va), frame.addr(), PAGE_SIZE, entry.flags()) {
            let _ = pool.deallocate(frame);
            return Err(err);
        }
        copied += 1;
    }
    Ok(copied)
}
