// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Access to physical frames by page number.

use crate::types::PhysPageNum;

use super::layout::{PAGE_SIZE, PT_ENTRIES};
use super::page_table::PageTableEntry;

/// One page of physical memory.
#[repr(C, align(4096))]
#[derive(Clone)]
pub struct Frame {
    bytes: [u8; PAGE_SIZE],
}

static_assertions::const_assert_eq!(core::mem::size_of::<Frame>(), PAGE_SIZE);
static_assertions::const_assert_eq!(
    core::mem::size_of::<[PageTableEntry; PT_ENTRIES]>(),
    PAGE_SIZE
);

impl Frame {
    pub const ZEROED: Self = Self { bytes: [0; PAGE_SIZE] };

    pub fn bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.bytes
    }

    pub fn zero(&mut self) {
        self.bytes.fill(0);
    }

    /// Views the frame as a page-table node.
    pub fn entries(&self) -> &[PageTableEntry; PT_ENTRIES] {
        // SAFETY: same size, `Frame` is more strictly aligned and every bit pattern is a valid
        // `PageTableEntry` (`repr(transparent)` over u64).
        unsafe { &*(self as *const Frame).cast::<[PageTableEntry; PT_ENTRIES]>() }
    }

    pub fn entries_mut(&mut self) -> &mut [PageTableEntry; PT_ENTRIES] {
        // SAFETY: see `entries`.
        unsafe { &mut *(self as *mut Frame).cast::<[PageTableEntry; PT_ENTRIES]>() }
    }
}

/// Resolves physical page numbers to frame storage.
pub trait PhysMemory {
    fn frame(&self, ppn: PhysPageNum) -> &Frame;
    fn frame_mut(&mut self, ppn: PhysPageNum) -> &mut Frame;
    fn copy_frame(&mut self, src: PhysPageNum, dst: PhysPageNum);
}

/// RAM reached through the kernel's identity mapping.
pub struct IdentityMemory {
    _private: (),
}

impl IdentityMemory {
    /// # Safety
    ///
    /// Every page number later passed in must name RAM that is identity mapped read/write in
    /// whichever address space is active, and must be owned by the frame allocator.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl PhysMemory for IdentityMemory {
    fn frame(&self, ppn: PhysPageNum) -> &Frame {
        // SAFETY: guaranteed by the contract of `IdentityMemory::new`.
        unsafe { &*(ppn.addr().0 as *const Frame) }
    }

    fn frame_mut(&mut self, ppn: PhysPageNum) -> &mut Frame {
        // SAFETY: guaranteed by the contract of `IdentityMemory::new`.
        unsafe { &mut *(ppn.addr().0 as *mut Frame) }
    }

    fn copy_frame(&mut self, src: PhysPageNum, dst: PhysPageNum) {
        if src == dst {
            return;
        }
        // SAFETY: distinct frames never overlap; both are identity mapped.
        unsafe {
            core::ptr::copy_nonoverlapping(
                src.addr().0 as *const u8,
                dst.addr().0 as *mut u8,
                PAGE_SIZE,
            );
        }
    }
}

/// Heap-backed stand-in for RAM used by host tests. Page numbers start at `base`.
#[cfg(test)]
pub struct ArenaMemory {
    base: usize,
    frames: Vec<Frame>,
}

#[cfg(test)]
impl ArenaMemory {
    pub fn new(base: PhysPageNum, count: usize) -> Self {
        Self { base: base.0, frames: vec![Frame::ZEROED; count] }
    }

    fn index(&self, ppn: PhysPageNum) -> usize {
        let index = ppn.0.checked_sub(self.base).expect("ppn below arena");
        assert!(index < self.frames.len(), "ppn {:?} beyond arena", ppn);
        index
    }
}

#[cfg(test)]
impl PhysMemory for ArenaMemory {
    fn frame(&self, ppn: PhysPageNum) -> &Frame {
        &self.frames[self.index(ppn)]
    }

    fn frame_mut(&mut self, ppn: PhysPageNum) -> &mut Frame {
        let index = self.index(ppn);
        &mut self.frames[index]
    }

    fn copy_frame(&mut self, src: PhysPageNum, dst: PhysPageNum) {
        let (src, dst) = (self.index(src), self.index(dst));
        self.frames[dst] = self.frames[src].clone();
    }
}
