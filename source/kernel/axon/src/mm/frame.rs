// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Physical frame allocator (bump pointer + bounded LIFO recycle stack)
//! OWNERS: @kernel-mm-team
//! PUBLIC API: FrameAllocator, FramePool, FrameError, FRAME_POOL_CAPACITY
//! DEPENDS_ON: mm::PhysMemory, types::PhysPageNum
//! INVARIANTS: A live frame is never handed out twice; recycled frames are reused LIFO;
//!             frames are returned with whatever bytes they last held

use crate::types::{align_down, align_up, PhysAddr, PhysPageNum};

use super::{Frame, PhysMemory};

/// Maximum number of freed frames remembered for reuse.
pub const FRAME_POOL_CAPACITY: usize = 512;

#[must_use = "frame allocation errors must be handled"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Untouched memory is exhausted and nothing has been recycled.
    OutOfMemory,
    /// The recycle stack is full; the frame was leaked.
    PoolFull,
    /// The frame was never handed out or is already free.
    NotAllocated(PhysPageNum),
}

/// Hands out frames from `[start, end)`.
pub struct FrameAllocator {
    start: usize,
    next: usize,
    end: usize,
    recycled: [PhysPageNum; FRAME_POOL_CAPACITY],
    recycled_len: usize,
}

impl FrameAllocator {
    /// Allocator over an empty range; every allocation fails.
    pub const fn empty() -> Self {
        Self {
            start: 0,
            next: 0,
            end: 0,
            recycled: [PhysPageNum(0); FRAME_POOL_CAPACITY],
            recycled_len: 0,
        }
    }

    /// Covers the whole pages inside `[start, end)`.
    pub fn new(start: PhysAddr, end: PhysAddr) -> Self {
        let first = align_up(start.0).unwrap_or(usize::MAX) >> crate::mm::layout::PAGE_SHIFT;
        let last = align_down(end.0) >> crate::mm::layout::PAGE_SHIFT;
        let mut allocator = Self::empty();
        allocator.start = first;
        allocator.next = first;
        allocator.end = last.max(first);
        allocator
    }

    pub fn allocate(&mut self) -> Result<PhysPageNum, FrameError> {
        if self.recycled_len > 0 {
            self.recycled_len -= 1;
            return Ok(self.recycled[self.recycled_len]);
        }
        if self.next < self.end {
            let ppn = PhysPageNum(self.next);
            self.next += 1;
            return Ok(ppn);
        }
        log_warn!(target: "mm", "out of memory: all frames below {:#x} in use", self.end << 12);
        Err(FrameError::OutOfMemory)
    }

    pub fn deallocate(&mut self, ppn: PhysPageNum) -> Result<(), FrameError> {
        if !self.is_live(ppn) {
            log_error!(target: "mm", "free of unallocated frame {:?}", ppn);
            return Err(FrameError::NotAllocated(ppn));
        }
        if self.recycled_len == FRAME_POOL_CAPACITY {
            log_error!(target: "mm", "recycle pool full, leaking {:?}", ppn);
            return Err(FrameError::PoolFull);
        }
        self.recycled[self.recycled_len] = ppn;
        self.recycled_len += 1;
        Ok(())
    }

    /// Frames that can still be handed out.
    pub fn free_frames(&self) -> usize {
        (self.end - self.next) + self.recycled_len
    }

    fn is_live(&self, ppn: PhysPageNum) -> bool {
        (self.start..self.next).contains(&ppn.0)
            && !self.recycled[..self.recycled_len].contains(&ppn)
    }
}

/// Frame allocator paired with the memory that backs the frames.
pub struct FramePool<M> {
    allocator: FrameAllocator,
    memory: M,
}

impl<M: PhysMemory> FramePool<M> {
    pub fn new(allocator: FrameAllocator, memory: M) -> Self {
        Self { allocator, memory }
    }

    /// Returns a frame with unspecified contents.
    pub fn allocate(&mut self) -> Result<PhysPageNum, FrameError> {
        self.allocator.allocate()
    }

    pub fn allocate_zeroed(&mut self) -> Result<PhysPageNum, FrameError> {
        let ppn = self.allocator.allocate()?;
        self.memory.frame_mut(ppn).zero();
        Ok(ppn)
    }

    pub fn deallocate(&mut self, ppn: PhysPageNum) -> Result<(), FrameError> {
        self.allocator.deallocate(ppn)
    }

    pub fn frame(&self, ppn: PhysPageNum) -> &Frame {
        self.memory.frame(ppn)
    }

    pub fn frame_mut(&mut self, ppn: PhysPageNum) -> &mut Frame {
        self.memory.frame_mut(ppn)
    }

    pub fn copy_frame(&mut self, src: PhysPageNum, dst: PhysPageNum) {
        self.memory.copy_frame(src, dst);
    }

    pub fn allocator(&self) -> &FrameAllocator {
        &self.allocator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn allocator(frames: usize) -> FrameAllocator {
        FrameAllocator::new(PhysAddr(0x8040_0000), PhysAddr(0x8040_0000 + frames * 4096))
    }

    #[test]
    fn bump_allocation_starts_at_rounded_base() {
        let mut frames = FrameAllocator::new(PhysAddr(0x8040_0010), PhysAddr(0x8040_3000));
        assert_eq!(frames.allocate(), Ok(PhysPageNum(0x80401)));
        assert_eq!(frames.allocate(), Ok(PhysPageNum(0x80402)));
        assert_eq!(frames.allocate(), Err(FrameError::OutOfMemory));
    }

    #[test]
    fn recycled_frames_are_reused_lifo() {
        let mut frames = allocator(8);
        let a = frames.allocate().expect("a");
        let b = frames.allocate().expect("b");
        frames.deallocate(a).expect("free a");
        frames.deallocate(b).expect("free b");
        assert_eq!(frames.allocate(), Ok(b));
        assert_eq!(frames.allocate(), Ok(a));
    }

    #[test]
    fn exhaustion_is_reported_not_fatal() {
        let mut frames = allocator(2);
        frames.allocate().expect("first");
        let last = frames.allocate().expect("second");
        assert_eq!(frames.allocate(), Err(FrameError::OutOfMemory));
        frames.deallocate(last).expect("free");
        assert_eq!(frames.allocate(), Ok(last));
    }

    #[test]
    fn double_free_and_foreign_frames_are_rejected() {
        let mut frames = allocator(4);
        let a = frames.allocate().expect("a");
        frames.deallocate(a).expect("free");
        assert_eq!(frames.deallocate(a), Err(FrameError::NotAllocated(a)));
        assert_eq!(
            frames.deallocate(PhysPageNum(0x80403)),
            Err(FrameError::NotAllocated(PhysPageNum(0x80403)))
        );
        assert_eq!(
            frames.deallocate(PhysPageNum(0x1000)),
            Err(FrameError::NotAllocated(PhysPageNum(0x1000)))
        );
    }

    #[test]
    fn full_recycle_pool_leaks_the_frame() {
        let mut frames = allocator(FRAME_POOL_CAPACITY + 1);
        let live: Vec<_> = (0..=FRAME_POOL_CAPACITY)
            .map(|_| frames.allocate().expect("frame"))
            .collect();
        for ppn in &live[..FRAME_POOL_CAPACITY] {
            frames.deallocate(*ppn).expect("fits");
        }
        assert_eq!(frames.deallocate(live[FRAME_POOL_CAPACITY]), Err(FrameError::PoolFull));
        assert_eq!(frames.free_frames(), FRAME_POOL_CAPACITY);
    }

    proptest! {
        #[test]
        fn live_frames_are_unique(ops in proptest::collection::vec(any::<bool>(), 1..200)) {
            let mut frames = allocator(64);
            let mut live: Vec<PhysPageNum> = Vec::new();
            for alloc in ops {
                if alloc || live.is_empty() {
                    if let Ok(ppn) = frames.allocate() {
                        prop_assert!(!live.contains(&ppn));
                        live.push(ppn);
                    }
                } else {
                    let ppn = live.remove(live.len() / 2);
                    prop_assert_eq!(frames.deallocate(ppn), Ok(()));
                }
                prop_assert_eq!(frames.free_frames() + live.len(), 64);
            }
        }
    }
}
