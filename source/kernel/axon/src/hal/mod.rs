// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hardware abstraction layer traits.

pub mod virt;

use crate::task::TaskContext;

/// Byte console reachable by user programs through `read`/`write`.
pub trait Console {
    fn write_byte(&mut self, byte: u8);
    /// Returns `None` when no input is pending.
    fn read_byte(&mut self) -> Option<u8>;

    fn write_bytes(&mut self, bytes: &[u8]) {
        bytes.iter().for_each(|&byte| self.write_byte(byte));
    }
}

/// TLB management operations.
pub trait Tlb {
    /// Flushes the entire translation cache.
    fn flush_all(&self);
}

/// Per-hart primitives used to hand the CPU from one task to another.
pub trait Hart {
    /// Loads `satp` and flushes stale translations.
    fn activate(&self, satp: usize);

    /// Saves callee-saved state into `from` and resumes `to`.
    ///
    /// # Safety
    ///
    /// Both pointers must reference live task contexts; `to` must have been produced by a
    /// previous switch or by task creation.
    unsafe fn switch(&self, from: *mut TaskContext, to: *const TaskContext);
}
