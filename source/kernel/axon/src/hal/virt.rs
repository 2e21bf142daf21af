// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! HAL implementation targeting QEMU's `virt` machine under SBI firmware.

use crate::arch::riscv;
use crate::task::TaskContext;

use super::{Console, Hart, Tlb};

/// Console backed by the SBI legacy putchar/getchar calls.
pub struct SbiConsole;

impl Console for SbiConsole {
    fn write_byte(&mut self, byte: u8) {
        riscv::sbi_putchar(byte);
    }

    fn read_byte(&mut self) -> Option<u8> {
        riscv::sbi_getchar()
    }
}

/// Sv39 TLB helper issuing `sfence.vma` when compiled for RISC-V.
pub struct VirtTlb;

impl Tlb for VirtTlb {
    fn flush_all(&self) {
        riscv::sfence_vma_all();
    }
}

/// The single hart this kernel runs on.
pub struct VirtHart {
    tlb: VirtTlb,
}

impl VirtHart {
    pub const fn new() -> Self {
        Self { tlb: VirtTlb }
    }
}

impl Default for VirtHart {
    fn default() -> Self {
        Self::new()
    }
}

impl Hart for VirtHart {
    fn activate(&self, satp: usize) {
        riscv::write_satp(satp);
        self.tlb.flush_all();
    }

    unsafe fn switch(&self, from: *mut TaskContext, to: *const TaskContext) {
        // SAFETY: forwarded from the caller.
        unsafe { riscv::switch_context(from, to) }
    }
}
