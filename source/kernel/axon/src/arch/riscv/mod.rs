// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! RISC-V specific helpers used across the AXON kernel.
//!
//! Every helper compiles on the host as a no-op (or a neutral value) so scheduling, paging and
//! syscall logic can be exercised by ordinary unit tests.

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
use core::arch::asm;

use crate::task::TaskContext;

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
core::arch::global_asm!(
    include_str!("switch.S"),
    CX_RA = const core::mem::offset_of!(TaskContext, ra),
    CX_SP = const core::mem::offset_of!(TaskContext, sp),
    CX_S = const core::mem::offset_of!(TaskContext, s),
);

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
extern "C" {
    fn __switch(from: *mut TaskContext, to: *const TaskContext);
    fn __restore();
}

const SSTATUS_SIE: usize = 1 << 1;
const SSTATUS_SPIE: usize = 1 << 5;
const SSTATUS_SPP: usize = 1 << 8;

/// Clears the `.bss` region defined by the linker.
#[inline]
pub fn clear_bss(start: *mut u8, end: *mut u8) {
    let len = end as usize - start as usize;
    // SAFETY: the linker guarantees `[start, end)` is writable kernel memory.
    unsafe { core::ptr::write_bytes(start, 0, len) };
}

/// Installs a new root page table. Callers flush the TLB afterwards.
#[inline]
pub fn write_satp(satp: usize) {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    // SAFETY: every root installed by the kernel carries the kernel mappings.
    unsafe {
        asm!("csrw satp, {0}", in(reg) satp, options(nostack, preserves_flags));
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    let _ = satp;
}

#[inline]
pub fn sfence_vma_all() {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        asm!("sfence.vma x0, x0", options(nostack));
    }
}

/// Synchronises the instruction stream after writing code into user frames.
#[inline]
pub fn fence_i() {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        asm!("fence.i", options(nostack));
    }
}

/// Issues a WFI instruction or yields on the host.
#[inline]
pub fn wait_for_interrupt() {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        asm!("wfi", options(nomem, nostack, preserves_flags));
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    core::hint::spin_loop();
}

/// `sstatus` image for a fresh user task: return to U-mode with interrupts off.
pub fn user_sstatus() -> usize {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    let current = {
        let value: usize;
        unsafe { asm!("csrr {0}, sstatus", out(reg) value, options(nomem, nostack)) };
        value
    };
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    let current = 0usize;
    current & !(SSTATUS_SPP | SSTATUS_SPIE | SSTATUS_SIE)
}

/// Address of the stub that loads a trap context and executes `sret`.
pub fn restore_entry() -> usize {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    {
        __restore as usize
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        0
    }
}

/// # Safety
///
/// See [`crate::hal::Hart::switch`].
#[inline]
pub unsafe fn switch_context(from: *mut TaskContext, to: *const TaskContext) {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        __switch(from, to)
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    let _ = (from, to);
}

pub fn sbi_putchar(byte: u8) {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    #[allow(deprecated)]
    {
        sbi_rt::legacy::console_putchar(byte as usize);
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    let _ = byte;
}

pub fn sbi_getchar() -> Option<u8> {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    #[allow(deprecated)]
    {
        u8::try_from(sbi_rt::legacy::console_getchar()).ok()
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        None
    }
}

/// Powers the machine off through SBI; parks the hart if firmware refuses.
pub fn shutdown(failure: bool) -> ! {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    {
        if failure {
            let _ = sbi_rt::system_reset(sbi_rt::Shutdown, sbi_rt::SystemFailure);
        } else {
            let _ = sbi_rt::system_reset(sbi_rt::Shutdown, sbi_rt::NoReason);
        }
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    let _ = failure;
    loop {
        wait_for_interrupt();
    }
}
