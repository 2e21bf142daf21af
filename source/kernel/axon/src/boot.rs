// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Early boot routines for the AXON kernel.

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
extern "C" {
    static mut __bss_start: u8;
    static mut __bss_end: u8;
}

/// Perform the machine initialisation required before the kernel can run.
///
/// # Safety
///
/// This must only be invoked once on the boot CPU before any Rust code that
/// relies on initialised memory or traps executes. Callers must ensure the
/// stack is valid and interrupts are masked until setup completes.
pub unsafe fn early_boot_init() {
    // SAFETY: called once during early boot, before any static is read.
    unsafe { zero_bss() };
    log_info!(target: "boot", "bss cleared");

    // SAFETY: privileged context, trap vector installed once.
    unsafe { crate::trap::install_trap_vector() };
    log_info!(target: "boot", "trap vector installed");
}

unsafe fn zero_bss() {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    crate::arch::riscv::clear_bss(
        core::ptr::addr_of_mut!(__bss_start),
        core::ptr::addr_of_mut!(__bss_end),
    );
}
