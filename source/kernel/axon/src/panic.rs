// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Unified panic handler emitting deterministic diagnostics over UART
//! OWNERS: @kernel-team
//! PUBLIC API: panic handler (no_std, target only)
//! DEPENDS_ON: trap::last_trap(), uart::raw_writer()
//! INVARIANTS: Never takes the logger lock; no allocations; stable output fields

#![cfg(all(target_arch = "riscv64", target_os = "none"))]

use core::{fmt::Write, panic::PanicInfo};

use crate::{trap, uart};

/// Emits a panic message including source location and the last trap frame.
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    let mut w = uart::raw_writer();

    let _ = w.write_str("\nPANIC: ");
    if let Some(location) = info.location() {
        let _ = write!(w, "{}:{}: ", location.file(), location.line());
    }
    let _ = writeln!(w, "{}", info.message());

    let ra: usize;
    // SAFETY: reads the return address register only.
    unsafe { core::arch::asm!("mv {}, ra", out(reg) ra, options(nomem, nostack)) };
    let _ = writeln!(w, "PANIC ra=0x{:x}", ra);

    if let Some(frame) = trap::last_trap() {
        let _ = w.write_str("PANIC: last trap:\n");
        let _ = trap::fmt_trap(&frame, &mut w);
    }

    loop {
        crate::arch::riscv::wait_for_interrupt();
    }
}
