// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! 16550 UART on the `virt` machine, used for kernel diagnostics only.
//!
//! User-visible console traffic goes through [`crate::hal::Console`]; this device carries log
//! lines and panic reports. Host builds compile the driver but never touch MMIO.

use core::fmt::{self, Write};
use spin::Mutex;

use crate::mm::layout::UART0_BASE;

const UART_TX: usize = 0x0;
const UART_LSR: usize = 0x5;
const LSR_TX_IDLE: u8 = 1 << 5;

static UART0: Mutex<KernelUart> = Mutex::new(KernelUart::new(UART0_BASE));

/// Locked UART writer used by the logger.
#[derive(Clone, Copy)]
pub struct KernelUart {
    base: usize,
}

impl KernelUart {
    pub const fn new(base: usize) -> Self {
        Self { base }
    }

    /// Returns a guard for the diagnostics UART singleton.
    pub fn lock() -> spin::MutexGuard<'static, KernelUart> {
        UART0.lock()
    }

    fn put(&self, byte: u8) {
        if byte == b'\n' {
            mmio_put(self.base, b'\r');
        }
        mmio_put(self.base, byte);
    }
}

impl Write for KernelUart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        s.bytes().for_each(|byte| self.put(byte));
        Ok(())
    }
}

/// Lock-free writer for panic and fatal-trap paths where the UART mutex may be held.
pub struct RawUart;

impl Write for RawUart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        KernelUart::new(UART0_BASE).write_str(s)
    }
}

pub fn raw_writer() -> RawUart {
    RawUart
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[inline]
fn mmio_put(base: usize, value: u8) {
    // SAFETY: UART0 is identity mapped read/write in every address space.
    unsafe {
        while core::ptr::read_volatile((base + UART_LSR) as *const u8) & LSR_TX_IDLE == 0 {}
        core::ptr::write_volatile((base + UART_TX) as *mut u8, value);
    }
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
#[inline]
fn mmio_put(base: usize, value: u8) {
    let _ = (base, value, UART_TX, UART_LSR, LSR_TX_IDLE);
}
