// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Saved user register file. The layout is shared with `arch/riscv/trap.S`.

use static_assertions::const_assert_eq;

const REG_SP: usize = 2;
const REG_A0: usize = 10;
const REG_A7: usize = 17;
const ECALL_LEN: usize = 4;

/// User state captured on every trap, stored at the top of the task's kernel stack.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrapContext {
    /// General purpose registers x0..x31.
    pub x: [usize; 32],
    pub sstatus: usize,
    pub sepc: usize,
}

const_assert_eq!(core::mem::size_of::<TrapContext>(), 34 * 8);
const_assert_eq!(core::mem::offset_of!(TrapContext, sstatus), 32 * 8);
const_assert_eq!(core::mem::offset_of!(TrapContext, sepc), 33 * 8);
// The trap context sits at the top of a 16-byte aligned stack.
const_assert_eq!(core::mem::size_of::<TrapContext>() % 16, 0);

impl TrapContext {
    pub const ZEROED: Self = Self { x: [0; 32], sstatus: 0, sepc: 0 };

    /// Context that enters user code at `entry` with stack pointer `sp`.
    pub fn app_init(entry: usize, sp: usize, sstatus: usize) -> Self {
        let mut cx = Self { sstatus, sepc: entry, ..Self::ZEROED };
        cx.set_sp(sp);
        cx
    }

    pub fn sp(&self) -> usize {
        self.x[REG_SP]
    }

    pub fn set_sp(&mut self, sp: usize) {
        self.x[REG_SP] = sp;
    }

    /// Syscall number (a7).
    pub fn syscall_id(&self) -> usize {
        self.x[REG_A7]
    }

    /// Syscall argument `index` (a0 + index).
    pub fn arg(&self, index: usize) -> usize {
        self.x[REG_A0 + index]
    }

    pub fn return_value(&self) -> usize {
        self.x[REG_A0]
    }

    pub fn set_return(&mut self, value: usize) {
        self.x[REG_A0] = value;
    }

    /// Steps over the `ecall` that raised the trap.
    pub fn advance_pc(&mut self) {
        self.sepc = self.sepc.wrapping_add(ECALL_LEN);
    }
}
