// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Kernel-side execution state of a task: callee-saved registers and the kernel stack.

use static_assertions::const_assert_eq;

use crate::arch::riscv;
use crate::mm::layout::PAGE_SIZE;
use crate::trap::TrapContext;

/// Bytes of kernel stack per task slot, trap context included.
pub const KERNEL_STACK_SIZE: usize = 2 * PAGE_SIZE;

/// Registers preserved across `__switch`. The layout is shared with `arch/riscv/switch.S`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskContext {
    pub ra: usize,
    pub sp: usize,
    pub s: [usize; 12],
}

impl TaskContext {
    pub const fn zeroed() -> Self {
        Self { ra: 0, sp: 0, s: [0; 12] }
    }

    /// Context whose first switch-in lands in `__restore` with `sp` pointing at `trap_cx`.
    pub fn goto_restore(trap_cx: *const TrapContext) -> Self {
        Self { ra: riscv::restore_entry(), sp: trap_cx as usize, s: [0; 12] }
    }
}

/// Dedicated kernel stack of one task slot; the trap context occupies the top.
#[repr(C, align(4096))]
pub struct KernelStack {
    stack: [u8; KERNEL_STACK_SIZE - core::mem::size_of::<TrapContext>()],
    trap_cx: TrapContext,
}

const_assert_eq!(core::mem::size_of::<KernelStack>(), KERNEL_STACK_SIZE);

impl KernelStack {
    pub const EMPTY: Self = Self {
        stack: [0; KERNEL_STACK_SIZE - core::mem::size_of::<TrapContext>()],
        trap_cx: TrapContext::ZEROED,
    };

    /// Value `sscratch` holds while the owning task runs in user mode.
    pub fn top(&self) -> usize {
        self as *const Self as usize + KERNEL_STACK_SIZE
    }

    pub fn trap_context(&self) -> &TrapContext {
        &self.trap_cx
    }

    pub fn trap_context_mut(&mut self) -> &mut TrapContext {
        &mut self.trap_cx
    }

    pub fn trap_context_ptr(&mut self) -> *mut TrapContext {
        &mut self.trap_cx
    }
}
