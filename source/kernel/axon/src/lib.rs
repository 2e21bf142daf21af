// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: AXON teaching kernel library (single hart, Sv39, cooperative multitasking)
//! OWNERS: @kernel-team
//! PUBLIC API: early_boot_init(), kmain(image, tasks), KernelState, mm/task/sched/trap/syscall modules
//! DEPENDS_ON: bitflags, spin, riscv, static_assertions, sbi-rt (target only)
//! INVARIANTS: No unwrap in kernel paths; all target-only code gated on riscv64 + os none

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), forbid(clippy::unwrap_used))]

#[macro_use]
mod diag;
pub use diag::log;

pub mod arch;
mod boot;
pub mod hal;
pub mod kmain;
pub mod mm;
mod panic;
pub mod sched;
pub mod syscall;
pub mod task;
pub mod trap;
pub mod types;
pub mod uart;

#[cfg(test)]
mod testing;

pub use boot::early_boot_init;
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub use kmain::kmain;
pub use kmain::{KernelRegion, KernelState, INITIAL_TASKS};
