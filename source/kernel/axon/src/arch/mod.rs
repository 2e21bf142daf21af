// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Architecture specific support code
//! OWNERS: @kernel-arch-team
//! PUBLIC API: arch::riscv (CSR helpers, context switch, SBI calls)
//! DEPENDS_ON: riscv, sbi-rt (target only)
//! INVARIANTS: Keep per-arch code isolated behind module boundaries

pub mod riscv;
