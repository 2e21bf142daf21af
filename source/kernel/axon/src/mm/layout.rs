// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fixed physical and virtual memory layout of the `virt` machine and of every user task.
//!
//! User space lives entirely inside root slot 1 (`0x4000_0000..0x8000_0000`). The kernel maps
//! the UART (slot 0) and RAM (slot 2) only, so a task root can share the kernel's subtrees by
//! copying root entries.

use static_assertions::const_assert;

pub const PAGE_SHIFT: usize = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Entries in one Sv39 table node.
pub const PT_ENTRIES: usize = 512;

/// Exclusive end of physical RAM handed to the frame allocator.
pub const MEMORY_END: usize = 0x8800_0000;
/// Physical base of RAM on `virt` (OpenSBI occupies the first 2 MiB).
pub const MEMORY_START: usize = 0x8000_0000;

pub const UART0_BASE: usize = 0x1000_0000;

/// Start of the user window; also where program images are loaded.
pub const USER_SPACE_BASE: usize = 0x4000_0000;
pub const USER_CODE_BASE: usize = USER_SPACE_BASE;
/// Largest program image accepted by task creation.
pub const USER_CODE_LIMIT: usize = 0x2_0000;
/// One frame of user stack; the initial stack pointer is `USER_STACK_BASE + PAGE_SIZE`.
pub const USER_STACK_BASE: usize = 0x4080_0000;
pub const USER_STACK_SIZE: usize = PAGE_SIZE;
/// Exclusive bound of the prefix duplicated by fork.
pub const USER_SPACE_END: usize = 0x4100_0000;

const ROOT_SLOT_SPAN: usize = 1 << 30;

const_assert!(USER_CODE_BASE + USER_CODE_LIMIT <= USER_STACK_BASE);
const_assert!(USER_STACK_BASE + USER_STACK_SIZE <= USER_SPACE_END);
const_assert!(USER_SPACE_BASE / ROOT_SLOT_SPAN == (USER_SPACE_END - 1) / ROOT_SLOT_SPAN);
const_assert!(UART0_BASE / ROOT_SLOT_SPAN != USER_SPACE_BASE / ROOT_SLOT_SPAN);
const_assert!(MEMORY_START / ROOT_SLOT_SPAN != USER_SPACE_BASE / ROOT_SLOT_SPAN);
const_assert!((MEMORY_END - 1) / ROOT_SLOT_SPAN == MEMORY_START / ROOT_SLOT_SPAN);
