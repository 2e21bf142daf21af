// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Physical frames and Sv39 address spaces
//! OWNERS: @kernel-mm-team
//! PUBLIC API: FrameAllocator, FramePool, PhysMemory, PageTable, PageFlags, duplicate_address_space
//! DEPENDS_ON: bitflags, static_assertions
//! INVARIANTS: Page tables only reference frames owned by the pool; user mappings stay inside
//!             the user root slot so kernel subtrees can be shared between roots

pub mod frame;
pub mod layout;
pub mod memory;
pub mod page_table;

#[cfg(test)]
mod tests;

pub use frame::{FrameAllocator, FrameError, FramePool, FRAME_POOL_CAPACITY};
pub use layout::PAGE_SIZE;
#[cfg(test)]
pub use memory::ArenaMemory;
pub use memory::{Frame, IdentityMemory, PhysMemory};
pub use page_table::{
    duplicate_address_space, Access, MapError, PageFlags, PageTable, PageTableEntry, PteSlot,
};
