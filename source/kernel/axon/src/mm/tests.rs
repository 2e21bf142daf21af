// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Unit tests for Sv39 page-table construction, lookup and duplication
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; frames come from a heap arena standing in for RAM

use proptest::prelude::*;

use super::layout::{PAGE_SIZE, USER_SPACE_END};
use super::{duplicate_address_space, Access, MapError, PageFlags, PageTable};
use crate::testing::pool;
use crate::types::{PhysAddr, VirtAddr};

const RWXU: PageFlags = PageFlags::READ
    .union(PageFlags::WRITE)
    .union(PageFlags::EXECUTE)
    .union(PageFlags::USER);
const RWU: PageFlags = PageFlags::READ.union(PageFlags::WRITE).union(PageFlags::USER);

#[test]
fn walk_without_create_reports_missing_path() {
    let mut frames = pool(8);
    let table = PageTable::new(&mut frames).expect("root");
    let free = frames.allocator().free_frames();
    assert_eq!(table.walk(&mut frames, VirtAddr(0x10000), false), Err(MapError::NotFound));
    assert_eq!(frames.allocator().free_frames(), free);
}

#[test]
fn map_then_walk_yields_requested_leaf() {
    let mut frames = pool(8);
    let table = PageTable::new(&mut frames).expect("root");
    let data = frames.allocate().expect("data");
    table.map(&mut frames, VirtAddr(0x10000), data.addr(), PAGE_SIZE, RWXU).expect("map");

    let leaf = table.walk(&mut frames, VirtAddr(0x10000), false).expect("walk").read(&frames);
    assert_eq!(leaf.ppn(), data);
    assert_eq!(leaf.flags(), RWXU | PageFlags::VALID);
    assert_eq!(table.translate(&frames, VirtAddr(0x10abc)), Some(PhysAddr(data.addr().0 + 0xabc)));
}

#[test]
fn intermediate_nodes_carry_only_valid() {
    let mut frames = pool(8);
    let table = PageTable::new(&mut frames).expect("root");
    let slot = table.walk(&mut frames, VirtAddr(0x4000_0000), true).expect("create");
    let root_entry = frames.frame(table.root()).entries()[1];
    assert_eq!(root_entry.flags(), PageFlags::VALID);
    let mid_entry = frames.frame(root_entry.ppn()).entries()[0];
    assert_eq!(mid_entry.flags(), PageFlags::VALID);
    assert_eq!(mid_entry.ppn(), slot.table);
    assert!(!slot.read(&frames).is_valid());
}

#[test]
fn remap_is_refused_and_leaves_entry_untouched() {
    let mut frames = pool(8);
    let table = PageTable::new(&mut frames).expect("root");
    let first = frames.allocate().expect("first");
    let second = frames.allocate().expect("second");
    table.map(&mut frames, VirtAddr(0x20000), first.addr(), PAGE_SIZE, RWU).expect("map");
    assert_eq!(
        table.map(&mut frames, VirtAddr(0x20000), second.addr(), PAGE_SIZE, RWXU),
        Err(MapError::Overlap { va: 0x20000 })
    );
    let leaf = table.lookup(&frames, VirtAddr(0x20000)).expect("still mapped");
    assert_eq!(leaf.ppn(), first);
    assert_eq!(leaf.flags(), RWU | PageFlags::VALID);
}

#[test]
fn partial_failure_keeps_earlier_pages() {
    let mut frames = pool(16);
    let table = PageTable::new(&mut frames).expect("root");
    let base = frames.allocate().expect("frame");
    table.map(&mut frames, VirtAddr(0x31000), base.addr(), PAGE_SIZE, RWU).expect("map");
    assert_eq!(
        table.map(&mut frames, VirtAddr(0x30000), base.addr(), 2 * PAGE_SIZE, RWU),
        Err(MapError::Overlap { va: 0x31000 })
    );
    assert!(table.lookup(&frames, VirtAddr(0x30000)).is_some());
}

#[test]
fn map_rounds_to_page_boundaries() {
    let mut frames = pool(8);
    let table = PageTable::new(&mut frames).expect("root");
    let pa = frames.allocate().expect("frame").addr();
    // 0x40ff0..0x41010 touches two pages.
    table.map(&mut frames, VirtAddr(0x40ff0), PhysAddr(pa.0 + 0xff0), 0x20, RWU).expect("map");
    assert_eq!(table.translate(&frames, VirtAddr(0x40000)), Some(pa));
    assert_eq!(table.translate(&frames, VirtAddr(0x41000)), Some(PhysAddr(pa.0 + PAGE_SIZE)));
    assert_eq!(table.translate(&frames, VirtAddr(0x42000)), None);
}

#[test]
fn zero_length_maps_nothing() {
    let mut frames = pool(4);
    let table = PageTable::new(&mut frames).expect("root");
    let free = frames.allocator().free_frames();
    table.map(&mut frames, VirtAddr(0x5000), PhysAddr(0x8040_0000), 0, RWU).expect("no-op");
    assert_eq!(frames.allocator().free_frames(), free);
    assert_eq!(table.lookup(&frames, VirtAddr(0x5000)), None);
}

#[test]
fn rejects_invalid_flags_and_ranges() {
    let mut frames = pool(8);
    let table = PageTable::new(&mut frames).expect("root");
    let pa = PhysAddr(0x8040_0000);
    assert_eq!(
        table.map(&mut frames, VirtAddr(0), pa, PAGE_SIZE, PageFlags::VALID),
        Err(MapError::InvalidFlags)
    );
    assert_eq!(
        table.map(&mut frames, VirtAddr(0), pa, PAGE_SIZE, PageFlags::WRITE | PageFlags::USER),
        Err(MapError::InvalidFlags)
    );
    assert_eq!(
        table.map(&mut frames, VirtAddr(1 << 50), pa, PAGE_SIZE, RWU),
        Err(MapError::OutOfRange)
    );
}

#[test]
fn node_allocation_failure_is_out_of_memory() {
    let mut frames = pool(2);
    let table = PageTable::new(&mut frames).expect("root");
    assert_eq!(
        table.map(&mut frames, VirtAddr(0x1000), PhysAddr(0x8040_0000), PAGE_SIZE, RWU),
        Err(MapError::OutOfMemory)
    );
}

#[test]
fn user_page_checks_access_rights() {
    let mut frames = pool(8);
    let table = PageTable::new(&mut frames).expect("root");
    let code = frames.allocate().expect("code");
    let kernel = frames.allocate().expect("kernel");
    let ro = PageFlags::READ | PageFlags::EXECUTE | PageFlags::USER;
    table.map(&mut frames, VirtAddr(0x1000), code.addr(), PAGE_SIZE, ro).expect("map");
    table
        .map(&mut frames, VirtAddr(0x2000), kernel.addr(), PAGE_SIZE, PageFlags::READ | PageFlags::WRITE)
        .expect("map");

    assert_eq!(table.user_page(&frames, VirtAddr(0x1004), Access::Read), Ok(code));
    assert_eq!(
        table.user_page(&frames, VirtAddr(0x1004), Access::Write),
        Err(MapError::Fault { va: 0x1004 })
    );
    assert_eq!(
        table.user_page(&frames, VirtAddr(0x2000), Access::Read),
        Err(MapError::Fault { va: 0x2000 })
    );
    assert_eq!(
        table.user_page(&frames, VirtAddr(0x9000), Access::Read),
        Err(MapError::Fault { va: 0x9000 })
    );
}

#[test]
fn allocated_frames_keep_stale_contents() {
    let mut frames = pool(4);
    let ppn = frames.allocate().expect("frame");
    frames.frame_mut(ppn).bytes_mut()[..4].copy_from_slice(b"keep");
    frames.deallocate(ppn).expect("free");
    let again = frames.allocate().expect("reuse");
    assert_eq!(again, ppn);
    assert_eq!(&frames.frame(again).bytes()[..4], b"keep");
}

#[test]
fn kernel_mappings_are_shared_by_root_entry() {
    let mut frames = pool(16);
    let kernel = PageTable::new(&mut frames).expect("kernel root");
    let kpage = frames.allocate().expect("kernel page");
    kernel
        .map(&mut frames, VirtAddr(0x8020_0000), kpage.addr(), PAGE_SIZE, PageFlags::READ | PageFlags::EXECUTE)
        .expect("kernel map");

    let task = PageTable::new(&mut frames).expect("task root");
    task.clone_kernel_mappings(&mut frames, &kernel);
    assert_eq!(task.translate(&frames, VirtAddr(0x8020_0000)), Some(kpage.addr()));
    assert_eq!(frames.frame(task.root()).entries()[2], frames.frame(kernel.root()).entries()[2]);
    assert!(!frames.frame(task.root()).entries()[1].is_valid());
}

#[test]
fn release_returns_private_frames_only() {
    let mut frames = pool(32);
    let kernel = PageTable::new(&mut frames).expect("kernel root");
    let kpage = frames.allocate().expect("kernel page");
    kernel
        .map(&mut frames, VirtAddr(0x8020_0000), kpage.addr(), PAGE_SIZE, PageFlags::READ)
        .expect("kernel map");
    let before = frames.allocator().free_frames();

    let task = PageTable::new(&mut frames).expect("task root");
    task.clone_kernel_mappings(&mut frames, &kernel);
    let data = frames.allocate().expect("data");
    task.map(&mut frames, VirtAddr(0x4000_0000), data.addr(), PAGE_SIZE, RWU).expect("user map");

    // root + two nodes + one data frame
    assert_eq!(task.release(&mut frames, &kernel), 4);
    assert_eq!(frames.allocator().free_frames(), before);
    assert_eq!(kernel.translate(&frames, VirtAddr(0x8020_0000)), Some(kpage.addr()));
}

#[test]
fn duplicate_copies_user_pages_only() {
    let mut frames = pool(32);
    let src = PageTable::new(&mut frames).expect("src");
    let dst = PageTable::new(&mut frames).expect("dst");
    let user = frames.allocate().expect("user");
    let kernel_only = frames.allocate().expect("kernel");
    frames.frame_mut(user).bytes_mut()[..5].copy_from_slice(b"hello");
    src.map(&mut frames, VirtAddr(0x4000_0000), user.addr(), PAGE_SIZE, RWXU).expect("user");
    src.map(&mut frames, VirtAddr(0x1000_0000), kernel_only.addr(), PAGE_SIZE, PageFlags::READ)
        .expect("kernel");

    let copied = duplicate_address_space(&mut frames, &src, &dst, USER_SPACE_END).expect("dup");
    assert_eq!(copied, 1);
    let leaf = dst.lookup(&frames, VirtAddr(0x4000_0000)).expect("copied");
    assert_ne!(leaf.ppn(), user);
    assert_eq!(leaf.flags(), RWXU | PageFlags::VALID);
    assert_eq!(&frames.frame(leaf.ppn()).bytes()[..5], b"hello");
    assert_eq!(dst.lookup(&frames, VirtAddr(0x1000_0000)), None);
}

#[test]
fn duplicate_stops_at_length() {
    let mut frames = pool(32);
    let src = PageTable::new(&mut frames).expect("src");
    let dst = PageTable::new(&mut frames).expect("dst");
    let low = frames.allocate().expect("low");
    let high = frames.allocate().expect("high");
    src.map(&mut frames, VirtAddr(0x4000_0000), low.addr(), PAGE_SIZE, RWU).expect("low");
    src.map(&mut frames, VirtAddr(0x4100_0000), high.addr(), PAGE_SIZE, RWU).expect("high");

    assert_eq!(duplicate_address_space(&mut frames, &src, &dst, USER_SPACE_END), Ok(1));
    assert!(dst.lookup(&frames, VirtAddr(0x4000_0000)).is_some());
    assert!(dst.lookup(&frames, VirtAddr(0x4100_0000)).is_none());
}

#[test]
fn duplicate_into_mapped_destination_fails() {
    let mut frames = pool(32);
    let src = PageTable::new(&mut frames).expect("src");
    let dst = PageTable::new(&mut frames).expect("dst");
    let page = frames.allocate().expect("page");
    src.map(&mut frames, VirtAddr(0x4000_0000), page.addr(), PAGE_SIZE, RWU).expect("src");
    dst.map(&mut frames, VirtAddr(0x4000_0000), page.addr(), PAGE_SIZE, RWU).expect("dst");
    let free = frames.allocator().free_frames();
    assert_eq!(
        duplicate_address_space(&mut frames, &src, &dst, USER_SPACE_END),
        Err(MapError::Overlap { va: 0x4000_0000 })
    );
    assert_eq!(frames.allocator().free_frames(), free);
}

proptest! {
    #[test]
    fn duplicate_preserves_content_and_permissions(
        pages in proptest::collection::btree_map(0usize..64, (any::<u8>(), any::<bool>()), 1..12)
    ) {
        let mut frames = pool(128);
        let src = PageTable::new(&mut frames).expect("src");
        let dst = PageTable::new(&mut frames).expect("dst");
        for (&page, &(fill, exec)) in &pages {
            let ppn = frames.allocate().expect("frame");
            frames.frame_mut(ppn).bytes_mut().fill(fill);
            let flags = if exec { RWXU } else { RWU };
            src.map(&mut frames, VirtAddr(0x4000_0000 + page * PAGE_SIZE), ppn.addr(), PAGE_SIZE, flags)
                .expect("map");
        }

        let copied = duplicate_address_space(&mut frames, &src, &dst, USER_SPACE_END).expect("dup");
        prop_assert_eq!(copied, pages.len());
        for &page in pages.keys() {
            let va = VirtAddr(0x4000_0000 + page * PAGE_SIZE);
            let a = src.lookup(&frames, va).expect("src leaf");
            let b = dst.lookup(&frames, va).expect("dst leaf");
            prop_assert_ne!(a.ppn(), b.ppn());
            prop_assert_eq!(a.flags(), b.flags());
            prop_assert_eq!(frames.frame(a.ppn()).bytes(), frames.frame(b.ppn()).bytes());
        }
    }
}
