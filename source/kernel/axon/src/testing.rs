// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host test fixtures (frame arena, buffering console, kernel builder)
//! OWNERS: @kernel-team
//! NOTE: Tests only

use std::collections::VecDeque;
use std::vec::Vec;

use crate::hal::Console;
use crate::kmain::{KernelRegion, KernelState};
use crate::mm::layout::{PAGE_SIZE, UART0_BASE};
use crate::mm::{ArenaMemory, FrameAllocator, FramePool, PageFlags};
use crate::task::{KernelStack, MAX_TASKS};
use crate::types::{PhysAddr, PhysPageNum};

/// First page number handed out by test pools (inside the `virt` RAM window).
pub const ARENA_BASE: PhysPageNum = PhysPageNum(0x80400);

/// Pool of `frames` frames backed by a heap arena.
pub fn pool(frames: usize) -> FramePool<ArenaMemory> {
    let start = ARENA_BASE.addr();
    let allocator = FrameAllocator::new(start, PhysAddr(start.0 + frames * PAGE_SIZE));
    FramePool::new(allocator, ArenaMemory::new(ARENA_BASE, frames))
}

/// Console recording everything written and replaying queued input.
#[derive(Default)]
pub struct BufferConsole {
    pub output: Vec<u8>,
    pub input: VecDeque<u8>,
}

impl BufferConsole {
    pub fn with_input(input: &[u8]) -> Self {
        Self { output: Vec::new(), input: input.iter().copied().collect() }
    }

    pub fn text(&self) -> &str {
        std::str::from_utf8(&self.output).expect("console output is utf-8")
    }
}

impl Console for BufferConsole {
    fn write_byte(&mut self, byte: u8) {
        self.output.push(byte);
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.input.pop_front()
    }
}

/// Kernel stacks for one test kernel. Leaked: contexts point into them for the test's lifetime.
pub fn leak_stacks() -> &'static mut [KernelStack; MAX_TASKS] {
    Box::leak(Box::new([KernelStack::EMPTY; MAX_TASKS]))
}

/// Kernel with a UART mapping, a 64-frame arena and `tasks` copies of `image` already created.
pub fn kernel(image: &[u8], tasks: usize) -> KernelState<ArenaMemory, BufferConsole> {
    kernel_with(image, tasks, 64, BufferConsole::default())
}

pub fn kernel_with(
    image: &[u8],
    tasks: usize,
    frames: usize,
    console: BufferConsole,
) -> KernelState<ArenaMemory, BufferConsole> {
    let regions = [KernelRegion {
        name: "uart0",
        start: UART0_BASE,
        end: UART0_BASE + PAGE_SIZE,
        flags: PageFlags::READ | PageFlags::WRITE,
    }];
    let mut kernel =
        KernelState::new(pool(frames), console, leak_stacks(), &regions).expect("kernel table");
    kernel.create_initial_tasks(image, tasks).expect("initial tasks");
    kernel
}
