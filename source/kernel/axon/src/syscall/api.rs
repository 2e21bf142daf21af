// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall handlers exposed to the dispatcher
//! OWNERS: @kernel-team
//! PUBLIC API: install_handlers(table), Context
//! DEPENDS_ON: task::TaskManager, mm::{FramePool, PageTable}, hal::Console
//! INVARIANTS: User buffers are checked page by page against the caller's own page table before
//!             any byte moves; a handler touches only the calling task's state

use core::ops::Range;

use super::{
    Args, Completion, Error, SysResult, SyscallTable, SYSCALL_EXIT, SYSCALL_FORK, SYSCALL_READ,
    SYSCALL_WRITE, SYSCALL_YIELD,
};
use crate::hal::Console;
use crate::mm::layout::PAGE_SIZE;
use crate::mm::{Access, FramePool, PageTable, PhysMemory};
use crate::task::TaskManager;
use crate::types::{PhysPageNum, VirtAddr};

/// Only fd accepted by `read`.
const STDIN: usize = 0;

/// Kernel state a handler may touch, borrowed for the duration of one syscall.
pub struct Context<'a, M> {
    pub tasks: &'a mut TaskManager,
    pub frames: &'a mut FramePool<M>,
    pub kernel_table: &'a PageTable,
    pub console: &'a mut dyn Console,
}

pub fn install_handlers<M: PhysMemory>(table: &mut SyscallTable<M>) {
    table.register(SYSCALL_READ, sys_read::<M>);
    table.register(SYSCALL_WRITE, sys_write::<M>);
    table.register(SYSCALL_EXIT, sys_exit::<M>);
    table.register(SYSCALL_YIELD, sys_yield::<M>);
    table.register(SYSCALL_FORK, sys_fork::<M>);
}

/// `write(fd, buf, len)`: copies the whole buffer to the console. The fd is not interpreted.
fn sys_write<M: PhysMemory>(ctx: &mut Context<'_, M>, args: &Args) -> SysResult<Completion> {
    let (buf, len) = (args.get(1), args.get(2));
    let table = caller_table(ctx.tasks)?;
    let frames = &*ctx.frames;

    visit_user(frames, table, buf, len, Access::Read, |_, _| ())?;
    let console = &mut *ctx.console;
    visit_user(frames, table, buf, len, Access::Read, |ppn, range| {
        console.write_bytes(&frames.frame(ppn).bytes()[range]);
    })?;
    Ok(Completion::Return(len))
}

/// `read(0, buf, len)`: waits for one console byte and stores it at `buf`.
fn sys_read<M: PhysMemory>(ctx: &mut Context<'_, M>, args: &Args) -> SysResult<Completion> {
    let (fd, buf, len) = (args.get(0), args.get(1), args.get(2));
    if fd != STDIN || len == 0 {
        return Ok(Completion::Return(0));
    }
    let table = caller_table(ctx.tasks)?;
    let ppn = table.user_page(ctx.frames, VirtAddr(buf), Access::Write)?;

    let byte = loop {
        if let Some(byte) = ctx.console.read_byte() {
            break byte;
        }
        core::hint::spin_loop();
    };
    ctx.frames.frame_mut(ppn).bytes_mut()[VirtAddr(buf).page_offset()] = byte;
    Ok(Completion::Return(1))
}

fn sys_exit<M: PhysMemory>(ctx: &mut Context<'_, M>, args: &Args) -> SysResult<Completion> {
    let code = args.get(0) as i32;
    if let Some(slot) = ctx.tasks.current() {
        log_info!(target: "task", "slot {} exited with code {}", slot, code);
    }
    Ok(Completion::Exit(code))
}

fn sys_yield<M: PhysMemory>(_ctx: &mut Context<'_, M>, _args: &Args) -> SysResult<Completion> {
    Ok(Completion::Yield)
}

fn sys_fork<M: PhysMemory>(ctx: &mut Context<'_, M>, _args: &Args) -> SysResult<Completion> {
    let child = ctx.tasks.fork_current(ctx.frames, ctx.kernel_table)?;
    Ok(Completion::Return(child))
}

fn caller_table(tasks: &TaskManager) -> SysResult<&PageTable> {
    tasks.current().and_then(|slot| tasks.page_table(slot)).ok_or(Error::NoCurrentTask)
}

/// Calls `f` with each page-sized piece of `[va, va + len)` after checking `access` on it.
fn visit_user<M: PhysMemory>(
    frames: &FramePool<M>,
    table: &PageTable,
    va: usize,
    len: usize,
    access: Access,
    mut f: impl FnMut(PhysPageNum, Range<usize>),
) -> SysResult<()> {
    let end = va.checked_add(len).ok_or(Error::BadAddress(va))?;
    let mut cursor = va;
    while cursor < end {
        let ppn = table.user_page(frames, VirtAddr(cursor), access)?;
        let offset = VirtAddr(cursor).page_offset();
        let chunk = (PAGE_SIZE - offset).min(end - cursor);
        f(ppn, offset..offset + chunk);
        cursor += chunk;
    }
    Ok(())
}
