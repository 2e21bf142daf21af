// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Task slot table and lifecycle (create, yield, exit, fork)
//! OWNERS: @kernel-sched-team
//! PUBLIC API: TaskManager, TaskState, TaskError, ForkError, MAX_TASKS, TaskContext, KernelStack
//! DEPENDS_ON: mm (frames, page tables), sched::Scheduler, trap::TrapContext
//! INVARIANTS: A Running slot always owns a page table carrying the kernel mappings; each slot
//!             uses only its own kernel stack; the slot index doubles as the task identifier

mod context;


pub use context::{KernelStack, TaskContext, KERNEL_STACK_SIZE};

use crate::arch::riscv;
use crate::mm::layout::{
    PAGE_SIZE, USER_CODE_BASE, USER_CODE_LIMIT, USER_SPACE_END, USER_STACK_BASE, USER_STACK_SIZE,
};
use crate::mm::{duplicate_address_space, FrameError, FramePool, MapError, PageFlags, PageTable, PhysMemory};
use crate::sched::{Dispatch, ScheduleError, Scheduler, SwitchPlan};
use crate::trap::TrapContext;
use crate::types::VirtAddr;

/// Number of task slots.
pub const MAX_TASKS: usize = 4;

const CODE_FLAGS: PageFlags = PageFlags::READ
    .union(PageFlags::WRITE)
    .union(PageFlags::EXECUTE)
    .union(PageFlags::USER);
const STACK_FLAGS: PageFlags = PageFlags::READ.union(PageFlags::WRITE).union(PageFlags::USER);

/// Lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Free,
    Running,
}

/// Errors raised while creating tasks from a program image.
#[must_use = "task creation errors must be handled"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    NoFreeSlot,
    EmptyImage,
    ImageTooLarge { len: usize },
    Memory(MapError),
}

impl From<MapError> for TaskError {
    fn from(err: MapError) -> Self {
        TaskError::Memory(err)
    }
}

impl From<FrameError> for TaskError {
    fn from(err: FrameError) -> Self {
        TaskError::Memory(err.into())
    }
}

/// Errors reported to a task that asked to be duplicated.
#[must_use = "fork errors must be handled"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkError {
    NoCurrentTask,
    NoFreeSlot,
    Memory(MapError),
}

impl From<MapError> for ForkError {
    fn from(err: MapError) -> Self {
        ForkError::Memory(err)
    }
}

struct TaskControlBlock {
    state: TaskState,
    context: TaskContext,
    page_table: Option<PageTable>,
}

impl TaskControlBlock {
    const fn free() -> Self {
        Self { state: TaskState::Free, context: TaskContext::zeroed(), page_table: None }
    }
}

/// Fixed table of task slots plus the round-robin cursor over them.
pub struct TaskManager {
    slots: [TaskControlBlock; MAX_TASKS],
    stacks: &'static mut [KernelStack; MAX_TASKS],
    scheduler: Scheduler,
    /// Saved boot context, switched away from exactly once.
    idle: TaskContext,
}

impl TaskManager {
    pub fn new(stacks: &'static mut [KernelStack; MAX_TASKS]) -> Self {
        Self {
            slots: core::array::from_fn(|_| TaskControlBlock::free()),
            stacks,
            scheduler: Scheduler::new(MAX_TASKS),
            idle: TaskContext::zeroed(),
        }
    }

    /// Creates `count` tasks that all run `image`.
    pub fn create_initial_tasks<M: PhysMemory>(
        &mut self,
        pool: &mut FramePool<M>,
        kernel: &PageTable,
        image: &[u8],
        count: usize,
    ) -> Result<(), TaskError> {
        for _ in 0..count {
            self.spawn(pool, kernel, image)?;
        }
        log_info!(target: "task", "created {} task(s) from a {} byte image", count, image.len());
        Ok(())
    }

    /// Loads `image` into a fresh address space in the first free slot.
    pub fn spawn<M: PhysMemory>(
        &mut self,
        pool: &mut FramePool<M>,
        kernel: &PageTable,
        image: &[u8],
    ) -> Result<usize, TaskError> {
        if image.is_empty() {
            return Err(TaskError::EmptyImage);
        }
        if image.len() > USER_CODE_LIMIT {
            return Err(TaskError::ImageTooLarge { len: image.len() });
        }
        let slot = self.free_slot().ok_or(TaskError::NoFreeSlot)?;

        let table = PageTable::new(pool)?;
        table.clone_kernel_mappings(pool, kernel);
        load_image(pool, &table, image)?;
        let stack = pool.allocate_zeroed()?;
        table.map(pool, VirtAddr(USER_STACK_BASE), stack.addr(), USER_STACK_SIZE, STACK_FLAGS)?;
        riscv::fence_i();

        *self.stacks[slot].trap_context_mut() = TrapContext::app_init(
            USER_CODE_BASE,
            USER_STACK_BASE + USER_STACK_SIZE,
            riscv::user_sstatus(),
        );
        self.install(slot, table);
        log_debug!(target: "task", "slot {} root {:?}", slot, self.slots[slot].page_table);
        Ok(slot)
    }

    /// Picks the next Running slot after the current one.
    pub fn schedule(&mut self) -> Result<Dispatch, ScheduleError> {
        let slots = &self.slots;
        let next = self
            .scheduler
            .pick(|slot| slots[slot].state == TaskState::Running)
            .ok_or(ScheduleError::AllTasksFinished)?;
        let prev = self.scheduler.current();
        if prev == Some(next) {
            return Ok(Dispatch::Stay);
        }
        let satp = self.slots[next]
            .page_table
            .as_ref()
            .map(PageTable::satp)
            .ok_or(ScheduleError::MissingAddressSpace(next))?;
        self.scheduler.set_current(next);

        let from: *mut TaskContext = match prev {
            Some(slot) => &mut self.slots[slot].context,
            None => &mut self.idle,
        };
        let to: *const TaskContext = &self.slots[next].context;
        #[cfg(feature = "trace_sched")]
        match prev {
            Some(slot) => log_info!(target: "sched", "switch {} -> {}", slot, next),
            None => log_info!(target: "sched", "switch idle -> {}", next),
        }
        Ok(Dispatch::Switch(SwitchPlan::new(prev, next, satp, from, to)))
    }

    /// Gives up the CPU; the current task stays Running.
    pub fn yield_current(&mut self) -> Result<Dispatch, ScheduleError> {
        self.schedule()
    }

    /// Frees the current slot and picks a successor. With `reclaim_on_exit` the task's frames
    /// go back to `pool`; otherwise they stay allocated.
    pub fn exit_current<M: PhysMemory>(
        &mut self,
        pool: &mut FramePool<M>,
        kernel: &PageTable,
    ) -> Result<Dispatch, ScheduleError> {
        if let Some(slot) = self.scheduler.current() {
            self.slots[slot].state = TaskState::Free;
            #[cfg(feature = "reclaim_on_exit")]
            if let Some(table) = self.slots[slot].page_table.take() {
                let released = table.release(pool, kernel);
                log_debug!(target: "task", "slot {} released {} frame(s)", slot, released);
            }
        }
        #[cfg(not(feature = "reclaim_on_exit"))]
        let _ = (pool, kernel);
        self.schedule()
    }

    /// Duplicates the current task into a free slot. The child resumes from the same saved
    /// context with a0 = 0; the return value is the child's slot.
    ///
    /// Slot 0 is handed out like any other free slot, so a parent whose child lands there also
    /// sees 0 and cannot tell itself apart from the child. A failed copy returns every frame the
    /// child table had taken.
    pub fn fork_current<M: PhysMemory>(
        &mut self,
        pool: &mut FramePool<M>,
        kernel: &PageTable,
    ) -> Result<usize, ForkError> {
        let parent = self.scheduler.current().ok_or(ForkError::NoCurrentTask)?;
        let child = self.free_slot().ok_or(ForkError::NoFreeSlot)?;
        let parent_table =
            self.slots[parent].page_table.as_ref().ok_or(ForkError::NoCurrentTask)?;

        let table = PageTable::new(pool)?;
        table.clone_kernel_mappings(pool, kernel);
        if let Err(err) = duplicate_address_space(pool, parent_table, &table, USER_SPACE_END) {
            let released = table.release(pool, kernel);
            log_warn!(
                target: "task",
                "fork of slot {} failed: {:?} ({} frame(s) returned)",
                parent,
                err,
                released
            );
            return Err(err.into());
        }

        let mut cx = *self.stacks[parent].trap_context();
        cx.set_return(0);
        *self.stacks[child].trap_context_mut() = cx;
        self.install(child, table);
        log_info!(target: "task", "slot {} forked into slot {}", parent, child);
        Ok(child)
    }

    pub fn current(&self) -> Option<usize> {
        self.scheduler.current()
    }

    pub fn state(&self, slot: usize) -> TaskState {
        self.slots[slot].state
    }

    /// Number of Running slots.
    pub fn running(&self) -> usize {
        self.slots.iter().filter(|tcb| tcb.state == TaskState::Running).count()
    }

    pub fn page_table(&self, slot: usize) -> Option<&PageTable> {
        self.slots[slot].page_table.as_ref()
    }

    pub fn trap_context(&self, slot: usize) -> &TrapContext {
        self.stacks[slot].trap_context()
    }

    pub fn trap_context_mut(&mut self, slot: usize) -> &mut TrapContext {
        self.stacks[slot].trap_context_mut()
    }

    pub fn task_context(&self, slot: usize) -> &TaskContext {
        &self.slots[slot].context
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|tcb| tcb.state == TaskState::Free)
    }

    fn install(&mut self, slot: usize, table: PageTable) {
        let tcb = &mut self.slots[slot];
        tcb.context = TaskContext::goto_restore(self.stacks[slot].trap_context_ptr());
        tcb.page_table = Some(table);
        tcb.state = TaskState::Running;
    }
}

/// Copies `image` into fresh frames mapped at `USER_CODE_BASE`; the tail of the last page is
/// zeroed.
fn load_image<M: PhysMemory>(
    pool: &mut FramePool<M>,
    table: &PageTable,
    image: &[u8],
) -> Result<(), TaskError> {
    for (index, chunk) in image.chunks(PAGE_SIZE).enumerate() {
        let frame = pool.allocate()?;
        let bytes = pool.frame_mut(frame).bytes_mut();
        bytes[..chunk.len()].copy_from_slice(chunk);
        bytes[chunk.len()..].fill(0);
        let va = VirtAddr(USER_CODE_BASE + index * PAGE_SIZE);
        table.map(pool, va, frame.addr(), PAGE_SIZE, CODE_FLAGS)?;
    }
    Ok(())
}
