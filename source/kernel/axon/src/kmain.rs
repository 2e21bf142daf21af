// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel state aggregate and bring-up sequence
//! OWNERS: @kernel-team
//! PUBLIC API: KernelState, KernelRegion, kmain(image, tasks) (target only)
//! DEPENDS_ON: mm, task, syscall, hal::virt, trap (dispatch glue)
//! INVARIANTS: Paging is on before the first task is created; the kernel lock is never held
//!             across a context switch; the boot context is switched away from exactly once

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
use spin::Mutex;
use static_assertions::assert_impl_all;

use crate::hal::virt::SbiConsole;
use crate::hal::Console;
use crate::mm::{FramePool, IdentityMemory, MapError, PageFlags, PageTable, PhysMemory};
use crate::sched::{Dispatch, ScheduleError};
use crate::syscall::SyscallTable;
use crate::task::{KernelStack, TaskError, TaskManager, MAX_TASKS};
use crate::types::{PhysAddr, VirtAddr};

/// Tasks created from the boot image when the boot crate does not override the count.
pub const INITIAL_TASKS: usize = 1;

/// Aggregated kernel state. One instance lives in the kernel singleton; tests build their own.
pub struct KernelState<M, C> {
    pub(crate) frames: FramePool<M>,
    pub(crate) kernel_table: PageTable,
    pub(crate) tasks: TaskManager,
    pub(crate) console: C,
    pub(crate) syscalls: SyscallTable<M>,
}

assert_impl_all!(KernelState<IdentityMemory, SbiConsole>: Send);

/// Identity-mapped range of the kernel address space.
#[derive(Debug, Clone, Copy)]
pub struct KernelRegion {
    pub name: &'static str,
    pub start: usize,
    pub end: usize,
    pub flags: PageFlags,
}

impl<M: PhysMemory, C: Console> KernelState<M, C> {
    /// Builds the kernel page table over `regions` and an empty task table.
    pub fn new(
        mut frames: FramePool<M>,
        console: C,
        stacks: &'static mut [KernelStack; MAX_TASKS],
        regions: &[KernelRegion],
    ) -> Result<Self, MapError> {
        let kernel_table = PageTable::new(&mut frames)?;
        for region in regions {
            let len = region.end.saturating_sub(region.start);
            kernel_table.map(
                &mut frames,
                VirtAddr(region.start),
                PhysAddr(region.start),
                len,
                region.flags,
            )?;
            log_debug!(
                target: "mm",
                "{} [0x{:x}, 0x{:x}) {:?}",
                region.name,
                region.start,
                region.end,
                region.flags
            );
        }
        Ok(Self {
            frames,
            kernel_table,
            tasks: TaskManager::new(stacks),
            console,
            syscalls: SyscallTable::with_default_handlers(),
        })
    }

    pub fn create_initial_tasks(&mut self, image: &[u8], count: usize) -> Result<(), TaskError> {
        self.tasks.create_initial_tasks(&mut self.frames, &self.kernel_table, image, count)
    }

    /// First scheduling decision, taken from the boot context.
    pub fn start(&mut self) -> Result<Dispatch, ScheduleError> {
        self.tasks.schedule()
    }

    pub fn kernel_table(&self) -> &PageTable {
        &self.kernel_table
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    pub fn frames(&self) -> &FramePool<M> {
        &self.frames
    }

    pub fn console(&self) -> &C {
        &self.console
    }
}

// ——— target runtime ———

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
static KERNEL: Mutex<Option<KernelState<IdentityMemory, SbiConsole>>> = Mutex::new(None);

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
static mut KERNEL_STACKS: [KernelStack; MAX_TASKS] = [KernelStack::EMPTY; MAX_TASKS];

/// Runs `f` on the kernel singleton. The lock is released when `f` returns.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub(crate) fn with_kernel<R>(
    f: impl FnOnce(&mut KernelState<IdentityMemory, SbiConsole>) -> R,
) -> R {
    let mut guard = KERNEL.lock();
    match guard.as_mut() {
        Some(kernel) => f(kernel),
        None => panic!("kernel state used before kmain"),
    }
}

/// Performs a trap action outside the kernel lock.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub(crate) fn carry_out(action: crate::trap::TrapAction) {
    use crate::hal::virt::VirtHart;
    use crate::trap::TrapAction;

    match action {
        TrapAction::Resume => {}
        // SAFETY: the plan points into the task table inside KERNEL, which is never dropped,
        // and the lock was released by `with_kernel`.
        TrapAction::Switch(plan) => unsafe { plan.perform(&VirtHart::new()) },
        TrapAction::Halt(reason) => halt(reason),
    }
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
fn halt(reason: crate::trap::HaltReason) -> ! {
    if reason.is_failure() {
        log_error!(target: "boot", "halt: {}", reason);
    } else {
        log_info!(target: "boot", "halt: {}", reason);
    }
    crate::arch::riscv::shutdown(reason.is_failure())
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
fn linker_regions() -> [KernelRegion; 5] {
    use crate::mm::layout::{MEMORY_END, PAGE_SIZE, UART0_BASE};

    extern "C" {
        static stext: u8;
        static etext: u8;
        static srodata: u8;
        static erodata: u8;
        static sdata: u8;
        static ekernel: u8;
    }
    // SAFETY: only the addresses of linker symbols are taken.
    let (text, text_end, rodata, rodata_end, data, kernel_end) = unsafe {
        (
            core::ptr::addr_of!(stext) as usize,
            core::ptr::addr_of!(etext) as usize,
            core::ptr::addr_of!(srodata) as usize,
            core::ptr::addr_of!(erodata) as usize,
            core::ptr::addr_of!(sdata) as usize,
            core::ptr::addr_of!(ekernel) as usize,
        )
    };
    let rw = PageFlags::READ | PageFlags::WRITE;
    [
        KernelRegion { name: ".text", start: text, end: text_end, flags: PageFlags::READ | PageFlags::EXECUTE },
        KernelRegion { name: ".rodata", start: rodata, end: rodata_end, flags: PageFlags::READ },
        KernelRegion { name: ".data/.bss", start: data, end: kernel_end, flags: rw },
        KernelRegion { name: "frames", start: kernel_end, end: MEMORY_END, flags: rw },
        KernelRegion { name: "uart0", start: UART0_BASE, end: UART0_BASE + PAGE_SIZE, flags: rw },
    ]
}

#[cfg(all(feature = "boot_banner", target_arch = "riscv64", target_os = "none"))]
fn banner() {
    log_info!(target: "boot", "   __ ___ _____  ___");
    log_info!(target: "boot", "  / _` \\ \\/ / _ \\| '_ \\");
    log_info!(target: "boot", " | (_| |>  < (_) | | | |");
    log_info!(target: "boot", "  \\__,_/_/\\_\\___/|_| |_|");
    log_info!(target: "boot", "axon vers. {} - sv39, round-robin, {} slots", env!("CARGO_PKG_VERSION"), MAX_TASKS);
}

/// Kernel main invoked by the boot crate once `.bss` is clear and traps are installed.
///
/// Builds the kernel address space over RAM past the image, turns paging on, creates
/// `initial_tasks` copies of `image` and switches into the first one. Never returns: the machine
/// halts once every task has exited or a fatal trap is seen.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn kmain(image: &'static [u8], initial_tasks: usize) -> ! {
    use crate::hal::virt::VirtHart;
    use crate::hal::Hart;
    use crate::mm::layout::MEMORY_END;
    use crate::mm::FrameAllocator;
    use crate::trap::{HaltReason, TrapAction};

    #[cfg(feature = "boot_banner")]
    banner();

    let regions = linker_regions();
    let allocator = FrameAllocator::new(PhysAddr(regions[3].start), PhysAddr(MEMORY_END));
    // SAFETY: RAM is identity mapped both before and after paging is enabled.
    let frames = FramePool::new(allocator, unsafe { IdentityMemory::new() });
    // SAFETY: kmain runs once; the stacks are handed out exactly here.
    let stacks = unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_STACKS) };
    let state = match KernelState::new(frames, SbiConsole, stacks, &regions) {
        Ok(state) => state,
        Err(err) => panic!("kernel page table: {:?}", err),
    };

    VirtHart::new().activate(state.kernel_table().satp());
    log_info!(
        target: "boot",
        "paging on (satp=0x{:x}, {} free frames)",
        state.kernel_table().satp(),
        state.frames().allocator().free_frames()
    );

    *KERNEL.lock() = Some(state);
    let action = with_kernel(|kernel| {
        if let Err(err) = kernel.create_initial_tasks(image, initial_tasks) {
            panic!("initial task creation failed: {:?}", err);
        }
        match kernel.start() {
            Ok(Dispatch::Switch(plan)) => TrapAction::Switch(plan),
            Ok(Dispatch::Stay) => TrapAction::Resume,
            Err(err) => TrapAction::Halt(err.into()),
        }
    });
    carry_out(action);
    // Nothing switches back into the boot context.
    halt(HaltReason::AllTasksFinished)
}
