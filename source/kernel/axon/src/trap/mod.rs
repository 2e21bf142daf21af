// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Trap handling: external ASM prologue/epilogue + safe Rust core.
//!
//! `__trap_vector` saves the user registers into the current task's [`TrapContext`] and calls
//! [`trap_handler`], which locks the kernel singleton just long enough to compute a
//! [`TrapAction`]. Switching and halting happen after the lock is dropped.

mod context;


pub use context::TrapContext;

use core::fmt::{self, Write};
use spin::Mutex;

use crate::hal::Console;
use crate::kmain::KernelState;
use crate::mm::PhysMemory;
use crate::sched::{Dispatch, ScheduleError, SwitchPlan};
use crate::syscall::{api, Args, Completion, Error as SysError};

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
core::arch::global_asm!(
    include_str!("../arch/riscv/trap.S"),
    TF_SIZE = const core::mem::size_of::<TrapContext>(),
    OFF_SSTATUS = const core::mem::offset_of!(TrapContext, sstatus),
    OFF_SEPC = const core::mem::offset_of!(TrapContext, sepc),
);

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
extern "C" {
    fn __trap_vector();
}

const INTERRUPT_FLAG: usize = usize::MAX - (usize::MAX >> 1);
const CAUSE_USER_ECALL: usize = 8;

/// Decoded `scause`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCause {
    Interrupt(usize),
    UserEcall,
    Exception { scause: usize, stval: usize },
}

impl TrapCause {
    pub const fn decode(scause: usize, stval: usize) -> Self {
        if is_interrupt(scause) {
            TrapCause::Interrupt(scause & !INTERRUPT_FLAG)
        } else if scause == CAUSE_USER_ECALL {
            TrapCause::UserEcall
        } else {
            TrapCause::Exception { scause, stval }
        }
    }
}

/// What the assembly return path has to do next.
#[must_use = "trap actions must be carried out"]
#[derive(Debug)]
pub enum TrapAction {
    /// Return to the interrupted task.
    Resume,
    Switch(SwitchPlan),
    Halt(HaltReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    AllTasksFinished,
    UnknownSyscall { id: usize, sepc: usize },
    Fault { scause: usize, stval: usize, sepc: usize },
    /// A trap arrived while no task was current.
    NoCurrentTask,
    MissingAddressSpace(usize),
}

impl HaltReason {
    /// True when the machine stops because something went wrong.
    pub const fn is_failure(self) -> bool {
        !matches!(self, HaltReason::AllTasksFinished)
    }
}

impl From<ScheduleError> for HaltReason {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::AllTasksFinished => HaltReason::AllTasksFinished,
            ScheduleError::MissingAddressSpace(slot) => HaltReason::MissingAddressSpace(slot),
        }
    }
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HaltReason::AllTasksFinished => f.write_str("all tasks finished"),
            HaltReason::UnknownSyscall { id, sepc } => {
                write!(f, "unknown syscall {} at sepc=0x{:x}", id, sepc)
            }
            HaltReason::Fault { scause, stval, sepc } => write!(
                f,
                "{} scause=0x{:x} stval=0x{:x} sepc=0x{:x}",
                describe_cause(scause),
                scause,
                stval,
                sepc
            ),
            HaltReason::NoCurrentTask => f.write_str("trap without a current task"),
            HaltReason::MissingAddressSpace(slot) => {
                write!(f, "slot {} runnable without a page table", slot)
            }
        }
    }
}

impl<M: PhysMemory, C: Console> KernelState<M, C> {
    /// Handles one trap taken by the current task.
    pub fn on_trap(&mut self, cause: TrapCause) -> TrapAction {
        match cause {
            TrapCause::Interrupt(_) => TrapAction::Resume,
            TrapCause::UserEcall => self.on_syscall(),
            TrapCause::Exception { scause, stval } => self.on_fault(scause, stval),
        }
    }

    fn on_syscall(&mut self) -> TrapAction {
        let Some(slot) = self.tasks.current() else {
            return TrapAction::Halt(HaltReason::NoCurrentTask);
        };
        let cx = self.tasks.trap_context_mut(slot);
        let (id, sepc) = (cx.syscall_id(), cx.sepc);
        let args = Args::new([cx.arg(0), cx.arg(1), cx.arg(2)]);
        // Resume after the ecall; fork copies the context with this already applied.
        cx.advance_pc();

        let mut ctx = api::Context {
            tasks: &mut self.tasks,
            frames: &mut self.frames,
            kernel_table: &self.kernel_table,
            console: &mut self.console,
        };
        match self.syscalls.dispatch(id, &mut ctx, &args) {
            Ok(Completion::Return(value)) => {
                self.tasks.trap_context_mut(slot).set_return(value);
                TrapAction::Resume
            }
            Ok(Completion::Yield) => after_schedule(self.tasks.yield_current()),
            Ok(Completion::Exit(_)) => {
                after_schedule(self.tasks.exit_current(&mut self.frames, &self.kernel_table))
            }
            Err(SysError::InvalidSyscall(id)) => {
                log_error!(target: "trap", "slot {} issued unknown syscall {}", slot, id);
                TrapAction::Halt(HaltReason::UnknownSyscall { id, sepc })
            }
            Err(err) => {
                log_warn!(target: "syscall", "slot {} syscall {} failed: {}", slot, id, err);
                self.tasks.trap_context_mut(slot).set_return(err.errno() as usize);
                TrapAction::Resume
            }
        }
    }

    fn on_fault(&mut self, scause: usize, stval: usize) -> TrapAction {
        let slot = self.tasks.current();
        let sepc = slot.map_or(0, |slot| self.tasks.trap_context(slot).sepc);
        log_error!(
            target: "trap",
            "{} in slot {:?}: scause=0x{:x} stval=0x{:x} sepc=0x{:x}",
            describe_cause(scause),
            slot,
            scause,
            stval,
            sepc
        );
        #[cfg(feature = "kill_faulting_task")]
        if slot.is_some() {
            return after_schedule(self.tasks.exit_current(&mut self.frames, &self.kernel_table));
        }
        TrapAction::Halt(HaltReason::Fault { scause, stval, sepc })
    }
}

fn after_schedule(result: Result<Dispatch, ScheduleError>) -> TrapAction {
    match result {
        Ok(Dispatch::Stay) => TrapAction::Resume,
        Ok(Dispatch::Switch(plan)) => TrapAction::Switch(plan),
        Err(ScheduleError::AllTasksFinished) => {
            log_info!(target: "sched", "all tasks finished");
            TrapAction::Halt(HaltReason::AllTasksFinished)
        }
        Err(err) => TrapAction::Halt(err.into()),
    }
}

// ——— diagnostics ———

/// Summary of the most recent trap, kept for the panic handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapRecord {
    pub scause: usize,
    pub stval: usize,
    pub sepc: usize,
    /// a0..a7 at trap entry.
    pub args: [usize; 8],
}

impl TrapRecord {
    pub fn capture(scause: usize, stval: usize, cx: &TrapContext) -> Self {
        let mut args = [0; 8];
        args.copy_from_slice(&cx.x[10..=17]);
        Self { scause, stval, sepc: cx.sepc, args }
    }
}

static LAST_TRAP: Mutex<Option<TrapRecord>> = Mutex::new(None);

pub fn record(trap: TrapRecord) {
    *LAST_TRAP.lock() = Some(trap);
}

/// Last recorded trap; `None` if the lock is held (panic inside the trap path).
pub fn last_trap() -> Option<TrapRecord> {
    LAST_TRAP.try_lock().and_then(|guard| *guard)
}

#[inline]
pub const fn is_interrupt(scause: usize) -> bool {
    scause & INTERRUPT_FLAG != 0
}

pub fn describe_cause(scause: usize) -> &'static str {
    let code = scause & !INTERRUPT_FLAG;
    if is_interrupt(scause) {
        match code {
            1 => "SupervisorSoftInt",
            5 => "SupervisorTimerInt",
            9 => "SupervisorExternalInt",
            _ => "Interrupt",
        }
    } else {
        match code {
            0 => "InstructionAddressMisaligned",
            1 => "InstructionAccessFault",
            2 => "IllegalInstruction",
            3 => "Breakpoint",
            4 => "LoadAddressMisaligned",
            5 => "LoadAccessFault",
            6 => "StoreAMOAddressMisaligned",
            7 => "StoreAMOAccessFault",
            8 => "EnvironmentCallFromUMode",
            9 => "EnvironmentCallFromSMode",
            12 => "InstructionPageFault",
            13 => "LoadPageFault",
            15 => "StoreAMOPageFault",
            _ => "Exception",
        }
    }
}

pub fn fmt_trap<W: Write>(trap: &TrapRecord, f: &mut W) -> fmt::Result {
    writeln!(f, " sepc=0x{:016x}", trap.sepc)?;
    writeln!(f, " scause=0x{:016x} ({})", trap.scause, describe_cause(trap.scause))?;
    writeln!(f, " stval=0x{:016x}", trap.stval)?;
    writeln!(f, " a0..a7 = {:016x?}", trap.args)
}

/// Points `stvec` at `__trap_vector` and clears `sscratch` (no task is running yet).
///
/// # Safety
///
/// Must run once on the boot hart before the first switch to user mode.
pub unsafe fn install_trap_vector() {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        riscv::register::stvec::write(
            __trap_vector as usize,
            riscv::register::mtvec::TrapMode::Direct,
        );
        riscv::register::sscratch::write(0);
    }
}

/// Rust half of the trap path. Returns the context `__restore` resumes from, which is always
/// the trapping task's own: other tasks are entered through `__switch`.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[no_mangle]
extern "C" fn trap_handler(cx: *mut TrapContext) -> *mut TrapContext {
    let scause = riscv::register::scause::read().bits();
    let stval = riscv::register::stval::read();
    // SAFETY: `cx` was just written by `__trap_vector` on this task's kernel stack.
    record(TrapRecord::capture(scause, stval, unsafe { &*cx }));
    let action = crate::kmain::with_kernel(|kernel| kernel.on_trap(TrapCause::decode(scause, stval)));
    crate::kmain::carry_out(action);
    cx
}
