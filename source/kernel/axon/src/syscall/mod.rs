// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall numbers, dispatch table and error encoding
//! OWNERS: @kernel-team
//! PUBLIC API: SyscallTable, Args, Completion, Error, Handler, SYSCALL_* IDs
//! DEPENDS_ON: syscall::api (handlers), task (fork errors), mm (user copies)
//! INVARIANTS: Stable IDs; handlers never switch tasks themselves, they report a Completion
//!             and the trap path carries it out

pub mod api;

use core::fmt;

use crate::mm::{MapError, PhysMemory};
use crate::task::ForkError;

/// Dispatch window; every public ID is below it.
const MAX_SYSCALL: usize = 256;

pub type SysResult<T> = Result<T, Error>;

pub const SYSCALL_READ: usize = 63;
pub const SYSCALL_WRITE: usize = 64;
pub const SYSCALL_EXIT: usize = 93;
pub const SYSCALL_YIELD: usize = 124;
pub const SYSCALL_FORK: usize = 220;

const EAGAIN: isize = 11;
const ENOMEM: isize = 12;
const EFAULT: isize = 14;
const ESRCH: isize = 3;
const ENOSYS: isize = 38;

/// Syscall arguments passed in registers a0-a2.
#[derive(Default, Clone, Copy, Debug)]
pub struct Args {
    regs: [usize; 3],
}

impl Args {
    pub const fn new(regs: [usize; 3]) -> Self {
        Self { regs }
    }

    pub fn get(&self, index: usize) -> usize {
        self.regs[index]
    }
}

/// How a handler finished, as seen by the trap path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Store the value in a0 and resume the caller.
    Return(usize),
    /// Reschedule; the caller stays runnable.
    Yield,
    /// The caller is gone; reschedule without it.
    Exit(i32),
}

/// Error returned by the dispatcher and handler stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Syscall number not present in the dispatch table. Fatal for the machine.
    InvalidSyscall(usize),
    /// User buffer not mapped with the required access.
    BadAddress(usize),
    /// Kernel-side page-table or frame failure.
    Memory(MapError),
    Fork(ForkError),
    /// A syscall arrived while no task was current.
    NoCurrentTask,
}

impl From<MapError> for Error {
    fn from(value: MapError) -> Self {
        match value {
            MapError::Fault { va } => Self::BadAddress(va),
            other => Self::Memory(other),
        }
    }
}

impl From<ForkError> for Error {
    fn from(value: ForkError) -> Self {
        Self::Fork(value)
    }
}

impl Error {
    /// Negative errno delivered to user space in a0.
    pub const fn errno(self) -> isize {
        -match self {
            Error::InvalidSyscall(_) => ENOSYS,
            Error::BadAddress(_) => EFAULT,
            Error::Memory(_) | Error::Fork(ForkError::Memory(_)) => ENOMEM,
            Error::Fork(ForkError::NoFreeSlot) => EAGAIN,
            Error::NoCurrentTask | Error::Fork(ForkError::NoCurrentTask) => ESRCH,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Type alias for a syscall handler.
pub type Handler<M> = fn(&mut api::Context<'_, M>, &Args) -> SysResult<Completion>;

/// Dispatch table storing handlers by syscall number.
pub struct SyscallTable<M> {
    handlers: [Option<Handler<M>>; MAX_SYSCALL],
}

impl<M: PhysMemory> SyscallTable<M> {
    /// Creates an empty dispatch table.
    pub fn new() -> Self {
        Self { handlers: [None; MAX_SYSCALL] }
    }

    /// Table with every kernel syscall registered.
    pub fn with_default_handlers() -> Self {
        let mut table = Self::new();
        api::install_handlers(&mut table);
        table
    }

    pub fn register(&mut self, number: usize, handler: Handler<M>) {
        if number < MAX_SYSCALL {
            self.handlers[number] = Some(handler);
        }
    }

    /// Executes the handler referenced by `number`.
    pub fn dispatch(
        &self,
        number: usize,
        ctx: &mut api::Context<'_, M>,
        args: &Args,
    ) -> SysResult<Completion> {
        #[cfg(feature = "trace_syscall")]
        log_debug!(target: "syscall", "id={} args={:x?}", number, args);
        self.handlers
            .get(number)
            .and_then(|entry| *entry)
            .ok_or(Error::InvalidSyscall(number))
            .and_then(|handler| handler(ctx, args))
    }
}

impl<M: PhysMemory> Default for SyscallTable<M> {
    fn default() -> Self {
        Self::with_default_handlers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::ArenaMemory;
    use crate::testing::{kernel, BufferConsole};

    fn answer(_ctx: &mut api::Context<'_, ArenaMemory>, args: &Args) -> SysResult<Completion> {
        Ok(Completion::Return(args.get(0) + 42))
    }

    fn with_context<R>(f: impl FnOnce(&mut api::Context<'_, ArenaMemory>) -> R) -> R {
        let mut k = kernel(b"\x73\x00\x00\x00", 1);
        let mut console = BufferConsole::default();
        let mut ctx = api::Context {
            tasks: &mut k.tasks,
            frames: &mut k.frames,
            kernel_table: &k.kernel_table,
            console: &mut console,
        };
        f(&mut ctx)
    }

    #[test]
    fn unregistered_numbers_are_invalid() {
        let table = SyscallTable::<ArenaMemory>::new();
        with_context(|ctx| {
            assert_eq!(
                table.dispatch(SYSCALL_WRITE, ctx, &Args::default()),
                Err(Error::InvalidSyscall(SYSCALL_WRITE))
            );
            assert_eq!(
                table.dispatch(usize::MAX, ctx, &Args::default()),
                Err(Error::InvalidSyscall(usize::MAX))
            );
        });
    }

    #[test]
    fn registered_handler_receives_arguments() {
        let mut table = SyscallTable::<ArenaMemory>::new();
        table.register(7, answer);
        table.register(MAX_SYSCALL, answer);
        with_context(|ctx| {
            assert_eq!(
                table.dispatch(7, ctx, &Args::new([1, 0, 0])),
                Ok(Completion::Return(43))
            );
            assert!(table.dispatch(MAX_SYSCALL, ctx, &Args::default()).is_err());
        });
    }

    #[test]
    fn yield_and_exit_report_completions() {
        let table = SyscallTable::<ArenaMemory>::with_default_handlers();
        with_context(|ctx| {
            assert_eq!(
                table.dispatch(SYSCALL_YIELD, ctx, &Args::default()),
                Ok(Completion::Yield)
            );
            assert_eq!(
                table.dispatch(SYSCALL_EXIT, ctx, &Args::new([(-3i32) as usize, 0, 0])),
                Ok(Completion::Exit(-3))
            );
        });
    }

    #[test]
    fn errors_encode_as_negative_errno() {
        assert_eq!(Error::from(MapError::Fault { va: 0x10 }), Error::BadAddress(0x10));
        assert_eq!(Error::BadAddress(0).errno(), -14);
        assert_eq!(Error::Fork(ForkError::NoFreeSlot).errno(), -11);
        assert_eq!(Error::Fork(ForkError::Memory(MapError::OutOfMemory)).errno(), -12);
        assert_eq!(Error::from(MapError::OutOfMemory).errno(), -12);
        assert_eq!(Error::NoCurrentTask.errno(), -3);
        assert_eq!(Error::InvalidSyscall(5).errno(), -38);
    }
}
