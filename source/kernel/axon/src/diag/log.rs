// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Minimal structured logging with severity levels
//! OWNERS: @kernel-team
//! PUBLIC API: log_* macros, emit(level,target,args)
//! DEPENDS_ON: uart::KernelUart (target), thread-local capture buffer (host tests)
//! INVARIANTS: Debug/Trace only in debug builds; single-line emission; never touches user console

use core::fmt::{Arguments, Write};

/// Logging severity used by the kernel.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Level {
    const fn tag(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn enabled(self) -> bool {
        match self {
            Level::Debug | Level::Trace => cfg!(debug_assertions),
            _ => true,
        }
    }
}

/// Emits a structured `[LEVEL target] message` line if the level is enabled for this build.
pub fn emit(level: Level, target: &'static str, args: Arguments<'_>) {
    if !level.enabled() {
        return;
    }

    #[cfg(test)]
    capture::with(|line| {
        let _ = write_line(line, level, target, args);
    });

    #[cfg(not(test))]
    {
        let mut uart = crate::uart::KernelUart::lock();
        let _ = write_line(&mut *uart, level, target, args);
    }
}

fn write_line<W: Write + ?Sized>(
    out: &mut W,
    level: Level,
    target: &'static str,
    args: Arguments<'_>,
) -> core::fmt::Result {
    write!(out, "[{} {}] ", level.tag(), target)?;
    out.write_fmt(args)?;
    out.write_char('\n')
}

/// Per-thread log capture so host tests can assert on kernel diagnostics.
#[cfg(test)]
pub mod capture {
    use std::cell::RefCell;
    use std::string::String;

    std::thread_local! {
        static LINES: RefCell<String> = RefCell::new(String::new());
    }

    pub(super) fn with(f: impl FnOnce(&mut String)) {
        LINES.with(|lines| f(&mut lines.borrow_mut()));
    }

    /// Drains everything logged on the current thread so far.
    pub fn take() -> String {
        LINES.with(|lines| core::mem::take(&mut *lines.borrow_mut()))
    }
}

#[macro_export]
macro_rules! log_error {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Error, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Error, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_warn {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Warn, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Warn, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_info {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Info, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Info, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_debug {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Debug, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Debug, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_trace {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Trace, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Trace, module_path!(), format_args!($($arg)+));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_carry_level_and_target() {
        let _ = capture::take();
        log_warn!(target: "mm", "out of frames at {:#x}", 0x8800_0000usize);
        log_error!(target: "trap", "fatal");
        let out = capture::take();
        assert_eq!(out, "[WARN mm] out of frames at 0x88000000\n[ERROR trap] fatal\n");
    }

    #[test]
    fn debug_level_follows_build_profile() {
        let _ = capture::take();
        log_debug!(target: "sched", "pick {}", 1);
        let out = capture::take();
        assert_eq!(out.is_empty(), !cfg!(debug_assertions));
    }
}
