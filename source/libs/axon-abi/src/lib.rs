// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(all(target_arch = "riscv64", target_os = "none")), forbid(unsafe_code))]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Userspace syscall wrappers for the AXON kernel
//! OWNERS: @runtime
//! PUBLIC API: write, read, exit, yield_, fork, SysResult, AbiError, ForkResult, SYSCALL_* IDs
//! DEPENDS_ON: no_std, riscv ecall asm (OS)
//! INVARIANTS: Number in a7, arguments in a0..a2, result in a0; negative results are errno
//!             values; host builds return `AbiError::Unsupported` instead of trapping

/// `read(fd, buf, len)`.
pub const SYSCALL_READ: usize = 63;
/// `write(fd, buf, len)`.
pub const SYSCALL_WRITE: usize = 64;
/// `exit(code)`.
pub const SYSCALL_EXIT: usize = 93;
/// `yield()`.
pub const SYSCALL_YIELD: usize = 124;
/// `fork()`.
pub const SYSCALL_FORK: usize = 220;

/// Standard input descriptor (the only one `read` serves).
pub const STDIN: usize = 0;
/// Standard output descriptor.
pub const STDOUT: usize = 1;

/// Result type returned by syscall wrappers.
pub type SysResult<T> = core::result::Result<T, AbiError>;

/// Errors surfaced when invoking syscalls from userland.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbiError {
    /// A buffer was not mapped with the access the kernel needed (EFAULT).
    BadAddress,
    /// No free task slot for the new task (EAGAIN).
    TryAgain,
    /// Kernel ran out of frames (ENOMEM).
    OutOfMemory,
    /// The kernel saw no calling task (ESRCH).
    NoSuchTask,
    /// Syscall number is not implemented by the kernel build (ENOSYS).
    InvalidSyscall,
    /// Any other negative result.
    Other(usize),
    /// Operation unsupported on the current build target.
    Unsupported,
}

impl AbiError {
    #[cfg_attr(not(all(target_arch = "riscv64", target_os = "none")), allow(dead_code))]
    fn from_raw(value: usize) -> Option<Self> {
        if (value as isize) >= 0 {
            return None;
        }
        // Kernel returns negative errno values for syscall failures.
        Some(match (value as isize).unsigned_abs() {
            14 => Self::BadAddress,    // EFAULT
            11 => Self::TryAgain,      // EAGAIN
            12 => Self::OutOfMemory,   // ENOMEM
            3 => Self::NoSuchTask,     // ESRCH
            38 => Self::InvalidSyscall, // ENOSYS
            errno => Self::Other(errno),
        })
    }
}

/// Which side of a successful [`fork`] the caller is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkResult {
    /// Running in the new task.
    Child,
    /// Running in the forking task; `child` is the new task's slot.
    Parent {
        /// Slot index of the child task.
        child: usize,
    },
}

impl ForkResult {
    #[cfg_attr(not(all(target_arch = "riscv64", target_os = "none")), allow(dead_code))]
    fn from_raw(value: usize) -> Self {
        match value {
            0 => Self::Child,
            child => Self::Parent { child },
        }
    }
}

#[cfg_attr(not(all(target_arch = "riscv64", target_os = "none")), allow(dead_code))]
fn decode_syscall(value: usize) -> SysResult<usize> {
    if let Some(err) = AbiError::from_raw(value) {
        Err(err)
    } else {
        Ok(value)
    }
}

// ——— Syscall wrappers ———

/// Writes `buf` to the console. Returns the number of bytes written.
pub fn write(fd: usize, buf: &[u8]) -> SysResult<usize> {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    {
        // SAFETY: the kernel only reads `buf.len()` bytes starting at `buf`.
        let raw = unsafe { ecall3(SYSCALL_WRITE, fd, buf.as_ptr() as usize, buf.len()) };
        decode_syscall(raw)
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        let _ = (fd, buf);
        Err(AbiError::Unsupported)
    }
}

/// Waits for console input and stores one byte at the start of `buf`. Returns 1, or 0 for an
/// empty buffer or a descriptor other than [`STDIN`].
pub fn read(fd: usize, buf: &mut [u8]) -> SysResult<usize> {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    {
        // SAFETY: the kernel writes at most one byte into `buf`.
        let raw = unsafe { ecall3(SYSCALL_READ, fd, buf.as_mut_ptr() as usize, buf.len()) };
        decode_syscall(raw)
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        let _ = (fd, buf);
        Err(AbiError::Unsupported)
    }
}

/// Cooperative yield to the next runnable task.
pub fn yield_() -> SysResult<()> {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    {
        let raw = unsafe {
            // SAFETY: performs a kernel ecall with no arguments; return value is decoded below.
            ecall0(SYSCALL_YIELD)
        };
        decode_syscall(raw).map(|_| ())
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        Err(AbiError::Unsupported)
    }
}

/// Duplicates the calling task. Both tasks return from this call.
///
/// The parent receives the child's slot index. A child placed in slot 0 therefore makes both
/// tasks see [`ForkResult::Child`].
pub fn fork() -> SysResult<ForkResult> {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    {
        // SAFETY: fork takes no arguments; the child resumes here with a0 = 0.
        let raw = unsafe { ecall0(SYSCALL_FORK) };
        decode_syscall(raw).map(ForkResult::from_raw)
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        Err(AbiError::Unsupported)
    }
}

/// Terminates the current task with the provided exit `status`.
pub fn exit(status: i32) -> ! {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        let _ = ecall1(SYSCALL_EXIT, status as usize);
        loop {
            core::hint::spin_loop();
        }
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        let _ = status;
        loop {
            core::hint::spin_loop();
        }
    }
}

// ——— Architecture-specific ecall helpers (riscv64, OS) ———
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[allow(unused_assignments)]
#[inline(always)]
unsafe fn ecall0(n: usize) -> usize {
    let mut r7 = n;
    let r0: usize;
    core::arch::asm!(
        "ecall",
        inout("a7") r7,
        lateout("a0") r0,
        clobber_abi("C"),
        options(nostack)
    );
    r0
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[allow(unused_assignments)]
#[inline(always)]
unsafe fn ecall1(n: usize, a0: usize) -> usize {
    let mut r0 = a0;
    let mut r7 = n;
    core::arch::asm!(
        "ecall",
        inout("a0") r0,
        inout("a7") r7,
        clobber_abi("C"),
        options(nostack)
    );
    r0
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[allow(unused_assignments)]
#[inline(always)]
unsafe fn ecall3(n: usize, a0: usize, a1: usize, a2: usize) -> usize {
    let mut r0 = a0;
    let mut r1 = a1;
    let mut r2 = a2;
    let mut r7 = n;
    core::arch::asm!(
        "ecall",
        inout("a0") r0,
        inout("a1") r1,
        inout("a2") r2,
        inout("a7") r7,
        clobber_abi("C"),
        options(nostack)
    );
    r0
}
