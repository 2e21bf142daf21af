// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Boot wrapper for the AXON kernel. Provides the `_start` entry point, the boot stack and the
//! user program image, then hands execution to `axon::kmain()`.
//!
//! The image is the flat binary named by `AXON_USER_IMAGE` at build time, or a built-in program
//! that writes "hi", yields once and exits.
#![cfg_attr(all(target_arch = "riscv64", target_os = "none"), no_std, no_main)]

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
core::arch::global_asm!(
    r#"
    .section .text._start, "ax", @progbits
    .globl _start
    .align 4
_start:
    la   sp, __stack_top
    /* RISC-V ABI: initialize gp for small-data accesses (Rust may rely on it).
     * Use PC-relative addressing (kernel is linked above 2GiB). */
    .option push
    .option norelax
    la   gp, __global_pointer$
    .option pop
    j    start_rust

    .section .bss.stack, "aw", @nobits
    .align 12
    .space 4096 * 16
"#
);

#[cfg(all(target_arch = "riscv64", target_os = "none", not(axon_user_image)))]
core::arch::global_asm!(
    r#"
    .section .rodata.app, "a", @progbits
    .balign 4
    .globl _app_start
    .globl _app_end
    .option push
    .option norelax
_app_start:
    li   a7, 64
    li   a0, 1
    lla  a1, .Lapp_msg
    li   a2, 2
    ecall
    li   a7, 124
    ecall
    li   a7, 93
    li   a0, 0
    ecall
.Lapp_spin:
    j    .Lapp_spin
.Lapp_msg:
    .ascii "hi"
_app_end:
    .option pop
"#
);

#[cfg(all(target_arch = "riscv64", target_os = "none", axon_user_image))]
static USER_IMAGE: &[u8] = include_bytes!(env!("AXON_USER_IMAGE_PATH"));

#[cfg(all(target_arch = "riscv64", target_os = "none", axon_user_image))]
fn user_image() -> &'static [u8] {
    USER_IMAGE
}

#[cfg(all(target_arch = "riscv64", target_os = "none", not(axon_user_image)))]
fn user_image() -> &'static [u8] {
    extern "C" {
        static _app_start: u8;
        static _app_end: u8;
    }
    // SAFETY: both symbols delimit the built-in program in `.rodata.app`.
    unsafe {
        let start = core::ptr::addr_of!(_app_start);
        let len = core::ptr::addr_of!(_app_end) as usize - start as usize;
        core::slice::from_raw_parts(start, len)
    }
}

/// Task count from `AXON_INITIAL_TASKS`, falling back to the kernel default.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
fn initial_tasks() -> usize {
    option_env!("AXON_INITIAL_TASKS")
        .and_then(|value| value.parse().ok())
        .unwrap_or(axon::INITIAL_TASKS)
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[no_mangle]
pub extern "C" fn start_rust() -> ! {
    // SAFETY: Early boot runs before the Rust runtime. Only the boot hart executes this path,
    // so calling the raw initialisation routine is sound here.
    unsafe { axon::early_boot_init() };
    axon::kmain(user_image(), initial_tasks())
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
fn main() {}
