// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: User program exercising fork, yield and exit on AXON
//! OWNERS: @runtime
//!
//! Build for `riscv64gc-unknown-none-elf`, flatten with `objcopy -O binary` and pass the result
//! to the boot crate through `AXON_USER_IMAGE`. Expected console output interleaves parent and
//! child lines in round-robin order.
#![cfg_attr(all(target_arch = "riscv64", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "riscv64", target_os = "none"), no_main)]

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
use axon_abi as abi;
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
use core::panic::PanicInfo;

/// The kernel enters at the image base with `sp` at the top of the user stack page.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
core::arch::global_asm!(
    r#"
    .section .text._start, "ax", @progbits
    .globl _start
_start:
    .option push
    .option norelax
    lla  gp, __global_pointer$
    .option pop
    j    demo_main
"#
);

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
fn say(line: &str) {
    let _ = abi::write(abi::STDOUT, line.as_bytes());
}

/// Formats `value` in decimal into `buf`, returning the used tail.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
fn decimal(mut value: usize, buf: &mut [u8; 20]) -> &[u8] {
    let mut start = buf.len();
    loop {
        start -= 1;
        buf[start] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            return &buf[start..];
        }
    }
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[no_mangle]
extern "C" fn demo_main() -> ! {
    say("I am the parent. Calling fork()...\n");
    match abi::fork() {
        Ok(abi::ForkResult::Child) => {
            say("  [child] running\n");
            say("  [child] yielding\n");
            let _ = abi::yield_();
            say("  [child] back, bye\n");
            abi::exit(0)
        }
        Ok(abi::ForkResult::Parent { child }) => {
            let mut buf = [0u8; 20];
            say("  [parent] fork ok, child slot ");
            let _ = abi::write(abi::STDOUT, decimal(child, &mut buf));
            say("\n  [parent] yielding to child\n");
            let _ = abi::yield_();
            say("  [parent] back, bye\n");
            abi::exit(0)
        }
        Err(_) => {
            say("  [parent] fork failed\n");
            abi::exit(1)
        }
    }
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[panic_handler]
fn panic(_: &PanicInfo) -> ! {
    abi::exit(101)
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
fn main() {}
