// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Build script for the fork-demo user program
//! OWNERS: @runtime
//!
//! Links at the user code base only when building for the bare-metal target.

fn main() {
    println!("cargo:rerun-if-changed=user.ld");
    let arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    let os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if arch != "riscv64" || os != "none" {
        return;
    }
    let out = std::path::PathBuf::from(std::env::var("OUT_DIR").expect("OUT_DIR"));
    let dst = out.join("user.ld");
    std::fs::copy("user.ld", &dst).expect("copy user.ld");
    println!("cargo:rustc-link-arg=-T{}", dst.display());
}
