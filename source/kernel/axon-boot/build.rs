use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=AXON_USER_IMAGE");
    println!("cargo:rerun-if-env-changed=AXON_INITIAL_TASKS");
    println!("cargo:rustc-check-cfg=cfg(axon_user_image)");

    let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    let os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if arch != "riscv64" || os != "none" {
        // Host builds only type-check the wrapper.
        return;
    }

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let linker_script = manifest_dir.join("kernel.ld");
    println!("cargo:rerun-if-changed={}", linker_script.display());
    // Use canonicalize to ensure only a single absolute path reaches the linker
    let abs_script = linker_script.canonicalize().expect("kernel.ld must exist");
    println!("cargo:rustc-link-arg=-T{}", abs_script.display());

    if let Some(image) = env::var_os("AXON_USER_IMAGE") {
        let image = PathBuf::from(image)
            .canonicalize()
            .expect("AXON_USER_IMAGE must point at a flat user binary");
        let len = std::fs::metadata(&image).map(|meta| meta.len()).unwrap_or(0);
        assert!(len > 0, "user image {} is empty", image.display());
        println!("cargo:rerun-if-changed={}", image.display());
        println!("cargo:rustc-env=AXON_USER_IMAGE_PATH={}", image.display());
        println!("cargo:rustc-cfg=axon_user_image");
    }
}
