//! Build script for callback-registry
//!
//! Compiles the bundled native module (plain C) that calls back into the
//! registry through the trampoline, and links it statically.

use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=native/cbr_native.c");
    println!("cargo:rerun-if-changed=native/cbr_native.h");

    let native_dir = PathBuf::from("native");

    cc::Build::new()
        .file(native_dir.join("cbr_native.c"))
        .include(&native_dir)
        .flag_if_supported("-std=c99")
        .warnings(true)
        .compile("cbr_native");
}
