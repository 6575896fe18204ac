//! Build script for callback-registry-cli
//!
//! Builds the bundled native module a second time as a shared library, so the
//! external-library route can be exercised against a real `cbr_invoke`
//! export. Failing to build it only disables those tests.

use std::env;
use std::path::PathBuf;

fn main() {
    let source = PathBuf::from("../callback-registry/native/cbr_native.c");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed={}", source.display());

    if env::var("CARGO_CFG_TARGET_FAMILY").as_deref() != Ok("unix") {
        return;
    }
    let Some(out_dir) = env::var_os("OUT_DIR").map(PathBuf::from) else {
        return;
    };
    let output = out_dir.join("libcbr_external.so");

    let compiler = cc::Build::new().get_compiler();
    let status = compiler
        .to_command()
        .arg("-std=c99")
        .arg("-shared")
        .arg("-fPIC")
        .arg("-I../callback-registry/native")
        .arg("-o")
        .arg(&output)
        .arg(&source)
        .status();

    match status {
        Ok(status) if status.success() => {
            println!("cargo:rustc-env=CBR_EXTERNAL_MODULE={}", output.display());
        }
        Ok(status) => {
            println!("cargo:warning=shared native module not built ({})", status);
        }
        Err(err) => {
            println!("cargo:warning=shared native module not built ({})", err);
        }
    }
}
