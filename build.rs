//! Locates and links the vendored mruby library, and compiles the small C
//! shim (`csrc/shim.c`) that exposes the handful of mruby internals not
//! reachable through its public headers.
//!
//! Resolution order: `pkg-config` first (the common case on a system with
//! mruby installed as a shared/static library), falling back to the
//! `MRUBY_LIB_DIR` / `MRUBY_INCLUDE_DIR` environment variables for a
//! vendored or out-of-tree build.

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=csrc/shim.c");
    println!("cargo:rerun-if-env-changed=MRUBY_LIB_DIR");
    println!("cargo:rerun-if-env-changed=MRUBY_INCLUDE_DIR");

    let include_dir = match pkg_config::probe_library("mruby") {
        Ok(lib) => lib.include_paths.first().cloned(),
        Err(_) => {
            let lib_dir = env::var("MRUBY_LIB_DIR")
                .expect("mruby not found via pkg-config; set MRUBY_LIB_DIR and MRUBY_INCLUDE_DIR");
            println!("cargo:rustc-link-search=native={lib_dir}");
            println!("cargo:rustc-link-lib=static=mruby");
            env::var("MRUBY_INCLUDE_DIR").ok().map(PathBuf::from)
        }
    };

    let mut build = cc::Build::new();
    build.file("csrc/shim.c");
    if let Some(dir) = include_dir {
        build.include(dir);
    }
    build.warnings(true).compile("mrb_sandbox_shim");
}
