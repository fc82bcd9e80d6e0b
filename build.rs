//! Build script for the native test fixture
//!
//! Compiles `testdata/fixture.c` into a shared library using the host C
//! compiler so the integration tests have a real C-ABI library to call.
//! The fixture is test-only: when no usable compiler is available the build
//! emits a warning and the integration tests skip themselves at runtime.

use std::env;
use std::path::PathBuf;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=testdata/fixture.c");

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let fixture = out_dir.join(fixture_filename());

    // The tests read this path and skip when nothing exists there.
    println!("cargo:rustc-env=FFIKIT_FIXTURE_LIB={}", fixture.display());

    let compiler = match cc::Build::new()
        .opt_level(2)
        .cargo_metadata(false)
        .try_get_compiler()
    {
        Ok(compiler) => compiler,
        Err(e) => {
            println!("cargo:warning=no C compiler for test fixture: {}", e);
            return;
        }
    };

    if compiler.is_like_msvc() {
        // cl.exe takes a different driver interface; the fixture is optional,
        // so don't fight it here.
        println!("cargo:warning=skipping native test fixture build with MSVC");
        return;
    }

    let status = Command::new(compiler.path())
        .args(["-shared", "-fPIC", "-O2", "-o"])
        .arg(&fixture)
        .arg("testdata/fixture.c")
        .status();

    match status {
        Ok(s) if s.success() => {}
        Ok(s) => {
            println!("cargo:warning=native test fixture build failed: {}", s);
        }
        Err(e) => {
            println!("cargo:warning=no C compiler for test fixture: {}", e);
        }
    }
}

fn fixture_filename() -> &'static str {
    let target = env::var("TARGET").unwrap_or_default();
    if target.contains("windows") {
        "ffikit_fixture.dll"
    } else if target.contains("apple") {
        "libffikit_fixture.dylib"
    } else {
        "libffikit_fixture.so"
    }
}
