//! Resolver and loader tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::*;

#[test]
fn test_platform_filename_table() {
    let name = platform_filename("foo", None);
    #[cfg(target_os = "windows")]
    assert_eq!(name, "foo.dll");
    #[cfg(target_os = "macos")]
    assert_eq!(name, "libfoo.dylib");
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    assert_eq!(name, "libfoo.so");
}

#[test]
fn test_version_token_is_an_elf_suffix() {
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        assert_eq!(platform_filename("foo", Some("6")), "libfoo.so.6");
        assert_eq!(platform_filename("foo", Some("1.2.3")), "libfoo.so.1.2.3");
    }
    #[cfg(target_os = "macos")]
    assert_eq!(platform_filename("foo", Some("6")), "libfoo.dylib");
    #[cfg(target_os = "windows")]
    assert_eq!(platform_filename("foo", Some("6")), "foo.dll");
}

#[test]
fn test_qualified_path_gets_extension_but_no_prefix() {
    let spec = LibrarySpec::at_path("./out/foo");
    let candidates = spec.candidates();
    assert_eq!(candidates.len(), 1);
    let only = candidates[0].display().to_string();
    assert!(
        !only.contains("libfoo") && !only.contains("lib/foo.lib"),
        "no prefix on qualified paths: {}",
        only
    );
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    assert_eq!(only, "./out/foo.so");
    #[cfg(target_os = "macos")]
    assert_eq!(only, "./out/foo.dylib");
    #[cfg(target_os = "windows")]
    assert!(only.ends_with("foo.dll"));
}

#[test]
fn test_already_complete_path_is_verbatim() {
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let spec = LibrarySpec::at_path("/tmp/libx.so");
        assert_eq!(spec.candidates()[0].display().to_string(), "/tmp/libx.so");

        // Versioned sonames count as complete too.
        let spec = LibrarySpec::at_path("/tmp/libx.so.6");
        assert_eq!(spec.candidates()[0].display().to_string(), "/tmp/libx.so.6");
    }
}

#[test]
fn test_logical_name_candidates_end_with_linker_fallback() {
    let spec = LibrarySpec::named("no_such_library_here");
    let candidates = spec.candidates();
    assert!(candidates.len() >= 2);
    let last = candidates.last().unwrap().display().to_string();
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    assert_eq!(last, "libno_such_library_here.so");
    #[cfg(target_os = "macos")]
    assert_eq!(last, "libno_such_library_here.dylib");
    #[cfg(target_os = "windows")]
    assert_eq!(last, "no_such_library_here.dll");
}

#[test]
fn test_deferred_resolver_runs_at_most_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let spec = LibrarySpec::deferred(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        "deferred_target".to_string()
    });

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let first = spec.effective_name();
    let second = spec.effective_name();
    let _ = spec.candidates();
    assert_eq!(first, "deferred_target");
    assert_eq!(second, "deferred_target");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_missing_library_reports_every_candidate() {
    let spec = LibrarySpec::named("ffikit_definitely_absent");
    let err = open_library(&spec).unwrap_err();
    match err {
        crate::error::FfiError::LibraryNotFound { name, attempted } => {
            assert_eq!(name, "ffikit_definitely_absent");
            assert!(!attempted.is_empty());
        }
        other => panic!("expected LibraryNotFound, got {:?}", other),
    }
}

#[cfg(target_os = "linux")]
#[test]
fn test_open_caches_one_handle_per_resolved_path() {
    // libm ships everywhere on Linux; the versioned soname is the
    // loadable artifact.
    let spec = LibrarySpec::named("m").with_version("6");
    let first = match open_library(&spec) {
        Ok(lib) => lib,
        // Unusual layout (e.g. musl); nothing to assert against.
        Err(_) => return,
    };
    let second = open_library(&spec).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(loaded_libraries().contains(first.path()));

    // The handle actually resolves symbols.
    assert!(first.symbol_addr("cos").is_ok());
    assert!(first.symbol_addr("ffikit_no_such_symbol").is_err());
}
