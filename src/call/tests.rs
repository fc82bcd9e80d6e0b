//! Call-site construction, marshalling and binding tests.

use std::sync::Arc;

use super::*;
use crate::error::FfiError;
use crate::library::LibrarySpec;
use crate::types::{CField, CType, PrimKind};
use crate::value::FfiValue;

fn nowhere() -> LibrarySpec {
    LibrarySpec::named("ffikit_no_such_library")
}

#[test]
fn test_native_name_override_and_mangling() {
    let sym = NativeSymbol::new(nowhere(), "open");
    assert_eq!(sym.native_name(), "open");

    let sym = NativeSymbol::new(nowhere(), "open").with_symbol("open64");
    assert_eq!(sym.native_name(), "open64");

    let sym = NativeSymbol::new(nowhere(), "open")
        .with_symbol("open64")
        .with_mangling(Mangling::LeadingUnderscore);
    assert_eq!(sym.native_name(), "_open64");
}

#[test]
fn test_signature_validation_at_construction() {
    // void parameter
    assert!(CallSite::new(
        NativeSymbol::new(nowhere(), "f"),
        vec![Param::of(Arc::new(CType::Void))],
        Arc::new(CType::Void),
    )
    .is_err());

    // by-value union parameter
    let u = Arc::new(CType::Union {
        name: "u".to_string(),
        fields: vec![CField::embedded("i", CType::prim(PrimKind::I32))],
    });
    assert!(CallSite::new(
        NativeSymbol::new(nowhere(), "f"),
        vec![Param::of(u)],
        Arc::new(CType::Void),
    )
    .is_err());

    // array return
    assert!(CallSite::new(
        NativeSymbol::new(nowhere(), "f"),
        vec![],
        CType::array(CType::prim(PrimKind::I32)),
    )
    .is_err());

    // Out direction on a non-primitive
    assert!(CallSite::new(
        NativeSymbol::new(nowhere(), "f"),
        vec![Param::out(CType::text())],
        Arc::new(CType::Void),
    )
    .is_err());

    // Out on a primitive is fine.
    assert!(CallSite::new(
        NativeSymbol::new(nowhere(), "f"),
        vec![Param::out(CType::prim(PrimKind::I32))],
        Arc::new(CType::Void),
    )
    .is_ok());
}

#[test]
fn test_marshal_errors_precede_resolution() {
    // The library does not exist, but a bad argument must fail first:
    // validation happens before any native work, including binding.
    let site = CallSite::new(
        NativeSymbol::new(nowhere(), "f"),
        vec![Param::of(CType::prim(PrimKind::I8))],
        Arc::new(CType::Void),
    )
    .unwrap();

    let mut args = [FfiValue::Int(4000)];
    match site.invoke(&mut args) {
        Err(FfiError::MarshalTypeError { index, .. }) => assert_eq!(index, Some(0)),
        other => panic!("expected MarshalTypeError, got {:?}", other),
    }
    // And the site never tried to resolve.
    assert_eq!(site.resolution_count(), 0);
}

#[test]
fn test_arity_mismatch_is_a_marshal_error() {
    let site = CallSite::new(
        NativeSymbol::new(nowhere(), "f"),
        vec![Param::of(CType::prim(PrimKind::I32))],
        Arc::new(CType::Void),
    )
    .unwrap();
    let mut args = [FfiValue::Int(1), FfiValue::Int(2)];
    assert!(matches!(
        site.invoke(&mut args),
        Err(FfiError::MarshalTypeError { .. })
    ));
}

#[test]
fn test_missing_library_surfaces_after_valid_marshal() {
    let site = CallSite::new(
        NativeSymbol::new(nowhere(), "f"),
        vec![Param::of(CType::prim(PrimKind::I32))],
        Arc::new(CType::Void),
    )
    .unwrap();
    let mut args = [FfiValue::Int(1)];
    assert!(matches!(
        site.invoke(&mut args),
        Err(FfiError::LibraryNotFound { .. })
    ));
    assert_eq!(site.resolution_count(), 1);
}

#[test]
fn test_signature_parsing() {
    let sig = Signature::parse("i32 add(i32 a, i32 b)").unwrap();
    assert_eq!(sig.name, "add");
    assert_eq!(sig.params.len(), 2);
    assert_eq!(*sig.ret, CType::Prim(PrimKind::I32));
    assert!(!sig.variadic);

    let sig = Signature::parse("void log_line(char* msg)").unwrap();
    assert_eq!(sig.name, "log_line");
    assert!(matches!(*sig.params[0], CType::Text(_)));
    assert!(matches!(*sig.ret, CType::Void));

    let sig = Signature::parse("u64 now()").unwrap();
    assert!(sig.params.is_empty());

    let sig = Signature::parse("i32 printf(char* fmt, ...)").unwrap();
    assert!(sig.variadic);
    assert_eq!(sig.to_string(), "i32 printf(string(utf8), ...)");

    assert!(Signature::parse("not a signature").is_none());
    assert!(Signature::parse("i32 f(wibble x)").is_none());
}

#[test]
fn test_variadic_signatures_do_not_bind() {
    let sig = Signature::parse("i32 printf(char* fmt, ...)").unwrap();
    assert!(matches!(
        sig.bind(nowhere()),
        Err(FfiError::UnsupportedType { .. })
    ));
}

#[cfg(target_os = "linux")]
mod with_libm {
    use super::*;

    fn libm() -> LibrarySpec {
        LibrarySpec::named("m").with_version("6")
    }

    fn libm_available() -> bool {
        crate::library::open_library(&libm()).is_ok()
    }

    #[test]
    fn test_end_to_end_f64_call() {
        if !libm_available() {
            eprintln!("libm not found, skipping");
            return;
        }
        let site = Signature::parse("f64 pow(f64 base, f64 exp)")
            .unwrap()
            .bind(libm())
            .unwrap();

        let mut args = [FfiValue::Float(2.0), FfiValue::Float(10.0)];
        match site.invoke(&mut args).unwrap() {
            FfiValue::Float(v) => assert_eq!(v, 1024.0),
            other => panic!("expected Float, got {:?}", other),
        }
    }

    #[test]
    fn test_symbol_resolves_exactly_once_across_calls() {
        if !libm_available() {
            eprintln!("libm not found, skipping");
            return;
        }
        let site = Signature::parse("f64 sqrt(f64 x)")
            .unwrap()
            .bind(libm())
            .unwrap();
        assert_eq!(site.resolution_count(), 0);

        for i in 1..=16u32 {
            let mut args = [FfiValue::Float((i * i) as f64)];
            match site.invoke(&mut args).unwrap() {
                FfiValue::Float(v) => assert_eq!(v, i as f64),
                other => panic!("expected Float, got {:?}", other),
            }
        }
        assert_eq!(site.resolution_count(), 1);
    }

    #[test]
    fn test_concurrent_first_calls_resolve_once() {
        if !libm_available() {
            eprintln!("libm not found, skipping");
            return;
        }
        let site = Arc::new(
            Signature::parse("f64 cbrt(f64 x)")
                .unwrap()
                .bind(libm())
                .unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let site = Arc::clone(&site);
                std::thread::spawn(move || {
                    let mut args = [FfiValue::Float(27.0)];
                    match site.invoke(&mut args).unwrap() {
                        FfiValue::Float(v) => v,
                        other => panic!("expected Float, got {:?}", other),
                    }
                })
            })
            .collect();
        for handle in handles {
            assert!((handle.join().unwrap() - 3.0).abs() < 1e-12);
        }
        // One lookup, no matter how many threads raced the first call.
        assert_eq!(site.resolution_count(), 1);
    }

    #[test]
    fn test_symbol_not_found_names_symbol_and_library() {
        if !libm_available() {
            eprintln!("libm not found, skipping");
            return;
        }
        let site = CallSite::new(
            NativeSymbol::new(libm(), "ffikit_not_a_real_symbol"),
            vec![],
            Arc::new(CType::Void),
        )
        .unwrap();
        match site.invoke(&mut []) {
            Err(FfiError::SymbolNotFound { symbol, library, .. }) => {
                assert_eq!(symbol, "ffikit_not_a_real_symbol");
                assert!(library.contains("libm"));
            }
            other => panic!("expected SymbolNotFound, got {:?}", other),
        }
    }
}
