//! Trampoline tests.
//!
//! The stub address is a real C function pointer, so the tests exercise
//! it exactly the way native code would: transmute and call.

use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::*;
use crate::types::{CType, PrimKind};

#[test]
fn test_binary_int_callback_round_trip() {
    let tramp = Trampoline::new(
        vec![CType::prim(PrimKind::I32), CType::prim(PrimKind::I32)],
        CType::prim(PrimKind::I32),
        |args| match (&args[0], &args[1]) {
            (FfiValue::Int(a), FfiValue::Int(b)) => FfiValue::Int(a + b),
            _ => FfiValue::Int(-1),
        },
    )
    .unwrap();

    let f: extern "C" fn(i32, i32) -> i32 = unsafe { mem::transmute(tramp.address()) };
    assert_eq!(f(2, 3), 5);
    assert_eq!(f(-5, 5), 0);
}

#[test]
fn test_float_callback_widths() {
    let tramp = Trampoline::new(
        vec![CType::prim(PrimKind::F64)],
        CType::prim(PrimKind::F64),
        |args| match &args[0] {
            FfiValue::Float(x) => FfiValue::Float(x * 2.0),
            _ => FfiValue::Float(f64::NAN),
        },
    )
    .unwrap();
    let f: extern "C" fn(f64) -> f64 = unsafe { mem::transmute(tramp.address()) };
    assert_eq!(f(1.25), 2.5);

    let tramp32 = Trampoline::new(
        vec![CType::prim(PrimKind::F32)],
        CType::prim(PrimKind::F32),
        |args| match &args[0] {
            FfiValue::Float(x) => FfiValue::Float(x + 0.5),
            _ => FfiValue::Float(f32::NAN as f64),
        },
    )
    .unwrap();
    let g: extern "C" fn(f32) -> f32 = unsafe { mem::transmute(tramp32.address()) };
    assert_eq!(g(1.0), 1.5);
}

#[test]
fn test_string_callback_decodes_utf8() {
    let tramp = Trampoline::new(
        vec![CType::text()],
        CType::prim(PrimKind::I32),
        |args| match &args[0] {
            FfiValue::Str(s) => FfiValue::Int(s.len() as i64),
            FfiValue::Null => FfiValue::Int(-1),
            _ => FfiValue::Int(-2),
        },
    )
    .unwrap();

    let f: extern "C" fn(*const libc::c_char) -> i32 = unsafe { mem::transmute(tramp.address()) };
    assert_eq!(f(b"hello\0".as_ptr() as *const libc::c_char), 5);
    // Byte length, not codepoint count.
    assert_eq!(f("héllo\0".as_ptr() as *const libc::c_char), 6);
    // Null argument maps to the absent sentinel.
    assert_eq!(f(std::ptr::null()), -1);
}

#[test]
fn test_callback_invoked_from_foreign_thread() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let tramp = Trampoline::new(
        vec![CType::prim(PrimKind::U64)],
        CType::prim(PrimKind::U64),
        move |args| {
            seen.fetch_add(1, Ordering::SeqCst);
            match &args[0] {
                FfiValue::UInt(v) => FfiValue::UInt(v + 1),
                _ => FfiValue::UInt(0),
            }
        },
    )
    .unwrap();

    let addr = tramp.address();
    let handles: Vec<_> = (0..4)
        .map(|i| {
            std::thread::spawn(move || {
                let f: extern "C" fn(u64) -> u64 = unsafe { mem::transmute(addr) };
                f(i as u64)
            })
        })
        .collect();
    let mut results: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    results.sort_unstable();

    assert_eq!(results, vec![1, 2, 3, 4]);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[test]
fn test_composite_signatures_rejected() {
    let pair = Arc::new(CType::Struct {
        name: "pair".to_string(),
        fields: vec![
            crate::types::CField::embedded("a", CType::prim(PrimKind::I32)),
            crate::types::CField::embedded("b", CType::prim(PrimKind::I32)),
        ],
    });

    assert!(Trampoline::new(
        vec![Arc::clone(&pair)],
        CType::prim(PrimKind::I32),
        |_| FfiValue::Int(0)
    )
    .is_err());

    assert!(Trampoline::new(vec![], pair, |_| FfiValue::Int(0)).is_err());

    // Text returns have no stable buffer to hand back.
    assert!(Trampoline::new(vec![], CType::text(), |_| FfiValue::Null).is_err());
}

#[test]
fn test_leak_keeps_stub_alive() {
    let addr = {
        let tramp = Trampoline::new(
            vec![CType::prim(PrimKind::I32)],
            CType::prim(PrimKind::I32),
            |args| match &args[0] {
                FfiValue::Int(v) => FfiValue::Int(v * v),
                _ => FfiValue::Int(0),
            },
        )
        .unwrap();
        tramp.leak()
    };

    // The handle is gone; the stub must still answer.
    let f: extern "C" fn(i32) -> i32 = unsafe { mem::transmute(addr) };
    assert_eq!(f(9), 81);
}

#[test]
fn test_mismatched_return_becomes_zero_not_ub() {
    let tramp = Trampoline::new(
        vec![],
        CType::prim(PrimKind::I32),
        |_| FfiValue::Str("not an int".to_string()),
    )
    .unwrap();
    let f: extern "C" fn() -> i32 = unsafe { mem::transmute(tramp.address()) };
    assert_eq!(f(), 0);
}
