//! Native value and ownership tests.

use std::sync::Arc;

use super::*;
use crate::types::{CField, TextEncoding};

#[test]
fn test_scalar_bits_round_trip_every_width() {
    let cases: &[(PrimKind, &[FfiValue])] = &[
        (
            PrimKind::I8,
            &[
                FfiValue::Int(0),
                FfiValue::Int(-1),
                FfiValue::Int(i8::MIN as i64),
                FfiValue::Int(i8::MAX as i64),
            ],
        ),
        (
            PrimKind::U8,
            &[FfiValue::UInt(0), FfiValue::UInt(u8::MAX as u64)],
        ),
        (
            PrimKind::I16,
            &[
                FfiValue::Int(0),
                FfiValue::Int(-1),
                FfiValue::Int(i16::MIN as i64),
                FfiValue::Int(i16::MAX as i64),
            ],
        ),
        (
            PrimKind::U16,
            &[FfiValue::UInt(0), FfiValue::UInt(u16::MAX as u64)],
        ),
        (
            PrimKind::I32,
            &[
                FfiValue::Int(0),
                FfiValue::Int(-1),
                FfiValue::Int(i32::MIN as i64),
                FfiValue::Int(i32::MAX as i64),
            ],
        ),
        (
            PrimKind::U32,
            &[FfiValue::UInt(0), FfiValue::UInt(u32::MAX as u64)],
        ),
        (
            PrimKind::I64,
            &[
                FfiValue::Int(0),
                FfiValue::Int(-1),
                FfiValue::Int(i64::MIN),
                FfiValue::Int(i64::MAX),
            ],
        ),
        (
            PrimKind::U64,
            &[FfiValue::UInt(0), FfiValue::UInt(u64::MAX)],
        ),
    ];

    for (kind, values) in cases {
        for value in *values {
            let bits = scalar_bits(*kind, value).unwrap();
            let back = scalar_value(*kind, bits);
            match (value, &back) {
                (FfiValue::Int(a), FfiValue::Int(b)) => assert_eq!(a, b, "{} {:?}", kind, value),
                (FfiValue::UInt(a), FfiValue::UInt(b)) => assert_eq!(a, b, "{} {:?}", kind, value),
                _ => panic!("kind changed shape: {:?} -> {:?}", value, back),
            }
        }
    }
}

#[test]
fn test_float_bits_round_trip() {
    for f in [0.0f64, -0.0, 1.5, -2.25, f64::MIN, f64::MAX] {
        let bits = scalar_bits(PrimKind::F64, &FfiValue::Float(f)).unwrap();
        match scalar_value(PrimKind::F64, bits) {
            FfiValue::Float(g) => assert_eq!(f.to_bits(), g.to_bits()),
            other => panic!("expected Float, got {:?}", other),
        }
    }
    // f32-representable values survive the narrow width exactly.
    for f in [0.0f64, 1.5, -0.25, 1024.0] {
        let bits = scalar_bits(PrimKind::F32, &FfiValue::Float(f)).unwrap();
        match scalar_value(PrimKind::F32, bits) {
            FfiValue::Float(g) => assert_eq!(f, g),
            other => panic!("expected Float, got {:?}", other),
        }
    }
}

#[test]
fn test_lossy_values_rejected_before_any_call() {
    assert!(scalar_bits(PrimKind::I8, &FfiValue::Int(300)).is_err());
    assert!(scalar_bits(PrimKind::U8, &FfiValue::Int(-1)).is_err());
    assert!(scalar_bits(PrimKind::U32, &FfiValue::Int(-5)).is_err());
    assert!(scalar_bits(PrimKind::I32, &FfiValue::Int(i64::MAX)).is_err());
    // 0.1 has no exact f32 representation.
    assert!(scalar_bits(PrimKind::F32, &FfiValue::Float(0.1)).is_err());
    // Wrong shapes are rejected, not coerced.
    assert!(scalar_bits(PrimKind::I32, &FfiValue::Float(3.0)).is_err());
    assert!(scalar_bits(PrimKind::F64, &FfiValue::Int(3)).is_err());
}

#[test]
fn test_alloc_is_zeroed_and_released_exactly_once() {
    let addr;
    {
        let block = NativeValue::alloc(CType::prim(PrimKind::I64)).unwrap();
        addr = block.addr();
        assert!(is_engine_allocated(addr));
        match block.get_index(0).unwrap() {
            FfiValue::Int(v) => assert_eq!(v, 0),
            other => panic!("expected Int, got {:?}", other),
        }
    }
    // Dropping the handle is the release hook; it ran exactly once.
    assert!(!is_engine_allocated(addr));
}

#[test]
fn test_array_tracks_allocation_bound() {
    let arr = NativeValue::alloc_array(CType::prim(PrimKind::I32), 5).unwrap();
    assert_eq!(arr.len(), 5);
    for (i, v) in [1i64, 2, 3, 4, 5].iter().enumerate() {
        arr.set_index(i, &FfiValue::Int(*v)).unwrap();
    }
    match arr.get_index(2).unwrap() {
        FfiValue::Int(v) => assert_eq!(v, 3),
        other => panic!("expected Int, got {:?}", other),
    }
    // Indexing past the tracked bound is refused on the managed side.
    assert!(arr.get_index(5).is_err());
    assert!(arr.set_index(9, &FfiValue::Int(0)).is_err());
}

#[test]
fn test_struct_field_access_uses_layout_offsets() {
    let ty = Arc::new(CType::Struct {
        name: "sample".to_string(),
        fields: vec![
            CField::embedded("tag", CType::prim(PrimKind::I32)),
            CField::embedded("weight", CType::prim(PrimKind::F64)),
            CField::embedded("next", CType::void_ptr()),
        ],
    });
    let block = NativeValue::alloc(Arc::clone(&ty)).unwrap();

    block.set_field(0, &FfiValue::Int(42)).unwrap();
    block.set_field(1, &FfiValue::Float(2.5)).unwrap();

    match block.get_field(0).unwrap() {
        FfiValue::Int(v) => assert_eq!(v, 42),
        other => panic!("expected Int, got {:?}", other),
    }
    match block.get_field(1).unwrap() {
        FfiValue::Float(v) => assert_eq!(v, 2.5),
        other => panic!("expected Float, got {:?}", other),
    }
    // Zeroed pointer field reads as the absent sentinel.
    assert!(block.get_field(2).unwrap().is_null());
}

#[test]
fn test_explicit_release_fires_once_by_construction() {
    let retained = retain_explicitly("keep me", TextEncoding::Utf8).unwrap();
    assert_eq!(retained.ownership(), Ownership::ExplicitlyManaged);
    let addr = retained.addr();
    assert!(is_engine_allocated(addr));

    // release() consumes the handle, so a second engine-side release
    // cannot be expressed.
    retained.release().unwrap();
    assert!(!is_engine_allocated(addr));
}

#[test]
fn test_explicit_block_survives_scope_without_release() {
    let addr;
    {
        let retained = retain_explicitly("pinned", TextEncoding::Utf8).unwrap();
        addr = retained.addr();
        drop(retained);
    }
    // Dropping an explicit handle does NOT free the block: native code
    // may still hold the pointer. The buffer content is still intact.
    assert!(is_engine_allocated(addr));
    let decoded = unsafe { decode_text(addr, TextEncoding::Utf8) }.unwrap();
    assert_eq!(decoded, "pinned");
}

#[test]
fn test_foreign_memory_is_never_freed() {
    let backing = Box::leak(Box::new(0x1234_5678u32));
    let addr = backing as *const u32 as usize;
    {
        let foreign = NativeValue::from_foreign(addr, CType::prim(PrimKind::U32))
            .unwrap()
            .unwrap();
        assert_eq!(foreign.ownership(), Ownership::Foreign);
        // Foreign blocks are not engine allocations.
        assert!(!is_engine_allocated(addr));
        // release() refuses foreign memory outright.
        assert!(foreign.release().is_err());
    }
    // Still readable after every engine handle is gone.
    assert_eq!(unsafe { *(addr as *const u32) }, 0x1234_5678);
}

#[test]
fn test_null_foreign_pointer_is_absent() {
    assert!(NativeValue::from_foreign(0, CType::prim(PrimKind::U32))
        .unwrap()
        .is_none());
}

#[test]
fn test_text_encodings_round_trip_non_ascii() {
    let samples = ["héllo wörld", "数え上げ", "naïve café ±µ"];
    for s in samples {
        for encoding in [TextEncoding::Utf8, TextEncoding::Utf16] {
            let buf = encode_text(s, encoding).unwrap();
            let decoded = unsafe { decode_text(buf.as_ptr() as usize, encoding) }.unwrap();
            assert_eq!(decoded, s, "{:?}", encoding);
        }
    }
    // Latin-1 round-trips its own repertoire and rejects the rest.
    let buf = encode_text("café ±", TextEncoding::Latin1).unwrap();
    let decoded = unsafe { decode_text(buf.as_ptr() as usize, TextEncoding::Latin1) }.unwrap();
    assert_eq!(decoded, "café ±");
    assert!(encode_text("数", TextEncoding::Latin1).is_err());
}

#[test]
fn test_interior_nul_rejected() {
    assert!(encode_text("a\0b", TextEncoding::Utf8).is_err());
}
