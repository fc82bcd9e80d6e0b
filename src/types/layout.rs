//! Concrete layout computation.
//!
//! Applies the same alignment and padding rules a native C compiler uses:
//! each member is aligned to its natural alignment, an aggregate's
//! alignment is its largest member alignment, and the total size is
//! rounded up to the aggregate alignment. Embedded members inline their
//! full nested layout; Referenced members contribute exactly one
//! pointer-width slot regardless of what they point at. Union members all
//! start at offset zero and the union is sized to its largest member.

use std::mem;

use crate::error::{FfiError, FfiResult};

use super::{CType, FieldStorage};

/// Pointer width on the host, in bytes.
pub fn pointer_size() -> usize {
    mem::size_of::<usize>()
}

/// Computed layout of a type: total size, alignment, and for aggregates
/// the byte offset of each field in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CLayout {
    pub size: usize,
    pub align: usize,
    pub offsets: Vec<usize>,
}

impl CLayout {
    fn scalar(size: usize, align: usize) -> CLayout {
        CLayout {
            size,
            align,
            offsets: Vec::new(),
        }
    }
}

fn round_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Compute the layout of `ty`.
///
/// Fails with `UnsupportedType` for types with no concrete native
/// representation in a value position: `void`, unbounded arrays, and
/// aggregates with no members. Text strings and callbacks occupy a
/// pointer-width slot.
pub fn layout_of(ty: &CType) -> FfiResult<CLayout> {
    match ty {
        CType::Void => Err(FfiError::unsupported("void", "value layout")),
        CType::Prim(k) => Ok(CLayout::scalar(k.size(), k.align())),
        CType::Pointer(_) | CType::Text(_) | CType::Callback { .. } | CType::Opaque => {
            Ok(CLayout::scalar(pointer_size(), pointer_size()))
        }
        // An array type alone has no size: the bound lives with the
        // allocation, so only a concrete element count gives it one.
        CType::Array(_) => Err(FfiError::unsupported(
            ty.to_string(),
            "value layout (arrays are sized at allocation)",
        )),
        CType::Struct { name, fields } => {
            if fields.is_empty() {
                return Err(FfiError::unsupported(
                    format!("struct {}", name),
                    "empty aggregate",
                ));
            }
            let mut size = 0usize;
            let mut align = 1usize;
            let mut offsets = Vec::with_capacity(fields.len());
            for field in fields {
                let member = member_layout(field.storage, &field.ty)?;
                let offset = round_up(size, member.align);
                offsets.push(offset);
                size = offset + member.size;
                align = align.max(member.align);
            }
            Ok(CLayout {
                size: round_up(size, align),
                align,
                offsets,
            })
        }
        CType::Union { name, fields } => {
            if fields.is_empty() {
                return Err(FfiError::unsupported(
                    format!("union {}", name),
                    "empty aggregate",
                ));
            }
            let mut size = 0usize;
            let mut align = 1usize;
            for field in fields {
                let member = member_layout(field.storage, &field.ty)?;
                size = size.max(member.size);
                align = align.max(member.align);
            }
            Ok(CLayout {
                size: round_up(size, align),
                align,
                offsets: vec![0; fields.len()],
            })
        }
    }
}

/// Layout contribution of a single aggregate member.
fn member_layout(storage: FieldStorage, ty: &CType) -> FfiResult<CLayout> {
    match storage {
        FieldStorage::Referenced => Ok(CLayout::scalar(pointer_size(), pointer_size())),
        FieldStorage::Embedded => match ty {
            // Pointer-class members embed as the pointer itself.
            _ if ty.is_pointer_class() && !matches!(ty, CType::Array(_)) => {
                Ok(CLayout::scalar(pointer_size(), pointer_size()))
            }
            CType::Array(_) => Err(FfiError::unsupported(
                ty.to_string(),
                "embedded array member (declare it Referenced)",
            )),
            _ => layout_of(ty),
        },
    }
}

/// Byte size of `ty`, without requiring a live instance.
pub fn size_of_type(ty: &CType) -> FfiResult<usize> {
    Ok(layout_of(ty)?.size)
}

/// Convert a type to its libffi element type for call dispatch.
///
/// Only types that can travel by value through a call boundary convert;
/// unions cannot be described to libffi and must cross as pointers.
pub(crate) fn libffi_type(ty: &CType) -> FfiResult<libffi::middle::Type> {
    use libffi::middle::Type;
    match ty {
        CType::Void => Ok(Type::void()),
        CType::Prim(k) => Ok(match k {
            super::PrimKind::Bool => Type::u8(),
            super::PrimKind::I8 => Type::i8(),
            super::PrimKind::U8 => Type::u8(),
            super::PrimKind::I16 => Type::i16(),
            super::PrimKind::U16 => Type::u16(),
            super::PrimKind::I32 => Type::i32(),
            super::PrimKind::U32 => Type::u32(),
            super::PrimKind::I64 => Type::i64(),
            super::PrimKind::U64 => Type::u64(),
            super::PrimKind::F32 => Type::f32(),
            super::PrimKind::F64 => Type::f64(),
        }),
        CType::Pointer(_) | CType::Array(_) | CType::Text(_) | CType::Callback { .. }
        | CType::Opaque => Ok(Type::pointer()),
        CType::Struct { fields, .. } => {
            let mut elements = Vec::with_capacity(fields.len());
            for field in fields {
                let elem = match field.storage {
                    FieldStorage::Referenced => Type::pointer(),
                    FieldStorage::Embedded => libffi_type(&field.ty)?,
                };
                elements.push(elem);
            }
            Ok(Type::structure(elements))
        }
        CType::Union { name, .. } => Err(FfiError::unsupported(
            format!("union {}", name),
            "by-value call boundary (pass a pointer)",
        )),
    }
}
