//! Native values and memory ownership.
//!
//! A [`NativeValue`] is a block of native memory interpreted through a
//! [`CType`], tagged with who is responsible for releasing it:
//!
//! - **RuntimeManaged**: the engine allocated it and frees it when the
//!   owning handle is dropped. Timing is whenever the host memory manager
//!   gets around to it — never before the handle is unreachable, and
//!   native code must not assume promptness.
//! - **ExplicitlyManaged**: produced by an explicit opt-in; the engine
//!   never frees it. Release happens exactly once, through the consuming
//!   [`NativeValue::release`] call or by native code, and getting that
//!   wrong (double free, retained-then-collected buffer) is a documented
//!   hazard this module can make explicit but cannot prevent.
//! - **Foreign**: memory a native call returned. The engine did not
//!   allocate it and will never free it under any circumstance.

use std::alloc;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{FfiError, FfiResult};
use crate::ptr::TypedPtr;
use crate::types::{layout_of, CLayout, CType, FieldStorage, PrimKind};

mod string;

pub use string::{decode_text, encode_text, retain_explicitly, retain_explicitly_utf8};

#[cfg(test)]
mod tests;

/// Who releases a native block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Engine-allocated; freed when the handle becomes unreachable.
    RuntimeManaged,
    /// Explicitly retained; released exactly once, never automatically.
    ExplicitlyManaged,
    /// Allocated by native code; never released by the engine.
    Foreign,
}

lazy_static::lazy_static! {
    /// Addresses of live engine-allocated blocks (RuntimeManaged and
    /// ExplicitlyManaged). Diagnostic only: lets callers and tests
    /// observe that each block's release hook fires exactly once.
    static ref LIVE_BLOCKS: Mutex<HashSet<usize>> = Mutex::new(HashSet::new());
}

/// Number of engine-allocated native blocks currently alive.
pub fn live_native_blocks() -> usize {
    LIVE_BLOCKS.lock().len()
}

/// Whether `addr` is the start of a live engine-allocated block.
pub fn is_engine_allocated(addr: usize) -> bool {
    LIVE_BLOCKS.lock().contains(&addr)
}

/// A managed value crossing the call boundary.
#[derive(Debug, Clone)]
pub enum FfiValue {
    /// No value (void returns).
    Void,
    Bool(bool),
    /// Signed integer of any declared width.
    Int(i64),
    /// Unsigned integer of any declared width.
    UInt(u64),
    /// Floating point of any declared width.
    Float(f64),
    /// Managed text; encoded per the parameter's declared encoding.
    Str(String),
    /// The absent sentinel: a null pointer or absent string, both
    /// directions.
    Null,
    /// A typed address into native memory. Carries no ownership.
    Ptr(TypedPtr),
    /// An owned native block (composite allocations and by-value
    /// composite returns).
    Owned(Arc<NativeValue>),
}

impl FfiValue {
    /// True for the absent sentinel.
    pub fn is_null(&self) -> bool {
        matches!(self, FfiValue::Null)
    }

    /// The native address this value designates, for pointer-class
    /// values.
    pub fn addr(&self) -> Option<usize> {
        match self {
            FfiValue::Ptr(p) => Some(p.addr()),
            FfiValue::Owned(v) => Some(v.addr()),
            FfiValue::Null => Some(0),
            _ => None,
        }
    }
}

impl fmt::Display for FfiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FfiValue::Void => write!(f, "void"),
            FfiValue::Bool(b) => write!(f, "{}", b),
            FfiValue::Int(v) => write!(f, "{}", v),
            FfiValue::UInt(v) => write!(f, "{}", v),
            FfiValue::Float(v) => write!(f, "{}", v),
            FfiValue::Str(s) => write!(f, "{:?}", s),
            FfiValue::Null => write!(f, "null"),
            FfiValue::Ptr(p) => write!(f, "ptr@{:#x}", p.addr()),
            FfiValue::Owned(v) => write!(f, "owned@{:#x}", v.addr()),
        }
    }
}

/// A block of native memory interpreted through a type descriptor.
pub struct NativeValue {
    ptr: *mut u8,
    size: usize,
    align: usize,
    /// Element count: the bound tracked at allocation time for arrays,
    /// 1 for everything else. Raw native arrays have no such bound.
    count: usize,
    ty: Arc<CType>,
    /// Layout of the allocation's unit: the element layout for arrays,
    /// the type's own layout otherwise.
    layout: CLayout,
    ownership: Ownership,
}

// The block is plain memory owned (or deliberately not owned) by this
// handle; concurrent access to the pointee is the caller's contract with
// the native library.
unsafe impl Send for NativeValue {}
unsafe impl Sync for NativeValue {}

impl NativeValue {
    /// Allocate a zeroed RuntimeManaged block for `ty`.
    pub fn alloc(ty: Arc<CType>) -> FfiResult<NativeValue> {
        let layout = layout_of(&ty)?;
        Self::alloc_raw(layout.size, layout.align, 1, ty, layout, Ownership::RuntimeManaged)
    }

    /// Allocate a zeroed RuntimeManaged array of `len` elements.
    ///
    /// The bound lives here, on the handle: indexing through
    /// [`NativeValue::get_index`] is checked against it, but nothing stops
    /// native code from running past the end of the block.
    pub fn alloc_array(element: Arc<CType>, len: usize) -> FfiResult<NativeValue> {
        let elem_layout = layout_of(&element)?;
        let stride = elem_layout.size;
        Self::alloc_raw(
            stride * len.max(1),
            elem_layout.align,
            len,
            CType::array(element),
            elem_layout,
            Ownership::RuntimeManaged,
        )
    }

    pub(crate) fn alloc_raw(
        size: usize,
        align: usize,
        count: usize,
        ty: Arc<CType>,
        layout: CLayout,
        ownership: Ownership,
    ) -> FfiResult<NativeValue> {
        debug_assert!(ownership != Ownership::Foreign);
        let alloc_layout = alloc::Layout::from_size_align(size.max(1), align.max(1))
            .map_err(|_| FfiError::unsupported(ty.to_string(), "allocation layout"))?;
        let ptr = unsafe { alloc::alloc_zeroed(alloc_layout) };
        if ptr.is_null() {
            alloc::handle_alloc_error(alloc_layout);
        }
        LIVE_BLOCKS.lock().insert(ptr as usize);
        Ok(NativeValue {
            ptr,
            size: size.max(1),
            align: align.max(1),
            count,
            ty,
            layout,
            ownership,
        })
    }

    /// Wrap memory returned by a native call. Never copied, never freed.
    /// A null address yields `None` (the absent sentinel).
    pub fn from_foreign(addr: usize, ty: Arc<CType>) -> FfiResult<Option<NativeValue>> {
        if addr == 0 {
            return Ok(None);
        }
        let layout = layout_of(&ty)?;
        Ok(Some(NativeValue {
            ptr: addr as *mut u8,
            size: layout.size,
            align: layout.align,
            count: 1,
            ty,
            layout,
            ownership: Ownership::Foreign,
        }))
    }

    /// Opt this block out of automatic reclamation.
    ///
    /// After this, release responsibility shifts wholly to the caller:
    /// exactly one [`NativeValue::release`] call, or a free performed by
    /// native code.
    pub fn into_explicit(mut self) -> NativeValue {
        if self.ownership == Ownership::RuntimeManaged {
            self.ownership = Ownership::ExplicitlyManaged;
        }
        self
    }

    /// Release an explicitly managed block. Consuming the handle makes a
    /// second engine-side release unrepresentable.
    pub fn release(self) -> FfiResult<()> {
        match self.ownership {
            Ownership::ExplicitlyManaged => {
                // Drop does not free explicit blocks; do it here.
                LIVE_BLOCKS.lock().remove(&self.addr());
                unsafe { self.dealloc() };
                std::mem::forget(self);
                Ok(())
            }
            Ownership::RuntimeManaged => Ok(drop(self)),
            Ownership::Foreign => Err(FfiError::unsupported(
                self.ty.to_string(),
                "release of foreign memory",
            )),
        }
    }

    pub fn addr(&self) -> usize {
        self.ptr as usize
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn align(&self) -> usize {
        self.align
    }

    /// Element count tracked at allocation time (1 for non-arrays).
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn ty(&self) -> &Arc<CType> {
        &self.ty
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// A typed pointer to the start of the block.
    pub fn typed_ptr(&self) -> TypedPtr {
        let pointee = match self.ty.as_ref() {
            CType::Array(elem) => Arc::clone(elem),
            _ => Arc::clone(&self.ty),
        };
        TypedPtr::new(self.addr(), pointee)
    }

    fn element(&self) -> Arc<CType> {
        match self.ty.as_ref() {
            CType::Array(elem) => Arc::clone(elem),
            _ => Arc::clone(&self.ty),
        }
    }

    fn check_index(&self, index: usize) -> FfiResult<usize> {
        if index >= self.count {
            return Err(FfiError::marshal(
                format!("index < {}", self.count),
                format!("index {}", index),
                None,
            ));
        }
        Ok(self.addr() + index * self.layout.size)
    }

    /// Read the element at `index`, checked against the tracked bound.
    pub fn get_index(&self, index: usize) -> FfiResult<FfiValue> {
        let addr = self.check_index(index)?;
        unsafe { read_slot(addr, &self.element()) }
    }

    /// Write the element at `index`, checked against the tracked bound.
    pub fn set_index(&self, index: usize, value: &FfiValue) -> FfiResult<()> {
        let addr = self.check_index(index)?;
        unsafe { write_slot(addr, &self.element(), value) }
    }

    fn field(&self, index: usize) -> FfiResult<(usize, &crate::types::CField)> {
        let fields = match self.ty.as_ref() {
            CType::Struct { fields, .. } | CType::Union { fields, .. } => fields,
            other => {
                return Err(FfiError::unsupported(
                    other.to_string(),
                    "field access on non-aggregate",
                ))
            }
        };
        let field = fields.get(index).ok_or_else(|| {
            FfiError::marshal(
                format!("field index < {}", fields.len()),
                format!("index {}", index),
                None,
            )
        })?;
        Ok((self.addr() + self.layout.offsets[index], field))
    }

    /// Read the aggregate field at `index` (declaration order).
    ///
    /// Embedded composite members read as a typed pointer into the
    /// interior of this block.
    pub fn get_field(&self, index: usize) -> FfiResult<FfiValue> {
        let (addr, field) = self.field(index)?;
        match field.storage {
            FieldStorage::Referenced => unsafe {
                Ok(pointer_value(
                    *(addr as *const usize),
                    Arc::clone(&field.ty),
                ))
            },
            FieldStorage::Embedded => {
                if field.ty.is_aggregate() {
                    Ok(FfiValue::Ptr(TypedPtr::new(addr, Arc::clone(&field.ty))))
                } else {
                    unsafe { read_slot(addr, &field.ty) }
                }
            }
        }
    }

    /// Write the aggregate field at `index` (declaration order).
    pub fn set_field(&self, index: usize, value: &FfiValue) -> FfiResult<()> {
        let (addr, field) = self.field(index)?;
        match field.storage {
            FieldStorage::Referenced => unsafe {
                write_pointer(addr, value).map_err(|_| {
                    FfiError::marshal(format!("ptr<{}>", field.ty), value.to_string(), None)
                })
            },
            FieldStorage::Embedded => {
                if field.ty.is_aggregate() {
                    return Err(FfiError::unsupported(
                        field.ty.to_string(),
                        "whole-field write of embedded aggregate",
                    ));
                }
                unsafe { write_slot(addr, &field.ty, value) }
            }
        }
    }

    unsafe fn dealloc(&self) {
        let alloc_layout =
            alloc::Layout::from_size_align_unchecked(self.size.max(1), self.align.max(1));
        alloc::dealloc(self.ptr, alloc_layout);
    }
}

impl Drop for NativeValue {
    fn drop(&mut self) {
        // The host memory manager's release hook: RuntimeManaged blocks
        // free here, at-or-after unreachability. Explicit blocks wait for
        // their release() call; Foreign blocks are never ours to free.
        if self.ownership == Ownership::RuntimeManaged {
            LIVE_BLOCKS.lock().remove(&self.addr());
            unsafe { self.dealloc() };
        }
    }
}

impl fmt::Debug for NativeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeValue")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("ty", &format_args!("{}", self.ty))
            .field("size", &self.size)
            .field("count", &self.count)
            .field("ownership", &self.ownership)
            .finish()
    }
}

// =============================================================================
// Scalar conversion
// =============================================================================

/// Convert a managed value to the raw bits of `kind`, rejecting anything
/// that cannot be represented losslessly at that width.
pub(crate) fn scalar_bits(kind: PrimKind, value: &FfiValue) -> FfiResult<u64> {
    let reject = || FfiError::marshal(kind.to_string(), value.to_string(), None);

    if kind.is_integer() {
        let wide: i128 = match value {
            FfiValue::Int(v) => *v as i128,
            FfiValue::UInt(v) => *v as i128,
            FfiValue::Bool(b) => *b as i128,
            _ => return Err(reject()),
        };
        let (lo, hi): (i128, i128) = match kind {
            PrimKind::I8 => (i8::MIN as i128, i8::MAX as i128),
            PrimKind::U8 => (0, u8::MAX as i128),
            PrimKind::I16 => (i16::MIN as i128, i16::MAX as i128),
            PrimKind::U16 => (0, u16::MAX as i128),
            PrimKind::I32 => (i32::MIN as i128, i32::MAX as i128),
            PrimKind::U32 => (0, u32::MAX as i128),
            PrimKind::I64 => (i64::MIN as i128, i64::MAX as i128),
            PrimKind::U64 => (0, u64::MAX as i128),
            _ => unreachable!(),
        };
        if wide < lo || wide > hi {
            return Err(reject());
        }
        return Ok(wide as u64);
    }

    match kind {
        PrimKind::F64 => match value {
            FfiValue::Float(f) => Ok(f.to_bits()),
            _ => Err(reject()),
        },
        PrimKind::F32 => match value {
            FfiValue::Float(f) => {
                let narrowed = *f as f32;
                if !f.is_nan() && narrowed as f64 != *f {
                    return Err(reject());
                }
                Ok(narrowed.to_bits() as u64)
            }
            _ => Err(reject()),
        },
        PrimKind::Bool => match value {
            FfiValue::Bool(b) => Ok(*b as u64),
            FfiValue::Int(0) | FfiValue::UInt(0) => Ok(0),
            FfiValue::Int(1) | FfiValue::UInt(1) => Ok(1),
            _ => Err(reject()),
        },
        _ => unreachable!(),
    }
}

/// Convert raw bits of `kind` back into a managed value.
pub(crate) fn scalar_value(kind: PrimKind, bits: u64) -> FfiValue {
    match kind {
        PrimKind::Bool => FfiValue::Bool(bits & 1 != 0),
        PrimKind::I8 => FfiValue::Int(bits as u8 as i8 as i64),
        PrimKind::I16 => FfiValue::Int(bits as u16 as i16 as i64),
        PrimKind::I32 => FfiValue::Int(bits as u32 as i32 as i64),
        PrimKind::I64 => FfiValue::Int(bits as i64),
        PrimKind::U8 => FfiValue::UInt(bits as u8 as u64),
        PrimKind::U16 => FfiValue::UInt(bits as u16 as u64),
        PrimKind::U32 => FfiValue::UInt(bits as u32 as u64),
        PrimKind::U64 => FfiValue::UInt(bits),
        PrimKind::F32 => FfiValue::Float(f32::from_bits(bits as u32) as f64),
        PrimKind::F64 => FfiValue::Float(f64::from_bits(bits)),
    }
}

/// Read a primitive of `kind` at `addr`, returning its widened bits.
///
/// # Safety
/// `addr` must point to at least `kind.size()` readable bytes.
pub(crate) unsafe fn read_prim_bits(addr: usize, kind: PrimKind) -> u64 {
    match kind.size() {
        1 => *(addr as *const u8) as u64,
        2 => *(addr as *const u16) as u64,
        4 => *(addr as *const u32) as u64,
        8 => *(addr as *const u64),
        _ => unreachable!(),
    }
}

/// Write the low `kind.size()` bytes of `bits` to `addr`.
///
/// # Safety
/// `addr` must point to at least `kind.size()` writable bytes.
pub(crate) unsafe fn write_prim_bits(addr: usize, kind: PrimKind, bits: u64) {
    match kind.size() {
        1 => *(addr as *mut u8) = bits as u8,
        2 => *(addr as *mut u16) = bits as u16,
        4 => *(addr as *mut u32) = bits as u32,
        8 => *(addr as *mut u64) = bits,
        _ => unreachable!(),
    }
}

/// Wrap a raw pointer-class machine word as a managed value.
pub(crate) fn pointer_value(addr: usize, ty: Arc<CType>) -> FfiValue {
    if addr == 0 {
        return FfiValue::Null;
    }
    let pointee = match ty.as_ref() {
        CType::Pointer(Some(t)) => Arc::clone(t),
        CType::Pointer(None) | CType::Opaque | CType::Callback { .. } => {
            Arc::new(CType::Void)
        }
        CType::Array(elem) => Arc::clone(elem),
        _ => ty,
    };
    FfiValue::Ptr(TypedPtr::new(addr, pointee))
}

/// Read one value slot of `ty` at `addr`.
///
/// # Safety
/// `addr` must point at a live, properly laid out value of `ty`.
pub(crate) unsafe fn read_slot(addr: usize, ty: &Arc<CType>) -> FfiResult<FfiValue> {
    match ty.as_ref() {
        CType::Prim(kind) => Ok(scalar_value(*kind, read_prim_bits(addr, *kind))),
        CType::Text(encoding) => {
            let str_addr = *(addr as *const usize);
            if str_addr == 0 {
                Ok(FfiValue::Null)
            } else {
                Ok(FfiValue::Str(decode_text(str_addr, *encoding)?))
            }
        }
        _ if ty.is_pointer_class() => {
            Ok(pointer_value(*(addr as *const usize), Arc::clone(ty)))
        }
        other => Err(FfiError::unsupported(other.to_string(), "slot read")),
    }
}

/// Write one value slot of `ty` at `addr`.
///
/// # Safety
/// `addr` must point at writable memory laid out for `ty`.
pub(crate) unsafe fn write_slot(addr: usize, ty: &Arc<CType>, value: &FfiValue) -> FfiResult<()> {
    match ty.as_ref() {
        CType::Prim(kind) => {
            let bits = scalar_bits(*kind, value)?;
            write_prim_bits(addr, *kind, bits);
            Ok(())
        }
        _ if ty.is_pointer_class() && !matches!(ty.as_ref(), CType::Text(_)) => {
            write_pointer(addr, value)
                .map_err(|_| FfiError::marshal(ty.to_string(), value.to_string(), None))
        }
        other => Err(FfiError::unsupported(other.to_string(), "slot write")),
    }
}

/// Write a pointer-class value's address into the slot at `addr`.
///
/// # Safety
/// `addr` must point at a writable pointer-width slot.
pub(crate) unsafe fn write_pointer(addr: usize, value: &FfiValue) -> Result<(), ()> {
    let target = value.addr().ok_or(())?;
    *(addr as *mut usize) = target;
    Ok(())
}
