//! Typed pointers and cast operations.
//!
//! A [`TypedPtr`] is a raw native address viewed through a pointee type.
//! It carries no ownership and no bound: arithmetic and casts are trusted,
//! not checked. The only hazard the engine can catch is dereferencing
//! null, which surfaces as [`FfiError::NullDereference`]; a cast to a type
//! the underlying memory does not match is undefined behavior, not a
//! catchable error.

use std::fmt;
use std::sync::Arc;

use crate::error::{FfiError, FfiResult};
use crate::types::{size_of_type, CType};
use crate::value::FfiValue;

/// A native address interpreted through a pointee type.
#[derive(Clone)]
pub struct TypedPtr {
    addr: usize,
    pointee: Arc<CType>,
}

impl TypedPtr {
    pub fn new(addr: usize, pointee: Arc<CType>) -> TypedPtr {
        TypedPtr { addr, pointee }
    }

    pub fn null(pointee: Arc<CType>) -> TypedPtr {
        TypedPtr { addr: 0, pointee }
    }

    pub fn addr(&self) -> usize {
        self.addr
    }

    pub fn is_null(&self) -> bool {
        self.addr == 0
    }

    pub fn pointee(&self) -> &Arc<CType> {
        &self.pointee
    }

    /// Reinterpret this address as pointing at `target` instead.
    ///
    /// # Safety
    ///
    /// Nothing verifies that the underlying memory actually holds a
    /// `target`; a mismatch is undefined behavior the engine cannot
    /// detect. The caller is asserting the layout, not asking.
    pub unsafe fn cast_unchecked(&self, target: Arc<CType>) -> TypedPtr {
        TypedPtr {
            addr: self.addr,
            pointee: target,
        }
    }

    /// Move by `count` elements: exactly `count * size_of(pointee)`
    /// bytes, never one raw byte. Negative counts move backwards.
    pub fn offset(&self, count: isize) -> FfiResult<TypedPtr> {
        let stride = size_of_type(&self.pointee)? as isize;
        let addr = (self.addr as isize) + count * stride;
        Ok(TypedPtr {
            addr: addr as usize,
            pointee: Arc::clone(&self.pointee),
        })
    }

    /// Read the pointee.
    ///
    /// # Safety
    ///
    /// Beyond the null check, the caller asserts the address points at
    /// live, properly laid out memory of the pointee type.
    pub unsafe fn read(&self) -> FfiResult<FfiValue> {
        if self.is_null() {
            return Err(FfiError::NullDereference {
                type_name: self.pointee.to_string(),
            });
        }
        crate::value::read_slot(self.addr, &self.pointee)
    }

    /// Write the pointee.
    ///
    /// # Safety
    ///
    /// Beyond the null check, the caller asserts the address points at
    /// writable memory laid out for the pointee type.
    pub unsafe fn write(&self, value: &FfiValue) -> FfiResult<()> {
        if self.is_null() {
            return Err(FfiError::NullDereference {
                type_name: self.pointee.to_string(),
            });
        }
        crate::value::write_slot(self.addr, &self.pointee, value)
    }
}

impl fmt::Debug for TypedPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypedPtr({:#x} as {})", self.addr, self.pointee)
    }
}

/// Native byte size of a value, without requiring a live instance for
/// types — and from the instance's own allocation for owned blocks.
pub fn size_of_value(value: &FfiValue) -> FfiResult<usize> {
    match value {
        FfiValue::Owned(v) => Ok(v.size()),
        FfiValue::Ptr(p) => size_of_type(p.pointee()),
        FfiValue::Str(s) => Ok(s.len()),
        other => Err(FfiError::unsupported(
            other.to_string(),
            "size query on non-native value",
        )),
    }
}
