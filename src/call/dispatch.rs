//! Native call dispatch through libffi.
//!
//! The call interface (Cif) for a site is built from its type row and
//! cached thread-locally, keyed by site identity: the Cif holds raw
//! type pointers and is cheaper to rebuild per thread than to share.
//! Returns convert by kind: primitives copy by value, pointers wrap
//! without copying as foreign memory, by-value composites are copied
//! into fresh engine-owned memory.

use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use libffi::middle::{Arg, Cif, CodePtr, Type};
use libffi::raw;

use crate::error::FfiResult;
use crate::types::{layout_of, libffi_type, CType, PrimKind};
use crate::value::{
    decode_text, pointer_value, scalar_value, FfiValue, NativeValue, Ownership,
};

use super::marshal::{marshal_args, write_back, AbiArg};
use super::site::{CallSite, Direction};

thread_local! {
    static CIF_CACHE: RefCell<HashMap<u64, Cif>> = RefCell::new(HashMap::new());
}

fn with_site_cif<R>(site: &CallSite, body: impl FnOnce(&Cif) -> R) -> FfiResult<R> {
    CIF_CACHE.with(|cache| {
        let mut map = cache.borrow_mut();
        let cif = match map.entry(site.id()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(slot) => slot.insert(build_cif(site)?),
        };
        Ok(body(cif))
    })
}

fn build_cif(site: &CallSite) -> FfiResult<Cif> {
    let mut params = Vec::with_capacity(site.params().len());
    for param in site.params() {
        let ty = match param.direction {
            // The callee sees an address to write through.
            Direction::Out | Direction::InOut => Type::pointer(),
            Direction::In => libffi_type(&param.ty)?,
        };
        params.push(ty);
    }
    let ret = libffi_type(site.return_type())?;
    Ok(Cif::new(params, ret))
}

/// Marshal, dispatch, convert, write back.
pub(crate) fn invoke(site: &CallSite, args: &mut [FfiValue]) -> FfiResult<FfiValue> {
    // Everything that can fail does so before the native call: argument
    // validation first, then symbol binding.
    let frame = marshal_args(site, args)?;
    let addr = site.address()?;

    let code = CodePtr(addr as *mut libc::c_void);

    // Two views of the same storage: typed Args for the middle-layer
    // call, raw pointers for struct returns through the raw interface.
    let mut ffi_args = Vec::with_capacity(frame.abi.len());
    let mut raw_args = Vec::with_capacity(frame.abi.len());
    for stored in &frame.abi {
        let arg = match stored {
            AbiArg::Bits8(v) => {
                raw_args.push(v as *const _ as *mut libc::c_void);
                Arg::new(v)
            }
            AbiArg::Bits16(v) => {
                raw_args.push(v as *const _ as *mut libc::c_void);
                Arg::new(v)
            }
            AbiArg::Bits32(v) => {
                raw_args.push(v as *const _ as *mut libc::c_void);
                Arg::new(v)
            }
            AbiArg::Bits64(v) => {
                raw_args.push(v as *const _ as *mut libc::c_void);
                Arg::new(v)
            }
            AbiArg::F32(v) => {
                raw_args.push(v as *const _ as *mut libc::c_void);
                Arg::new(v)
            }
            AbiArg::F64(v) => {
                raw_args.push(v as *const _ as *mut libc::c_void);
                Arg::new(v)
            }
            AbiArg::Word(v) => {
                raw_args.push(v as *const _ as *mut libc::c_void);
                Arg::new(v)
            }
            AbiArg::StructData(addr) => {
                raw_args.push(*addr as *mut libc::c_void);
                Arg::new(unsafe { &*(*addr as *const u8) })
            }
        };
        ffi_args.push(arg);
    }

    let result = with_site_cif(site, |cif| {
        dispatch_call(cif, code, &ffi_args, &mut raw_args, site.return_type())
    })??;

    write_back(&frame, args);
    Ok(result)
}

fn dispatch_call(
    cif: &Cif,
    code: CodePtr,
    ffi_args: &[Arg],
    raw_args: &mut [*mut libc::c_void],
    ret: &Arc<CType>,
) -> FfiResult<FfiValue> {
    match ret.as_ref() {
        CType::Void => {
            unsafe { cif.call::<()>(code, ffi_args) };
            Ok(FfiValue::Void)
        }
        CType::Prim(kind) => {
            let bits = match kind {
                PrimKind::Bool | PrimKind::I8 | PrimKind::U8 => {
                    (unsafe { cif.call::<u8>(code, ffi_args) }) as u64
                }
                PrimKind::I16 | PrimKind::U16 => {
                    (unsafe { cif.call::<u16>(code, ffi_args) }) as u64
                }
                PrimKind::I32 | PrimKind::U32 => {
                    (unsafe { cif.call::<u32>(code, ffi_args) }) as u64
                }
                PrimKind::I64 | PrimKind::U64 => unsafe { cif.call::<u64>(code, ffi_args) },
                PrimKind::F32 => {
                    (unsafe { cif.call::<f32>(code, ffi_args) }).to_bits() as u64
                }
                PrimKind::F64 => (unsafe { cif.call::<f64>(code, ffi_args) }).to_bits(),
            };
            Ok(scalar_value(*kind, bits))
        }
        CType::Text(encoding) => {
            let addr = unsafe { cif.call::<usize>(code, ffi_args) };
            if addr == 0 {
                Ok(FfiValue::Null)
            } else {
                Ok(FfiValue::Str(unsafe { decode_text(addr, *encoding)? }))
            }
        }
        CType::Pointer(_) | CType::Opaque | CType::Callback { .. } => {
            // Wrapped without copying: foreign memory the engine will
            // never free.
            let addr = unsafe { cif.call::<usize>(code, ffi_args) };
            Ok(pointer_value(addr, Arc::clone(ret)))
        }
        CType::Struct { .. } => {
            // By-value composite return: receive into a scratch buffer,
            // then copy into fresh engine-owned memory.
            let layout = layout_of(ret)?;
            let mut ret_bytes = vec![0u8; layout.size.max(8)];
            unsafe {
                raw::ffi_call(
                    cif.as_raw_ptr(),
                    Some(*code.as_safe_fun()),
                    ret_bytes.as_mut_ptr() as *mut libc::c_void,
                    raw_args.as_mut_ptr(),
                );
            }
            let value = NativeValue::alloc_raw(
                layout.size,
                layout.align,
                1,
                Arc::clone(ret),
                layout.clone(),
                Ownership::RuntimeManaged,
            )?;
            unsafe {
                std::ptr::copy_nonoverlapping(
                    ret_bytes.as_ptr(),
                    value.addr() as *mut u8,
                    layout.size,
                );
            }
            Ok(FfiValue::Owned(Arc::new(value)))
        }
        CType::Array(_) | CType::Union { .. } => {
            unreachable!("rejected at site construction")
        }
    }
}
