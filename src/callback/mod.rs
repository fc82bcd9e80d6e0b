//! Callback trampolines: managed closures as native function pointers.
//!
//! A [`Trampoline`] wraps a managed closure in a libffi closure stub,
//! yielding an address native code can call through a plain C function
//! pointer. Each native invocation marshals the native arguments into
//! managed values (the inverse of outbound call marshalling), runs the
//! closure synchronously, and marshals the result back.
//!
//! Thread contract: native code may invoke the stub from any thread,
//! including library-internal workers unrelated to the registering
//! context. Invocations are serialized through a mutex around the
//! closure — mutual exclusion, not thread affinity. The stub stays valid
//! as long as the `Trampoline` handle lives; [`Trampoline::leak`] is the
//! explicit retention escape hatch for pointers native code stores
//! beyond that scope.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use libffi::low;
use libffi::middle::Cif;
use parking_lot::Mutex;

use crate::error::{FfiError, FfiResult};
use crate::ptr::TypedPtr;
use crate::types::{libffi_type, CType, PrimKind};
use crate::value::{
    decode_text, pointer_value, scalar_bits, scalar_value, FfiValue,
};

#[cfg(test)]
mod tests;

type ManagedFn = Box<dyn FnMut(&[FfiValue]) -> FfiValue + Send>;

struct TrampolineState {
    cif: Cif,
    params: Vec<Arc<CType>>,
    ret: Arc<CType>,
    func: Mutex<ManagedFn>,
}

/// A managed closure exposed at a native-callable address.
pub struct Trampoline {
    state: Box<TrampolineState>,
    closure: *mut low::ffi_closure,
    code: usize,
}

// The raw closure pointer is owned by this handle; invocation goes
// through the mutex in TrampolineState.
unsafe impl Send for Trampoline {}
unsafe impl Sync for Trampoline {}

impl Trampoline {
    /// Wrap `func` behind a native-callable stub with the given
    /// signature.
    ///
    /// Parameters and return are restricted to types that fit a machine
    /// word or float register: primitives, pointers, opaque handles and
    /// (for parameters) text strings. Composite by-value signatures are
    /// rejected here rather than marshalled incorrectly. A text return
    /// is rejected too: a managed string has no buffer that outlives
    /// the closure call — return a retained buffer as a pointer
    /// instead.
    pub fn new(
        params: Vec<Arc<CType>>,
        ret: Arc<CType>,
        func: impl FnMut(&[FfiValue]) -> FfiValue + Send + 'static,
    ) -> FfiResult<Trampoline> {
        for (i, param) in params.iter().enumerate() {
            let ok = matches!(param.as_ref(), CType::Prim(_) | CType::Text(_))
                || param.is_pointer_class();
            if !ok {
                return Err(FfiError::unsupported(
                    param.to_string(),
                    format!("callback parameter {}", i),
                ));
            }
        }
        let ret_ok = matches!(ret.as_ref(), CType::Void | CType::Prim(_))
            || (ret.is_pointer_class() && !matches!(ret.as_ref(), CType::Text(_)));
        if !ret_ok {
            return Err(FfiError::unsupported(
                ret.to_string(),
                "callback return",
            ));
        }

        let mut ffi_params = Vec::with_capacity(params.len());
        for param in &params {
            ffi_params.push(libffi_type(param)?);
        }
        let cif = Cif::new(ffi_params, libffi_type(&ret)?);

        let state = Box::new(TrampolineState {
            cif,
            params,
            ret,
            func: Mutex::new(Box::new(func)),
        });

        let (closure, code) = low::closure_alloc();
        if closure.is_null() {
            return Err(FfiError::unsupported("closure stub", "allocation"));
        }

        // The state box is stable from here on; the stub holds pointers
        // into it for its whole lifetime.
        let prepared = unsafe {
            low::prep_closure(
                closure,
                state.cif.as_raw_ptr(),
                trampoline_handler,
                &*state as *const TrampolineState,
                code,
            )
        };
        if prepared.is_err() {
            #[allow(unused_unsafe)]
            unsafe {
                low::closure_free(closure);
            }
            return Err(FfiError::unsupported("closure stub", "preparation"));
        }

        log::debug!(
            "trampoline stub at {:#x} ({} params)",
            code.0 as usize,
            state.params.len()
        );

        Ok(Trampoline {
            state,
            closure,
            code: code.0 as usize,
        })
    }

    /// The native-callable address.
    pub fn address(&self) -> usize {
        self.code
    }

    /// This trampoline as a call argument for a callback-typed
    /// parameter.
    pub fn as_arg(&self) -> FfiValue {
        let ty = Arc::new(CType::Callback {
            params: self.state.params.clone(),
            ret: Arc::clone(&self.state.ret),
        });
        FfiValue::Ptr(TypedPtr::new(self.code, ty))
    }

    /// Give up ownership and keep the stub alive for the rest of the
    /// process — the retention escape hatch for function pointers native
    /// code stores past the handle's natural scope. The stub is never
    /// reclaimed afterward.
    pub fn leak(self) -> usize {
        let addr = self.code;
        std::mem::forget(self);
        addr
    }
}

impl Drop for Trampoline {
    fn drop(&mut self) {
        // Native code must not call the stub after this; that contract
        // belongs to whoever passed the address out.
        #[allow(unused_unsafe)]
        unsafe {
            low::closure_free(self.closure);
        }
    }
}

impl std::fmt::Debug for Trampoline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trampoline")
            .field("code", &format_args!("{:#x}", self.code))
            .field("params", &self.state.params.len())
            .finish()
    }
}

/// The native entry point for every trampoline.
///
/// Marshals native argument slots into managed values, runs the closure
/// under its mutex, and stores the result per libffi's return
/// conventions (integers widened to a full word, floats at their own
/// width).
unsafe extern "C" fn trampoline_handler(
    _cif: &low::ffi_cif,
    result: &mut u64,
    args: *const *const libc::c_void,
    state: &TrampolineState,
) {
    let mut managed = Vec::with_capacity(state.params.len());
    for (i, param) in state.params.iter().enumerate() {
        let slot = *args.add(i) as usize;
        managed.push(read_native_arg(slot, param));
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut func = state.func.lock();
        (*func)(&managed)
    }));

    let value = match outcome {
        Ok(value) => value,
        Err(_) => {
            // A panic must not unwind into native frames; surface a
            // zero result instead.
            log::error!("callback panicked; returning zero to native caller");
            FfiValue::Null
        }
    };

    write_native_result(result, &state.ret, &value);
}

/// Read one native argument slot as the declared managed value.
unsafe fn read_native_arg(slot: usize, ty: &Arc<CType>) -> FfiValue {
    match ty.as_ref() {
        CType::Prim(kind) => {
            scalar_value(*kind, crate::value::read_prim_bits(slot, *kind))
        }
        CType::Text(encoding) => {
            let addr = *(slot as *const usize);
            if addr == 0 {
                FfiValue::Null
            } else {
                match decode_text(addr, *encoding) {
                    Ok(s) => FfiValue::Str(s),
                    Err(_) => FfiValue::Null,
                }
            }
        }
        _ => pointer_value(*(slot as *const usize), Arc::clone(ty)),
    }
}

/// Store the closure's result where the native caller expects it.
unsafe fn write_native_result(result: &mut u64, ret: &Arc<CType>, value: &FfiValue) {
    match ret.as_ref() {
        CType::Void => {}
        CType::Prim(kind) => {
            let bits = scalar_bits(*kind, value).unwrap_or_else(|e| {
                log::error!("callback returned a mismatched value: {}", e);
                0
            });
            match kind {
                // Floats occupy exactly their own width in the result
                // slot.
                PrimKind::F32 => {
                    *(result as *mut u64 as *mut f32) = f32::from_bits(bits as u32);
                }
                PrimKind::F64 => {
                    *(result as *mut u64 as *mut f64) = f64::from_bits(bits);
                }
                // Integral results are widened to a full word.
                _ => *result = bits,
            }
        }
        _ => {
            *result = value.addr().unwrap_or_else(|| {
                log::error!("callback returned a non-pointer for a pointer result");
                0
            }) as u64;
        }
    }
}
