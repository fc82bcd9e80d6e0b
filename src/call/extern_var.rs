//! Read/write accessors over native global variables.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::{FfiError, FfiResult};
use crate::library::open_library;
use crate::types::CType;
use crate::value::{read_slot, write_slot, FfiValue};

use super::site::NativeSymbol;

/// An accessor bound to a native global variable.
///
/// The symbol binds lazily on first access and is cached like a call
/// site's address. Reads and writes marshal through the same primitive
/// rules as call arguments.
pub struct ExternVariable {
    symbol: NativeSymbol,
    ty: Arc<CType>,
    addr: OnceCell<usize>,
}

impl ExternVariable {
    /// Bind an accessor. Only types that fit a readable slot qualify:
    /// primitives and pointer-class types.
    pub fn new(symbol: NativeSymbol, ty: Arc<CType>) -> FfiResult<ExternVariable> {
        let slot_ok = matches!(ty.as_ref(), CType::Prim(_) | CType::Text(_))
            || ty.is_pointer_class();
        if !slot_ok {
            return Err(FfiError::unsupported(
                ty.to_string(),
                "extern variable (use a pointer to the aggregate)",
            ));
        }
        Ok(ExternVariable {
            symbol,
            ty,
            addr: OnceCell::new(),
        })
    }

    fn address(&self) -> FfiResult<usize> {
        self.addr
            .get_or_try_init(|| {
                let library = open_library(&self.symbol.library)?;
                library.symbol_addr(&self.symbol.native_name())
            })
            .copied()
    }

    /// Read the current value of the native global.
    pub fn read(&self) -> FfiResult<FfiValue> {
        let addr = self.address()?;
        unsafe { read_slot(addr, &self.ty) }
    }

    /// Write the native global.
    pub fn write(&self, value: &FfiValue) -> FfiResult<()> {
        let addr = self.address()?;
        unsafe { write_slot(addr, &self.ty, value) }
    }
}
