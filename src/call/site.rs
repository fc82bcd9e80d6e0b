//! Call-site declarations and lazy symbol binding.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::{FfiError, FfiResult};
use crate::library::{open_library, LibrarySpec};
use crate::types::{layout_of, CType};
use crate::value::FfiValue;

/// Name-mangling policy for the native symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mangling {
    /// C ABI: the symbol name is used verbatim.
    #[default]
    C,
    /// Legacy toolchains that prepend an underscore to C symbols.
    LeadingUnderscore,
}

/// A native function identity: which library, which symbol.
#[derive(Debug, Clone)]
pub struct NativeSymbol {
    pub library: LibrarySpec,
    /// The call name the front-end declared.
    pub name: String,
    /// Explicit native symbol override, when the exported name differs
    /// from the call name.
    pub symbol: Option<String>,
    pub mangling: Mangling,
}

impl NativeSymbol {
    pub fn new(library: LibrarySpec, name: impl Into<String>) -> NativeSymbol {
        NativeSymbol {
            library,
            name: name.into(),
            symbol: None,
            mangling: Mangling::C,
        }
    }

    /// Override the exported symbol name.
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> NativeSymbol {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_mangling(mut self, mangling: Mangling) -> NativeSymbol {
        self.mangling = mangling;
        self
    }

    /// The name actually looked up in the library.
    pub(crate) fn native_name(&self) -> String {
        let base = self.symbol.as_deref().unwrap_or(&self.name);
        match self.mangling {
            Mangling::C => base.to_string(),
            Mangling::LeadingUnderscore => format!("_{}", base),
        }
    }
}

/// Parameter direction at the call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Value flows into the callee.
    In,
    /// The callee writes through an address the engine supplies; the
    /// result lands back in the caller's binding after the call.
    Out,
    /// Both: the engine seeds the slot with the caller's value first.
    InOut,
}

/// One declared parameter.
#[derive(Debug, Clone)]
pub struct Param {
    pub ty: Arc<CType>,
    pub direction: Direction,
}

impl Param {
    pub fn of(ty: Arc<CType>) -> Param {
        Param {
            ty,
            direction: Direction::In,
        }
    }

    pub fn out(ty: Arc<CType>) -> Param {
        Param {
            ty,
            direction: Direction::Out,
        }
    }

    pub fn in_out(ty: Arc<CType>) -> Param {
        Param {
            ty,
            direction: Direction::InOut,
        }
    }
}

static NEXT_SITE_ID: AtomicU64 = AtomicU64::new(1);

/// A bound call site.
///
/// The native address resolves lazily on first invocation and is cached
/// here for the life of the site — never re-resolved. Concurrent first
/// invocations are serialized: one thread performs the lookup, the rest
/// block until the cached address is visible, and no duplicate native
/// lookup ever runs.
pub struct CallSite {
    id: u64,
    symbol: NativeSymbol,
    params: Vec<Param>,
    ret: Arc<CType>,
    addr: OnceCell<usize>,
    resolutions: AtomicUsize,
}

impl CallSite {
    /// Declare a call site. Signature problems — directions that only
    /// make sense for primitives, types that cannot travel by value —
    /// are rejected here, before anything native is touched.
    pub fn new(symbol: NativeSymbol, params: Vec<Param>, ret: Arc<CType>) -> FfiResult<CallSite> {
        validate_signature(&params, &ret)?;
        Ok(CallSite {
            id: NEXT_SITE_ID.fetch_add(1, Ordering::Relaxed),
            symbol,
            params,
            ret,
            addr: OnceCell::new(),
            resolutions: AtomicUsize::new(0),
        })
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn return_type(&self) -> &Arc<CType> {
        &self.ret
    }

    pub fn symbol(&self) -> &NativeSymbol {
        &self.symbol
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// The resolved native address, binding it on first use.
    pub fn address(&self) -> FfiResult<usize> {
        self.addr
            .get_or_try_init(|| {
                self.resolutions.fetch_add(1, Ordering::SeqCst);
                let library = open_library(&self.symbol.library)?;
                let name = self.symbol.native_name();
                let addr = library.symbol_addr(&name)?;
                log::debug!(
                    "bound '{}' in '{}' at {:#x}",
                    name,
                    library.path().display(),
                    addr
                );
                Ok(addr)
            })
            .copied()
    }

    /// How many times the native lookup actually ran (0 before first
    /// use, 1 ever after).
    pub fn resolution_count(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }

    /// Invoke the native function.
    ///
    /// Arguments are validated and converted before the call executes;
    /// on any error the native function is never entered. After the
    /// call, Out/InOut entries of `args` hold the values the callee
    /// produced.
    pub fn invoke(&self, args: &mut [FfiValue]) -> FfiResult<FfiValue> {
        super::dispatch::invoke(self, args)
    }
}

impl std::fmt::Debug for CallSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSite")
            .field("symbol", &self.symbol)
            .field("params", &self.params.len())
            .field("ret", &format_args!("{}", self.ret))
            .field("bound", &self.addr.get().is_some())
            .finish()
    }
}

fn validate_signature(params: &[Param], ret: &Arc<CType>) -> FfiResult<()> {
    for (i, param) in params.iter().enumerate() {
        let context = format!("parameter {}", i);
        match param.ty.as_ref() {
            CType::Void => {
                return Err(FfiError::unsupported("void", context));
            }
            CType::Union { .. } => {
                return Err(FfiError::unsupported(
                    param.ty.to_string(),
                    format!("{} (unions cross by pointer)", context),
                ));
            }
            CType::Struct { .. } => {
                // By-value structs must have a computable layout now,
                // not at call time.
                layout_of(&param.ty)?;
            }
            _ => {}
        }
        if param.direction != Direction::In && !matches!(param.ty.as_ref(), CType::Prim(_)) {
            return Err(FfiError::unsupported(
                param.ty.to_string(),
                format!("{} (Out/InOut applies to primitives)", context),
            ));
        }
    }

    match ret.as_ref() {
        CType::Union { .. } => Err(FfiError::unsupported(
            ret.to_string(),
            "return type (unions cross by pointer)",
        )),
        CType::Array(_) => Err(FfiError::unsupported(
            ret.to_string(),
            "return type (C functions cannot return arrays)",
        )),
        CType::Struct { .. } => {
            layout_of(ret)?;
            Ok(())
        }
        _ => Ok(()),
    }
}
