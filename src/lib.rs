//! ffikit - Native Calling Interface
//!
//! A calling layer that lets a managed runtime invoke functions in C-ABI
//! dynamic libraries: resolve and load libraries, lay out composite data
//! the way a C compiler would, marshal arguments and results across the
//! boundary, expose managed closures as native function pointers, and
//! keep every native allocation's ownership explicit.
//!
//! The front-end that declares bindings (language syntax, build tooling)
//! lives elsewhere; it hands this engine a library spec, a symbol name
//! and a typed signature, and gets back typed values or errors.
//!
//! # Architecture
//!
//! ```text
//! declaration (library, symbol, signature)
//!       │
//!       ▼
//! ┌──────────────┐     ┌──────────────────┐
//! │ CallSite     │────▶│ Library Resolver │  one cached handle
//! │ (lazy bind)  │     │ & Loader         │  per resolved path
//! └──────┬───────┘     └──────────────────┘
//!        │
//!        ▼
//! ┌──────────────┐     ┌──────────────────┐
//! │ Marshaller / │◀───▶│ Type Registry &  │  C layout rules,
//! │ Dispatcher   │     │ Layout Engine    │  fixed at registration
//! └──────┬───────┘     └──────────────────┘
//!        │ libffi
//!        ▼
//!   native code ──▶ Trampoline ──▶ managed closure
//! ```
//!
//! # Example
//!
//! ```no_run
//! use ffikit::{FfiValue, LibrarySpec, Signature};
//!
//! let site = Signature::parse("f64 pow(f64 base, f64 exp)")
//!     .expect("signature")
//!     .bind(LibrarySpec::named("m"))?;
//!
//! let mut args = [FfiValue::Float(2.0), FfiValue::Float(8.0)];
//! let result = site.invoke(&mut args)?;
//! assert!(matches!(result, FfiValue::Float(v) if v == 256.0));
//! # Ok::<(), ffikit::FfiError>(())
//! ```
//!
//! # Safety model
//!
//! The engine trusts declared type shapes to match the native ABI; it
//! cannot detect most cases where they do not. Everything it can check
//! happens before a call dispatches (argument widths, shapes, arity).
//! Everything it cannot check — casts to mismatched layouts, indexing
//! past an allocation, using foreign memory the callee released — is
//! surfaced as a distinctly `unsafe` operation instead of being silently
//! accepted.

#![warn(clippy::all)]

pub mod call;
pub mod callback;
pub mod error;
pub mod library;
pub mod ptr;
pub mod types;
pub mod value;

pub use call::{CallSite, Direction, ExternVariable, Mangling, NativeSymbol, Param, Signature};
pub use callback::Trampoline;
pub use error::{FfiError, FfiResult};
pub use library::{
    add_search_path, loaded_libraries, open_library, platform_filename, LibrarySpec,
    SharedLibrary,
};
pub use ptr::{size_of_value, TypedPtr};
pub use types::{
    layout_of, pointer_size, size_of_type, CField, CLayout, CType, FieldStorage, PrimKind,
    RegisteredType, TextEncoding, TypeRegistry,
};
pub use value::{
    decode_text, encode_text, is_engine_allocated, live_native_blocks, retain_explicitly,
    retain_explicitly_utf8, FfiValue, NativeValue, Ownership,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
