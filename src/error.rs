//! Error taxonomy for the native calling interface.
//!
//! Everything the engine can detect surfaces here, with enough context to
//! diagnose without re-running: attempted library paths, symbol and library
//! names, the offending type or value. What the engine cannot detect —
//! casts to a mismatched layout, indexing past an allocation, touching
//! foreign memory the callee already released — is undefined behavior and
//! is documented on the individual unsafe operations instead.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for all engine operations.
pub type FfiResult<T> = Result<T, FfiError>;

/// Errors raised by the native calling interface.
///
/// Resolution and registration errors surface synchronously and halt only
/// the triggering operation. Marshalling errors are raised before any
/// native code executes; a failed call never partially applies arguments.
#[derive(Debug, Error)]
pub enum FfiError {
    /// No candidate path produced a loadable library.
    #[error("library '{name}' not found (tried {})", format_candidates(.attempted))]
    LibraryNotFound {
        /// The logical name or path the caller asked for.
        name: String,
        /// Every candidate path the resolver attempted, in order.
        attempted: Vec<PathBuf>,
    },

    /// The library loaded but does not export the requested symbol.
    #[error("symbol '{symbol}' not found in '{library}': {detail}")]
    SymbolNotFound {
        symbol: String,
        library: String,
        detail: String,
    },

    /// A declared type has no native representation in the requested role.
    #[error("unsupported type in {context}: {type_name}")]
    UnsupportedType {
        /// Display form of the offending type.
        type_name: String,
        /// Where the type was rejected (registration, parameter, return...).
        context: String,
    },

    /// An argument cannot be represented losslessly at the declared width,
    /// or has the wrong shape for its parameter. Raised before invocation.
    #[error("cannot marshal {got} as {expected}{}", format_index(.index))]
    MarshalTypeError {
        /// The declared parameter or return type.
        expected: String,
        /// Display form of the supplied value.
        got: String,
        /// Zero-based parameter index, when the error concerns one.
        index: Option<usize>,
    },

    /// A null typed pointer was dereferenced.
    #[error("null pointer dereference of {type_name}")]
    NullDereference { type_name: String },
}

fn format_candidates(attempted: &[PathBuf]) -> String {
    if attempted.is_empty() {
        return "no candidates".to_string();
    }
    attempted
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_index(index: &Option<usize>) -> String {
    match index {
        Some(i) => format!(" (argument {})", i),
        None => String::new(),
    }
}

impl FfiError {
    /// Shorthand for an [`FfiError::UnsupportedType`].
    pub fn unsupported(type_name: impl Into<String>, context: impl Into<String>) -> Self {
        FfiError::UnsupportedType {
            type_name: type_name.into(),
            context: context.into(),
        }
    }

    /// Shorthand for an [`FfiError::MarshalTypeError`].
    pub fn marshal(
        expected: impl Into<String>,
        got: impl Into<String>,
        index: Option<usize>,
    ) -> Self {
        FfiError::MarshalTypeError {
            expected: expected.into(),
            got: got.into(),
            index,
        }
    }
}
