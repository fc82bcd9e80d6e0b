//! C-style signature declarations.
//!
//! A thin convenience for front-ends that declare bindings as strings:
//! `"i32 add(i32, i32)"` parses into a typed signature that can bind
//! directly to a library. Parameter names are accepted and ignored;
//! `...` marks a variadic declaration, which is recorded but cannot bind
//! (the dispatch core is fixed-arity).

use std::fmt;
use std::sync::Arc;

use crate::error::{FfiError, FfiResult};
use crate::library::LibrarySpec;
use crate::types::CType;

use super::site::{CallSite, NativeSymbol, Param};

/// A parsed function signature.
#[derive(Debug, Clone)]
pub struct Signature {
    pub name: String,
    pub params: Vec<Arc<CType>>,
    pub ret: Arc<CType>,
    pub variadic: bool,
}

impl Signature {
    /// Parse a declaration of the form
    /// `return_type name(param_type [name], ...)`.
    pub fn parse(decl: &str) -> Option<Signature> {
        let decl = decl.trim();

        let paren = decl.find('(')?;
        let before = decl[..paren].trim();
        let inside = decl[paren + 1..].trim_end_matches(')').trim();

        let parts: Vec<&str> = before.rsplitn(2, char::is_whitespace).collect();
        if parts.len() < 2 {
            return None;
        }
        let name = parts[0].trim();
        let ret = CType::parse(parts[1].trim())?;

        let mut params = Vec::new();
        let variadic = inside.contains("...");
        for piece in inside.split(',') {
            let piece = piece.trim();
            if piece.is_empty() || piece == "..." || piece == "void" {
                continue;
            }
            // First word is the type; any trailing word is a name.
            let type_str = piece.split_whitespace().next()?;
            params.push(CType::parse(type_str)?);
        }

        Some(Signature {
            name: name.to_string(),
            params,
            ret,
            variadic,
        })
    }

    /// Build a call site binding this signature to a library. All
    /// parameters are In; declare directions through
    /// [`CallSite::new`](super::CallSite::new) when Out/InOut is needed.
    pub fn bind(&self, library: LibrarySpec) -> FfiResult<CallSite> {
        if self.variadic {
            return Err(FfiError::unsupported(
                self.to_string(),
                "variadic call site",
            ));
        }
        let params = self.params.iter().map(|ty| Param::of(Arc::clone(ty))).collect();
        CallSite::new(
            NativeSymbol::new(library, self.name.clone()),
            params,
            Arc::clone(&self.ret),
        )
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.ret, self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        if self.variadic {
            if !self.params.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "...")?;
        }
        write!(f, ")")
    }
}
