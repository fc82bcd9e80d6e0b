//! Native type descriptors.
//!
//! A [`CType`] describes the native shape of a value crossing the call
//! boundary: fixed-width primitives, pointers, arrays, composites with
//! C layout, text strings with a declared encoding, callback signatures,
//! and opaque handles. Descriptors are immutable once built; composites
//! are registered through [`TypeRegistry`], which computes their
//! concrete layout up front.

use std::fmt;
use std::sync::Arc;

mod layout;
mod registry;

pub use layout::{layout_of, pointer_size, size_of_type, CLayout};
pub(crate) use layout::libffi_type;
pub use registry::{RegisteredType, TypeRegistry};


/// Fixed-width primitive kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimKind {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl PrimKind {
    /// Size in bytes.
    pub fn size(&self) -> usize {
        match self {
            PrimKind::Bool | PrimKind::I8 | PrimKind::U8 => 1,
            PrimKind::I16 | PrimKind::U16 => 2,
            PrimKind::I32 | PrimKind::U32 | PrimKind::F32 => 4,
            PrimKind::I64 | PrimKind::U64 | PrimKind::F64 => 8,
        }
    }

    /// Natural alignment. For every supported kind this is the size.
    pub fn align(&self) -> usize {
        self.size()
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            PrimKind::I8
                | PrimKind::U8
                | PrimKind::I16
                | PrimKind::U16
                | PrimKind::I32
                | PrimKind::U32
                | PrimKind::I64
                | PrimKind::U64
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            PrimKind::I8 | PrimKind::I16 | PrimKind::I32 | PrimKind::I64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, PrimKind::F32 | PrimKind::F64)
    }

    /// Parse from a type-name string, accepting the usual C aliases.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bool" | "_bool" => Some(PrimKind::Bool),
            "i8" | "int8" | "int8_t" | "char" => Some(PrimKind::I8),
            "u8" | "uint8" | "uint8_t" | "byte" | "uchar" => Some(PrimKind::U8),
            "i16" | "int16" | "int16_t" | "short" => Some(PrimKind::I16),
            "u16" | "uint16" | "uint16_t" | "ushort" => Some(PrimKind::U16),
            "i32" | "int32" | "int32_t" | "int" => Some(PrimKind::I32),
            "u32" | "uint32" | "uint32_t" | "uint" => Some(PrimKind::U32),
            "i64" | "int64" | "int64_t" | "long" | "longlong" => Some(PrimKind::I64),
            "u64" | "uint64" | "uint64_t" | "ulong" | "size_t" | "usize" => Some(PrimKind::U64),
            "f32" | "float" => Some(PrimKind::F32),
            "f64" | "double" => Some(PrimKind::F64),
            _ => None,
        }
    }
}

impl fmt::Display for PrimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimKind::Bool => "bool",
            PrimKind::I8 => "i8",
            PrimKind::U8 => "u8",
            PrimKind::I16 => "i16",
            PrimKind::U16 => "u16",
            PrimKind::I32 => "i32",
            PrimKind::U32 => "u32",
            PrimKind::I64 => "i64",
            PrimKind::U64 => "u64",
            PrimKind::F32 => "f32",
            PrimKind::F64 => "f64",
        };
        write!(f, "{}", name)
    }
}

/// Text encodings for string values crossing the boundary.
///
/// UTF-8 is the default. Encoded buffers always carry the encoding's
/// terminator (one zero byte, or two for UTF-16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16,
    Latin1,
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextEncoding::Utf8 => write!(f, "utf8"),
            TextEncoding::Utf16 => write!(f, "utf16"),
            TextEncoding::Latin1 => write!(f, "latin1"),
        }
    }
}

/// How a composite member is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStorage {
    /// The member's full layout is inlined at its offset.
    Embedded,
    /// The member is a pointer-width slot referencing separate memory.
    Referenced,
}

/// A named member of a struct or union. Order is significant and fixed.
#[derive(Debug, Clone, PartialEq)]
pub struct CField {
    pub name: String,
    pub ty: Arc<CType>,
    pub storage: FieldStorage,
}

impl CField {
    pub fn embedded(name: impl Into<String>, ty: Arc<CType>) -> Self {
        CField {
            name: name.into(),
            ty,
            storage: FieldStorage::Embedded,
        }
    }

    pub fn referenced(name: impl Into<String>, ty: Arc<CType>) -> Self {
        CField {
            name: name.into(),
            ty,
            storage: FieldStorage::Referenced,
        }
    }
}

/// Descriptor for a native type.
#[derive(Debug, Clone, PartialEq)]
pub enum CType {
    /// No value. Valid only as a return type or pointer target.
    Void,
    /// Fixed-width scalar.
    Prim(PrimKind),
    /// Pointer to a target type; `None` is `void *`.
    Pointer(Option<Arc<CType>>),
    /// Array of elements. Carries no intrinsic bound: the element count
    /// lives with the allocation that created the memory.
    Array(Arc<CType>),
    /// C struct with ordered fields.
    Struct { name: String, fields: Vec<CField> },
    /// C union; members alias the same bytes.
    Union { name: String, fields: Vec<CField> },
    /// Text string with an encoding, passed as a pointer to an encoded,
    /// terminated buffer.
    Text(TextEncoding),
    /// Native-callable function pointer with the given signature.
    Callback {
        params: Vec<Arc<CType>>,
        ret: Arc<CType>,
    },
    /// A raw native pointer with no accessible interior.
    Opaque,
}

impl CType {
    pub fn prim(kind: PrimKind) -> Arc<CType> {
        Arc::new(CType::Prim(kind))
    }

    pub fn void_ptr() -> Arc<CType> {
        Arc::new(CType::Pointer(None))
    }

    pub fn ptr(target: Arc<CType>) -> Arc<CType> {
        Arc::new(CType::Pointer(Some(target)))
    }

    pub fn array(element: Arc<CType>) -> Arc<CType> {
        Arc::new(CType::Array(element))
    }

    pub fn text() -> Arc<CType> {
        Arc::new(CType::Text(TextEncoding::Utf8))
    }

    pub fn text_with(encoding: TextEncoding) -> Arc<CType> {
        Arc::new(CType::Text(encoding))
    }

    /// True when the type occupies a pointer-width slot at the call
    /// boundary (pointers, decayed arrays, text, callbacks, opaques).
    pub fn is_pointer_class(&self) -> bool {
        matches!(
            self,
            CType::Pointer(_)
                | CType::Array(_)
                | CType::Text(_)
                | CType::Callback { .. }
                | CType::Opaque
        )
    }

    /// True for struct and union descriptors.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, CType::Struct { .. } | CType::Union { .. })
    }

    /// Parse a type name, accepting C aliases and `ptr<inner>` spellings.
    pub fn parse(s: &str) -> Option<Arc<CType>> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "void" => return Some(Arc::new(CType::Void)),
            "ptr" | "pointer" | "void*" => return Some(CType::void_ptr()),
            "cstr" | "string" | "str" | "char*" => return Some(CType::text()),
            "handle" | "opaque" => return Some(Arc::new(CType::Opaque)),
            _ => {}
        }
        if let Some(inner) = s
            .strip_prefix("ptr<")
            .and_then(|rest| rest.strip_suffix('>'))
        {
            return Some(CType::ptr(CType::parse(inner)?));
        }
        PrimKind::from_str(s).map(CType::prim)
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CType::Void => write!(f, "void"),
            CType::Prim(k) => write!(f, "{}", k),
            CType::Pointer(None) => write!(f, "ptr"),
            CType::Pointer(Some(t)) => write!(f, "ptr<{}>", t),
            CType::Array(e) => write!(f, "array<{}>", e),
            CType::Struct { name, .. } => write!(f, "struct {}", name),
            CType::Union { name, .. } => write!(f, "union {}", name),
            CType::Text(e) => write!(f, "string({})", e),
            CType::Callback { params, ret } => {
                write!(f, "callback(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ") -> {}", ret)
            }
            CType::Opaque => write!(f, "handle"),
        }
    }
}
