//! Composite type registration.
//!
//! Layout is computed once, at registration time, never at call time.
//! A registered type is immutable: the registry hands out shared handles
//! carrying the descriptor and its concrete layout. Members with no known
//! native representation are rejected here, before any call site can
//! reference the type.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{FfiError, FfiResult};

use super::layout::layout_of;
use super::{CLayout, CType};

/// A composite type together with its computed layout.
#[derive(Debug)]
pub struct RegisteredType {
    pub name: String,
    pub ty: Arc<CType>,
    pub layout: CLayout,
}

impl RegisteredType {
    pub fn size(&self) -> usize {
        self.layout.size
    }

    pub fn align(&self) -> usize {
        self.layout.align
    }

    /// Byte offset of the field at `index`, in declaration order.
    pub fn offset(&self, index: usize) -> Option<usize> {
        self.layout.offsets.get(index).copied()
    }
}

/// Registry of named composite types.
#[derive(Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<String, Arc<RegisteredType>>>,
}

lazy_static::lazy_static! {
    static ref GLOBAL_REGISTRY: TypeRegistry = TypeRegistry::new();
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry {
            types: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static TypeRegistry {
        &GLOBAL_REGISTRY
    }

    /// Register a struct or union descriptor under its name, computing
    /// its layout now. Re-registering the identical descriptor returns
    /// the existing handle; a conflicting descriptor under the same name
    /// is rejected.
    pub fn register(&self, ty: Arc<CType>) -> FfiResult<Arc<RegisteredType>> {
        let name = match ty.as_ref() {
            CType::Struct { name, .. } | CType::Union { name, .. } => name.clone(),
            other => {
                return Err(FfiError::unsupported(
                    other.to_string(),
                    "registration (only structs and unions register)",
                ))
            }
        };

        let mut types = self.types.write();
        if let Some(existing) = types.get(&name) {
            if *existing.ty == *ty {
                return Ok(Arc::clone(existing));
            }
            return Err(FfiError::unsupported(
                ty.to_string(),
                format!("registration ('{}' already registered differently)", name),
            ));
        }

        let layout = layout_of(&ty)?;
        log::debug!(
            "registered type '{}': size={} align={}",
            name,
            layout.size,
            layout.align
        );
        let registered = Arc::new(RegisteredType {
            name: name.clone(),
            ty,
            layout,
        });
        types.insert(name, Arc::clone(&registered));
        Ok(registered)
    }

    /// Look up a registered type by name.
    pub fn get(&self, name: &str) -> Option<Arc<RegisteredType>> {
        self.types.read().get(name).cloned()
    }

    /// Names of every registered type.
    pub fn names(&self) -> Vec<String> {
        self.types.read().keys().cloned().collect()
    }
}
