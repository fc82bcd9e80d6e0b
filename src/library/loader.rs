//! Library loading and the process-wide handle cache.

use std::collections::HashMap;
use std::ffi::CString;
use std::path::PathBuf;
use std::sync::Arc;

use libloading::Library;
use parking_lot::Mutex;

use crate::error::{FfiError, FfiResult};

use super::LibrarySpec;

/// A loaded native library with its resolved path.
#[derive(Debug)]
pub struct SharedLibrary {
    library: Library,
    path: PathBuf,
}

impl SharedLibrary {
    /// The path (or bare linker name) the library was opened with.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Resolve a symbol to its raw address.
    ///
    /// Type agreement between the symbol and whatever the caller does
    /// with the address is the caller's contract; this only finds it.
    pub fn symbol_addr(&self, name: &str) -> FfiResult<usize> {
        let c_name = CString::new(name).map_err(|_| FfiError::SymbolNotFound {
            symbol: name.to_string(),
            library: self.path.display().to_string(),
            detail: "symbol name contains NUL".to_string(),
        })?;

        let symbol: libloading::Symbol<'_, *const ()> = unsafe {
            self.library
                .get(c_name.as_bytes_with_nul())
                .map_err(|e| FfiError::SymbolNotFound {
                    symbol: name.to_string(),
                    library: self.path.display().to_string(),
                    detail: e.to_string(),
                })?
        };

        Ok(*symbol as usize)
    }
}

lazy_static::lazy_static! {
    /// One handle per distinct resolved path, for the process lifetime.
    /// The mutex also serializes first-time opens: a path is handed to
    /// the platform loader at most once, no matter how many threads race
    /// here.
    static ref LIBRARY_CACHE: Mutex<HashMap<PathBuf, Arc<SharedLibrary>>> =
        Mutex::new(HashMap::new());
}

/// Resolve and open the library a spec refers to, reusing the cached
/// handle when the resolved path was opened before.
pub fn open_library(spec: &LibrarySpec) -> FfiResult<Arc<SharedLibrary>> {
    let candidates = spec.candidates();
    let mut cache = LIBRARY_CACHE.lock();

    // A previously opened candidate wins without touching the disk.
    for candidate in &candidates {
        if let Some(lib) = cache.get(candidate) {
            return Ok(Arc::clone(lib));
        }
    }

    let mut attempted = Vec::new();
    let last = candidates.len().saturating_sub(1);
    for (i, candidate) in candidates.iter().enumerate() {
        // Only the final bare-filename candidate goes to the linker
        // unseen; everything else must exist on disk first.
        if i != last && !candidate.exists() {
            attempted.push(candidate.clone());
            continue;
        }

        match unsafe { Library::new(candidate) } {
            Ok(library) => {
                log::debug!("loaded library '{}'", candidate.display());
                let shared = Arc::new(SharedLibrary {
                    library,
                    path: candidate.clone(),
                });
                cache.insert(candidate.clone(), Arc::clone(&shared));
                return Ok(shared);
            }
            Err(e) => {
                log::trace!("candidate '{}' failed: {}", candidate.display(), e);
                attempted.push(candidate.clone());
            }
        }
    }

    Err(FfiError::LibraryNotFound {
        name: spec.effective_name(),
        attempted,
    })
}

/// Paths of every library the process has loaded through the cache.
pub fn loaded_libraries() -> Vec<PathBuf> {
    LIBRARY_CACHE.lock().keys().cloned().collect()
}
