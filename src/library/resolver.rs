//! Logical name to loadable path resolution.
//!
//! A logical name gets the platform prefix/extension treatment ("m" →
//! "libm.so" / "libm.dylib" / "m.dll", with an optional version suffix on
//! ELF). A reference that already names a file — it has a path separator
//! or the platform extension — is used as given, gaining at most the
//! extension, never the prefix. Candidates are searched across the
//! explicit search paths, the platform's library-path environment
//! variable, and the platform default directories; a bare filename that
//! matches nothing is still handed to the dynamic linker as a last
//! resort, since the linker knows paths we cannot see.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;

/// A reference to a native library.
#[derive(Clone)]
pub struct LibrarySpec {
    reference: LibraryRef,
    version: Option<String>,
}

#[derive(Clone)]
enum LibraryRef {
    /// Logical name, e.g. "m" or "sqlite3".
    Name(String),
    /// Path, used verbatim apart from a missing extension.
    Path(PathBuf),
    /// Deferred: a closure producing the name or path, invoked at most
    /// once on first use.
    Deferred {
        resolve: Arc<dyn Fn() -> String + Send + Sync>,
        cached: Arc<OnceCell<String>>,
    },
}

impl LibrarySpec {
    /// Reference a library by logical name.
    pub fn named(name: impl Into<String>) -> LibrarySpec {
        LibrarySpec {
            reference: LibraryRef::Name(name.into()),
            version: None,
        }
    }

    /// Reference a library by explicit path.
    pub fn at_path(path: impl Into<PathBuf>) -> LibrarySpec {
        LibrarySpec {
            reference: LibraryRef::Path(path.into()),
            version: None,
        }
    }

    /// Reference a library through a deferred resolver. The closure runs
    /// at most once, on first use; its product is cached like a literal
    /// name.
    pub fn deferred(resolve: impl Fn() -> String + Send + Sync + 'static) -> LibrarySpec {
        LibrarySpec {
            reference: LibraryRef::Deferred {
                resolve: Arc::new(resolve),
                cached: Arc::new(OnceCell::new()),
            },
            version: None,
        }
    }

    /// Attach a version token, e.g. "6" or "3.39.2". Applied as an ELF
    /// suffix ("libname.so.6"); other platforms ignore it.
    pub fn with_version(mut self, version: impl Into<String>) -> LibrarySpec {
        self.version = Some(version.into());
        self
    }

    /// The effective name or path, invoking a deferred resolver on first
    /// use.
    pub fn effective_name(&self) -> String {
        match &self.reference {
            LibraryRef::Name(name) => name.clone(),
            LibraryRef::Path(path) => path.display().to_string(),
            LibraryRef::Deferred { resolve, cached } => {
                cached.get_or_init(|| (**resolve)()).clone()
            }
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Produce the ordered candidate paths for this spec. The last
    /// candidate is always the bare filename, which the loader hands to
    /// the dynamic linker if nothing on disk matched first.
    pub fn candidates(&self) -> Vec<PathBuf> {
        let name = self.effective_name();
        let reference = Path::new(&name);

        // Already-qualified references: keep them, add only the
        // extension when it is missing. Never the prefix.
        if name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') {
            let qualified = if has_platform_extension(&name) {
                PathBuf::from(&name)
            } else {
                PathBuf::from(format!("{}.{}", name, platform_extension()))
            };
            return vec![qualified];
        }
        if has_platform_extension(&name) {
            return search_everywhere(reference);
        }

        let filename = platform_filename(&name, self.version.as_deref());
        search_everywhere(Path::new(&filename))
    }
}

impl fmt::Debug for LibrarySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match &self.reference {
            LibraryRef::Name(n) => n.clone(),
            LibraryRef::Path(p) => p.display().to_string(),
            LibraryRef::Deferred { cached, .. } => cached
                .get()
                .cloned()
                .unwrap_or_else(|| "<deferred>".to_string()),
        };
        f.debug_struct("LibrarySpec")
            .field("reference", &name)
            .field("version", &self.version)
            .finish()
    }
}

lazy_static::lazy_static! {
    /// Extra search paths registered by the embedding runtime.
    static ref SEARCH_PATHS: RwLock<Vec<PathBuf>> = RwLock::new(Vec::new());
}

/// Add a directory to the front of the library search order.
pub fn add_search_path(path: impl Into<PathBuf>) {
    SEARCH_PATHS.write().push(path.into());
}

/// Construct the platform-specific library filename for a logical name.
pub fn platform_filename(name: &str, version: Option<&str>) -> String {
    #[cfg(target_os = "windows")]
    {
        let _ = version;
        format!("{}.dll", name)
    }

    #[cfg(target_os = "macos")]
    {
        let _ = version;
        format!("lib{}.dylib", name)
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        match version {
            Some(v) => format!("lib{}.so.{}", name, v),
            None => format!("lib{}.so", name),
        }
    }
}

fn platform_extension() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        "dll"
    }
    #[cfg(target_os = "macos")]
    {
        "dylib"
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        "so"
    }
}

fn has_platform_extension(name: &str) -> bool {
    #[cfg(target_os = "windows")]
    {
        name.ends_with(".dll")
    }
    #[cfg(target_os = "macos")]
    {
        name.ends_with(".dylib")
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // "libm.so" and the versioned "libm.so.6" both qualify.
        name.ends_with(".so") || name.contains(".so.")
    }
}

/// Expand a filename across the search order, ending with the bare
/// filename for the dynamic linker's own lookup.
fn search_everywhere(filename: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    for dir in SEARCH_PATHS.read().iter() {
        candidates.push(dir.join(filename));
    }
    for dir in env_library_paths() {
        candidates.push(dir.join(filename));
    }
    for dir in default_search_paths() {
        candidates.push(dir.join(filename));
    }
    candidates.push(filename.to_path_buf());
    candidates
}

/// Directories from the platform's library-path environment variable.
fn env_library_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    let (var, sep) = ("PATH", ';');
    #[cfg(target_os = "macos")]
    let (var, sep) = ("DYLD_LIBRARY_PATH", ':');
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let (var, sep) = ("LD_LIBRARY_PATH", ':');

    match env::var(var) {
        Ok(joined) => joined
            .split(sep)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Standard system library directories for this platform.
fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = env::current_dir() {
        paths.push(cwd);
    }

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/usr/lib"));
        paths.push(PathBuf::from("/usr/lib64"));
        paths.push(PathBuf::from("/lib"));
        paths.push(PathBuf::from("/lib64"));
        paths.push(PathBuf::from("/usr/lib/x86_64-linux-gnu"));
        paths.push(PathBuf::from("/usr/lib/aarch64-linux-gnu"));
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/usr/lib"));
        paths.push(PathBuf::from("/opt/homebrew/lib"));
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(root) = env::var("SYSTEMROOT") {
            paths.push(PathBuf::from(format!("{}\\System32", root)));
        }
    }

    paths
}
