//! Library resolution and loading.
//!
//! A [`LibrarySpec`] names a library logically ("m"), by path
//! ("./libfoo.so"), or through a deferred resolver closure. Resolution
//! applies the platform naming convention and walks the search paths;
//! loading opens each distinct resolved path at most once per process and
//! caches the handle for the process lifetime. There is no unload:
//! teardown is process exit.

mod loader;
mod resolver;

pub use loader::{loaded_libraries, open_library, SharedLibrary};
pub use resolver::{add_search_path, platform_filename, LibrarySpec};

#[cfg(test)]
mod tests;
