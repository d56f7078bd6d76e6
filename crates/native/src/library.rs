//! Reference-counted shared library handle.
//!
//! A [`SharedLibrary`] is an `Arc` around the loader handle. As long as any clone exists the library stays mapped,
//! so every function pointer, vtable and static it handed out remains valid. The library is closed when the last
//! clone drops.
//!
//! Values returned by a plugin call do not keep the library alive by themselves. Dropping every handle while such a
//! value is still reachable leaves it dangling, and using it afterwards is undefined behavior. Wrap those values
//! in a [`LibraryBound`] to tie them to the handle.

use std::ffi::c_void;
use std::fmt;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use tracing::{debug, warn};
use trellis_core::{CallError, CallErrorCode, CallResult, LoadError, LoadResult};

struct LoadedLibrary {
    library: Library,
    path: PathBuf,
}

impl Drop for LoadedLibrary {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "closing shared library");
    }
}

/// Clone-able handle keeping a shared library loaded.
#[derive(Clone)]
pub struct SharedLibrary {
    inner: Arc<LoadedLibrary>,
}

impl SharedLibrary {
    /// Load a shared library.
    ///
    /// The file is checked before it is handed to the dynamic loader, so a missing or unreadable file is reported as
    /// such instead of as a generic loader failure. When `path` does not exist, the platform decorated name
    /// (`lib<name>.so`, `lib<name>.dylib`, `<name>.dll`) next to it is tried as well.
    ///
    /// Loading runs the library's initialization routines. Only load libraries from trusted sources.
    pub fn open(path: &Path) -> LoadResult<Self> {
        let path = resolve_library_path(path).ok_or(LoadError::FileNotFound)?;
        let metadata = fs::metadata(&path).map_err(|e| LoadError::from_io(&e))?;
        if !metadata.is_file() {
            return Err(LoadError::FileInvalid);
        }
        fs::File::open(&path).map_err(|e| LoadError::from_io(&e))?;

        let library = unsafe { Library::new(&path) }.map_err(|error| {
            warn!(path = %path.display(), %error, "failed to load shared library");
            LoadError::FileInvalid
        })?;

        debug!(path = %path.display(), "loaded shared library");
        Ok(Self { inner: Arc::new(LoadedLibrary { library, path }) })
    }

    /// Path the library was loaded from.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Whether an exported symbol with this name exists.
    ///
    /// This is the only ABI check available: nothing is known about the symbol's type.
    pub fn has_symbol(&self, name: &str) -> bool {
        self.symbol_address(name).is_ok()
    }

    /// Address of an exported function or variable.
    pub fn symbol_address(&self, name: &str) -> CallResult<*const c_void> {
        let symbol = unsafe { self.inner.library.get::<*const c_void>(name.as_bytes()) }.map_err(|error| {
            CallError::with_message(CallErrorCode::SymbolNotFound, format!("symbol '{}' not found: {}", name, error))
        })?;
        Ok(*symbol)
    }

    /// Number of live handles to this library, including the ones held by [`LibraryBound`] values.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Tie `value` to this library so it cannot outlive it.
    pub fn bind<T>(&self, value: T) -> LibraryBound<T> {
        LibraryBound { value, library: self.clone() }
    }

    /// Whether two handles refer to the same loaded library.
    pub fn same_library(&self, other: &SharedLibrary) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SharedLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedLibrary")
            .field("path", &self.inner.path)
            .field("handles", &self.handle_count())
            .finish()
    }
}

fn resolve_library_path(path: &Path) -> Option<PathBuf> {
    if path.exists() {
        return Some(path.to_path_buf());
    }

    let name = path.file_name()?;
    let decorated = path.with_file_name(libloading::library_filename(name));
    decorated.exists().then_some(decorated)
}

/// A value produced by a native plugin, together with a handle to the library that produced it.
///
/// The value is dropped before the handle, so its destructor may still call into the library.
pub struct LibraryBound<T> {
    value: T,
    library: SharedLibrary,
}

impl<T> LibraryBound<T> {
    pub fn library(&self) -> &SharedLibrary {
        &self.library
    }

    /// Borrow the value.
    pub fn get(&self) -> &T {
        &self.value
    }
}

impl<T> Deref for LibraryBound<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for LibraryBound<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for LibraryBound<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryBound").field("value", &self.value).field("library", &self.library.path()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_missing_file() {
        let err = SharedLibrary::open(Path::new("/does/not/exist/libplugin.so")).unwrap_err();
        assert_eq!(err, LoadError::FileNotFound);
    }

    #[test]
    fn test_open_directory_is_invalid() {
        let temp_dir = TempDir::new().unwrap();
        let err = SharedLibrary::open(temp_dir.path()).unwrap_err();
        assert_eq!(err, LoadError::FileInvalid);
    }

    #[test]
    fn test_open_garbage_is_invalid() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("libgarbage.so");
        std::fs::write(&path, b"definitely not an object file").unwrap();

        let err = SharedLibrary::open(&path).unwrap_err();
        assert_eq!(err, LoadError::FileInvalid);
    }

    #[test]
    fn test_resolve_decorated_name() {
        let temp_dir = TempDir::new().unwrap();
        let decorated = temp_dir.path().join(libloading::library_filename("thing"));
        std::fs::write(&decorated, b"").unwrap();

        assert_eq!(resolve_library_path(&temp_dir.path().join("thing")), Some(decorated.clone()));
        assert_eq!(resolve_library_path(&decorated), Some(decorated));
        assert_eq!(resolve_library_path(&temp_dir.path().join("other")), None);
    }
}
