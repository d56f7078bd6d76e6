//! Plugins exporting plain `extern "C"` functions and variables.

use std::path::Path;

use tracing::trace;
use trellis_core::{CallError, CallResult, LoadResult};

use crate::abi::{CArgs, CType};
use crate::library::{LibraryBound, SharedLibrary};

/// Shared library whose functions and variables are exported with C linkage.
///
/// Arguments, return values and globals are restricted to [`CType`]s.
#[derive(Debug)]
pub struct CPlugin {
    library: Option<SharedLibrary>,
}

impl CPlugin {
    /// Load a C plugin from a shared library.
    pub fn load(path: impl AsRef<Path>) -> LoadResult<Self> {
        SharedLibrary::open(path.as_ref()).map(Self::from_library)
    }

    pub fn from_library(library: SharedLibrary) -> Self {
        Self { library: Some(library) }
    }

    /// Handle of the backing library; `None` after [`CPlugin::unload`].
    pub fn library(&self) -> Option<&SharedLibrary> {
        self.library.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.library.is_some()
    }

    /// Release this plugin's handle. The library stays mapped while other handles exist.
    pub fn unload(&mut self) {
        self.library = None;
    }

    pub fn has_symbol(&self, name: &str) -> bool {
        self.library.as_ref().is_some_and(|library| library.has_symbol(name))
    }

    fn loaded(&self) -> CallResult<&SharedLibrary> {
        self.library.as_ref().ok_or_else(CallError::not_loaded)
    }

    /// Call the exported function `name`.
    ///
    /// # Safety
    ///
    /// `name` must be an `extern "C"` function with exactly the signature `fn(A...) -> R`. A mismatch is
    /// undefined behavior; nothing about the symbol's type can be checked.
    pub unsafe fn call<R: CType, A: CArgs>(&mut self, name: &str, args: A) -> CallResult<R> {
        let address = self.loaded()?.symbol_address(name)?;
        trace!(function = name, arity = A::ARITY, "calling C function");
        Ok(unsafe { args.invoke(address) })
    }

    /// Call the exported function `name`, recovering from a segmentation fault inside it.
    ///
    /// A crashed call returns `R::default()`. Guarded calls are serialized process-wide.
    ///
    /// # Safety
    ///
    /// Same contract as [`CPlugin::call`]. After a recovered crash the plugin's state is whatever the fault left
    /// behind.
    #[cfg(unix)]
    pub unsafe fn safe_call<R: CType + Default, A: CArgs>(&mut self, name: &str, args: A) -> CallResult<R> {
        let address = self.loaded()?.symbol_address(name)?;
        trace!(function = name, arity = A::ARITY, "calling C function with crash guard");
        Ok(unsafe { crate::crash_guard::safe_call(move || args.invoke::<R>(address)) })
    }

    /// Like [`CPlugin::call`], keeping the library loaded for as long as the result lives.
    ///
    /// # Safety
    ///
    /// Same contract as [`CPlugin::call`].
    pub unsafe fn call_bound<R: CType, A: CArgs>(&mut self, name: &str, args: A) -> CallResult<LibraryBound<R>> {
        let value = unsafe { self.call::<R, A>(name, args) }?;
        Ok(self.loaded()?.bind(value))
    }

    /// Read the exported variable `name`.
    ///
    /// # Safety
    ///
    /// `name` must be a variable of type `T`, and no other thread may be writing it.
    pub unsafe fn global<T: CType>(&self, name: &str) -> CallResult<T> {
        let address = self.loaded()?.symbol_address(name)?;
        Ok(unsafe { address.cast::<T>().read() })
    }

    /// Overwrite the exported variable `name`.
    ///
    /// # Safety
    ///
    /// `name` must be a writable variable of type `T`, and no other thread may be accessing it.
    pub unsafe fn set_global<T: CType>(&mut self, name: &str, value: T) -> CallResult<()> {
        let address = self.loaded()?.symbol_address(name)?;
        unsafe { address.cast_mut().cast::<T>().write(value) };
        Ok(())
    }
}
