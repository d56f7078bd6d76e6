//! Plugins exporting functions through alias variables.
//!
//! C++ plugins cannot export member or overloaded functions by name, so they export a variable with C linkage
//! holding the function's address (`extern "C" const void* create = &Plugin::create;`). Calling a function resolves
//! the variable and jumps through the pointer stored in it. Exported variables are accessed directly.

use std::ffi::c_void;
use std::path::Path;

use tracing::trace;
use trellis_core::{CallError, CallResult, LoadResult};

use crate::abi::NativeArgs;
use crate::library::{LibraryBound, SharedLibrary};

/// Shared library exporting function aliases.
///
/// Unlike [`crate::CPlugin`], arguments and return values may be any Rust type the plugin agrees on, including
/// references, and foreign exceptions may unwind into the caller.
#[derive(Debug)]
pub struct CppPlugin {
    library: Option<SharedLibrary>,
}

impl CppPlugin {
    /// Load a C++ plugin from a shared library.
    pub fn load(path: impl AsRef<Path>) -> LoadResult<Self> {
        SharedLibrary::open(path.as_ref()).map(Self::from_library)
    }

    pub fn from_library(library: SharedLibrary) -> Self {
        Self { library: Some(library) }
    }

    /// Handle of the backing library; `None` after [`CppPlugin::unload`].
    pub fn library(&self) -> Option<&SharedLibrary> {
        self.library.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.library.is_some()
    }

    /// Release this plugin's handle. The library stays mapped while other handles exist.
    ///
    /// Values previously returned by [`CppPlugin::call`] dangle once the last handle is gone.
    pub fn unload(&mut self) {
        self.library = None;
    }

    pub fn has_symbol(&self, name: &str) -> bool {
        self.library.as_ref().is_some_and(|library| library.has_symbol(name))
    }

    fn loaded(&self) -> CallResult<&SharedLibrary> {
        self.library.as_ref().ok_or_else(CallError::not_loaded)
    }

    /// Function address stored in the alias variable `name`.
    unsafe fn resolve_alias(&self, name: &str) -> CallResult<*const c_void> {
        let alias = self.loaded()?.symbol_address(name)?;
        let function = unsafe { alias.cast::<*const c_void>().read() };
        if function.is_null() {
            return Err(CallError::unknown(format!("alias '{}' does not point to a function", name)));
        }
        Ok(function)
    }

    /// Call the function aliased by `name`.
    ///
    /// The result may point into the library. It stays valid only while some handle to the library is alive; use
    /// [`CppPlugin::call_bound`] to keep one attached to it.
    ///
    /// # Safety
    ///
    /// `name` must be an alias variable holding a function with exactly the signature
    /// `extern "C-unwind" fn(A...) -> R`.
    pub unsafe fn call<R, A: NativeArgs>(&mut self, name: &str, args: A) -> CallResult<R> {
        let function = unsafe { self.resolve_alias(name) }?;
        trace!(function = name, arity = A::ARITY, "calling C++ alias");
        Ok(unsafe { args.invoke_unwind(function) })
    }

    /// Like [`CppPlugin::call`], keeping the library loaded for as long as the result lives.
    ///
    /// # Safety
    ///
    /// Same contract as [`CppPlugin::call`].
    pub unsafe fn call_bound<R, A: NativeArgs>(&mut self, name: &str, args: A) -> CallResult<LibraryBound<R>> {
        let value = unsafe { self.call::<R, A>(name, args) }?;
        Ok(self.loaded()?.bind(value))
    }

    /// Clone the exported variable `name`.
    ///
    /// # Safety
    ///
    /// `name` must be a variable of type `T`, and no other thread may be writing it.
    pub unsafe fn global<T: Clone>(&self, name: &str) -> CallResult<T> {
        let address = self.loaded()?.symbol_address(name)?;
        Ok(unsafe { (*address.cast::<T>()).clone() })
    }

    /// Assign to the exported variable `name`, dropping its previous value.
    ///
    /// # Safety
    ///
    /// `name` must be a writable, initialized variable of type `T`, and no other thread may be accessing it.
    pub unsafe fn set_global<T>(&mut self, name: &str, value: T) -> CallResult<()> {
        let address = self.loaded()?.symbol_address(name)?;
        unsafe { *address.cast_mut().cast::<T>() = value };
        Ok(())
    }
}
