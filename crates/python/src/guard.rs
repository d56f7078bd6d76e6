use std::ptr::NonNull;

use pyo3::ffi;

use crate::object::{Gil, PythonObject};

/// Holds a sub-interpreter's GIL with its thread state current, for as long as the guard lives.
///
/// Every interaction with an interpreter happens under a guard. Objects created through [`PythonGuard::gil`]
/// borrow the guard, so none of them can outlive it.
#[derive(Debug)]
pub struct PythonGuard<'i> {
    thread_state: NonNull<ffi::PyThreadState>,
    main_module: &'i NonNull<ffi::PyObject>,
}

impl<'i> PythonGuard<'i> {
    /// # Safety
    ///
    /// `thread_state` must belong to a live interpreter that is not currently held by any thread, and
    /// `main_module` must be an object of that interpreter.
    pub(crate) unsafe fn acquire(
        thread_state: NonNull<ffi::PyThreadState>, main_module: &'i NonNull<ffi::PyObject>,
    ) -> Self {
        unsafe { ffi::PyEval_AcquireThread(thread_state.as_ptr()) };
        Self { thread_state, main_module }
    }

    pub fn gil(&self) -> Gil<'_> {
        unsafe { Gil::assume() }
    }

    /// The interpreter's `__main__` module, where scripts are executed and globals live.
    pub fn main_module(&self) -> PythonObject<'_> {
        // the interpreter keeps its own reference for its whole lifetime
        unsafe { PythonObject::from_non_null(self.gil(), *self.main_module) }
    }
}

impl Drop for PythonGuard<'_> {
    fn drop(&mut self) {
        unsafe { ffi::PyEval_ReleaseThread(self.thread_state.as_ptr()) };
    }
}
