//! Process-wide Python runtime.
//!
//! The runtime is initialized once, on first use, and never finalized: sub-interpreters may be created and ended
//! for the rest of the process lifetime. After initialization no thread holds the main interpreter's GIL.

use std::sync::OnceLock;

use pyo3::ffi;
use tracing::{debug, error};

use crate::error::PythonError;

static RUNTIME: OnceLock<Result<(), PythonError>> = OnceLock::new();

/// Initialize the embedded runtime if this process has not done so yet.
///
/// A runtime initialized by someone else (a host application embedding Python itself) is reused as is.
pub fn initialize() -> Result<(), PythonError> {
    RUNTIME.get_or_init(initialize_once).clone()
}

pub fn is_initialized() -> bool {
    matches!(RUNTIME.get(), Some(Ok(())))
}

fn initialize_once() -> Result<(), PythonError> {
    if unsafe { ffi::Py_IsInitialized() } != 0 {
        debug!("reusing Python runtime initialized by the host");
        return Ok(());
    }

    // skip installing signal handlers; they belong to the host
    unsafe { ffi::Py_InitializeEx(0) };
    if unsafe { ffi::Py_IsInitialized() } == 0 {
        error!("Python runtime failed to initialize");
        return Err(PythonError::Initialization);
    }

    // give up the main interpreter's GIL; every later entry acquires it explicitly
    unsafe { ffi::PyEval_SaveThread() };
    debug!("initialized Python runtime");
    Ok(())
}
