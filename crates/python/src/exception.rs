//! Python exceptions captured as plain data.

use std::fmt;
use std::ptr;

use pyo3::ffi;

use crate::convert::PythonArgs;
use crate::object::{Gil, PythonObject};

/// An exception raised by Python code, detached from the interpreter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PythonException {
    pub type_name: String,
    pub value: String,
    pub traceback: Option<String>,
}

impl PythonException {
    pub fn new(type_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { type_name: type_name.into(), value: value.into(), traceback: None }
    }

    /// Whether an exception is set in the current interpreter.
    pub fn occurred(_gil: Gil<'_>) -> bool {
        !unsafe { ffi::PyErr_Occurred() }.is_null()
    }

    /// Take the pending exception, clearing the error indicator.
    pub fn fetch(gil: Gil<'_>) -> Option<Self> {
        let (kind, value, traceback) = unsafe { fetch_normalized() }?;
        let kind = unsafe { PythonObject::from_owned(gil, kind) };
        let value = unsafe { PythonObject::from_owned(gil, value) };
        let traceback = unsafe { PythonObject::from_owned(gil, traceback) };

        let type_name = kind.and_then(|kind| kind.getattr("__name__")).and_then(|name| name.str()).unwrap_or_default();
        let value = value.and_then(|value| value.str()).unwrap_or_default();
        let traceback = traceback.and_then(|traceback| format_traceback(gil, traceback));
        unsafe { ffi::PyErr_Clear() };

        Some(Self { type_name, value, traceback })
    }
}

#[allow(deprecated)]
unsafe fn fetch_normalized() -> Option<(*mut ffi::PyObject, *mut ffi::PyObject, *mut ffi::PyObject)> {
    let mut kind = ptr::null_mut();
    let mut value = ptr::null_mut();
    let mut traceback = ptr::null_mut();
    unsafe { ffi::PyErr_Fetch(&mut kind, &mut value, &mut traceback) };
    if kind.is_null() {
        return None;
    }
    unsafe { ffi::PyErr_NormalizeException(&mut kind, &mut value, &mut traceback) };
    Some((kind, value, traceback))
}

/// Render a traceback object with `traceback.format_tb`.
fn format_traceback<'py>(gil: Gil<'py>, traceback: PythonObject<'py>) -> Option<String> {
    let module = unsafe { PythonObject::from_owned(gil, ffi::PyImport_ImportModule(c"traceback".as_ptr())) };
    let Some(module) = module else {
        unsafe { ffi::PyErr_Clear() };
        return None;
    };

    let format_tb = module.getattr("format_tb")?;
    let args = (traceback,).into_tuple(gil)?;
    let lines = format_tb.call(&args).ok()?;
    let lines: Vec<String> = crate::convert::FromPython::from_python(&lines)?;
    Some(lines.concat())
}

impl fmt::Display for PythonException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}': '{}'", self.type_name, self.value)?;
        if let Some(traceback) = &self.traceback {
            write!(f, "\nTraceback:\n{}", traceback)?;
        }
        Ok(())
    }
}

impl std::error::Error for PythonException {}
