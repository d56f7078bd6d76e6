//! Reference-counted handles to Python objects.

use std::ffi::{CString, c_int};
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use pyo3::ffi;

use crate::exception::PythonException;

/// Proof that the current thread holds a sub-interpreter's GIL.
///
/// Obtained from [`crate::PythonGuard::gil`] and valid for as long as the guard is borrowed. Not `Send`: the GIL
/// belongs to the thread that took it.
#[derive(Debug, Clone, Copy)]
pub struct Gil<'py> {
    _guard: PhantomData<&'py ()>,
    _not_send: PhantomData<*mut ()>,
}

impl Gil<'_> {
    /// # Safety
    ///
    /// The calling thread must hold the GIL of an interpreter for the whole lifetime `'py`.
    pub(crate) unsafe fn assume<'py>() -> Gil<'py> {
        Gil { _guard: PhantomData, _not_send: PhantomData }
    }
}

/// Strong reference to a Python object, released when dropped.
///
/// Cloning adds a reference; objects cannot outlive the GIL they were created under.
#[derive(Debug)]
pub struct PythonObject<'py> {
    object: NonNull<ffi::PyObject>,
    gil: Gil<'py>,
}

impl<'py> PythonObject<'py> {
    /// Take ownership of a new reference. Returns `None` for null, which the C API uses to signal errors.
    ///
    /// # Safety
    ///
    /// `object` must be null or a new reference belonging to the interpreter `gil` was taken for.
    pub unsafe fn from_owned(gil: Gil<'py>, object: *mut ffi::PyObject) -> Option<Self> {
        NonNull::new(object).map(|object| Self { object, gil })
    }

    /// Add a reference to a borrowed object.
    ///
    /// # Safety
    ///
    /// `object` must be null or a live object belonging to the interpreter `gil` was taken for.
    pub unsafe fn from_borrowed(gil: Gil<'py>, object: *mut ffi::PyObject) -> Option<Self> {
        let object = NonNull::new(object)?;
        unsafe { ffi::Py_IncRef(object.as_ptr()) };
        Some(Self { object, gil })
    }

    /// Add a reference to a borrowed object known to be non-null.
    ///
    /// # Safety
    ///
    /// Same contract as [`PythonObject::from_borrowed`].
    pub(crate) unsafe fn from_non_null(gil: Gil<'py>, object: NonNull<ffi::PyObject>) -> Self {
        unsafe { ffi::Py_IncRef(object.as_ptr()) };
        Self { object, gil }
    }

    pub fn none(gil: Gil<'py>) -> Self {
        // Py_None never returns null
        unsafe { Self::from_non_null(gil, NonNull::new_unchecked(ffi::Py_None())) }
    }

    pub fn gil(&self) -> Gil<'py> {
        self.gil
    }

    pub fn as_ptr(&self) -> *mut ffi::PyObject {
        self.object.as_ptr()
    }

    /// Give up ownership of the reference, for APIs that steal it.
    pub fn into_ptr(self) -> *mut ffi::PyObject {
        let this = std::mem::ManuallyDrop::new(self);
        this.object.as_ptr()
    }

    pub fn is_none(&self) -> bool {
        self.as_ptr() == unsafe { ffi::Py_None() }
    }

    pub fn is_callable(&self) -> bool {
        unsafe { ffi::PyCallable_Check(self.as_ptr()) != 0 }
    }

    /// Attribute `name`, or `None` if it does not exist. A failed lookup leaves no error set.
    pub fn getattr(&self, name: &str) -> Option<PythonObject<'py>> {
        let name = CString::new(name).ok()?;
        let attribute = unsafe { ffi::PyObject_GetAttrString(self.as_ptr(), name.as_ptr()) };
        if attribute.is_null() {
            unsafe { ffi::PyErr_Clear() };
        }
        unsafe { PythonObject::from_owned(self.gil, attribute) }
    }

    /// Set attribute `name`, reporting the exception raised on failure.
    pub fn setattr(&self, name: &str, value: &PythonObject<'py>) -> Result<(), PythonException> {
        let Ok(name) = CString::new(name) else {
            return Err(PythonException::new("ValueError", "attribute name contains NUL"));
        };
        let status: c_int = unsafe { ffi::PyObject_SetAttrString(self.as_ptr(), name.as_ptr(), value.as_ptr()) };
        if status < 0 {
            return Err(PythonException::fetch(self.gil).unwrap_or_default());
        }
        Ok(())
    }

    /// Call with a tuple of positional arguments.
    pub fn call(&self, args: &PythonObject<'py>) -> Result<PythonObject<'py>, PythonException> {
        let result = unsafe { ffi::PyObject_Call(self.as_ptr(), args.as_ptr(), ptr::null_mut()) };
        unsafe { PythonObject::from_owned(self.gil, result) }
            .ok_or_else(|| PythonException::fetch(self.gil).unwrap_or_default())
    }

    /// `str(self)`, or `None` if it raises.
    pub fn str(&self) -> Option<String> {
        let text = unsafe { PythonObject::from_owned(self.gil, ffi::PyObject_Str(self.as_ptr())) };
        let Some(text) = text else {
            unsafe { ffi::PyErr_Clear() };
            return None;
        };
        text.to_utf8()
    }

    /// Contents of a `str` object.
    pub(crate) fn to_utf8(&self) -> Option<String> {
        let mut size: ffi::Py_ssize_t = 0;
        let data = unsafe { ffi::PyUnicode_AsUTF8AndSize(self.as_ptr(), &mut size) };
        if data.is_null() {
            unsafe { ffi::PyErr_Clear() };
            return None;
        }
        let bytes = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), usize::try_from(size).ok()?) };
        String::from_utf8(bytes.to_vec()).ok()
    }

    /// Name of the object's type, such as `int` or `ValueError`.
    pub fn type_name(&self) -> String {
        let kind = unsafe { PythonObject::from_borrowed(self.gil, ffi::Py_TYPE(self.as_ptr()).cast()) };
        kind.and_then(|kind| kind.getattr("__name__")).and_then(|name| name.str()).unwrap_or_default()
    }
}

impl Clone for PythonObject<'_> {
    fn clone(&self) -> Self {
        unsafe { ffi::Py_IncRef(self.as_ptr()) };
        Self { object: self.object, gil: self.gil }
    }
}

impl Drop for PythonObject<'_> {
    fn drop(&mut self) {
        unsafe { ffi::Py_DecRef(self.as_ptr()) };
    }
}
