//! Isolated Python sub-interpreters.
//!
//! Each plugin runs in its own sub-interpreter so scripts cannot see each other's modules or globals. On Python
//! 3.12 and newer a sub-interpreter can also get its own GIL, letting plugins on different threads run in parallel.

use std::ffi::CString;
use std::path::Path;
use std::ptr::NonNull;

use pyo3::ffi;
use tracing::{debug, warn};
use trellis_core::{CallError, CallResult, LoadError, LoadResult};

use crate::convert::{FromPython, IntoPython, PythonArgs, PythonReturn};
use crate::error::PythonError;
use crate::exception::PythonException;
use crate::guard::PythonGuard;
use crate::object::PythonObject;
use crate::runtime;

#[cfg(Py_3_12)]
mod config {
    use std::ffi::{c_char, c_int};

    use pyo3::ffi;

    pub const SHARED_GIL: c_int = 1;
    pub const OWN_GIL: c_int = 2;

    #[repr(C)]
    pub struct PyInterpreterConfig {
        pub use_main_obmalloc: c_int,
        pub allow_fork: c_int,
        pub allow_exec: c_int,
        pub allow_threads: c_int,
        pub allow_daemon_threads: c_int,
        pub check_multi_interp_extensions: c_int,
        pub gil: c_int,
    }

    #[repr(C)]
    pub struct PyStatus {
        pub kind: c_int,
        pub func: *const c_char,
        pub err_msg: *const c_char,
        pub exitcode: c_int,
    }

    unsafe extern "C" {
        pub fn Py_NewInterpreterFromConfig(
            thread_state: *mut *mut ffi::PyThreadState, config: *const PyInterpreterConfig,
        ) -> PyStatus;
    }

    impl PyInterpreterConfig {
        pub fn isolated(own_gil: bool) -> Self {
            if own_gil {
                Self {
                    use_main_obmalloc: 0,
                    allow_fork: 0,
                    allow_exec: 0,
                    allow_threads: 1,
                    allow_daemon_threads: 0,
                    check_multi_interp_extensions: 1,
                    gil: OWN_GIL,
                }
            } else {
                Self {
                    use_main_obmalloc: 1,
                    allow_fork: 0,
                    allow_exec: 0,
                    allow_threads: 1,
                    allow_daemon_threads: 0,
                    check_multi_interp_extensions: 0,
                    gil: SHARED_GIL,
                }
            }
        }
    }

    impl PyStatus {
        pub fn is_error(&self) -> bool {
            self.kind != 0
        }

        pub fn message(&self) -> String {
            if self.err_msg.is_null() {
                return format!("status {}", self.kind);
            }
            unsafe { std::ffi::CStr::from_ptr(self.err_msg) }.to_string_lossy().into_owned()
        }
    }
}

/// How sub-interpreters are created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PythonOptions {
    /// Request a per-interpreter GIL. Ignored before Python 3.12, where every interpreter shares one.
    pub own_gil: bool,
}

impl Default for PythonOptions {
    fn default() -> Self {
        Self { own_gil: true }
    }
}

impl From<trellis_core::config::PythonSection> for PythonOptions {
    fn from(section: trellis_core::config::PythonSection) -> Self {
        Self { own_gil: section.own_gil }
    }
}

/// A sub-interpreter with its `__main__` module.
///
/// May be moved between threads but is used by one thread at a time; every access takes the interpreter's GIL
/// through a [`PythonGuard`].
#[derive(Debug)]
pub struct PythonInterpreter {
    thread_state: NonNull<ffi::PyThreadState>,
    main_module: NonNull<ffi::PyObject>,
    own_gil: bool,
}

// The thread state is only ever made current under a guard, which `&mut self` keeps exclusive.
unsafe impl Send for PythonInterpreter {}

impl PythonInterpreter {
    /// Create a sub-interpreter, initializing the Python runtime on first use.
    pub fn new(options: PythonOptions) -> Result<Self, PythonError> {
        runtime::initialize()?;

        let gil_state = unsafe { ffi::PyGILState_Ensure() };
        let main_thread_state = unsafe { ffi::PyThreadState_Get() };

        let interpreter = unsafe { Self::create(options) }.and_then(|(thread_state, own_gil)| {
            // the new interpreter's thread state is current here
            let main_module = unsafe { ffi::PyImport_AddModule(c"__main__".as_ptr()) };
            let interpreter = match NonNull::new(main_module) {
                Some(main_module) => {
                    unsafe { ffi::Py_IncRef(main_module.as_ptr()) };
                    if own_gil {
                        unsafe { ffi::PyEval_ReleaseThread(thread_state.as_ptr()) };
                    }
                    Ok(Self { thread_state, main_module, own_gil })
                }
                None => {
                    unsafe {
                        ffi::PyErr_Clear();
                        ffi::Py_EndInterpreter(thread_state.as_ptr());
                    }
                    Err(PythonError::Interpreter("no __main__ module".into()))
                }
            };

            // creating an interpreter with its own GIL gives up the main GIL
            if own_gil {
                unsafe { ffi::PyEval_RestoreThread(main_thread_state) };
            } else {
                unsafe { ffi::PyThreadState_Swap(main_thread_state) };
            }
            interpreter
        });

        unsafe { ffi::PyGILState_Release(gil_state) };
        if let Ok(interpreter) = &interpreter {
            debug!(own_gil = interpreter.own_gil, "created Python sub-interpreter");
        }
        interpreter
    }

    /// Returns the new interpreter's thread state, current on the calling thread.
    #[cfg(Py_3_12)]
    unsafe fn create(options: PythonOptions) -> Result<(NonNull<ffi::PyThreadState>, bool), PythonError> {
        let config = config::PyInterpreterConfig::isolated(options.own_gil);
        let mut thread_state = std::ptr::null_mut();
        let status = unsafe { config::Py_NewInterpreterFromConfig(&mut thread_state, &config) };
        if status.is_error() {
            return Err(PythonError::Interpreter(status.message()));
        }
        let thread_state =
            NonNull::new(thread_state).ok_or_else(|| PythonError::Interpreter("no thread state returned".into()))?;
        Ok((thread_state, options.own_gil))
    }

    #[cfg(not(Py_3_12))]
    unsafe fn create(_options: PythonOptions) -> Result<(NonNull<ffi::PyThreadState>, bool), PythonError> {
        let thread_state = unsafe { ffi::Py_NewInterpreter() };
        let thread_state = NonNull::new(thread_state).ok_or_else(|| {
            unsafe { ffi::PyErr_Clear() };
            PythonError::Interpreter("Py_NewInterpreter failed".into())
        })?;
        Ok((thread_state, false))
    }

    /// End the interpreter owning `thread_state`. No thread state may be current on entry.
    unsafe fn end(thread_state: NonNull<ffi::PyThreadState>, own_gil: bool) {
        if own_gil {
            unsafe {
                ffi::PyEval_AcquireThread(thread_state.as_ptr());
                ffi::Py_EndInterpreter(thread_state.as_ptr());
            }
        } else {
            // ending a shared-GIL interpreter leaves the GIL held; hand it back through the main interpreter
            unsafe {
                let gil_state = ffi::PyGILState_Ensure();
                let main_thread_state = ffi::PyThreadState_Swap(thread_state.as_ptr());
                ffi::Py_EndInterpreter(thread_state.as_ptr());
                ffi::PyThreadState_Swap(main_thread_state);
                ffi::PyGILState_Release(gil_state);
            }
        }
    }

    pub fn has_own_gil(&self) -> bool {
        self.own_gil
    }

    /// Take the interpreter's GIL.
    pub fn lock(&mut self) -> PythonGuard<'_> {
        unsafe { PythonGuard::acquire(self.thread_state, &self.main_module) }
    }

    /// Execute `source` as the body of `__main__`, reporting errors against `path`.
    pub fn execute(&mut self, source: &str, path: &Path) -> LoadResult<()> {
        let source = CString::new(source).map_err(|_| LoadError::FileInvalid)?;
        let file_name = CString::new(path.to_string_lossy().as_bytes()).map_err(|_| LoadError::FileInvalid)?;

        let guard = self.lock();
        let gil = guard.gil();
        let main_module = guard.main_module();

        let code = unsafe { ffi::Py_CompileString(source.as_ptr(), file_name.as_ptr(), ffi::Py_file_input) };
        let Some(code) = (unsafe { PythonObject::from_owned(gil, code) }) else {
            let exception = PythonException::fetch(gil).unwrap_or_default();
            warn!(path = %path.display(), %exception, "unable to compile Python script");
            return Err(LoadError::FileInvalid);
        };

        if let Some(file) = path.to_string_lossy().to_python(gil)
            && let Err(exception) = main_module.setattr("__file__", &file)
        {
            debug!(path = %path.display(), %exception, "unable to set __file__ for Python script");
        }

        let globals = unsafe { ffi::PyModule_GetDict(main_module.as_ptr()) };
        let result = unsafe { ffi::PyEval_EvalCode(code.as_ptr(), globals, globals) };
        if unsafe { PythonObject::from_owned(gil, result) }.is_none() {
            let exception = PythonException::fetch(gil).unwrap_or_default();
            warn!(path = %path.display(), %exception, "Python script raised while loading");
            return Err(LoadError::Unknown);
        }
        Ok(())
    }

    /// Call the callable `name` of `__main__`.
    pub fn call<R: PythonReturn, A: PythonArgs>(&mut self, name: &str, args: A) -> CallResult<R> {
        let guard = self.lock();
        let gil = guard.gil();

        let function = guard.main_module().getattr(name).ok_or_else(|| CallError::symbol_not_found(name))?;
        if !function.is_callable() {
            return Err(CallError::symbol_not_found(name));
        }
        let args = args
            .into_tuple(gil)
            .ok_or_else(|| CallError::incorrect_type("arguments cannot be converted to Python objects"))?;

        let result = function.call(&args).map_err(|exception| CallError::unknown(exception.to_string()))?;
        R::from_result(result)
            .ok_or_else(|| CallError::incorrect_type("returned value does not match the requested type"))
    }

    /// Read the attribute `name` of `__main__`.
    pub fn global<T: FromPython>(&mut self, name: &str) -> CallResult<T> {
        let guard = self.lock();
        let value = guard.main_module().getattr(name).ok_or_else(|| CallError::symbol_not_found(name))?;
        T::from_python(&value)
            .ok_or_else(|| CallError::incorrect_type(format!("global '{}' does not match the requested type", name)))
    }

    /// Set the attribute `name` of `__main__`.
    pub fn set_global<T: IntoPython>(&mut self, name: &str, value: T) -> CallResult<()> {
        let guard = self.lock();
        let value = value
            .to_python(guard.gil())
            .ok_or_else(|| CallError::incorrect_type("value cannot be converted to a Python object"))?;
        guard.main_module().setattr(name, &value).map_err(|exception| CallError::unknown(exception.to_string()))
    }
}

impl Drop for PythonInterpreter {
    fn drop(&mut self) {
        let main_module = self.main_module;
        {
            let _guard = self.lock();
            unsafe { ffi::Py_DecRef(main_module.as_ptr()) };
        }
        unsafe { Self::end(self.thread_state, self.own_gil) };
        debug!("ended Python sub-interpreter");
    }
}
