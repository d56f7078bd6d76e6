//! Python plugin backend.
//!
//! Scripts run inside CPython sub-interpreters, one per [`PythonPlugin`]. The runtime is started on first use and
//! kept for the rest of the process.
//!
//! - [`PythonInterpreter`]: a sub-interpreter and its `__main__` module
//! - [`PythonGuard`]: holds an interpreter's GIL; every [`PythonObject`] borrows one
//! - [`IntoPython`]/[`FromPython`]: strict conversions between Rust values and Python objects
//! - [`PythonException`]: a raised exception with its formatted traceback

pub mod convert;
pub mod error;
pub mod exception;
pub mod guard;
pub mod interpreter;
pub mod object;
pub mod plugin;
pub mod runtime;

pub use convert::{FromPython, IntoPython, PythonArgs, PythonReturn};
pub use error::PythonError;
pub use exception::PythonException;
pub use guard::PythonGuard;
pub use interpreter::{PythonInterpreter, PythonOptions};
pub use object::{Gil, PythonObject};
pub use plugin::PythonPlugin;
