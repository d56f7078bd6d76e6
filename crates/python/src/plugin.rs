use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use trellis_core::{CallResult, LoadError, LoadResult};

use crate::convert::{FromPython, IntoPython, PythonArgs, PythonReturn};
use crate::interpreter::{PythonInterpreter, PythonOptions};

/// A Python script executed in its own sub-interpreter.
///
/// Functions and globals are attributes of the script's `__main__` module.
#[derive(Debug)]
pub struct PythonPlugin {
    interpreter: PythonInterpreter,
    path: PathBuf,
}

impl PythonPlugin {
    pub fn load(path: impl AsRef<Path>) -> LoadResult<Self> {
        Self::load_with(path, PythonOptions::default())
    }

    /// Create a sub-interpreter and execute the script in it.
    pub fn load_with(path: impl AsRef<Path>, options: PythonOptions) -> LoadResult<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|error| {
            debug!(path = %path.display(), %error, "unable to read Python script");
            LoadError::from(error)
        })?;

        let mut interpreter = PythonInterpreter::new(options).map_err(|error| {
            warn!(%error, "unable to create Python interpreter");
            LoadError::from(error)
        })?;
        interpreter.execute(&source, path)?;

        debug!(path = %path.display(), own_gil = interpreter.has_own_gil(), "loaded Python plugin");
        Ok(Self { interpreter, path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A Python plugin holds its interpreter for its whole lifetime.
    pub fn is_loaded(&self) -> bool {
        true
    }

    pub fn interpreter(&mut self) -> &mut PythonInterpreter {
        &mut self.interpreter
    }

    /// Call the function `name` defined by the script.
    ///
    /// A missing or non-callable attribute is [`trellis_core::CallErrorCode::SymbolNotFound`]; an exception raised
    /// by the function is [`trellis_core::CallErrorCode::Unknown`] carrying the formatted exception.
    pub fn call<R: PythonReturn, A: PythonArgs>(&mut self, name: &str, args: A) -> CallResult<R> {
        self.interpreter.call(name, args)
    }

    pub fn global<T: FromPython>(&mut self, name: &str) -> CallResult<T> {
        self.interpreter.global(name)
    }

    pub fn set_global<T: IntoPython>(&mut self, name: &str, value: T) -> CallResult<()> {
        self.interpreter.set_global(name, value)
    }
}
