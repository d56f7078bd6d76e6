use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use trellis_core::config::LuaSection;
use trellis_core::{CallError, CallResult, LoadError, LoadResult};

use crate::state::LuaState;
use crate::value::{LuaArgs, LuaPop, LuaPush, LuaReturn};

/// How a script is prepared when it is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LuaOptions {
    /// Open the standard libraries (`string`, `table`, `math`, ...) before the script runs.
    pub open_standard_libraries: bool,
    /// Execute the script's top-level code during loading instead of on the first [`LuaPlugin::run`].
    pub auto_run: bool,
}

impl Default for LuaOptions {
    fn default() -> Self {
        Self { open_standard_libraries: true, auto_run: true }
    }
}

impl From<LuaSection> for LuaOptions {
    fn from(section: LuaSection) -> Self {
        Self { open_standard_libraries: section.open_standard_libraries, auto_run: section.auto_run }
    }
}

/// A Lua script in its own VM.
///
/// Functions are looked up as globals by name. Every call leaves the VM stack as it found it.
#[derive(Debug)]
pub struct LuaPlugin {
    state: LuaState,
    path: PathBuf,
    pending_chunk: bool,
}

impl LuaPlugin {
    /// Load and run a script with default options.
    pub fn load(path: impl AsRef<Path>) -> LoadResult<Self> {
        Self::load_with(path, LuaOptions::default())
    }

    pub fn load_with(path: impl AsRef<Path>, options: LuaOptions) -> LoadResult<Self> {
        let path = path.as_ref();
        let source = fs::read(path).map_err(|error| {
            debug!(path = %path.display(), %error, "unable to read Lua script");
            LoadError::from(error)
        })?;

        let mut state = LuaState::new().ok_or(LoadError::Unknown)?;
        if options.open_standard_libraries {
            state.open_standard_libraries();
        }

        let chunk_name = format!("@{}", path.display());
        if let Err(error) = state.load_chunk(&source, &chunk_name) {
            warn!(path = %path.display(), %error, "unable to compile Lua script");
            return Err(LoadError::FileInvalid);
        }

        let mut plugin = Self { state, path: path.to_path_buf(), pending_chunk: true };
        if options.auto_run
            && let Err(error) = plugin.run()
        {
            warn!(path = %path.display(), error = %error.what(), "Lua script failed while loading");
            return Err(LoadError::FileInvalid);
        }
        debug!(path = %plugin.path.display(), "loaded Lua plugin");
        Ok(plugin)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A Lua plugin holds its VM for its whole lifetime.
    pub fn is_loaded(&self) -> bool {
        true
    }

    /// Whether the script's top-level code still has to be executed.
    pub fn is_pending(&self) -> bool {
        self.pending_chunk
    }

    /// Execute the script's top-level code, defining its functions and globals.
    ///
    /// Only needed when the plugin was loaded without `auto_run`; the code runs at most once.
    pub fn run(&mut self) -> CallResult<()> {
        if !self.pending_chunk {
            return Err(CallError::unknown("script has already been executed"));
        }
        self.pending_chunk = false;

        // the chunk is the only slot below every balanced call
        self.state.push_copy(1);
        let result = self.state.protected_call(0, 0);
        self.state.set_top(0);
        result.map_err(|error| CallError::unknown(error.message()))
    }

    /// Raw access to the VM.
    pub fn state(&mut self) -> &mut LuaState {
        &mut self.state
    }

    /// Call the global function `name`.
    pub fn call<R: LuaReturn, A: LuaArgs>(&mut self, name: &str, args: A) -> CallResult<R> {
        let top = self.state.top_index();
        if !self.state.push_global(name) {
            return Err(CallError::symbol_not_found(name));
        }

        let result = match self.state.function::<A, R>() {
            Some(function) => function.call(args),
            None => Err(CallError::unknown(format!("symbol '{}' is not a function", name))),
        };
        self.state.set_top(top);
        result
    }

    /// Read the global `name`. A nil global does not exist.
    pub fn global<T: LuaPop>(&mut self, name: &str) -> CallResult<T> {
        if !self.state.push_global(name) {
            return Err(CallError::symbol_not_found(name));
        }
        self.state
            .pop_always::<T>()
            .ok_or_else(|| CallError::incorrect_type(format!("global '{}' does not match the requested type", name)))
    }

    /// Assign the global `name`, creating it if needed.
    pub fn set_global<T: LuaPush>(&mut self, name: &str, value: T) -> CallResult<()> {
        self.state.push(&value).map_err(|error| {
            CallError::incorrect_type(format!("global '{}' cannot be converted to a Lua value: {}", name, error))
        })?;
        self.state.set_global(name);
        Ok(())
    }
}
