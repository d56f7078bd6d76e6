//! Loading plugins of every backend behind one entry point.
//!
//! The manager keeps a handle to every shared library it opened. A native plugin can hand out pointers into its
//! library (objects, callbacks, strings) that outlive the plugin value itself; with the manager's handle held, the
//! library stays mapped until the manager is dropped.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use trellis_core::{Config, Error, LoadError, LoadResult, PluginEntry, PluginKind};
use trellis_native::{CPlugin, CppPlugin, SharedLibrary};
#[cfg(feature = "lua")]
use trellis_lua::{LuaOptions, LuaPlugin};
#[cfg(feature = "python")]
use trellis_python::{PythonOptions, PythonPlugin};

use crate::noop::NoopPlugin;
use crate::plugin::Plugin;

/// A plugin loaded from a `[[plugins]]` manifest entry.
#[derive(Debug)]
pub struct ConfiguredPlugin {
    pub name: String,
    pub plugin: Plugin,
    /// Calls should go through [`Plugin::safe_call`].
    pub crash_guard: bool,
}

impl ConfiguredPlugin {
    pub fn kind(&self) -> PluginKind {
        self.plugin.kind()
    }
}

/// Loads plugins and owns the lifetime of the shared libraries behind them.
#[derive(Debug, Default)]
pub struct PluginManager {
    libraries: Vec<SharedLibrary>,
    #[cfg(feature = "lua")]
    lua_options: LuaOptions,
    #[cfg(feature = "python")]
    python_options: PythonOptions,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager using the `[lua]` and `[python]` sections of `config` for every script it loads.
    pub fn with_config(config: &Config) -> Self {
        #[cfg(not(any(feature = "lua", feature = "python")))]
        let _ = config;
        Self {
            libraries: Vec::new(),
            #[cfg(feature = "lua")]
            lua_options: LuaOptions::from(config.lua),
            #[cfg(feature = "python")]
            python_options: PythonOptions::from(config.python),
        }
    }

    /// Load a shared library exporting `extern "C"` functions.
    pub fn load_c_plugin(&mut self, path: impl AsRef<Path>) -> LoadResult<Plugin> {
        let library = self.open_library(path.as_ref())?;
        Ok(Plugin::C(CPlugin::from_library(library)))
    }

    /// Load a shared library exporting C++ function aliases.
    pub fn load_cpp_plugin(&mut self, path: impl AsRef<Path>) -> LoadResult<Plugin> {
        let library = self.open_library(path.as_ref())?;
        Ok(Plugin::Cpp(CppPlugin::from_library(library)))
    }

    #[cfg(feature = "lua")]
    pub fn load_lua_plugin(&mut self, path: impl AsRef<Path>) -> LoadResult<Plugin> {
        LuaPlugin::load_with(path, self.lua_options).map(Plugin::Lua)
    }

    #[cfg(feature = "python")]
    pub fn load_python_plugin(&mut self, path: impl AsRef<Path>) -> LoadResult<Plugin> {
        PythonPlugin::load_with(path, self.python_options).map(Plugin::Python)
    }

    /// Load `path` with the backend for `kind`.
    ///
    /// A backend compiled out of this build fails with [`LoadError::Unknown`]. [`PluginKind::Noop`] ignores the path.
    pub fn load(&mut self, kind: PluginKind, path: impl AsRef<Path>) -> LoadResult<Plugin> {
        let path = path.as_ref();
        debug!(%kind, path = %path.display(), "loading plugin");
        match kind {
            PluginKind::C => self.load_c_plugin(path),
            PluginKind::Cpp => self.load_cpp_plugin(path),
            #[cfg(feature = "lua")]
            PluginKind::Lua => self.load_lua_plugin(path),
            #[cfg(feature = "python")]
            PluginKind::Python => self.load_python_plugin(path),
            PluginKind::Noop => Ok(Plugin::Noop(NoopPlugin::new())),
            #[allow(unreachable_patterns)]
            disabled => {
                warn!(kind = %disabled, path = %path.display(), "plugin backend is not enabled in this build");
                Err(LoadError::Unknown)
            }
        }
    }

    /// Like [`PluginManager::load`], substituting a [`NoopPlugin`] when loading fails.
    pub fn load_or_noop(&mut self, kind: PluginKind, path: impl AsRef<Path>) -> Plugin {
        let path = path.as_ref();
        self.load(kind, path).unwrap_or_else(|error| {
            warn!(%kind, path = %path.display(), %error, "falling back to noop plugin");
            Plugin::Noop(NoopPlugin::new())
        })
    }

    /// Load every plugin of `config` in manifest order.
    ///
    /// An `optional` entry that fails to load becomes a noop plugin; any other failure stops loading and is returned
    /// as [`Error::Load`].
    pub fn load_configured(&mut self, config: &Config) -> Result<Vec<ConfiguredPlugin>, Error> {
        let mut plugins = Vec::with_capacity(config.plugins.len());
        for entry in &config.plugins {
            let path = entry_path(config, entry);
            let plugin = match self.load(entry.kind, &path) {
                Ok(plugin) => plugin,
                Err(error) if entry.optional => {
                    warn!(plugin = %entry.name, path = %path.display(), %error, "optional plugin replaced by noop");
                    Plugin::Noop(NoopPlugin::new())
                }
                Err(source) => return Err(Error::Load { path, source }),
            };
            info!(plugin = %entry.name, kind = %plugin.kind(), "plugin ready");
            plugins.push(ConfiguredPlugin { name: entry.name.clone(), plugin, crash_guard: entry.crash_guard });
        }
        Ok(plugins)
    }

    /// Library handles held on behalf of loaded native plugins, in load order.
    pub fn retained_libraries(&self) -> &[SharedLibrary] {
        &self.libraries
    }

    /// Drop retained handles no plugin or bound value uses anymore.
    ///
    /// Only call this once no raw pointers obtained from those libraries remain reachable.
    pub fn release_unused(&mut self) -> usize {
        let before = self.libraries.len();
        self.libraries.retain(|library| library.handle_count() > 1);
        let released = before - self.libraries.len();
        if released > 0 {
            debug!(released, "released unused plugin libraries");
        }
        released
    }

    fn open_library(&mut self, path: &Path) -> LoadResult<SharedLibrary> {
        let library = SharedLibrary::open(path)?;
        self.libraries.push(library.clone());
        Ok(library)
    }
}

fn entry_path(config: &Config, entry: &PluginEntry) -> PathBuf {
    entry.path.as_deref().map(|path| config.resolve_path(path)).unwrap_or_default()
}
