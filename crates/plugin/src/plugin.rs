use trellis_core::{CallResult, PluginKind};
use trellis_native::{CPlugin, CppPlugin};
#[cfg(feature = "lua")]
use trellis_lua::LuaPlugin;
#[cfg(feature = "python")]
use trellis_python::PythonPlugin;

use crate::bounds::{CallArgs, CallReturn, GlobalValue};
use crate::noop::NoopPlugin;

/// A plugin of any backend.
///
/// Calls dispatch to the active variant. Arguments, results and globals are limited to types every backend can
/// carry (see [`crate::bounds`]); backend-specific types go through the `as_*_mut` accessors.
#[derive(Debug)]
pub enum Plugin {
    C(CPlugin),
    Cpp(CppPlugin),
    #[cfg(feature = "lua")]
    Lua(LuaPlugin),
    #[cfg(feature = "python")]
    Python(PythonPlugin),
    Noop(NoopPlugin),
}

impl Plugin {
    pub fn kind(&self) -> PluginKind {
        match self {
            Plugin::C(_) => PluginKind::C,
            Plugin::Cpp(_) => PluginKind::Cpp,
            #[cfg(feature = "lua")]
            Plugin::Lua(_) => PluginKind::Lua,
            #[cfg(feature = "python")]
            Plugin::Python(_) => PluginKind::Python,
            Plugin::Noop(_) => PluginKind::Noop,
        }
    }

    pub fn is_loaded(&self) -> bool {
        match self {
            Plugin::C(plugin) => plugin.is_loaded(),
            Plugin::Cpp(plugin) => plugin.is_loaded(),
            #[cfg(feature = "lua")]
            Plugin::Lua(plugin) => plugin.is_loaded(),
            #[cfg(feature = "python")]
            Plugin::Python(plugin) => plugin.is_loaded(),
            Plugin::Noop(plugin) => plugin.is_loaded(),
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Plugin::Noop(_))
    }

    /// Call the function `name`.
    ///
    /// # Safety
    ///
    /// For C and C++ plugins, `name` must have exactly the signature `fn(A...) -> R`; see [`CPlugin::call`] and
    /// [`CppPlugin::call`]. Scripted and noop plugins check types at runtime.
    pub unsafe fn call<R: CallReturn, A: CallArgs>(&mut self, name: &str, args: A) -> CallResult<R> {
        match self {
            Plugin::C(plugin) => unsafe { plugin.call(name, args) },
            Plugin::Cpp(plugin) => unsafe { plugin.call(name, args) },
            #[cfg(feature = "lua")]
            Plugin::Lua(plugin) => plugin.call(name, args),
            #[cfg(feature = "python")]
            Plugin::Python(plugin) => plugin.call(name, args),
            Plugin::Noop(plugin) => plugin.call(name, args),
        }
    }

    /// Like [`Plugin::call`], running C functions under the crash guard.
    ///
    /// A segmentation fault inside a C function yields `R::default()`. Other backends call normally.
    ///
    /// # Safety
    ///
    /// Same contract as [`Plugin::call`].
    pub unsafe fn safe_call<R: CallReturn, A: CallArgs>(&mut self, name: &str, args: A) -> CallResult<R> {
        match self {
            #[cfg(unix)]
            Plugin::C(plugin) => unsafe { plugin.safe_call(name, args) },
            _ => unsafe { self.call(name, args) },
        }
    }

    /// Read the global `name`.
    ///
    /// # Safety
    ///
    /// For C and C++ plugins, `name` must be an exported variable of type `T`.
    pub unsafe fn global<T: GlobalValue>(&mut self, name: &str) -> CallResult<T> {
        match self {
            Plugin::C(plugin) => unsafe { plugin.global(name) },
            Plugin::Cpp(plugin) => unsafe { plugin.global(name) },
            #[cfg(feature = "lua")]
            Plugin::Lua(plugin) => plugin.global(name),
            #[cfg(feature = "python")]
            Plugin::Python(plugin) => plugin.global(name),
            Plugin::Noop(plugin) => plugin.global(name),
        }
    }

    /// Write the global `name`.
    ///
    /// # Safety
    ///
    /// For C and C++ plugins, `name` must be a writable exported variable of type `T`.
    pub unsafe fn set_global<T: GlobalValue>(&mut self, name: &str, value: T) -> CallResult<()> {
        match self {
            Plugin::C(plugin) => unsafe { plugin.set_global(name, value) },
            Plugin::Cpp(plugin) => unsafe { plugin.set_global(name, value) },
            #[cfg(feature = "lua")]
            Plugin::Lua(plugin) => plugin.set_global(name, value),
            #[cfg(feature = "python")]
            Plugin::Python(plugin) => plugin.set_global(name, value),
            Plugin::Noop(plugin) => plugin.set_global(name, value),
        }
    }

    pub fn as_c_mut(&mut self) -> Option<&mut CPlugin> {
        match self {
            Plugin::C(plugin) => Some(plugin),
            _ => None,
        }
    }

    pub fn as_cpp_mut(&mut self) -> Option<&mut CppPlugin> {
        match self {
            Plugin::Cpp(plugin) => Some(plugin),
            _ => None,
        }
    }

    #[cfg(feature = "lua")]
    pub fn as_lua_mut(&mut self) -> Option<&mut LuaPlugin> {
        match self {
            Plugin::Lua(plugin) => Some(plugin),
            _ => None,
        }
    }

    #[cfg(feature = "python")]
    pub fn as_python_mut(&mut self) -> Option<&mut PythonPlugin> {
        match self {
            Plugin::Python(plugin) => Some(plugin),
            _ => None,
        }
    }
}

impl From<CPlugin> for Plugin {
    fn from(plugin: CPlugin) -> Self {
        Plugin::C(plugin)
    }
}

impl From<CppPlugin> for Plugin {
    fn from(plugin: CppPlugin) -> Self {
        Plugin::Cpp(plugin)
    }
}

#[cfg(feature = "lua")]
impl From<LuaPlugin> for Plugin {
    fn from(plugin: LuaPlugin) -> Self {
        Plugin::Lua(plugin)
    }
}

#[cfg(feature = "python")]
impl From<PythonPlugin> for Plugin {
    fn from(plugin: PythonPlugin) -> Self {
        Plugin::Python(plugin)
    }
}

impl From<NoopPlugin> for Plugin {
    fn from(plugin: NoopPlugin) -> Self {
        Plugin::Noop(plugin)
    }
}
