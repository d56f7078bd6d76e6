//! One interface over every trellis plugin backend.
//!
//! - [`Plugin`]: a loaded plugin of any backend, dispatching calls to it
//! - [`PluginManager`]: loads plugins and keeps the shared libraries behind native plugins mapped
//! - [`NoopPlugin`]: stand-in answering every call with a default value
//!
//! The Lua and Python backends are behind the `lua` and `python` features, both on by default.

pub mod bounds;
pub mod manager;
pub mod noop;
pub mod plugin;

pub use bounds::{CallArgs, CallReturn, GlobalValue};
pub use manager::{ConfiguredPlugin, PluginManager};
pub use noop::NoopPlugin;
pub use plugin::Plugin;

pub use trellis_core::{CallError, CallErrorCode, CallResult, CallResultExt, Config, LoadError, LoadResult, PluginKind};
pub use trellis_native::{CPlugin, CppPlugin, LibraryBound, SharedLibrary};

#[cfg(feature = "lua")]
pub use trellis_lua::{LuaOptions, LuaPlugin};
#[cfg(feature = "python")]
pub use trellis_python::{PythonOptions, PythonPlugin};
