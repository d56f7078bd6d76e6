//! Lua plugin backend.
//!
//! Each [`LuaPlugin`] owns a Lua 5.4 VM. Values cross the boundary through the VM stack using the
//! [`LuaPush`]/[`LuaPop`] conversions; calls run in protected mode so script errors surface as
//! [`trellis_core::CallError`]s instead of unwinding.

pub mod error;
pub mod function;
pub mod plugin;
pub mod state;
pub mod value;

pub use error::LuaError;
pub use function::LuaFunction;
pub use plugin::{LuaOptions, LuaPlugin};
pub use state::{LuaState, LuaType};
pub use value::{LuaArgs, LuaPop, LuaPush, LuaReturn, Nil};
