use std::ffi::c_int;

use mlua::ffi;
use thiserror::Error;

/// Failure reported by the Lua VM.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LuaError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("memory allocation failed")]
    Memory,

    #[error("error in error handler: {0}")]
    Handler(String),

    #[error("value cannot be represented in Lua: {0}")]
    Conversion(String),

    #[error("stack overflow")]
    StackOverflow,
}

impl LuaError {
    pub(crate) fn from_status(status: c_int, message: String) -> Self {
        match status {
            ffi::LUA_ERRSYNTAX => LuaError::Syntax(message),
            ffi::LUA_ERRMEM => LuaError::Memory,
            ffi::LUA_ERRERR => LuaError::Handler(message),
            _ => LuaError::Runtime(message),
        }
    }

    /// Message produced by the script, without the error category.
    pub fn message(&self) -> &str {
        match self {
            LuaError::Syntax(message)
            | LuaError::Runtime(message)
            | LuaError::Handler(message)
            | LuaError::Conversion(message) => message,
            LuaError::Memory => "not enough memory",
            LuaError::StackOverflow => "stack overflow",
        }
    }
}
