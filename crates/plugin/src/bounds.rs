//! Type bounds a value must meet to pass through [`crate::Plugin`].
//!
//! A facade call may reach any backend, so its arguments and results must convert for all of them. Bounds of a
//! disabled backend are blanket-implemented for every type.

use trellis_native::{CArgs, CType};

#[cfg(feature = "lua")]
mod lua {
    use trellis_lua::{LuaArgs, LuaPop, LuaPush, LuaReturn};

    pub trait LuaCallArgs: LuaArgs {}
    impl<T: LuaArgs> LuaCallArgs for T {}

    pub trait LuaCallReturn: LuaReturn {}
    impl<T: LuaReturn> LuaCallReturn for T {}

    pub trait LuaGlobal: LuaPop + LuaPush {}
    impl<T: LuaPop + LuaPush> LuaGlobal for T {}
}

#[cfg(not(feature = "lua"))]
mod lua {
    pub trait LuaCallArgs {}
    impl<T> LuaCallArgs for T {}

    pub trait LuaCallReturn {}
    impl<T> LuaCallReturn for T {}

    pub trait LuaGlobal {}
    impl<T> LuaGlobal for T {}
}

#[cfg(feature = "python")]
mod python {
    use trellis_python::{FromPython, IntoPython, PythonArgs, PythonReturn};

    pub trait PythonCallArgs: PythonArgs {}
    impl<T: PythonArgs> PythonCallArgs for T {}

    pub trait PythonCallReturn: PythonReturn {}
    impl<T: PythonReturn> PythonCallReturn for T {}

    pub trait PythonGlobal: FromPython + IntoPython {}
    impl<T: FromPython + IntoPython> PythonGlobal for T {}
}

#[cfg(not(feature = "python"))]
mod python {
    pub trait PythonCallArgs {}
    impl<T> PythonCallArgs for T {}

    pub trait PythonCallReturn {}
    impl<T> PythonCallReturn for T {}

    pub trait PythonGlobal {}
    impl<T> PythonGlobal for T {}
}

pub use lua::{LuaCallArgs, LuaCallReturn, LuaGlobal};
pub use python::{PythonCallArgs, PythonCallReturn, PythonGlobal};

/// Argument tuple accepted by every backend: C-compatible scalars, up to eight of them.
pub trait CallArgs: CArgs + LuaCallArgs + PythonCallArgs {}
impl<T: CArgs + LuaCallArgs + PythonCallArgs> CallArgs for T {}

/// Return type produced by every backend. `Default` supplies the result of crashed and noop calls.
pub trait CallReturn: CType + Default + LuaCallReturn + PythonCallReturn {}
impl<T: CType + Default + LuaCallReturn + PythonCallReturn> CallReturn for T {}

/// Global variable type readable and writable on every backend.
pub trait GlobalValue: CType + Default + LuaGlobal + PythonGlobal {}
impl<T: CType + Default + LuaGlobal + PythonGlobal> GlobalValue for T {}
