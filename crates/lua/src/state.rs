//! Owned Lua VM and its value stack.

use std::ffi::{CString, c_int, c_void};
use std::fmt::Write as _;
use std::ptr::NonNull;
use std::slice;

use mlua::ffi;
use tracing::error;

use crate::error::LuaError;
use crate::function::LuaFunction;
use crate::value::{LuaArgs, LuaPop, LuaPush, LuaReturn};

/// Dynamic type of a stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaType {
    /// Index outside the stack.
    None,
    Nil,
    Boolean,
    LightUserData,
    Number,
    String,
    Table,
    Function,
    UserData,
    Thread,
}

impl LuaType {
    fn from_raw(raw: c_int) -> Self {
        match raw {
            ffi::LUA_TNIL => LuaType::Nil,
            ffi::LUA_TBOOLEAN => LuaType::Boolean,
            ffi::LUA_TLIGHTUSERDATA => LuaType::LightUserData,
            ffi::LUA_TNUMBER => LuaType::Number,
            ffi::LUA_TSTRING => LuaType::String,
            ffi::LUA_TTABLE => LuaType::Table,
            ffi::LUA_TFUNCTION => LuaType::Function,
            ffi::LUA_TUSERDATA => LuaType::UserData,
            ffi::LUA_TTHREAD => LuaType::Thread,
            _ => LuaType::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LuaType::None => "no value",
            LuaType::Nil => "nil",
            LuaType::Boolean => "boolean",
            LuaType::LightUserData => "light userdata",
            LuaType::Number => "number",
            LuaType::String => "string",
            LuaType::Table => "table",
            LuaType::Function => "function",
            LuaType::UserData => "userdata",
            LuaType::Thread => "thread",
        }
    }
}

/// An owned Lua VM.
///
/// All access goes through the value stack. Every operation that pushes must be matched by one that pops, so that
/// a logical operation leaves the stack as it found it.
///
/// A state may be moved to another thread but never used from two threads at once.
pub struct LuaState {
    state: NonNull<ffi::lua_State>,
}

// The VM has no thread affinity; `&mut self` on every stack operation prevents concurrent use.
unsafe impl Send for LuaState {}

impl LuaState {
    /// Create a fresh VM without any libraries.
    ///
    /// Returns `None` if the VM could not allocate its initial state.
    pub fn new() -> Option<Self> {
        let state = NonNull::new(unsafe { ffi::luaL_newstate() })?;
        unsafe { ffi::lua_atpanic(state.as_ptr(), abort_on_panic) };
        Some(Self { state })
    }

    pub fn as_ptr(&self) -> *mut ffi::lua_State {
        self.state.as_ptr()
    }

    pub fn open_standard_libraries(&mut self) {
        unsafe { ffi::luaL_openlibs(self.as_ptr()) };
    }

    /// Number of slots on the stack; also the index of the top slot.
    pub fn top_index(&self) -> c_int {
        unsafe { ffi::lua_gettop(self.as_ptr()) }
    }

    /// Grow or shrink the stack to `index` slots, filling new slots with nil.
    pub fn set_top(&mut self, index: c_int) {
        unsafe { ffi::lua_settop(self.as_ptr(), index) };
    }

    /// Remove `count` slots from the top.
    pub fn discard(&mut self, count: c_int) {
        let count = count.min(self.top_index());
        if count > 0 {
            unsafe { ffi::lua_pop(self.as_ptr(), count) };
        }
    }

    /// Whether `index` names a slot currently on the stack, counting from the bottom (positive) or the top
    /// (negative).
    pub fn is_valid_index(&self, index: c_int) -> bool {
        let top = self.top_index();
        if index < 0 { -index <= top } else { index > 0 && index <= top }
    }

    /// Type of the slot at `index`; [`LuaType::None`] when there is no such slot.
    pub fn type_at(&self, index: c_int) -> LuaType {
        if !self.is_valid_index(index) {
            return LuaType::None;
        }
        LuaType::from_raw(unsafe { ffi::lua_type(self.as_ptr(), index) })
    }

    pub fn top_type(&self) -> LuaType {
        self.type_at(-1)
    }

    pub fn is_nil(&self) -> bool {
        self.top_type() == LuaType::Nil
    }

    pub fn is_boolean(&self) -> bool {
        self.top_type() == LuaType::Boolean
    }

    pub fn is_number(&self) -> bool {
        self.top_type() == LuaType::Number
    }

    /// Whether the top slot holds a number with the integer subtype.
    pub fn is_integer(&self) -> bool {
        self.is_number() && unsafe { ffi::lua_isinteger(self.as_ptr(), -1) != 0 }
    }

    pub fn is_string(&self) -> bool {
        self.top_type() == LuaType::String
    }

    pub fn is_table(&self) -> bool {
        self.top_type() == LuaType::Table
    }

    pub fn is_function(&self) -> bool {
        self.top_type() == LuaType::Function
    }

    /// Make room for `extra` more slots.
    pub fn reserve(&mut self, extra: c_int) -> Result<(), LuaError> {
        if unsafe { ffi::lua_checkstack(self.as_ptr(), extra) } == 0 {
            return Err(LuaError::StackOverflow);
        }
        Ok(())
    }

    /// Push `value` as one slot. On failure the stack is left as it was.
    pub fn push<T: LuaPush + ?Sized>(&mut self, value: &T) -> Result<(), LuaError> {
        let top = self.top_index();
        let result = self.reserve(1).and_then(|_| value.push_value(self));
        if result.is_err() {
            self.set_top(top);
        }
        result
    }

    /// Push every element of an argument tuple, returning how many slots were pushed.
    ///
    /// On failure nothing is left on the stack.
    pub fn push_all<A: LuaArgs>(&mut self, args: A) -> Result<c_int, LuaError> {
        let top = self.top_index();
        if let Err(error) = args.push_args(self) {
            self.set_top(top);
            return Err(error);
        }
        Ok(A::COUNT)
    }

    /// Convert the top slot without removing it.
    pub fn top<T: LuaPop>(&mut self) -> Option<T> {
        T::read(self)
    }

    /// Convert and remove the top slot. The slot is only removed when the conversion succeeds.
    pub fn pop<T: LuaPop>(&mut self) -> Option<T> {
        let value = T::read(self)?;
        self.discard(1);
        Some(value)
    }

    /// Convert and remove the top slot, removing it even when the conversion fails.
    pub fn pop_always<T: LuaPop>(&mut self) -> Option<T> {
        let value = T::read(self);
        self.discard(1);
        value
    }

    /// Capture the function on top of the stack as a callable.
    ///
    /// The function stays on the stack until the returned value is called or dropped.
    pub fn function<A: LuaArgs, R: LuaReturn>(&mut self) -> Option<LuaFunction<'_, A, R>> {
        LuaFunction::from_top(self)
    }

    /// Push the global `name`; nothing is pushed and `false` returned when it is nil.
    pub fn push_global(&mut self, name: &str) -> bool {
        let Ok(name) = CString::new(name) else { return false };
        if self.reserve(1).is_err() {
            return false;
        }
        let kind = unsafe { ffi::lua_getglobal(self.as_ptr(), name.as_ptr()) };
        if kind == ffi::LUA_TNIL {
            self.discard(1);
            return false;
        }
        true
    }

    /// Pop the top slot into the global `name`.
    pub fn set_global(&mut self, name: &str) {
        match CString::new(name) {
            Ok(name) => unsafe { ffi::lua_setglobal(self.as_ptr(), name.as_ptr()) },
            Err(_) => self.discard(1),
        }
    }

    /// Compile `source` and push the resulting chunk function.
    pub fn load_chunk(&mut self, source: &[u8], chunk_name: &str) -> Result<(), LuaError> {
        let chunk_name = CString::new(chunk_name).map_err(|_| LuaError::Syntax("chunk name contains NUL".into()))?;
        let status = unsafe {
            ffi::luaL_loadbufferx(
                self.as_ptr(),
                source.as_ptr().cast(),
                source.len(),
                chunk_name.as_ptr(),
                std::ptr::null(),
            )
        };
        self.check_status(status)
    }

    /// Call the function below `nargs` arguments in protected mode, leaving `nresults` results.
    ///
    /// On failure the error value is popped and returned, so the function and its arguments are gone either way.
    pub fn protected_call(&mut self, nargs: c_int, nresults: c_int) -> Result<(), LuaError> {
        let status = unsafe { ffi::lua_pcall(self.as_ptr(), nargs, nresults, 0) };
        self.check_status(status)
    }

    fn check_status(&mut self, status: c_int) -> Result<(), LuaError> {
        if status == ffi::LUA_OK {
            return Ok(());
        }
        let message = unsafe { error_message(self.as_ptr(), -1) };
        self.discard(1);
        Err(LuaError::from_status(status, message))
    }

    /// Identity of the value at `index` for tables, functions, threads and userdata; null otherwise.
    pub(crate) fn pointer_at(&self, index: c_int) -> *const c_void {
        unsafe { ffi::lua_topointer(self.as_ptr(), index) }
    }

    /// Advance a `lua_next` traversal of the table at absolute `table` index.
    pub(crate) fn next_entry(&mut self, table: c_int) -> bool {
        unsafe { ffi::lua_next(self.as_ptr(), table) != 0 }
    }

    pub(crate) fn push_copy(&mut self, index: c_int) {
        unsafe { ffi::lua_pushvalue(self.as_ptr(), index) };
    }

    pub(crate) fn push_nil(&mut self) {
        unsafe { ffi::lua_pushnil(self.as_ptr()) };
    }

    /// Human readable listing of the stack, bottom first.
    pub fn dump_stack(&self) -> String {
        let mut output = String::new();
        for index in 1..=self.top_index() {
            let kind = self.type_at(index);
            let _ = write!(output, "{}: {}", index, kind.as_str());
            let raw = self.as_ptr();
            match kind {
                LuaType::Boolean => {
                    let _ = write!(output, " {}", unsafe { ffi::lua_toboolean(raw, index) } != 0);
                }
                LuaType::Number if unsafe { ffi::lua_isinteger(raw, index) } != 0 => {
                    let _ = write!(output, " {}", unsafe { ffi::lua_tointegerx(raw, index, std::ptr::null_mut()) });
                }
                LuaType::Number => {
                    let _ = write!(output, " {}", unsafe { ffi::lua_tonumberx(raw, index, std::ptr::null_mut()) });
                }
                LuaType::String => {
                    let _ = write!(output, " {:?}", unsafe { error_message(raw, index) });
                }
                LuaType::Table | LuaType::Function => {
                    let _ = write!(output, " {:p}", self.pointer_at(index));
                }
                _ => {}
            }
            output.push_str("\n");
        }
        output
    }
}

impl Drop for LuaState {
    fn drop(&mut self) {
        unsafe { ffi::lua_close(self.as_ptr()) };
    }
}

impl std::fmt::Debug for LuaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaState").field("top", &self.top_index()).finish()
    }
}

/// Lossy text of the string at `index`, or a description of the non-string value there.
///
/// # Safety
///
/// `state` must be a valid Lua state and `index` a valid stack index.
pub(crate) unsafe fn error_message(state: *mut ffi::lua_State, index: c_int) -> String {
    let kind = unsafe { ffi::lua_type(state, index) };
    if kind != ffi::LUA_TSTRING {
        return format!("(error object is a {} value)", LuaType::from_raw(kind).as_str());
    }

    let mut length = 0usize;
    let data = unsafe { ffi::lua_tolstring(state, index, &mut length) };
    if data.is_null() {
        return String::new();
    }
    let bytes = unsafe { slice::from_raw_parts(data.cast::<u8>(), length) };
    String::from_utf8_lossy(bytes).into_owned()
}

/// Errors escaping every protected call end up here; Lua cannot recover past this point.
unsafe extern "C-unwind" fn abort_on_panic(state: *mut ffi::lua_State) -> c_int {
    let message = unsafe { error_message(state, -1) };
    error!(%message, "unprotected error in Lua state; aborting");
    std::process::abort()
}
