//! Lua functions captured from the stack.

use std::ffi::{c_int, c_void};
use std::marker::PhantomData;

use tracing::trace;
use trellis_core::{CallError, CallResult};

use crate::state::LuaState;
use crate::value::{LuaArgs, LuaReturn};

/// A Lua function sitting on the stack, callable with `A` and returning `R`.
///
/// The function occupies its stack slot until it is called or dropped. Calling checks that the slot still holds the
/// same function at the same depth; anything else means the stack was rearranged behind its back.
pub struct LuaFunction<'lua, A, R> {
    state: &'lua mut LuaState,
    identity: *const c_void,
    depth: c_int,
    consumed: bool,
    _signature: PhantomData<fn(A) -> R>,
}

impl<'lua, A: LuaArgs, R: LuaReturn> LuaFunction<'lua, A, R> {
    pub(crate) fn from_top(state: &'lua mut LuaState) -> Option<Self> {
        if !state.is_function() {
            return None;
        }
        let identity = state.pointer_at(-1);
        let depth = state.top_index();
        Some(Self { state, identity, depth, consumed: false, _signature: PhantomData })
    }

    /// Whether the captured slot still holds this function.
    pub fn is_valid(&self) -> bool {
        !self.consumed
            && self.state.top_index() == self.depth
            && self.state.is_function()
            && self.state.pointer_at(-1) == self.identity
    }

    /// Call the function in protected mode.
    ///
    /// Errors raised by the script come back as [`trellis_core::CallErrorCode::Unknown`] with the Lua message;
    /// arguments Lua cannot represent and results that do not convert to `R` as
    /// [`trellis_core::CallErrorCode::IncorrectType`]. The function and its
    /// results are removed from the stack in every case.
    pub fn call(mut self, args: A) -> CallResult<R> {
        if !self.is_valid() {
            return Err(CallError::unknown("invalid stack content"));
        }
        self.consumed = true;
        let base = self.depth - 1;

        trace!(arguments = A::COUNT, results = R::COUNT, "calling Lua function");
        if let Err(error) = self.state.push_all(args) {
            self.state.set_top(base);
            return Err(CallError::incorrect_type(format!("arguments cannot be converted to Lua values: {}", error)));
        }
        if let Err(error) = self.state.protected_call(A::COUNT, R::COUNT) {
            self.state.set_top(base);
            return Err(CallError::unknown(error.message()));
        }

        let results = R::read_results(self.state);
        self.state.set_top(base);
        results.ok_or_else(|| CallError::incorrect_type("returned values do not match the requested types"))
    }
}

impl<A, R> Drop for LuaFunction<'_, A, R> {
    fn drop(&mut self) {
        if !self.consumed && self.state.top_index() == self.depth && self.state.pointer_at(-1) == self.identity {
            self.state.discard(1);
        }
    }
}

impl<A, R> std::fmt::Debug for LuaFunction<'_, A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaFunction").field("identity", &self.identity).field("depth", &self.depth).finish()
    }
}
