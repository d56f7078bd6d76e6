//! Conversions between Rust values and Lua stack slots.
//!
//! Reading is strict: a slot converts only when its Lua type matches the requested Rust type. Numbers never turn
//! into strings, strings never turn into numbers, and a float with a fractional part is not an integer.

use std::collections::{BTreeMap, HashMap};
use std::ffi::c_int;
use std::hash::Hash;

use mlua::ffi;

use crate::error::LuaError;
use crate::state::LuaState;

/// Lua's `nil`, as a value that can be pushed and read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Nil;

/// A value that can be pushed as one stack slot.
///
/// A failed push may leave partial slots behind; [`LuaState::push`] trims them.
pub trait LuaPush {
    fn push_value(&self, state: &mut LuaState) -> Result<(), LuaError>;
}

/// A value that can be read from the top stack slot.
pub trait LuaPop: Sized {
    /// Convert the top slot without removing it. The stack is left exactly as found.
    fn read(state: &mut LuaState) -> Option<Self>;
}

impl<T: LuaPush + ?Sized> LuaPush for &T {
    fn push_value(&self, state: &mut LuaState) -> Result<(), LuaError> {
        (**self).push_value(state)
    }
}

impl LuaPush for Nil {
    fn push_value(&self, state: &mut LuaState) -> Result<(), LuaError> {
        state.push_nil();
        Ok(())
    }
}

impl LuaPop for Nil {
    fn read(state: &mut LuaState) -> Option<Self> {
        state.is_nil().then_some(Nil)
    }
}

macro_rules! lua_integer {
    ($($ty:ty),*) => {$(
        impl LuaPush for $ty {
            fn push_value(&self, state: &mut LuaState) -> Result<(), LuaError> {
                let value = ffi::lua_Integer::try_from(*self)
                    .map_err(|_| LuaError::Conversion(format!("{} does not fit in a Lua integer", self)))?;
                unsafe { ffi::lua_pushinteger(state.as_ptr(), value) };
                Ok(())
            }
        }

        impl LuaPop for $ty {
            fn read(state: &mut LuaState) -> Option<Self> {
                if !state.is_number() {
                    return None;
                }
                let mut is_integer: c_int = 0;
                let value = unsafe { ffi::lua_tointegerx(state.as_ptr(), -1, &mut is_integer) };
                if is_integer == 0 {
                    return None;
                }
                <$ty>::try_from(value).ok()
            }
        }
    )*};
}

lua_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! lua_float {
    ($($ty:ty),*) => {$(
        impl LuaPush for $ty {
            fn push_value(&self, state: &mut LuaState) -> Result<(), LuaError> {
                unsafe { ffi::lua_pushnumber(state.as_ptr(), ffi::lua_Number::from(*self)) };
                Ok(())
            }
        }

        impl LuaPop for $ty {
            fn read(state: &mut LuaState) -> Option<Self> {
                if !state.is_number() {
                    return None;
                }
                let value = unsafe { ffi::lua_tonumberx(state.as_ptr(), -1, std::ptr::null_mut()) };
                Some(value as $ty)
            }
        }
    )*};
}

lua_float!(f32, f64);

impl LuaPush for bool {
    fn push_value(&self, state: &mut LuaState) -> Result<(), LuaError> {
        unsafe { ffi::lua_pushboolean(state.as_ptr(), c_int::from(*self)) };
        Ok(())
    }
}

impl LuaPop for bool {
    fn read(state: &mut LuaState) -> Option<Self> {
        if !state.is_boolean() {
            return None;
        }
        Some(unsafe { ffi::lua_toboolean(state.as_ptr(), -1) } != 0)
    }
}

impl LuaPush for str {
    fn push_value(&self, state: &mut LuaState) -> Result<(), LuaError> {
        unsafe { ffi::lua_pushlstring(state.as_ptr(), self.as_ptr().cast(), self.len()) };
        Ok(())
    }
}

impl LuaPush for String {
    fn push_value(&self, state: &mut LuaState) -> Result<(), LuaError> {
        self.as_str().push_value(state)
    }
}

impl LuaPop for String {
    fn read(state: &mut LuaState) -> Option<Self> {
        // lua_tolstring converts numbers in place, so only genuine strings are read
        if !state.is_string() {
            return None;
        }
        let mut length = 0usize;
        let data = unsafe { ffi::lua_tolstring(state.as_ptr(), -1, &mut length) };
        if data.is_null() {
            return None;
        }
        let bytes = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), length) };
        String::from_utf8(bytes.to_vec()).ok()
    }
}

impl<T: LuaPush> LuaPush for Option<T> {
    fn push_value(&self, state: &mut LuaState) -> Result<(), LuaError> {
        match self {
            Some(value) => value.push_value(state),
            None => {
                state.push_nil();
                Ok(())
            }
        }
    }
}

/// `nil` reads as `None`; anything else must convert to `T`.
impl<T: LuaPop> LuaPop for Option<T> {
    fn read(state: &mut LuaState) -> Option<Self> {
        if state.is_nil() {
            return Some(None);
        }
        T::read(state).map(Some)
    }
}

/// Tables are created with `lua_createtable` and filled with `lua_rawset`.
fn push_table<'a, K, V, I>(state: &mut LuaState, entries: I, size: usize) -> Result<(), LuaError>
where
    K: LuaPush + 'a,
    V: LuaPush + 'a,
    I: Iterator<Item = (&'a K, &'a V)>,
{
    let record_hint = c_int::try_from(size).unwrap_or(c_int::MAX);
    unsafe { ffi::lua_createtable(state.as_ptr(), 0, record_hint) };
    for (key, value) in entries {
        state.reserve(2)?;
        key.push_value(state)?;
        value.push_value(state)?;
        unsafe { ffi::lua_rawset(state.as_ptr(), -3) };
    }
    Ok(())
}

impl<T: LuaPush> LuaPush for [T] {
    fn push_value(&self, state: &mut LuaState) -> Result<(), LuaError> {
        let array_hint = c_int::try_from(self.len()).unwrap_or(c_int::MAX);
        unsafe { ffi::lua_createtable(state.as_ptr(), array_hint, 0) };
        for (position, value) in (1..).zip(self) {
            state.reserve(1)?;
            value.push_value(state)?;
            unsafe { ffi::lua_rawseti(state.as_ptr(), -2, position) };
        }
        Ok(())
    }
}

impl<T: LuaPush> LuaPush for Vec<T> {
    fn push_value(&self, state: &mut LuaState) -> Result<(), LuaError> {
        self.as_slice().push_value(state)
    }
}

impl<K: LuaPush, V: LuaPush, S> LuaPush for HashMap<K, V, S> {
    fn push_value(&self, state: &mut LuaState) -> Result<(), LuaError> {
        push_table(state, self.iter(), self.len())
    }
}

impl<K: LuaPush, V: LuaPush> LuaPush for BTreeMap<K, V> {
    fn push_value(&self, state: &mut LuaState) -> Result<(), LuaError> {
        push_table(state, self.iter(), self.len())
    }
}

/// Walk the table on top of the stack, handing each converted entry to `insert`.
///
/// Fails as a whole on the first key or value that does not convert; the stack is restored either way.
fn read_table<K: LuaPop, V: LuaPop>(state: &mut LuaState, mut insert: impl FnMut(K, V)) -> Option<()> {
    if !state.is_table() || state.reserve(2).is_err() {
        return None;
    }
    let table = state.top_index();

    state.push_nil();
    while state.next_entry(table) {
        let value = V::read(state);
        state.discard(1);
        let key = K::read(state);
        match (key, value) {
            (Some(key), Some(value)) => insert(key, value),
            _ => {
                state.set_top(table);
                return None;
            }
        }
    }
    Some(())
}

impl<K: LuaPop + Eq + Hash, V: LuaPop> LuaPop for HashMap<K, V> {
    fn read(state: &mut LuaState) -> Option<Self> {
        let mut map = HashMap::new();
        read_table(state, |key, value| {
            map.insert(key, value);
        })?;
        Some(map)
    }
}

impl<K: LuaPop + Ord, V: LuaPop> LuaPop for BTreeMap<K, V> {
    fn read(state: &mut LuaState) -> Option<Self> {
        let mut map = BTreeMap::new();
        read_table(state, |key, value| {
            map.insert(key, value);
        })?;
        Some(map)
    }
}

/// A table reads as a vector only when its keys are exactly `1..=n`.
impl<T: LuaPop> LuaPop for Vec<T> {
    fn read(state: &mut LuaState) -> Option<Self> {
        let entries = BTreeMap::<i64, T>::read(state)?;
        let contiguous = entries.keys().zip(1i64..).all(|(key, expected)| *key == expected);
        if !contiguous {
            return None;
        }
        Some(entries.into_values().collect())
    }
}

/// Argument list of a Lua call.
pub trait LuaArgs {
    const COUNT: c_int;

    /// Push every argument. Slots pushed before a failure are left for the caller to trim.
    fn push_args(self, state: &mut LuaState) -> Result<(), LuaError>;
}

/// Result list of a Lua call.
///
/// `()` expects no results, any [`LuaPop`] type expects one, and tuples expect one per element.
pub trait LuaReturn: Sized {
    const COUNT: c_int;

    /// Convert the `COUNT` topmost slots without removing them.
    fn read_results(state: &mut LuaState) -> Option<Self>;
}

impl LuaReturn for () {
    const COUNT: c_int = 0;

    fn read_results(_state: &mut LuaState) -> Option<Self> {
        Some(())
    }
}

impl<T: LuaPop> LuaReturn for T {
    const COUNT: c_int = 1;

    fn read_results(state: &mut LuaState) -> Option<Self> {
        T::read(state)
    }
}

/// Read the slot at absolute `index` through a copy on top of the stack.
fn read_slot<T: LuaPop>(state: &mut LuaState, index: c_int) -> Option<T> {
    state.reserve(1).ok()?;
    state.push_copy(index);
    let value = T::read(state);
    state.discard(1);
    value
}

macro_rules! lua_tuple {
    ($count:expr; $($name:ident $position:tt),*) => {
        impl<$($name: LuaPush),*> LuaArgs for ($($name,)*) {
            const COUNT: c_int = $count;

            #[allow(unused_variables)]
            fn push_args(self, state: &mut LuaState) -> Result<(), LuaError> {
                state.reserve($count)?;
                $(self.$position.push_value(state)?;)*
                Ok(())
            }
        }
    };
}

lua_tuple!(0;);
lua_tuple!(1; A0 0);
lua_tuple!(2; A0 0, A1 1);
lua_tuple!(3; A0 0, A1 1, A2 2);
lua_tuple!(4; A0 0, A1 1, A2 2, A3 3);
lua_tuple!(5; A0 0, A1 1, A2 2, A3 3, A4 4);
lua_tuple!(6; A0 0, A1 1, A2 2, A3 3, A4 4, A5 5);
lua_tuple!(7; A0 0, A1 1, A2 2, A3 3, A4 4, A5 5, A6 6);
lua_tuple!(8; A0 0, A1 1, A2 2, A3 3, A4 4, A5 5, A6 6, A7 7);

macro_rules! lua_multi_return {
    ($count:expr; $($name:ident $position:tt),*) => {
        impl<$($name: LuaPop),*> LuaReturn for ($($name,)*) {
            const COUNT: c_int = $count;

            fn read_results(state: &mut LuaState) -> Option<Self> {
                let base = state.top_index() - $count;
                if base < 0 {
                    return None;
                }
                Some(($(read_slot::<$name>(state, base + 1 + $position)?,)*))
            }
        }
    };
}

lua_multi_return!(2; R0 0, R1 1);
lua_multi_return!(3; R0 0, R1 1, R2 2);
lua_multi_return!(4; R0 0, R1 1, R2 2, R3 3);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LuaType;

    fn state() -> LuaState {
        LuaState::new().unwrap()
    }

    #[test]
    fn test_scalars() {
        let mut state = state();
        state.push(&7i32).unwrap();
        state.push(&2.5f64).unwrap();
        state.push(&true).unwrap();
        state.push("text").unwrap();

        assert_eq!(state.pop::<String>().as_deref(), Some("text"));
        assert_eq!(state.pop::<bool>(), Some(true));
        assert_eq!(state.pop::<f64>(), Some(2.5));
        assert_eq!(state.pop::<i32>(), Some(7));
        assert_eq!(state.top_index(), 0);
    }

    #[test]
    fn test_strict_types() {
        let mut state = state();

        state.push(&12i64).unwrap();
        assert_eq!(state.top::<String>(), None);
        assert_eq!(state.top::<bool>(), None);
        assert_eq!(state.top::<f64>(), Some(12.0));
        state.discard(1);

        state.push("12").unwrap();
        assert_eq!(state.top::<i64>(), None);
        assert_eq!(state.top::<f64>(), None);
        state.discard(1);

        state.push(&1.5f64).unwrap();
        assert_eq!(state.top::<i64>(), None);
        state.discard(1);

        state.push(&300i32).unwrap();
        assert_eq!(state.top::<u8>(), None);
        assert_eq!(state.top::<u16>(), Some(300));
        state.discard(1);

        state.push(&Nil).unwrap();
        assert_eq!(state.top::<bool>(), None);
        assert_eq!(state.top::<Nil>(), Some(Nil));
        assert_eq!(state.top::<Option<i32>>(), Some(None));
        state.discard(1);

        assert_eq!(state.top_index(), 0);
    }

    #[test]
    fn test_option_push() {
        let mut state = state();
        state.push(&None::<i32>).unwrap();
        assert_eq!(state.top_type(), LuaType::Nil);
        state.push(&Some(3i32)).unwrap();
        assert_eq!(state.pop::<Option<i32>>(), Some(Some(3)));
    }

    #[test]
    fn test_vector() {
        let mut state = state();
        state.push(&vec!["a".to_string(), "b".to_string()]).unwrap();
        assert!(state.is_table());
        assert_eq!(state.pop::<Vec<String>>(), Some(vec!["a".to_string(), "b".to_string()]));

        state.push(&Vec::<i32>::new()).unwrap();
        assert_eq!(state.pop::<Vec<i32>>(), Some(Vec::new()));
        assert_eq!(state.top_index(), 0);
    }

    #[test]
    fn test_vector_rejects_gaps() {
        let mut state = state();
        let mut sparse = BTreeMap::new();
        sparse.insert(1i64, 10i32);
        sparse.insert(3i64, 30i32);
        state.push(&sparse).unwrap();

        assert_eq!(state.top::<Vec<i32>>(), None);
        assert_eq!(state.top_index(), 1);
    }

    #[test]
    fn test_map_conversion_fails_as_a_whole() {
        let mut state = state();
        let mut map = HashMap::new();
        map.insert("one".to_string(), 1i32);
        map.insert("two".to_string(), 2i32);
        state.push(&map).unwrap();

        assert_eq!(state.top::<HashMap<String, i32>>(), Some(map));
        assert_eq!(state.top::<HashMap<String, bool>>(), None);
        assert_eq!(state.top::<HashMap<i32, i32>>(), None);
        assert_eq!(state.top_index(), 1);
    }

    #[test]
    fn test_nested_containers() {
        let mut state = state();
        let mut inner = BTreeMap::new();
        inner.insert(1i32, 2i32);
        let mut outer = BTreeMap::new();
        outer.insert(vec!["key".to_string()], inner);

        state.push(&outer).unwrap();
        let read = state.pop::<BTreeMap<Vec<String>, BTreeMap<i32, i32>>>();
        assert_eq!(read, Some(outer));
        assert_eq!(state.top_index(), 0);
    }

    #[test]
    fn test_tuple_results() {
        let mut state = state();
        state.push(&1i32).unwrap();
        state.push("two").unwrap();
        state.push(&3.0f64).unwrap();

        let results = <(i32, String, f64)>::read_results(&mut state);
        assert_eq!(results, Some((1, "two".to_string(), 3.0)));
        assert_eq!(state.top_index(), 3);

        assert_eq!(<(i32, i32, i32)>::read_results(&mut state), None);
        assert_eq!(state.top_index(), 3);
    }

    #[test]
    fn test_push_args() {
        let mut state = state();
        let count = state.push_all((1i32, "two", false)).unwrap();
        assert_eq!(count, 3);
        assert_eq!(state.top_index(), 3);
        assert_eq!(state.push_all(()), Ok(0));

        let err = state.push_all((1i32, usize::MAX)).unwrap_err();
        assert!(matches!(err, LuaError::Conversion(_)));
        assert_eq!(state.top_index(), 3);
    }

    #[test]
    fn test_integer_range() {
        let mut state = state();
        state.push(&i64::MAX).unwrap();
        state.push(&(i64::MAX as u64)).unwrap();
        assert_eq!(state.pop::<u64>(), Some(i64::MAX as u64));
        assert_eq!(state.pop::<i64>(), Some(i64::MAX));

        assert!(matches!(state.push(&u64::MAX), Err(LuaError::Conversion(_))));
        assert!(state.push(&vec![1u64, u64::MAX]).is_err());
        let mut map = BTreeMap::new();
        map.insert("big".to_string(), usize::MAX);
        assert!(state.push(&map).is_err());
        assert_eq!(state.top_index(), 0);

        state.push(&-1i64).unwrap();
        assert_eq!(state.pop::<u64>(), None);
    }

    /// A chain of single-element arrays `depth` levels deep, ending in `0`.
    #[derive(Debug, PartialEq)]
    struct Depth(usize);

    impl LuaPush for Depth {
        fn push_value(&self, state: &mut LuaState) -> Result<(), LuaError> {
            match self.0 {
                0 => 0i32.push_value(state),
                depth => vec![Depth(depth - 1)].push_value(state),
            }
        }
    }

    impl LuaPop for Depth {
        fn read(state: &mut LuaState) -> Option<Self> {
            if state.is_integer() {
                return Some(Depth(0));
            }
            let mut inner = Vec::<Depth>::read(state)?;
            let next = inner.pop()?;
            inner.is_empty().then_some(Depth(next.0 + 1))
        }
    }

    #[test]
    fn test_deeply_nested_tables() {
        let mut state = state();
        state.push(&Depth(500)).unwrap();
        assert_eq!(state.top_index(), 1);
        assert_eq!(state.pop::<Depth>(), Some(Depth(500)));
        assert_eq!(state.top_index(), 0);
    }
}
