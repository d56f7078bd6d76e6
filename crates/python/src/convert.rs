//! Conversions between Rust values and Python objects.
//!
//! Conversion back to Rust is strict about types: `bool` is not an integer, an integer is not a float, `bytes` is
//! not a string, and only `list` or `tuple` converts to a vector.
//!
//! Vectors become lists, except as dictionary keys where lists are not hashable; there they become tuples.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::ptr;

use pyo3::ffi;

use crate::object::{Gil, PythonObject};

/// A value that can be turned into a new Python object.
pub trait IntoPython {
    /// `None` when the interpreter fails to allocate the object; no exception is left pending.
    fn to_python<'py>(&self, gil: Gil<'py>) -> Option<PythonObject<'py>>;
}

/// A value that can be read out of a Python object.
pub trait FromPython: Sized {
    /// `None` when the object does not have the matching Python type or its value does not fit.
    fn from_python(object: &PythonObject<'_>) -> Option<Self>;
}

/// Wrap a new reference returned by the C API, clearing any exception that came with a null result.
fn owned<'py>(gil: Gil<'py>, object: *mut ffi::PyObject) -> Option<PythonObject<'py>> {
    let object = unsafe { PythonObject::from_owned(gil, object) };
    if Option::is_none(&object) {
        unsafe { ffi::PyErr_Clear() };
    }
    object
}

/// Value of a C API getter that signals failure through `PyErr_Occurred`.
fn checked<T>(value: T) -> Option<T> {
    if unsafe { ffi::PyErr_Occurred() }.is_null() {
        return Some(value);
    }
    unsafe { ffi::PyErr_Clear() };
    None
}

impl<T: IntoPython + ?Sized> IntoPython for &T {
    fn to_python<'py>(&self, gil: Gil<'py>) -> Option<PythonObject<'py>> {
        (**self).to_python(gil)
    }
}

impl IntoPython for PythonObject<'_> {
    fn to_python<'py>(&self, gil: Gil<'py>) -> Option<PythonObject<'py>> {
        unsafe { PythonObject::from_borrowed(gil, self.as_ptr()) }
    }
}

macro_rules! python_signed {
    ($($ty:ty),*) => {$(
        impl IntoPython for $ty {
            fn to_python<'py>(&self, gil: Gil<'py>) -> Option<PythonObject<'py>> {
                owned(gil, unsafe { ffi::PyLong_FromLongLong(*self as std::ffi::c_longlong) })
            }
        }

        impl FromPython for $ty {
            fn from_python(object: &PythonObject<'_>) -> Option<Self> {
                let raw = object.as_ptr();
                if unsafe { ffi::PyLong_Check(raw) } == 0 || unsafe { ffi::PyBool_Check(raw) } != 0 {
                    return None;
                }
                let value = checked(unsafe { ffi::PyLong_AsLongLong(raw) })?;
                <$ty>::try_from(value).ok()
            }
        }
    )*};
}

macro_rules! python_unsigned {
    ($($ty:ty),*) => {$(
        impl IntoPython for $ty {
            fn to_python<'py>(&self, gil: Gil<'py>) -> Option<PythonObject<'py>> {
                owned(gil, unsafe { ffi::PyLong_FromUnsignedLongLong(*self as std::ffi::c_ulonglong) })
            }
        }

        impl FromPython for $ty {
            fn from_python(object: &PythonObject<'_>) -> Option<Self> {
                let raw = object.as_ptr();
                if unsafe { ffi::PyLong_Check(raw) } == 0 || unsafe { ffi::PyBool_Check(raw) } != 0 {
                    return None;
                }
                let value = checked(unsafe { ffi::PyLong_AsUnsignedLongLong(raw) })?;
                <$ty>::try_from(value).ok()
            }
        }
    )*};
}

python_signed!(i8, i16, i32, i64, isize);
python_unsigned!(u8, u16, u32, u64, usize);

macro_rules! python_float {
    ($($ty:ty),*) => {$(
        impl IntoPython for $ty {
            fn to_python<'py>(&self, gil: Gil<'py>) -> Option<PythonObject<'py>> {
                owned(gil, unsafe { ffi::PyFloat_FromDouble(f64::from(*self)) })
            }
        }

        impl FromPython for $ty {
            fn from_python(object: &PythonObject<'_>) -> Option<Self> {
                if unsafe { ffi::PyFloat_Check(object.as_ptr()) } == 0 {
                    return None;
                }
                let value = checked(unsafe { ffi::PyFloat_AsDouble(object.as_ptr()) })?;
                Some(value as $ty)
            }
        }
    )*};
}

python_float!(f32, f64);

impl IntoPython for bool {
    fn to_python<'py>(&self, gil: Gil<'py>) -> Option<PythonObject<'py>> {
        owned(gil, unsafe { ffi::PyBool_FromLong(std::ffi::c_long::from(*self)) })
    }
}

impl FromPython for bool {
    fn from_python(object: &PythonObject<'_>) -> Option<Self> {
        if unsafe { ffi::PyBool_Check(object.as_ptr()) } == 0 {
            return None;
        }
        Some(object.as_ptr() == unsafe { ffi::Py_True() })
    }
}

impl IntoPython for str {
    fn to_python<'py>(&self, gil: Gil<'py>) -> Option<PythonObject<'py>> {
        let length = ffi::Py_ssize_t::try_from(self.len()).ok()?;
        owned(gil, unsafe { ffi::PyUnicode_FromStringAndSize(self.as_ptr().cast(), length) })
    }
}

impl IntoPython for String {
    fn to_python<'py>(&self, gil: Gil<'py>) -> Option<PythonObject<'py>> {
        self.as_str().to_python(gil)
    }
}

impl FromPython for String {
    fn from_python(object: &PythonObject<'_>) -> Option<Self> {
        if unsafe { ffi::PyUnicode_Check(object.as_ptr()) } == 0 {
            return None;
        }
        object.to_utf8()
    }
}

impl<T: IntoPython> IntoPython for Option<T> {
    fn to_python<'py>(&self, gil: Gil<'py>) -> Option<PythonObject<'py>> {
        match self {
            Some(value) => value.to_python(gil),
            None => Some(PythonObject::none(gil)),
        }
    }
}

/// `None` reads as `None`; anything else must convert to `T`.
impl<T: FromPython> FromPython for Option<T> {
    fn from_python(object: &PythonObject<'_>) -> Option<Self> {
        if object.is_none() {
            return Some(None);
        }
        T::from_python(object).map(Some)
    }
}

impl<T: IntoPython> IntoPython for [T] {
    fn to_python<'py>(&self, gil: Gil<'py>) -> Option<PythonObject<'py>> {
        let length = ffi::Py_ssize_t::try_from(self.len()).ok()?;
        let list = owned(gil, unsafe { ffi::PyList_New(length) })?;
        for (index, value) in (0..).zip(self) {
            let item = value.to_python(gil)?;
            // steals the item reference
            unsafe { ffi::PyList_SetItem(list.as_ptr(), index, item.into_ptr()) };
        }
        Some(list)
    }
}

impl<T: IntoPython> IntoPython for Vec<T> {
    fn to_python<'py>(&self, gil: Gil<'py>) -> Option<PythonObject<'py>> {
        self.as_slice().to_python(gil)
    }
}

impl<T: FromPython> FromPython for Vec<T> {
    fn from_python(object: &PythonObject<'_>) -> Option<Self> {
        let raw = object.as_ptr();
        let is_list = unsafe { ffi::PyList_Check(raw) } != 0;
        if !is_list && unsafe { ffi::PyTuple_Check(raw) } == 0 {
            return None;
        }
        let length = if is_list { unsafe { ffi::PyList_Size(raw) } } else { unsafe { ffi::PyTuple_Size(raw) } };
        (0..length)
            .map(|index| {
                let item = match is_list {
                    true => unsafe { ffi::PyList_GetItem(raw, index) },
                    false => unsafe { ffi::PyTuple_GetItem(raw, index) },
                };
                let item = unsafe { PythonObject::from_borrowed(object.gil(), item) }?;
                T::from_python(&item)
            })
            .collect()
    }
}

/// Turn a list key into a tuple of the same items, recursively; other keys pass through.
fn hashable_key<'py>(key: PythonObject<'py>) -> Option<PythonObject<'py>> {
    let raw = key.as_ptr();
    if unsafe { ffi::PyList_Check(raw) } == 0 {
        return Some(key);
    }
    let gil = key.gil();
    let length = unsafe { ffi::PyList_Size(raw) };
    let tuple = owned(gil, unsafe { ffi::PyTuple_New(length) })?;
    for index in 0..length {
        let item = unsafe { PythonObject::from_borrowed(gil, ffi::PyList_GetItem(raw, index)) }?;
        let item = hashable_key(item)?;
        // steals the item reference
        unsafe { ffi::PyTuple_SetItem(tuple.as_ptr(), index, item.into_ptr()) };
    }
    Some(tuple)
}

fn dict_from_entries<'py, 'a, K, V, I>(gil: Gil<'py>, entries: I) -> Option<PythonObject<'py>>
where
    K: IntoPython + 'a,
    V: IntoPython + 'a,
    I: Iterator<Item = (&'a K, &'a V)>,
{
    let dict = owned(gil, unsafe { ffi::PyDict_New() })?;
    for (key, value) in entries {
        let key = hashable_key(key.to_python(gil)?)?;
        let value = value.to_python(gil)?;
        if unsafe { ffi::PyDict_SetItem(dict.as_ptr(), key.as_ptr(), value.as_ptr()) } < 0 {
            // unhashable key, such as a dict
            unsafe { ffi::PyErr_Clear() };
            return None;
        }
    }
    Some(dict)
}

/// Visit every entry of a `dict`, stopping at the first one `visit` rejects.
fn for_each_entry(
    object: &PythonObject<'_>, mut visit: impl FnMut(&PythonObject<'_>, &PythonObject<'_>) -> bool,
) -> Option<()> {
    let raw = object.as_ptr();
    if unsafe { ffi::PyDict_Check(raw) } == 0 {
        return None;
    }

    let mut position: ffi::Py_ssize_t = 0;
    let mut key = ptr::null_mut();
    let mut value = ptr::null_mut();
    while unsafe { ffi::PyDict_Next(raw, &mut position, &mut key, &mut value) } != 0 {
        let key = unsafe { PythonObject::from_borrowed(object.gil(), key) }?;
        let value = unsafe { PythonObject::from_borrowed(object.gil(), value) }?;
        if !visit(&key, &value) {
            return None;
        }
    }
    Some(())
}

impl<K: IntoPython, V: IntoPython, S> IntoPython for HashMap<K, V, S> {
    fn to_python<'py>(&self, gil: Gil<'py>) -> Option<PythonObject<'py>> {
        dict_from_entries(gil, self.iter())
    }
}

impl<K: IntoPython, V: IntoPython> IntoPython for BTreeMap<K, V> {
    fn to_python<'py>(&self, gil: Gil<'py>) -> Option<PythonObject<'py>> {
        dict_from_entries(gil, self.iter())
    }
}

impl<K: FromPython + Eq + Hash, V: FromPython> FromPython for HashMap<K, V> {
    fn from_python(object: &PythonObject<'_>) -> Option<Self> {
        let mut map = HashMap::new();
        for_each_entry(object, |key, value| match (K::from_python(key), V::from_python(value)) {
            (Some(key), Some(value)) => {
                map.insert(key, value);
                true
            }
            _ => false,
        })?;
        Some(map)
    }
}

impl<K: FromPython + Ord, V: FromPython> FromPython for BTreeMap<K, V> {
    fn from_python(object: &PythonObject<'_>) -> Option<Self> {
        let mut map = BTreeMap::new();
        for_each_entry(object, |key, value| match (K::from_python(key), V::from_python(value)) {
            (Some(key), Some(value)) => {
                map.insert(key, value);
                true
            }
            _ => false,
        })?;
        Some(map)
    }
}

/// Positional arguments of a Python call, packed into a tuple.
pub trait PythonArgs {
    const COUNT: usize;

    fn into_tuple<'py>(self, gil: Gil<'py>) -> Option<PythonObject<'py>>;
}

/// Result of a Python call; `()` discards whatever the function returned.
pub trait PythonReturn: Sized {
    fn from_result(result: PythonObject<'_>) -> Option<Self>;
}

impl PythonReturn for () {
    fn from_result(_result: PythonObject<'_>) -> Option<Self> {
        Some(())
    }
}

impl<T: FromPython> PythonReturn for T {
    fn from_result(result: PythonObject<'_>) -> Option<Self> {
        T::from_python(&result)
    }
}

macro_rules! python_args {
    ($count:expr; $($name:ident $position:tt),*) => {
        impl<$($name: IntoPython),*> PythonArgs for ($($name,)*) {
            const COUNT: usize = $count;

            #[allow(unused_variables)]
            fn into_tuple<'py>(self, gil: Gil<'py>) -> Option<PythonObject<'py>> {
                let tuple = owned(gil, unsafe { ffi::PyTuple_New($count) })?;
                $(
                    let item = IntoPython::to_python(&self.$position, gil)?;
                    // steals the item reference
                    unsafe { ffi::PyTuple_SetItem(tuple.as_ptr(), $position, item.into_ptr()) };
                )*
                Some(tuple)
            }
        }
    };
}

python_args!(0;);
python_args!(1; A0 0);
python_args!(2; A0 0, A1 1);
python_args!(3; A0 0, A1 1, A2 2);
python_args!(4; A0 0, A1 1, A2 2, A3 3);
python_args!(5; A0 0, A1 1, A2 2, A3 3, A4 4);
python_args!(6; A0 0, A1 1, A2 2, A3 3, A4 4, A5 5);
python_args!(7; A0 0, A1 1, A2 2, A3 3, A4 4, A5 5, A6 6);
python_args!(8; A0 0, A1 1, A2 2, A3 3, A4 4, A5 5, A6 6, A7 7);

macro_rules! python_tuple {
    ($count:expr; $($name:ident $position:tt),*) => {
        impl<$($name: IntoPython),*> IntoPython for ($($name,)*) {
            fn to_python<'py>(&self, gil: Gil<'py>) -> Option<PythonObject<'py>> {
                let tuple = owned(gil, unsafe { ffi::PyTuple_New($count) })?;
                $(
                    let item = self.$position.to_python(gil)?;
                    unsafe { ffi::PyTuple_SetItem(tuple.as_ptr(), $position, item.into_ptr()) };
                )*
                Some(tuple)
            }
        }

        /// Reads a `tuple` of exactly matching length.
        impl<$($name: FromPython),*> FromPython for ($($name,)*) {
            fn from_python(object: &PythonObject<'_>) -> Option<Self> {
                let raw = object.as_ptr();
                if unsafe { ffi::PyTuple_Check(raw) } == 0 || unsafe { ffi::PyTuple_Size(raw) } != $count {
                    return None;
                }
                Some(($({
                    let item = unsafe { ffi::PyTuple_GetItem(raw, $position) };
                    let item = unsafe { PythonObject::from_borrowed(object.gil(), item) }?;
                    $name::from_python(&item)?
                },)*))
            }
        }
    };
}

python_tuple!(2; T0 0, T1 1);
python_tuple!(3; T0 0, T1 1, T2 2);
python_tuple!(4; T0 0, T1 1, T2 2, T3 3);
