//! Argument and return types that may cross a native call.
//!
//! Exported symbols carry no type information. The caller names the signature through the generic parameters of
//! a call, and the symbol address is reinterpreted as a function pointer of exactly that signature. Nothing checks
//! that the plugin agrees.

use std::ffi::c_void;
use std::mem;

/// Types that can be passed to and returned from an `extern "C"` function by value.
///
/// # Safety
///
/// Implementors must have a C-compatible layout (a primitive, a raw pointer, or a `#[repr(C)]` aggregate of those)
/// and must not contain references.
pub unsafe trait CType: Copy {}

macro_rules! c_types {
    ($($ty:ty),* $(,)?) => {
        $(unsafe impl CType for $ty {})*
    };
}

c_types!(bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

/// `void` return.
unsafe impl CType for () {}

unsafe impl<T> CType for *const T {}

unsafe impl<T> CType for *mut T {}

/// Argument tuple of a native call.
pub trait NativeArgs: Sized {
    const ARITY: usize;

    /// Call `address` as `extern "C" fn(Self...) -> R`.
    ///
    /// # Safety
    ///
    /// `address` must be a function with exactly that signature.
    unsafe fn invoke<R>(self, address: *const c_void) -> R;

    /// Call `address` as `extern "C-unwind" fn(Self...) -> R`, letting foreign exceptions unwind into the host.
    ///
    /// # Safety
    ///
    /// `address` must be a function with exactly that signature.
    unsafe fn invoke_unwind<R>(self, address: *const c_void) -> R;
}

/// Argument tuple whose elements are all [`CType`]s.
pub trait CArgs: NativeArgs {}

macro_rules! native_args {
    ($arity:literal; $($ty:ident $arg:ident),*) => {
        impl<$($ty,)*> NativeArgs for ($($ty,)*) {
            const ARITY: usize = $arity;

            unsafe fn invoke<R>(self, address: *const c_void) -> R {
                let ($($arg,)*) = self;
                let function: extern "C" fn($($ty),*) -> R = unsafe { mem::transmute_copy(&address) };
                function($($arg),*)
            }

            unsafe fn invoke_unwind<R>(self, address: *const c_void) -> R {
                let ($($arg,)*) = self;
                let function: extern "C-unwind" fn($($ty),*) -> R = unsafe { mem::transmute_copy(&address) };
                function($($arg),*)
            }
        }

        impl<$($ty: CType,)*> CArgs for ($($ty,)*) {}
    };
}

native_args!(0;);
native_args!(1; A0 a0);
native_args!(2; A0 a0, A1 a1);
native_args!(3; A0 a0, A1 a1, A2 a2);
native_args!(4; A0 a0, A1 a1, A2 a2, A3 a3);
native_args!(5; A0 a0, A1 a1, A2 a2, A3 a3, A4 a4);
native_args!(6; A0 a0, A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
native_args!(7; A0 a0, A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);
native_args!(8; A0 a0, A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7);
