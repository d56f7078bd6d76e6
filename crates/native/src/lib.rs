//! Native plugin backends.
//!
//! - [`CPlugin`]: shared libraries exporting `extern "C"` functions and variables
//! - [`CppPlugin`]: shared libraries exporting function aliases, the way C++ plugins do
//! - [`crash_guard`]: opt-in recovery from segmentation faults inside a call (unix)
//!
//! Exported symbols carry no signature. Every call reinterprets a symbol as the function type named by the
//! caller's type parameters, so calls are `unsafe`.

pub mod abi;
pub mod c;
pub mod cpp;
#[cfg(unix)]
pub mod crash_guard;
pub mod library;

pub use abi::{CArgs, CType, NativeArgs};
pub use c::CPlugin;
pub use cpp::CppPlugin;
pub use library::{LibraryBound, SharedLibrary};
