#![cfg(unix)]

use std::ffi::{CString, c_int, c_void};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Command;

use trellis_core::{CallErrorCode, CallResultExt, LoadError};
use trellis_native::{CPlugin, CppPlugin, SharedLibrary};

const CRASH_CHILD: &str = "TRELLIS_NATIVE_CRASH_CHILD";

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("TRELLIS_NATIVE_FIXTURES")).join(libloading::library_filename(name))
}

#[repr(C)]
struct CounterHandle {
    state: *mut c_void,
    increment: extern "C" fn(*mut c_void) -> c_int,
    destroy: extern "C" fn(*mut c_void),
}

#[test]
fn test_c_call_functions() {
    let mut plugin = CPlugin::load(fixture("c_plugin")).unwrap();
    assert!(plugin.is_loaded());

    let sum = unsafe { plugin.call::<i32, _>("add", (2i32, 3i32)) };
    assert_eq!(sum, Ok(5), "{}", sum.error_output());

    let product = unsafe { plugin.call::<f64, _>("multiply", (2.0f64, 3i32)) }.unwrap();
    assert_eq!(product, 9.0);

    let positive = unsafe { plugin.call::<c_int, _>("is_positive", (-4i64,)) }.unwrap();
    assert_eq!(positive, 0);
}

#[test]
fn test_c_call_with_string_pointer() {
    let mut plugin = CPlugin::load(fixture("c_plugin")).unwrap();
    let text = CString::new("trellis").unwrap();

    let length = unsafe { plugin.call::<u64, _>("string_length", (text.as_ptr(),)) }.unwrap();
    assert_eq!(length, 7);
}

#[test]
fn test_c_void_function_and_globals() {
    let mut plugin = CPlugin::load(fixture("c_plugin")).unwrap();

    unsafe { plugin.set_global::<c_int>("counter", 10) }.unwrap();
    unsafe { plugin.call::<(), _>("increment", ()) }.unwrap();
    assert_eq!(unsafe { plugin.global::<c_int>("counter") }, Ok(11));
    assert_eq!(unsafe { plugin.call::<c_int, _>("get_counter", ()) }, Ok(11));
    assert_eq!(unsafe { plugin.global::<f64>("scale") }, Ok(1.5));
}

#[test]
fn test_c_missing_symbol() {
    let mut plugin = CPlugin::load(fixture("c_plugin")).unwrap();
    assert!(plugin.has_symbol("add"));
    assert!(!plugin.has_symbol("does_not_exist"));

    let err = unsafe { plugin.call::<i32, _>("does_not_exist", (1i32,)) }.unwrap_err();
    assert_eq!(err.code(), CallErrorCode::SymbolNotFound);
    assert!(err.what().contains("does_not_exist"));

    let err = unsafe { plugin.global::<i32>("missing_global") }.unwrap_err();
    assert_eq!(err.code(), CallErrorCode::SymbolNotFound);
}

#[test]
fn test_c_unload_reports_not_loaded() {
    let mut plugin = CPlugin::load(fixture("c_plugin")).unwrap();
    plugin.unload();
    assert!(!plugin.is_loaded());

    let err = unsafe { plugin.call::<i32, _>("add", (1i32, 2i32)) }.unwrap_err();
    assert_eq!(err.code(), CallErrorCode::NotLoaded);
}

#[test]
fn test_load_by_undecorated_name() {
    let decorated = fixture("c_plugin");
    let plain = decorated.with_file_name("c_plugin");
    let library = SharedLibrary::open(&plain).unwrap();
    assert_eq!(library.path(), decorated.as_path());
}

#[test]
fn test_load_failures() {
    assert_eq!(CPlugin::load("/does/not/exist/libplugin.so").unwrap_err(), LoadError::FileNotFound);
    assert_eq!(CppPlugin::load("/does/not/exist/libplugin.so").unwrap_err(), LoadError::FileNotFound);
}

#[test]
fn test_safe_call_survives_segfault() {
    let mut plugin = CPlugin::load(fixture("c_plugin")).unwrap();

    let crashed = unsafe { plugin.safe_call::<c_int, _>("crash", (1i32,)) };
    assert_eq!(crashed, Ok(0));

    let sum = unsafe { plugin.safe_call::<c_int, _>("add", (20i32, 22i32)) };
    assert_eq!(sum, Ok(42));
    assert_eq!(unsafe { plugin.call::<c_int, _>("add", (1i32, 1i32)) }, Ok(2));
}

#[test]
fn test_unguarded_crash_kills_process() {
    if std::env::var_os(CRASH_CHILD).is_some() {
        let mut plugin = CPlugin::load(fixture("c_plugin")).unwrap();
        let _ = unsafe { plugin.call::<c_int, _>("crash", (1i32,)) };
        return;
    }

    let status = Command::new(std::env::current_exe().unwrap())
        .args(["--exact", "test_unguarded_crash_kills_process", "--test-threads=1"])
        .env(CRASH_CHILD, "1")
        .status()
        .unwrap();

    assert!(!status.success());
    assert_eq!(status.signal(), Some(libc::SIGSEGV));
}

#[test]
fn test_cpp_alias_calls() {
    let mut plugin = CppPlugin::load(fixture("cpp_plugin")).unwrap();

    assert_eq!(unsafe { plugin.call::<c_int, _>("square_alias", (7 as c_int,)) }, Ok(49));

    let value: c_int = 5;
    assert_eq!(unsafe { plugin.call::<c_int, _>("negate_alias", (&value,)) }, Ok(-5));
}

#[test]
fn test_cpp_null_alias_and_missing_symbol() {
    let mut plugin = CppPlugin::load(fixture("cpp_plugin")).unwrap();

    let err = unsafe { plugin.call::<(), _>("null_alias", ()) }.unwrap_err();
    assert_eq!(err.code(), CallErrorCode::Unknown);

    let err = unsafe { plugin.call::<(), _>("missing_alias", ()) }.unwrap_err();
    assert_eq!(err.code(), CallErrorCode::SymbolNotFound);
}

#[test]
fn test_cpp_globals() {
    let mut plugin = CppPlugin::load(fixture("cpp_plugin")).unwrap();

    assert_eq!(unsafe { plugin.global::<c_int>("version") }, Ok(3));
    unsafe { plugin.set_global::<c_int>("version", 4) }.unwrap();
    assert_eq!(unsafe { plugin.global::<c_int>("version") }, Ok(4));
    unsafe { plugin.set_global::<c_int>("version", 3) }.unwrap();
}

#[test]
fn test_cpp_object_outlives_call_while_plugin_alive() {
    let mut plugin = CppPlugin::load(fixture("cpp_plugin")).unwrap();

    let handle = unsafe { plugin.call::<CounterHandle, _>("create_counter_alias", (10 as c_int,)) }.unwrap();
    assert_eq!((handle.increment)(handle.state), 11);
    assert_eq!((handle.increment)(handle.state), 12);
    (handle.destroy)(handle.state);
}

#[test]
fn test_cpp_bound_object_keeps_library_loaded() {
    let mut plugin = CppPlugin::load(fixture("cpp_plugin")).unwrap();
    let handles_before = plugin.library().unwrap().handle_count();

    let handle = unsafe { plugin.call_bound::<CounterHandle, _>("create_counter_alias", (0 as c_int,)) }.unwrap();
    assert_eq!(handle.library().handle_count(), handles_before + 1);

    drop(plugin);
    assert_eq!(handle.library().handle_count(), 1);
    assert_eq!((handle.increment)(handle.state), 1);
    (handle.destroy)(handle.state);
}
