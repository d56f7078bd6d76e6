use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use tempfile::TempDir;
use trellis_core::{CallErrorCode, CallResultExt, LoadError};
use trellis_python::{PythonOptions, PythonPlugin};

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/test.py")
}

fn plugin() -> PythonPlugin {
    PythonPlugin::load(fixture()).unwrap()
}

#[test]
fn test_call_with_mixed_arguments() {
    let mut plugin = plugin();
    let accepted = plugin.call::<bool, _>("accept_int_string_bool_float", (1i32, "text", true, 2.5f64));
    assert_eq!(accepted, Ok(true), "{}", accepted.error_output());
}

#[test]
fn test_call_with_wrong_argument_types() {
    let mut plugin = plugin();
    let accepted = plugin.call::<bool, _>("accept_int_string_bool_float", (1.0f64, "text", true, 2.5f64)).unwrap();
    assert!(!accepted);
    let accepted = plugin.call::<bool, _>("accept_int_string_bool_float", (1i32, "text", 1i32, 2.5f64)).unwrap();
    assert!(!accepted);
}

#[test]
fn test_pass_dict_and_list() {
    let mut plugin = plugin();
    let mut map = HashMap::new();
    map.insert("key".to_string(), 17i32);
    assert_eq!(plugin.call::<i32, _>("accept_dict", (map, "key")), Ok(17));

    let items = vec!["a".to_string(), "b".to_string()];
    assert_eq!(plugin.call::<String, _>("accept_list", (items,)).as_deref(), Ok("a,b,"));
}

#[test]
fn test_identity_containers() {
    let mut plugin = plugin();
    let mut inner = BTreeMap::new();
    inner.insert(1i32, vec![1.5f64, 2.5]);
    let mut outer = BTreeMap::new();
    outer.insert("key".to_string(), inner);

    let returned = plugin.call::<BTreeMap<String, BTreeMap<i32, Vec<f64>>>, _>("identity", (outer.clone(),)).unwrap();
    assert_eq!(returned, outer);

    assert_eq!(plugin.call::<Option<i32>, _>("identity", (None::<i32>,)), Ok(None));
    assert_eq!(plugin.call::<Option<i32>, _>("identity", (Some(4i32),)), Ok(Some(4)));
}

#[test]
fn test_strict_return_types() {
    let mut plugin = plugin();
    assert_eq!(plugin.call::<i32, _>("identity", (true,)).unwrap_err().code(), CallErrorCode::IncorrectType);
    assert_eq!(plugin.call::<f64, _>("identity", (3i32,)).unwrap_err().code(), CallErrorCode::IncorrectType);
    assert_eq!(plugin.call::<u8, _>("identity", (300i32,)).unwrap_err().code(), CallErrorCode::IncorrectType);
    assert_eq!(plugin.call::<String, _>("identity", (3i32,)).unwrap_err().code(), CallErrorCode::IncorrectType);
    assert_eq!(plugin.call::<String, _>("encode", ("text",)).unwrap_err().code(), CallErrorCode::IncorrectType);
}

#[test]
fn test_nested_identity_with_sequence_keys() {
    let mut plugin = plugin();
    let mut inner = BTreeMap::new();
    inner.insert(1i32, 10i32);
    inner.insert(2i32, 20i32);
    let mut outer = BTreeMap::new();
    outer.insert(vec!["a".to_string(), "b".to_string()], inner);
    outer.insert(Vec::new(), BTreeMap::new());

    let returned = plugin.call::<BTreeMap<Vec<String>, BTreeMap<i32, i32>>, _>("identity", (outer.clone(),));
    assert_eq!(returned, Ok(outer), "{}", returned.error_output());

    let mut nested = HashMap::new();
    nested.insert(vec![vec![1i32], vec![2, 3]], "deep".to_string());
    assert_eq!(plugin.call::<HashMap<Vec<Vec<i32>>, String>, _>("identity", (nested.clone(),)), Ok(nested));

    let mut unhashable = HashMap::new();
    unhashable.insert(BTreeMap::from([(1i32, 1i32)]), 0i32);
    let err = plugin.call::<(), _>("identity", (BTreeMap::from([(1i32, unhashable)]),)).unwrap_err();
    assert_eq!(err.code(), CallErrorCode::IncorrectType);
}

#[test]
fn test_tuple_reads_as_vector() {
    let mut plugin = plugin();
    let items = vec![1i32, 2, 3];
    assert_eq!(plugin.call::<Vec<i32>, _>("as_tuple", (items.clone(),)), Ok(items));
    assert_eq!(plugin.call::<Vec<i32>, _>("identity", ("123",)).unwrap_err().code(), CallErrorCode::IncorrectType);
}

#[test]
fn test_tuple_return() {
    let mut plugin = plugin();
    assert_eq!(plugin.call::<(i32, i32, i32), _>("values", (10i32,)), Ok((10, 20, 30)));
    assert_eq!(plugin.call::<(i32, i32), _>("values", (10i32,)).unwrap_err().code(), CallErrorCode::IncorrectType);
    assert_eq!(plugin.call::<(), _>("values", (10i32,)), Ok(()));
}

#[test]
fn test_exception_is_reported() {
    let mut plugin = plugin();
    let err = plugin.call::<(), _>("fail", ("something went wrong",)).unwrap_err();
    assert_eq!(err.code(), CallErrorCode::Unknown);
    assert!(err.what().starts_with("'ValueError': 'something went wrong'"), "{}", err.what());
    assert!(err.what().contains("Traceback:"));
    assert!(err.what().contains("test.py"));

    // the interpreter stays usable
    assert_eq!(plugin.call::<i64, _>("identity", (5i64,)), Ok(5));
}

#[test]
fn test_missing_and_non_callable_symbols() {
    let mut plugin = plugin();
    let err = plugin.call::<(), _>("does_not_exist", ()).unwrap_err();
    assert_eq!(err.code(), CallErrorCode::SymbolNotFound);

    let err = plugin.call::<(), _>("not_callable", ()).unwrap_err();
    assert_eq!(err.code(), CallErrorCode::SymbolNotFound);
}

#[test]
fn test_globals() {
    let mut plugin = plugin();
    assert_eq!(plugin.global::<String>("greeting").as_deref(), Ok("hello"));
    assert_eq!(plugin.global::<i32>("greeting").unwrap_err().code(), CallErrorCode::IncorrectType);
    assert_eq!(plugin.global::<i32>("missing").unwrap_err().code(), CallErrorCode::SymbolNotFound);

    assert_eq!(plugin.call::<i32, _>("increment", ()), Ok(1));
    plugin.set_global("counter", 41i32).unwrap();
    assert_eq!(plugin.call::<i32, _>("increment", ()), Ok(42));
    assert_eq!(plugin.global::<i32>("counter"), Ok(42));

    plugin.set_global("fresh", vec![1i32, 2, 3]).unwrap();
    assert_eq!(plugin.global::<Vec<i32>>("fresh"), Ok(vec![1, 2, 3]));
}

#[test]
fn test_plugins_are_isolated() {
    let mut first = plugin();
    let mut second = plugin();

    first.set_global("greeting", "changed").unwrap();
    assert_eq!(first.call::<i32, _>("increment", ()), Ok(1));
    assert_eq!(first.call::<i32, _>("increment", ()), Ok(2));

    assert_eq!(second.global::<String>("greeting").as_deref(), Ok("hello"));
    assert_eq!(second.global::<i32>("counter"), Ok(0));
}

#[test]
fn test_plugins_on_separate_threads() {
    let handles: Vec<_> = (0..2)
        .map(|_| {
            std::thread::spawn(|| {
                let mut plugin = PythonPlugin::load(fixture()).unwrap();
                let mut last = 0;
                for _ in 0..50 {
                    last = plugin.call::<i32, _>("increment", ()).unwrap();
                    plugin.call::<i64, _>("spin", (1000i32,)).unwrap();
                }
                last
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 50);
    }
}

#[test]
fn test_shared_gil_option() {
    let mut plugin = PythonPlugin::load_with(fixture(), PythonOptions { own_gil: false }).unwrap();
    assert!(!plugin.interpreter().has_own_gil());
    assert_eq!(plugin.call::<i64, _>("spin", (4i32,)), Ok(6));
}

#[test]
fn test_script_sees_its_file_name() {
    let temp_dir = TempDir::new().unwrap();
    let script = temp_dir.path().join("located.py");
    std::fs::write(&script, "loaded_from = __file__\n").unwrap();

    let mut plugin = PythonPlugin::load(&script).unwrap();
    assert_eq!(plugin.global::<String>("loaded_from"), Ok(script.to_string_lossy().into_owned()));
}

#[test]
fn test_load_failures() {
    let temp_dir = TempDir::new().unwrap();

    let missing = temp_dir.path().join("missing.py");
    assert_eq!(PythonPlugin::load(&missing).unwrap_err(), LoadError::FileNotFound);

    let broken = temp_dir.path().join("broken.py");
    std::fs::write(&broken, "def broken(:\n").unwrap();
    assert_eq!(PythonPlugin::load(&broken).unwrap_err(), LoadError::FileInvalid);

    let raising = temp_dir.path().join("raising.py");
    std::fs::write(&raising, "raise RuntimeError('top level failure')\n").unwrap();
    assert_eq!(PythonPlugin::load(&raising).unwrap_err(), LoadError::Unknown);

    assert_eq!(PythonPlugin::load(temp_dir.path()).unwrap_err(), LoadError::FileInvalid);
}
