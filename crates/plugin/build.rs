use std::env;
use std::path::{Path, PathBuf};

/// Native libraries the manager tests load, shared with `trellis-native`'s test fixtures.
const FIXTURES: &[&str] = &["c_plugin", "cpp_plugin"];

fn main() {
    let fixture_sources = Path::new("..").join("native").join("tests").join("fixtures");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed={}", fixture_sources.display());

    let family = env::var("CARGO_CFG_TARGET_FAMILY").unwrap_or_default();
    if !family.split(',').any(|f| f == "unix") {
        return;
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let fixture_dir = out_dir.join("fixtures");
    std::fs::create_dir_all(&fixture_dir).expect("Failed to create fixture directory");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let suffix = if target_os == "macos" || target_os == "ios" { "dylib" } else { "so" };
    let compiler = cc::Build::new().cargo_metadata(false).pic(true).get_compiler();

    for name in FIXTURES {
        let source = fixture_sources.join(format!("{}.c", name));
        let output = fixture_dir.join(format!("lib{}.{}", name, suffix));
        match compiler.to_command().arg("-shared").arg("-o").arg(&output).arg(&source).status() {
            Ok(status) if status.success() => {}
            Ok(status) => println!("cargo:warning=building fixture {} failed with {}", name, status),
            Err(err) => println!("cargo:warning=building fixture {} failed: {}", name, err),
        }
    }

    println!("cargo:rustc-env=TRELLIS_PLUGIN_FIXTURES={}", fixture_dir.display());
}
