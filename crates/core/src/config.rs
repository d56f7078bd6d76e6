use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Backend that executes a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    /// Shared library exporting `extern "C"` functions and variables
    #[default]
    C,
    /// Shared library exporting function aliases (pointer variables)
    Cpp,
    /// Lua 5.4 script
    Lua,
    /// Python module executed in its own sub-interpreter
    Python,
    /// Placeholder that answers every call with a default value
    Noop,
}

impl PluginKind {
    pub const VALUES: &[PluginKind] =
        &[PluginKind::C, PluginKind::Cpp, PluginKind::Lua, PluginKind::Python, PluginKind::Noop];

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::C => "c",
            PluginKind::Cpp => "cpp",
            PluginKind::Lua => "lua",
            PluginKind::Python => "python",
            PluginKind::Noop => "noop",
        }
    }

    /// Guess the backend from a file extension.
    ///
    /// Shared libraries are reported as [`PluginKind::C`]; C++ alias exports cannot be told apart by name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_lowercase();
        match extension.as_str() {
            "lua" => Some(PluginKind::Lua),
            "py" => Some(PluginKind::Python),
            "so" | "dylib" | "dll" => Some(PluginKind::C),
            _ => None,
        }
    }

    /// Whether plugins of this kind are backed by a shared library.
    pub fn is_native(&self) -> bool {
        matches!(self, PluginKind::C | PluginKind::Cpp)
    }
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PluginKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "c" => Ok(PluginKind::C),
            "cpp" | "c++" => Ok(PluginKind::Cpp),
            "lua" => Ok(PluginKind::Lua),
            "python" | "py" => Ok(PluginKind::Python),
            "noop" => Ok(PluginKind::Noop),
            _ => Err(crate::Error::Config(ConfigError::InvalidPluginKind(s.to_string()).to_string())),
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Default level for stderr output
    #[serde(default = "default_log_level")]
    pub level: String,

    /// stderr format: "pretty", "json" or "compact"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Rolling file output
    #[serde(default)]
    pub file: FileLoggingConfig,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format(), file: FileLoggingConfig::default() }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// `[logging.file]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileLoggingConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Level for the file layer
    #[serde(default = "default_file_level")]
    pub level: String,

    /// Log directory; defaults to `~/.trellis/logs`
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self { enabled: false, level: default_file_level(), directory: None }
    }
}

fn default_file_level() -> String {
    "debug".to_string()
}

/// `[lua]` section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LuaSection {
    /// Open the Lua standard libraries in every new state
    #[serde(default = "default_true")]
    pub open_standard_libraries: bool,

    /// Execute the script's top level right after loading it
    #[serde(default = "default_true")]
    pub auto_run: bool,
}

impl Default for LuaSection {
    fn default() -> Self {
        Self { open_standard_libraries: true, auto_run: true }
    }
}

/// `[python]` section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PythonSection {
    /// Give every sub-interpreter its own GIL (Python 3.12 and newer)
    #[serde(default = "default_true")]
    pub own_gil: bool,
}

impl Default for PythonSection {
    fn default() -> Self {
        Self { own_gil: true }
    }
}

fn default_true() -> bool {
    true
}

/// One `[[plugins]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginEntry {
    /// Unique name used in logs and by the CLI
    pub name: String,

    /// Backend that executes the plugin
    pub kind: PluginKind,

    /// Script or shared library; relative paths resolve against the manifest directory
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Run calls through the segfault guard (C plugins only)
    #[serde(default)]
    pub crash_guard: bool,

    /// Fall back to a noop plugin when loading fails
    #[serde(default)]
    pub optional: bool,
}

/// Root configuration structure for trellis.toml
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingSection,

    #[serde(default)]
    pub lua: LuaSection,

    #[serde(default)]
    pub python: PythonSection,

    #[serde(default)]
    pub plugins: Vec<PluginEntry>,

    /// Directory relative plugin paths resolve against; set by [`Config::from_file`]
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML string
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(toml_str).map_err(|e| crate::Error::Config(ConfigError::from(e).to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Get a plugin entry by name
    pub fn plugin(&self, name: &str) -> Result<&PluginEntry> {
        self.plugins
            .iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| crate::Error::Config(ConfigError::PluginNotFound(name.to_string()).to_string()))
    }

    /// Get all plugin names in manifest order
    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|entry| entry.name.as_str()).collect()
    }

    /// Resolve a plugin path against the manifest directory
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        use crate::Error;

        let mut seen = HashSet::new();
        for entry in &self.plugins {
            if entry.name.trim().is_empty() {
                return Err(Error::Config(ConfigError::EmptyPluginName.to_string()));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(Error::Config(ConfigError::DuplicatePlugin(entry.name.clone()).to_string()));
            }
            if entry.kind != PluginKind::Noop && entry.path.is_none() {
                return Err(Error::Config(ConfigError::MissingPath(entry.name.clone()).to_string()));
            }
            if entry.crash_guard && entry.kind != PluginKind::C {
                return Err(Error::Config(
                    ConfigError::CrashGuardUnsupported { name: entry.name.clone(), kind: entry.kind }.to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Get example configuration (as a string)
    pub fn example() -> &'static str {
        r#"# Trellis Configuration Example
# Copy this file to trellis.toml and customize as needed

[logging]
# Default level for stderr output
level = "warn"
# Output format: "pretty", "json" or "compact"
format = "pretty"

[logging.file]
enabled = false
level = "debug"
# directory = "/var/log/trellis"

[lua]
# Open the Lua standard libraries in every plugin state
open_standard_libraries = true
# Execute the script's top level right after loading it
auto_run = true

[python]
# One GIL per plugin interpreter (Python 3.12 and newer)
own_gil = true

# Plugins, loaded in order. Relative paths resolve against this file.
[[plugins]]
name = "counter"
# Backend: "c", "cpp", "lua", "python" or "noop"
kind = "lua"
path = "plugins/counter.lua"

[[plugins]]
name = "native"
kind = "c"
path = "plugins/libnative.so"
# Recover from segmentation faults inside calls (C plugins only)
crash_guard = true
# Fall back to a noop plugin if loading fails
optional = true
"#
    }
}

/// Configuration-specific errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Plugin not found
    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    /// Two entries share a name
    #[error("duplicate plugin name: {0}")]
    DuplicatePlugin(String),

    /// Entry without a name
    #[error("plugin name must not be empty")]
    EmptyPluginName,

    /// Entry without a path
    #[error("plugin '{0}' needs a path")]
    MissingPath(String),

    /// Invalid plugin kind
    #[error("invalid plugin kind: {0}")]
    InvalidPluginKind(String),

    /// Crash guard requested for a backend that cannot use it
    #[error("plugin '{name}' has kind '{kind}'; crash_guard is only available for c plugins")]
    CrashGuardUnsupported { name: String, kind: PluginKind },

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlParse(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::TomlParse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_plugin_kind_values() {
        assert_eq!(PluginKind::VALUES.len(), 5);
        assert_eq!(PluginKind::Cpp.as_str(), "cpp");
        assert_eq!(PluginKind::Python.to_string(), "python");
    }

    #[test]
    fn test_plugin_kind_from_str() {
        assert_eq!(PluginKind::from_str("c").unwrap(), PluginKind::C);
        assert_eq!(PluginKind::from_str("C++").unwrap(), PluginKind::Cpp);
        assert_eq!(PluginKind::from_str("LUA").unwrap(), PluginKind::Lua);
        assert_eq!(PluginKind::from_str("py").unwrap(), PluginKind::Python);
        assert_eq!(PluginKind::from_str("noop").unwrap(), PluginKind::Noop);
        assert!(PluginKind::from_str("ruby").is_err());
    }

    #[test]
    fn test_plugin_kind_from_path() {
        assert_eq!(PluginKind::from_path(Path::new("a/b.lua")), Some(PluginKind::Lua));
        assert_eq!(PluginKind::from_path(Path::new("plugin.PY")), Some(PluginKind::Python));
        assert_eq!(PluginKind::from_path(Path::new("libx.so")), Some(PluginKind::C));
        assert_eq!(PluginKind::from_path(Path::new("README")), None);
        assert!(PluginKind::Cpp.is_native());
        assert!(!PluginKind::Lua.is_native());
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.plugins.is_empty());
        assert_eq!(config.logging.level, "warn");
        assert!(config.lua.auto_run);
        assert!(config.python.own_gil);
    }

    #[test]
    fn test_config_from_toml_str() {
        let toml = r#"
[logging]
level = "debug"
format = "json"

[lua]
auto_run = false

[[plugins]]
name = "script"
kind = "lua"
path = "plugins/script.lua"

[[plugins]]
name = "fallback"
kind = "noop"
"#;

        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert!(!config.logging.file.enabled);
        assert!(!config.lua.auto_run);
        assert!(config.lua.open_standard_libraries);
        assert_eq!(config.plugin_names(), vec!["script", "fallback"]);

        let script = config.plugin("script").unwrap();
        assert_eq!(script.kind, PluginKind::Lua);
        assert_eq!(script.path, Some(PathBuf::from("plugins/script.lua")));
        assert!(!script.crash_guard);
        assert!(config.plugin("missing").is_err());
    }

    #[test]
    fn test_config_example_parses() {
        let config = Config::from_toml_str(Config::example()).unwrap();
        assert_eq!(config.plugins.len(), 2);
        assert!(config.plugin("native").unwrap().crash_guard);
        assert!(config.plugin("native").unwrap().optional);
    }

    #[test]
    fn test_config_validation_duplicate_name() {
        let toml = r#"
[[plugins]]
name = "a"
kind = "noop"

[[plugins]]
name = "a"
kind = "noop"
"#;
        let err = Config::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("duplicate plugin name: a"));
    }

    #[test]
    fn test_config_validation_missing_path() {
        let toml = r#"
[[plugins]]
name = "script"
kind = "python"
"#;
        let err = Config::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("plugin 'script' needs a path"));
    }

    #[test]
    fn test_config_validation_crash_guard_kind() {
        let toml = r#"
[[plugins]]
name = "script"
kind = "lua"
path = "x.lua"
crash_guard = true
"#;
        let err = Config::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("crash_guard is only available for c plugins"));
    }

    #[test]
    fn test_config_rejects_unknown_fields() {
        let toml = r#"
[[plugins]]
name = "script"
kind = "lua"
path = "x.lua"
sandbox = true
"#;
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_config_from_file_resolves_relative_paths() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let manifest = temp_dir.path().join("trellis.toml");
        std::fs::write(&manifest, "[[plugins]]\nname = \"s\"\nkind = \"lua\"\npath = \"plugins/s.lua\"\n").unwrap();

        let config = Config::from_file(&manifest).unwrap();
        let entry = config.plugin("s").unwrap();
        let resolved = config.resolve_path(entry.path.as_deref().unwrap());
        assert_eq!(resolved, temp_dir.path().join("plugins/s.lua"));
        assert_eq!(config.resolve_path(Path::new("/abs/p.py")), PathBuf::from("/abs/p.py"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::PluginNotFound("missing".to_string());
        assert_eq!(err.to_string(), "plugin not found: missing");

        let err = ConfigError::InvalidPluginKind("ruby".to_string());
        assert_eq!(err.to_string(), "invalid plugin kind: ruby");

        let err = ConfigError::CrashGuardUnsupported { name: "p".to_string(), kind: PluginKind::Lua };
        assert_eq!(err.to_string(), "plugin 'p' has kind 'lua'; crash_guard is only available for c plugins");

        let err = ConfigError::TomlParse("parse error".to_string());
        assert_eq!(err.to_string(), "TOML parse error: parse error");
    }
}
