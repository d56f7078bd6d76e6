use std::fmt;
use std::io;
use std::panic::Location;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for trellis-core
pub type Result<T> = std::result::Result<T, Error>;

/// Result of calling into a plugin function or accessing a plugin global.
pub type CallResult<T> = std::result::Result<T, CallError>;

/// Result of loading a plugin.
pub type LoadResult<T> = std::result::Result<T, LoadError>;

/// Ambient error type for configuration, logging and tooling around plugins
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error for file operations
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Parse/serialization errors
    #[error("parse error: {0}")]
    Parse(String),

    /// A plugin could not be loaded
    #[error("failed to load plugin '{}': {source}", path.display())]
    Load { path: PathBuf, source: LoadError },

    /// A plugin call failed
    #[error("plugin call failed: {0}")]
    Call(#[from] CallError),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Reason a plugin could not be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum LoadError {
    #[error("unknown")]
    Unknown,
    #[error("file not found")]
    FileNotFound,
    #[error("file invalid")]
    FileInvalid,
    #[error("file not readable")]
    FileNotReadable,
}

impl LoadError {
    /// Map an I/O failure that happened while opening a plugin file.
    pub fn from_io(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => LoadError::FileNotFound,
            io::ErrorKind::PermissionDenied => LoadError::FileNotReadable,
            io::ErrorKind::InvalidData | io::ErrorKind::IsADirectory => LoadError::FileInvalid,
            _ => LoadError::Unknown,
        }
    }
}

impl From<io::Error> for LoadError {
    fn from(error: io::Error) -> Self {
        LoadError::from_io(&error)
    }
}

/// Category of a failed plugin call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallErrorCode {
    #[default]
    Unknown,
    NotLoaded,
    SymbolNotFound,
    IncorrectType,
}

impl CallErrorCode {
    pub const VALUES: &[CallErrorCode] = &[
        CallErrorCode::Unknown,
        CallErrorCode::NotLoaded,
        CallErrorCode::SymbolNotFound,
        CallErrorCode::IncorrectType,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CallErrorCode::Unknown => "unknown",
            CallErrorCode::NotLoaded => "not loaded",
            CallErrorCode::SymbolNotFound => "symbol not found",
            CallErrorCode::IncorrectType => "incorrect type",
        }
    }
}

impl fmt::Display for CallErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned by every plugin call and global accessor.
///
/// The source location of the code that produced the error is recorded on construction, so an error created deep
/// inside a backend points at the backend line that rejected the call rather than at the caller.
///
/// Two errors compare equal when their codes match; message and origin are diagnostic only.
#[derive(Debug, Clone)]
pub struct CallError {
    code: CallErrorCode,
    message: String,
    location: &'static Location<'static>,
}

impl CallError {
    #[track_caller]
    pub fn new(code: CallErrorCode) -> Self {
        Self { code, message: String::new(), location: Location::caller() }
    }

    #[track_caller]
    pub fn with_message(code: CallErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), location: Location::caller() }
    }

    #[track_caller]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::with_message(CallErrorCode::Unknown, message)
    }

    #[track_caller]
    pub fn not_loaded() -> Self {
        Self::with_message(CallErrorCode::NotLoaded, "plugin is not loaded")
    }

    #[track_caller]
    pub fn symbol_not_found(name: &str) -> Self {
        Self::with_message(CallErrorCode::SymbolNotFound, format!("symbol '{}' not found", name))
    }

    #[track_caller]
    pub fn incorrect_type(message: impl Into<String>) -> Self {
        Self::with_message(CallErrorCode::IncorrectType, message)
    }

    pub fn code(&self) -> CallErrorCode {
        self.code
    }

    /// Human readable description; falls back to the code string when no message was attached.
    pub fn what(&self) -> &str {
        if self.message.is_empty() { self.code.as_str() } else { &self.message }
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// `file:line:column` of the code that produced this error.
    pub fn origin(&self) -> String {
        format!("{}:{}:{}", self.location.file(), self.location.line(), self.location.column())
    }

    /// Render as `origin - what (code)`.
    pub fn error_output(&self) -> String {
        format!("{} - {} ({})", self.origin(), self.what(), self.code)
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() { write!(f, "{}", self.code) } else { write!(f, "{}: {}", self.code, self.message) }
    }
}

impl std::error::Error for CallError {}

impl PartialEq for CallError {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl Eq for CallError {}

impl PartialEq<CallErrorCode> for CallError {
    fn eq(&self, other: &CallErrorCode) -> bool {
        self.code == *other
    }
}

impl From<CallErrorCode> for CallError {
    #[track_caller]
    fn from(code: CallErrorCode) -> Self {
        CallError::new(code)
    }
}

/// Formatting helpers for call results, used when logging failures and in assertion messages.
pub trait CallResultExt {
    /// `origin - what (code)` for a failed result, empty for a successful one.
    fn error_output(&self) -> String;
}

impl<T> CallResultExt for CallResult<T> {
    fn error_output(&self) -> String {
        match self {
            Ok(_) => String::new(),
            Err(error) => error.error_output(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_error_code_strings() {
        assert_eq!(CallErrorCode::Unknown.to_string(), "unknown");
        assert_eq!(CallErrorCode::NotLoaded.to_string(), "not loaded");
        assert_eq!(CallErrorCode::SymbolNotFound.to_string(), "symbol not found");
        assert_eq!(CallErrorCode::IncorrectType.to_string(), "incorrect type");
        assert_eq!(CallErrorCode::VALUES.len(), 4);
    }

    #[test]
    fn test_load_error_strings() {
        assert_eq!(LoadError::Unknown.to_string(), "unknown");
        assert_eq!(LoadError::FileNotFound.to_string(), "file not found");
        assert_eq!(LoadError::FileInvalid.to_string(), "file invalid");
        assert_eq!(LoadError::FileNotReadable.to_string(), "file not readable");
    }

    #[test]
    fn test_load_error_from_io() {
        let missing = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(LoadError::from_io(&missing), LoadError::FileNotFound);

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(LoadError::from(denied), LoadError::FileNotReadable);

        let other = io::Error::other("boom");
        assert_eq!(LoadError::from_io(&other), LoadError::Unknown);
    }

    #[test]
    fn test_call_error_equality_ignores_message() {
        let a = CallError::unknown("first");
        let b = CallError::unknown("second");
        assert_eq!(a, b);
        assert_ne!(a, CallError::not_loaded());
        assert_eq!(CallError::incorrect_type("x"), CallErrorCode::IncorrectType);
    }

    #[test]
    fn test_call_error_records_origin() {
        let line = line!() + 1;
        let error = CallError::symbol_not_found("missing");
        assert_eq!(error.location().file(), file!());
        assert_eq!(error.location().line(), line);
        assert!(error.origin().starts_with(file!()));
    }

    #[test]
    fn test_call_error_what_and_display() {
        let bare = CallError::new(CallErrorCode::IncorrectType);
        assert_eq!(bare.what(), "incorrect type");
        assert_eq!(bare.to_string(), "incorrect type");

        let described = CallError::symbol_not_found("foo");
        assert_eq!(described.what(), "symbol 'foo' not found");
        assert_eq!(described.to_string(), "symbol not found: symbol 'foo' not found");
    }

    #[test]
    fn test_error_output_format() {
        let result: CallResult<i32> = Err(CallError::unknown("boom"));
        let output = result.error_output();
        assert!(output.starts_with(file!()));
        assert!(output.ends_with(" - boom (unknown)"));

        let ok: CallResult<i32> = Ok(1);
        assert!(ok.error_output().is_empty());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Config("bad".to_string());
        assert_eq!(err.to_string(), "configuration error: bad");

        let err = Error::Load { path: PathBuf::from("/tmp/x.lua"), source: LoadError::FileInvalid };
        assert_eq!(err.to_string(), "failed to load plugin '/tmp/x.lua': file invalid");

        let err: Error = CallError::not_loaded().into();
        assert_eq!(err.to_string(), "plugin call failed: not loaded: plugin is not loaded");
    }
}
