use thiserror::Error;
use trellis_core::LoadError;

/// Failures of the embedded runtime itself, as opposed to errors raised by Python code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PythonError {
    #[error("Python runtime failed to initialize")]
    Initialization,

    #[error("unable to create sub-interpreter: {0}")]
    Interpreter(String),
}

impl From<PythonError> for LoadError {
    fn from(_: PythonError) -> Self {
        LoadError::Unknown
    }
}
