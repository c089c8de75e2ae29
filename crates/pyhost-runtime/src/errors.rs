use crate::convert::extract_strings;
use crate::imports::ImportDiagnostics;
use pyo3::prelude::*;
use pyo3::types::PyModule;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Chained `__cause__` exceptions deeper than this are not captured
const MAX_CAUSE_DEPTH: usize = 8;

/// Errors that can occur while driving the embedded interpreter
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("The embedded interpreter is not initialized")]
    NotInitialized,

    #[error("The embedded interpreter is already owned by another runtime in this process")]
    EngineBusy,

    #[error("Failed to start the embedded interpreter: {0}")]
    Startup(String),

    #[error("The embedded interpreter cannot start again in this process after a failed start: {0}")]
    EngineUnusable(String),

    #[error("Interpreter finalization reported an error: {0}")]
    Finalize(String),

    #[error("The calling thread does not hold the interpreter lock")]
    GateNotHeld,

    #[error("Handle belongs to an interpreter session that has been shut down")]
    StaleHandle,

    #[error("Python error: {0}")]
    Python(#[from] PythonError),

    #[error("Failed to import module '{module}': {source}")]
    Import {
        module: String,
        #[source]
        source: PythonError,
    },

    #[error(transparent)]
    ImportFailed(Box<ImportDiagnostics>),

    #[error("Cannot convert Python '{found}' to {expected}")]
    Conversion {
        expected: &'static str,
        found: String,
    },

    #[error("{}", format_aggregate(.0))]
    Aggregate(Vec<RuntimeError>),
}

impl RuntimeError {
    pub(crate) fn python(py: Python<'_>, err: PyErr) -> Self {
        RuntimeError::Python(PythonError::from_pyerr(py, &err))
    }

    pub(crate) fn import(py: Python<'_>, module: &str, err: PyErr) -> Self {
        RuntimeError::Import {
            module: module.to_string(),
            source: PythonError::from_pyerr(py, &err),
        }
    }
}

fn format_aggregate(errors: &[RuntimeError]) -> String {
    let mut out = format!("{} operation(s) failed:", errors.len());
    for err in errors {
        out.push_str("\n  - ");
        out.push_str(&err.to_string());
    }
    out
}

/// A Python exception captured with everything needed to diagnose it later
///
/// The interpreter may be shut down by the time this is inspected, so the
/// exception is copied out as plain strings instead of holding a reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PythonError {
    /// Exception class name, e.g. `ModuleNotFoundError`
    pub type_name: String,
    pub message: String,
    /// Output of `traceback.format_exception`, including chained exceptions
    pub traceback: Option<String>,
    /// The exception's `__cause__`, if it was raised `from` another one
    pub cause: Option<Box<PythonError>>,
}

impl PythonError {
    pub(crate) fn from_pyerr(py: Python<'_>, err: &PyErr) -> Self {
        Self::from_exception(err.value(py).as_any(), 0)
    }

    fn from_exception(exc: &Bound<'_, PyAny>, depth: usize) -> Self {
        let type_name = exc
            .get_type()
            .getattr("__name__")
            .and_then(|name| name.extract::<String>())
            .unwrap_or_else(|_| "BaseException".to_string());
        let message = exc
            .str()
            .and_then(|s| s.extract::<String>())
            .unwrap_or_default();

        let cause = if depth < MAX_CAUSE_DEPTH {
            exc.getattr("__cause__")
                .ok()
                .filter(|cause| !cause.is_none())
                .map(|cause| Box::new(Self::from_exception(&cause, depth + 1)))
        } else {
            None
        };

        PythonError {
            type_name,
            message,
            traceback: format_traceback(exc),
            cause,
        }
    }
}

fn format_traceback(exc: &Bound<'_, PyAny>) -> Option<String> {
    let tb = exc.getattr("__traceback__").ok()?;
    if tb.is_none() {
        return None;
    }
    let traceback = PyModule::import(exc.py(), "traceback").ok()?;
    let lines = traceback
        .call_method1("format_exception", (exc.get_type(), exc, tb))
        .ok()?;
    extract_strings(&lines).ok().map(|lines| lines.concat())
}

impl fmt::Display for PythonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.type_name)
        } else {
            write!(f, "{}: {}", self.type_name, self.message)
        }
    }
}

impl std::error::Error for PythonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    fn key_error() -> PythonError {
        PythonError {
            type_name: "KeyError".to_string(),
            message: "'inner'".to_string(),
            traceback: None,
            cause: None,
        }
    }

    #[test]
    fn test_python_error_display_and_source_chain() {
        let err = PythonError {
            type_name: "ValueError".to_string(),
            message: "outer".to_string(),
            traceback: Some("Traceback (most recent call last):\n".to_string()),
            cause: Some(Box::new(key_error())),
        };
        assert_eq!(err.to_string(), "ValueError: outer");
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("KeyError: 'inner'"));
    }

    #[test]
    fn test_runtime_error_keeps_python_cause() {
        let err = RuntimeError::Import {
            module: "missing_mod".to_string(),
            source: key_error(),
        };
        assert!(err.to_string().contains("missing_mod"));
        assert!(err.source().is_some());

        let wrapped = RuntimeError::from(key_error());
        assert_eq!(wrapped.to_string(), "Python error: KeyError: 'inner'");
    }

    #[test]
    fn test_aggregate_lists_every_failure() {
        let err = RuntimeError::Aggregate(vec![
            RuntimeError::NotInitialized,
            RuntimeError::StaleHandle,
        ]);
        let text = err.to_string();
        assert!(text.starts_with("2 operation(s) failed:"));
        assert!(text.contains("not initialized"));
        assert!(text.contains("shut down"));
    }
}
