//! Evaluating and executing source text

use crate::engine::CPython;
use crate::errors::RuntimeError;
use crate::handle::PyHandle;
use crate::lifecycle::Runtime;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyModule};

impl Runtime<CPython> {
    /// Evaluate an expression and return its value
    ///
    /// `globals` defaults to `__main__.__dict__`; `locals` defaults to
    /// `globals`.
    pub fn evaluate(
        &self,
        code: &str,
        globals: Option<&PyHandle>,
        locals: Option<&PyHandle>,
    ) -> Result<PyHandle, RuntimeError> {
        self.attached(|py, generation| {
            let value = run_source(py, "eval", code, globals, locals)?;
            Ok(self.handle(value, generation))
        })
    }

    /// Execute statements for their side effects
    pub fn execute(
        &self,
        code: &str,
        globals: Option<&PyHandle>,
        locals: Option<&PyHandle>,
    ) -> Result<(), RuntimeError> {
        self.attached(|py, _generation| {
            run_source(py, "exec", code, globals, locals)?;
            Ok(())
        })
    }

    /// A fresh empty `dict`, e.g. as an isolated namespace for `execute`
    pub fn new_dict(&self) -> Result<PyHandle, RuntimeError> {
        self.attached(|py, generation| Ok(self.handle(PyDict::new(py).into_any(), generation)))
    }

    /// `__main__.__dict__`
    pub fn main_globals(&self) -> Result<PyHandle, RuntimeError> {
        self.attached(|py, generation| Ok(self.handle(main_dict(py)?, generation)))
    }
}

fn main_dict(py: Python<'_>) -> Result<Bound<'_, PyAny>, RuntimeError> {
    PyModule::import(py, "__main__")
        .and_then(|main| main.getattr("__dict__"))
        .map_err(|e| RuntimeError::python(py, e))
}

fn run_source<'py>(
    py: Python<'py>,
    builtin: &str,
    code: &str,
    globals: Option<&PyHandle>,
    locals: Option<&PyHandle>,
) -> Result<Bound<'py, PyAny>, RuntimeError> {
    let globals = match globals {
        Some(handle) => handle.bind(py)?.clone(),
        None => main_dict(py)?,
    };
    let locals = match locals {
        Some(handle) => handle.bind(py)?.clone(),
        None => globals.clone(),
    };

    PyModule::import(py, "builtins")
        .and_then(|builtins| builtins.getattr(builtin))
        .and_then(|run| run.call1((code, globals, locals)))
        .map_err(|e| RuntimeError::python(py, e))
}
