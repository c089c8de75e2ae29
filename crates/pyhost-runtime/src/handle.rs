//! Opaque references to interpreter objects

use crate::convert;
use crate::engine;
use crate::errors::RuntimeError;
use crate::lifecycle::Lifeline;
use pyo3::prelude::*;
use pyo3::types::PyTuple;
use std::fmt;
use std::mem;
use std::sync::Arc;

/// A strong reference to an interpreter object, valid for one session
///
/// Every accessor takes the execution lock for its own duration, so a handle
/// can be used from any thread. Once the session that produced it shuts down
/// the handle is stale: accessors fail with [`RuntimeError::StaleHandle`] and
/// dropping it never touches the (new) interpreter.
pub struct PyHandle {
    object: Option<Py<PyAny>>,
    generation: u64,
    lifeline: Arc<Lifeline>,
}

impl PyHandle {
    pub(crate) fn new(object: Py<PyAny>, generation: u64, lifeline: Arc<Lifeline>) -> Self {
        PyHandle {
            object: Some(object),
            generation,
            lifeline,
        }
    }

    pub(crate) fn from_bound(
        object: Bound<'_, PyAny>,
        generation: u64,
        lifeline: &Arc<Lifeline>,
    ) -> Self {
        PyHandle::new(object.unbind(), generation, Arc::clone(lifeline))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_stale(&self) -> bool {
        !self.lifeline.is_current(self.generation)
    }

    /// Borrow the object for `py`, or `StaleHandle` if its session is gone
    pub(crate) fn bind<'py>(&self, py: Python<'py>) -> Result<&Bound<'py, PyAny>, RuntimeError> {
        match &self.object {
            Some(object) if !self.is_stale() => Ok(object.bind(py)),
            _ => Err(RuntimeError::StaleHandle),
        }
    }

    /// Run `f` against the raw pyo3 object while holding the lock
    pub fn with_bound<R>(
        &self,
        f: impl for<'py> FnOnce(&Bound<'py, PyAny>) -> Result<R, RuntimeError>,
    ) -> Result<R, RuntimeError> {
        if self.is_stale() {
            return Err(RuntimeError::StaleHandle);
        }
        engine::attach(|py| f(self.bind(py)?))
    }

    fn derive(&self, object: Bound<'_, PyAny>) -> PyHandle {
        PyHandle::from_bound(object, self.generation, &self.lifeline)
    }

    pub fn getattr(&self, name: &str) -> Result<PyHandle, RuntimeError> {
        self.with_bound(|obj| {
            let value = obj
                .getattr(name)
                .map_err(|e| RuntimeError::python(obj.py(), e))?;
            Ok(self.derive(value))
        })
    }

    /// `obj[key] = value`
    pub fn set_item(&self, key: &str, value: &PyHandle) -> Result<(), RuntimeError> {
        self.with_bound(|obj| {
            let value = value.bind(obj.py())?;
            obj.set_item(key, value)
                .map_err(|e| RuntimeError::python(obj.py(), e))
        })
    }

    /// Call the object with positional string arguments
    pub fn call(&self, args: &[&str]) -> Result<PyHandle, RuntimeError> {
        self.with_bound(|obj| {
            let py = obj.py();
            let args =
                PyTuple::new(py, args.iter().copied()).map_err(|e| RuntimeError::python(py, e))?;
            let result = obj.call1(args).map_err(|e| RuntimeError::python(py, e))?;
            Ok(self.derive(result))
        })
    }

    pub fn repr(&self) -> Result<String, RuntimeError> {
        self.with_bound(|obj| {
            let repr = obj.repr().map_err(|e| RuntimeError::python(obj.py(), e))?;
            convert::extract_string(repr.as_any())
        })
    }

    pub fn type_name(&self) -> Result<String, RuntimeError> {
        self.with_bound(|obj| Ok(convert::type_name(obj)))
    }

    pub fn extract_string(&self) -> Result<String, RuntimeError> {
        self.with_bound(convert::extract_string)
    }

    pub fn extract_strings(&self) -> Result<Vec<String>, RuntimeError> {
        self.with_bound(convert::extract_strings)
    }

    pub fn extract_i64(&self) -> Result<i64, RuntimeError> {
        self.with_bound(convert::extract_i64)
    }

    pub fn is_truthy(&self) -> Result<bool, RuntimeError> {
        self.with_bound(|obj| obj.is_truthy().map_err(|e| RuntimeError::python(obj.py(), e)))
    }

    pub fn is_none(&self) -> Result<bool, RuntimeError> {
        self.with_bound(|obj| Ok(obj.is_none()))
    }

    /// Identity comparison (`a is b`)
    pub fn same_object(&self, other: &PyHandle) -> Result<bool, RuntimeError> {
        self.with_bound(|obj| Ok(obj.as_ptr() == other.bind(obj.py())?.as_ptr()))
    }

    /// A second strong reference to the same object
    pub fn clone_ref(&self) -> Result<PyHandle, RuntimeError> {
        self.with_bound(|obj| Ok(self.derive(obj.clone())))
    }
}

impl fmt::Debug for PyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PyHandle")
            .field("generation", &self.generation)
            .field("stale", &self.is_stale())
            .finish()
    }
}

impl Drop for PyHandle {
    fn drop(&mut self) {
        let Some(object) = self.object.take() else {
            return;
        };
        if self.is_stale() {
            // The object was freed along with its interpreter.
            mem::forget(object);
            return;
        }
        engine::attach(move |_py| drop(object));
    }
}
