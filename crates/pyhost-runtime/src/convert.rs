//! Typed conversions out of interpreter objects

use crate::errors::RuntimeError;
use pyo3::prelude::*;

pub(crate) fn type_name(obj: &Bound<'_, PyAny>) -> String {
    obj.get_type()
        .getattr("__name__")
        .and_then(|name| name.extract::<String>())
        .unwrap_or_else(|_| "object".to_string())
}

pub(crate) fn conversion_error(obj: &Bound<'_, PyAny>, expected: &'static str) -> RuntimeError {
    RuntimeError::Conversion {
        expected,
        found: type_name(obj),
    }
}

pub(crate) fn extract_string(obj: &Bound<'_, PyAny>) -> Result<String, RuntimeError> {
    obj.extract::<String>()
        .map_err(|_| conversion_error(obj, "str"))
}

/// Collect any iterable of `str` into owned strings
pub(crate) fn extract_strings(obj: &Bound<'_, PyAny>) -> Result<Vec<String>, RuntimeError> {
    let items = obj
        .try_iter()
        .map_err(|_| conversion_error(obj, "a sequence of str"))?;
    items
        .map(|item| {
            let item = item.map_err(|e| RuntimeError::python(obj.py(), e))?;
            extract_string(&item)
        })
        .collect()
}

pub(crate) fn extract_i64(obj: &Bound<'_, PyAny>) -> Result<i64, RuntimeError> {
    obj.extract::<i64>()
        .map_err(|_| conversion_error(obj, "int"))
}
