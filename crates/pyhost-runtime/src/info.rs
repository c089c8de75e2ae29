//! Build and platform details reported by the running interpreter

use crate::convert::extract_string;
use crate::engine::CPython;
use crate::errors::RuntimeError;
use crate::lifecycle::Runtime;
use pyo3::prelude::*;
use pyo3::types::PyModule;

impl Runtime<CPython> {
    /// Full version banner, e.g. `3.12.3 (main, Apr 10 2024, 05:33:47) [GCC 13.2.0]`
    pub fn version(&self) -> Result<String, RuntimeError> {
        self.sys_string("version")
    }

    /// Build tag and date, e.g. `main, Apr 10 2024, 05:33:47`
    pub fn build_info(&self) -> Result<String, RuntimeError> {
        let banner = self.version()?;
        build_info(&banner)
            .map(str::to_string)
            .ok_or_else(|| malformed_banner(&banner))
    }

    /// Compiler the interpreter was built with, bracketed: `[GCC 13.2.0]`
    pub fn compiler(&self) -> Result<String, RuntimeError> {
        let banner = self.version()?;
        compiler(&banner)
            .map(str::to_string)
            .ok_or_else(|| malformed_banner(&banner))
    }

    pub fn copyright(&self) -> Result<String, RuntimeError> {
        self.sys_string("copyright")
    }

    /// `sys.platform`, e.g. `linux`
    pub fn platform(&self) -> Result<String, RuntimeError> {
        self.sys_string("platform")
    }

    fn sys_string(&self, attr: &str) -> Result<String, RuntimeError> {
        self.attached(|py, _generation| {
            let value = PyModule::import(py, "sys")
                .and_then(|sys| sys.getattr(attr))
                .map_err(|e| RuntimeError::python(py, e))?;
            extract_string(&value)
        })
    }
}

fn malformed_banner(banner: &str) -> RuntimeError {
    RuntimeError::Conversion {
        expected: "a version banner",
        found: banner.to_string(),
    }
}

/// Text inside the first parenthesized group
fn build_info(banner: &str) -> Option<&str> {
    let open = banner.find('(')?;
    let close = open + banner[open..].find(')')?;
    Some(&banner[open + 1..close])
}

/// The bracketed compiler tag following the build info, brackets included
fn compiler(banner: &str) -> Option<&str> {
    let after = banner.find(')').map_or(0, |close| close + 1);
    let open = after + banner[after..].find('[')?;
    let close = banner.rfind(']')?;
    (close > open).then(|| &banner[open..=close])
}
