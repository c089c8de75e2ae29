//! Module imports and the diagnostics attached to failed ones

use crate::convert::extract_string;
use crate::engine::CPython;
use crate::errors::{PythonError, RuntimeError};
use crate::handle::PyHandle;
use crate::lifecycle::Runtime;
use crate::search_path::{list_site_packages, SitePackagesListing};
use pyhost_logger as logger;
use pyo3::exceptions::PyModuleNotFoundError;
use pyo3::prelude::*;
use pyo3::types::PyModule;
use serde::Serialize;
use std::fmt;

/// A distribution reported by `importlib.metadata`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledDistribution {
    pub name: String,
    pub version: String,
}

/// Everything worth knowing when an import fails, for bug reports
#[derive(Debug, Clone, Serialize)]
pub struct ImportDiagnostics {
    pub module: String,
    /// What the host was doing when the import failed
    pub context: String,
    /// `sys.path` at the time of failure
    pub search_path: Vec<String>,
    pub site_packages: Vec<SitePackagesListing>,
    pub installed: Vec<InstalledDistribution>,
    /// Set when the installed distributions could not be listed
    pub installed_error: Option<String>,
    pub cause: PythonError,
}

impl ImportDiagnostics {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for ImportDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Failed to import '{}' while {}: {}",
            self.module, self.context, self.cause
        )?;
        writeln!(f, "Search path:")?;
        for entry in &self.search_path {
            writeln!(f, "  {}", entry)?;
        }
        for listing in &self.site_packages {
            writeln!(
                f,
                "Contents of {} ({} entries):",
                listing.directory,
                listing.entries.len()
            )?;
            for entry in &listing.entries {
                writeln!(f, "  {}", entry)?;
            }
        }
        match &self.installed_error {
            Some(err) => writeln!(f, "Installed distributions unavailable: {}", err)?,
            None => {
                writeln!(f, "Installed distributions:")?;
                for dist in &self.installed {
                    writeln!(f, "  {}=={}", dist.name, dist.version)?;
                }
            }
        }
        if let Some(traceback) = &self.cause.traceback {
            write!(f, "{}", traceback)?;
        }
        Ok(())
    }
}

impl std::error::Error for ImportDiagnostics {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

impl Runtime<CPython> {
    /// Import a module through the interpreter's normal import machinery
    pub fn import(&self, name: &str) -> Result<PyHandle, RuntimeError> {
        self.attached(|py, generation| {
            let module =
                PyModule::import(py, name).map_err(|e| RuntimeError::import(py, name, e))?;
            Ok(self.handle(module.into_any(), generation))
        })
    }

    /// Import a module, executing it at most once per session
    ///
    /// An entry already in `sys.modules` is returned as is. Otherwise the
    /// module is located with `importlib.util.find_spec`, registered and then
    /// executed; if execution raises, the half-initialized entry is removed
    /// again so a later attempt starts clean.
    pub fn import_checked(&self, name: &str) -> Result<PyHandle, RuntimeError> {
        self.attached(|py, generation| {
            let import_err = |e: PyErr| RuntimeError::import(py, name, e);

            let sys = PyModule::import(py, "sys").map_err(import_err)?;
            let modules = sys.getattr("modules").map_err(import_err)?;
            let existing = modules
                .call_method1("get", (name,))
                .map_err(import_err)?;
            if !existing.is_none() {
                return Ok(self.handle(existing, generation));
            }

            let util = PyModule::import(py, "importlib.util").map_err(import_err)?;
            let spec = util
                .call_method1("find_spec", (name,))
                .map_err(import_err)?;
            if spec.is_none() {
                return Err(import_err(PyModuleNotFoundError::new_err(format!(
                    "No module named '{}'",
                    name
                ))));
            }

            let module = util
                .call_method1("module_from_spec", (&spec,))
                .map_err(import_err)?;
            modules.set_item(name, &module).map_err(import_err)?;

            let executed = spec
                .getattr("loader")
                .and_then(|loader| loader.call_method1("exec_module", (&module,)));
            if let Err(e) = executed {
                if let Err(cleanup) = modules.call_method1("pop", (name, py.None())) {
                    logger::warn(&format!(
                        "Could not remove '{}' from sys.modules: {}",
                        name,
                        PythonError::from_pyerr(py, &cleanup)
                    ));
                }
                return Err(import_err(e));
            }

            // Mirror the import system: bind a submodule on its parent package.
            if let Some((parent, child)) = name.rsplit_once('.') {
                let parent = modules.get_item(parent).map_err(import_err)?;
                parent.setattr(child, &module).map_err(import_err)?;
            }

            logger::debug(&format!("Imported '{}' through importlib", name));
            Ok(self.handle(module, generation))
        })
    }

    /// Import every module in `names`, reporting all failures together
    ///
    /// Each failed import carries [`ImportDiagnostics`] built at the moment it
    /// failed; the failures come back as one [`RuntimeError::Aggregate`].
    pub fn import_all(&self, names: &[&str], context: &str) -> Result<Vec<PyHandle>, RuntimeError> {
        let mut modules = Vec::with_capacity(names.len());
        let mut failures = Vec::new();

        for name in names {
            match self.import(name) {
                Ok(module) => modules.push(module),
                Err(RuntimeError::Import { module, source }) => {
                    let diagnostics = self.diagnose_import(&module, context, source);
                    logger::error(&format!(
                        "Failed to import '{}' while {}: {}",
                        module, context, diagnostics.cause
                    ));
                    if let Some(traceback) = &diagnostics.cause.traceback {
                        logger::engine(traceback.trim_end());
                    }
                    failures.push(RuntimeError::ImportFailed(Box::new(diagnostics)));
                }
                Err(other) => failures.push(other),
            }
        }

        if failures.is_empty() {
            Ok(modules)
        } else {
            Err(RuntimeError::Aggregate(failures))
        }
    }

    /// Collect the interpreter's view of the world for a failed import
    ///
    /// Best effort: whatever cannot be gathered is left empty rather than
    /// masking `cause`.
    pub fn diagnose_import(&self, module: &str, context: &str, cause: PythonError) -> ImportDiagnostics {
        let search_path = self.live_search_path().unwrap_or_else(|e| {
            logger::debug(&format!("Search path unavailable for diagnostics: {}", e));
            Vec::new()
        });
        let site_packages = list_site_packages(&search_path);
        let (installed, installed_error) = match self.installed_distributions() {
            Ok(installed) => (installed, None),
            Err(e) => (Vec::new(), Some(e.to_string())),
        };

        ImportDiagnostics {
            module: module.to_string(),
            context: context.to_string(),
            search_path,
            site_packages,
            installed,
            installed_error,
            cause,
        }
    }

    /// Distributions visible to `importlib.metadata`, sorted by name
    pub fn installed_distributions(&self) -> Result<Vec<InstalledDistribution>, RuntimeError> {
        self.attached(|py, _generation| {
            let py_err = |e: PyErr| RuntimeError::python(py, e);
            let metadata = PyModule::import(py, "importlib.metadata").map_err(py_err)?;
            let distributions = metadata.call_method0("distributions").map_err(py_err)?;

            let mut installed = Vec::new();
            for dist in distributions.try_iter().map_err(py_err)? {
                let dist = dist.map_err(py_err)?;
                match read_distribution(&dist) {
                    Ok(entry) => installed.push(entry),
                    Err(e) => logger::debug(&format!(
                        "Skipping distribution with unreadable metadata: {}",
                        e
                    )),
                }
            }
            installed.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
            Ok(installed)
        })
    }
}

fn read_distribution(dist: &Bound<'_, PyAny>) -> Result<InstalledDistribution, RuntimeError> {
    let py = dist.py();
    let name = dist
        .getattr("metadata")
        .and_then(|meta| meta.call_method1("get", ("Name", "")))
        .map_err(|e| RuntimeError::python(py, e))?;
    let version = dist
        .getattr("version")
        .map_err(|e| RuntimeError::python(py, e))?;
    Ok(InstalledDistribution {
        name: extract_string(&name)?,
        version: extract_string(&version)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    fn diagnostics() -> ImportDiagnostics {
        ImportDiagnostics {
            module: "plugin_pkg".to_string(),
            context: "loading plugins".to_string(),
            search_path: vec!["/srv/app".to_string(), "/venv/lib/site-packages".to_string()],
            site_packages: vec![SitePackagesListing {
                directory: "/venv/lib/site-packages".to_string(),
                entries: vec!["numpy".to_string()],
            }],
            installed: vec![InstalledDistribution {
                name: "numpy".to_string(),
                version: "2.1.0".to_string(),
            }],
            installed_error: None,
            cause: PythonError {
                type_name: "ModuleNotFoundError".to_string(),
                message: "No module named 'plugin_pkg'".to_string(),
                traceback: None,
                cause: None,
            },
        }
    }

    #[test]
    fn test_diagnostics_render_as_text() {
        let text = diagnostics().to_string();
        assert!(text.starts_with(
            "Failed to import 'plugin_pkg' while loading plugins: ModuleNotFoundError"
        ));
        assert!(text.contains("  /srv/app\n"));
        assert!(text.contains("Contents of /venv/lib/site-packages (1 entries):"));
        assert!(text.contains("  numpy==2.1.0\n"));
    }

    #[test]
    fn test_diagnostics_render_as_json() {
        let json = diagnostics().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["module"], "plugin_pkg");
        assert_eq!(value["search_path"][1], "/venv/lib/site-packages");
        assert_eq!(value["site_packages"][0]["entries"][0], "numpy");
        assert_eq!(value["cause"]["type_name"], "ModuleNotFoundError");
        assert!(value["installed_error"].is_null());
    }

    #[test]
    fn test_import_failure_source_reaches_python_error() {
        let err = RuntimeError::ImportFailed(Box::new(diagnostics()));
        let source = err.source().map(|s| s.to_string());
        assert_eq!(
            source.as_deref(),
            Some("ModuleNotFoundError: No module named 'plugin_pkg'")
        );
    }

    #[test]
    fn test_import_requires_running_interpreter() {
        let rt = Runtime::new(pyhost_config::InterpreterConfig::default());
        assert!(matches!(
            rt.import("json"),
            Err(RuntimeError::NotInitialized)
        ));
        assert!(matches!(
            rt.import_all(&["json", "os"], "testing"),
            Err(RuntimeError::Aggregate(ref errors)) if errors.len() == 2
        ));
    }
}
