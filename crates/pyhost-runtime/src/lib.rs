//! Embedded CPython lifecycle and lock bridge
//!
//! This crate supervises one CPython interpreter living inside a Rust host:
//! 1. Staging home, program name and module search path before startup
//! 2. Starting and finalizing the interpreter, repeatedly, in one process
//! 3. Scoped ownership of the interpreter's execution lock
//! 4. Imports, evaluation and typed access to results
//!
//! Handles and lock scopes are tied to the session that produced them and go
//! inert after `shutdown`, so nothing from an old interpreter can reach a new one.

mod convert;
pub mod engine;
pub mod errors;
mod execution;
mod gate;
mod handle;
mod imports;
mod info;
mod lifecycle;
pub mod search_path;

pub use engine::{CPython, Engine, StartupConfig};
pub use errors::{PythonError, RuntimeError};
pub use gate::{GilScope, ThreadsAllowed};
pub use handle::PyHandle;
pub use imports::{ImportDiagnostics, InstalledDistribution};
pub use lifecycle::{LifecycleState, Runtime, Session};
pub use search_path::{list_site_packages, SitePackagesListing, SITE_PACKAGES};

pub use pyhost_config::InterpreterConfig;
