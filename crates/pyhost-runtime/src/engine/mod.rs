//! The embedded interpreter as seen by the lifecycle controller
//!
//! [`Engine`] is the narrow seam between the runtime's state machine and the
//! interpreter it supervises. The runtime decides *when* to start, stop, or
//! take the execution lock; the engine knows *how*.

mod cpython;
#[cfg(test)]
pub(crate) mod fake;

pub(crate) use cpython::attach;
pub use cpython::{CPython, CPythonGate, CPythonSuspended};

use crate::errors::RuntimeError;
use pyhost_config::InterpreterConfig;

/// Parameters consumed by an engine at startup
///
/// Both values are always resolved (staged value, else `PYTHONHOME` or the
/// default name), so nothing from an earlier cycle can fill a gap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupConfig {
    /// Interpreter home; empty means no home
    pub home: String,
    /// Name the interpreter reports for itself
    pub program_name: String,
}

impl From<&InterpreterConfig> for StartupConfig {
    fn from(config: &InterpreterConfig) -> Self {
        StartupConfig {
            home: config.home_path(),
            program_name: config.program_name(),
        }
    }
}

/// A process-wide interpreter with a single global execution lock
///
/// Contract expected by [`Runtime`](crate::Runtime):
///
/// - `start` brings the interpreter up and leaves the calling thread holding
///   the execution lock. When the interpreter itself refuses to start, every
///   later `start` fails with [`RuntimeError::EngineUnusable`].
/// - `stop` may be called from any thread. It takes the lock if needed and
///   tears the interpreter down; the lock is gone with it.
/// - `enter`/`exit` nest on the same thread. Other threads block in `enter`
///   until the outermost `exit`.
/// - `suspend`/`resume` fully release and later restore the calling thread's
///   hold, whatever its nesting depth.
/// - Search path, home and program name accessors are only called while
///   running.
pub trait Engine: Send + Sync {
    /// Proof of one `enter`, handed back to `exit`
    type Gate;
    /// Saved hold returned by `suspend`
    type Suspended;

    fn start(&self, startup: &StartupConfig) -> Result<(), RuntimeError>;

    fn stop(&self) -> Result<(), RuntimeError>;

    fn enter(&self) -> Self::Gate;

    fn exit(&self, gate: Self::Gate);

    /// Whether the calling thread currently holds the execution lock
    fn holds_gate(&self) -> bool;

    fn suspend(&self) -> Self::Suspended;

    fn resume(&self, suspended: Self::Suspended);

    /// The interpreter's live module search path
    fn read_search_path(&self) -> Result<Vec<String>, RuntimeError>;

    /// Replace the interpreter's live module search path
    fn write_search_path(&self, entries: &[String]) -> Result<(), RuntimeError>;

    /// Home directory the running interpreter was configured with
    fn read_home_path(&self) -> Result<String, RuntimeError>;

    /// Program name the running interpreter reports
    fn read_program_name(&self) -> Result<String, RuntimeError>;
}
