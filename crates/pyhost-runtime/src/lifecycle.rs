//! Interpreter lifecycle: configuration staging and start/stop transitions
//!
//! A [`Runtime`] owns the staged [`InterpreterConfig`] and drives its engine
//! through `Uninitialized -> Running -> ShuttingDown -> Uninitialized`. Each
//! successful start opens a new *session*; everything handed out during a
//! session (lock scopes, object handles) is tied to its generation number and
//! goes inert once that session ends.
//!
//! ## Threading
//!
//! Transitions are serialized by an internal lock that is separate from the
//! interpreter's execution lock. `is_initialized` never blocks. Shutting down
//! while other threads still hold the execution lock or use handles is the
//! caller's responsibility to avoid.

use crate::engine::{self, CPython, Engine, StartupConfig};
use crate::errors::RuntimeError;
use crate::handle::PyHandle;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use pyhost_config::InterpreterConfig;
use pyhost_logger as logger;
use pyo3::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Running,
    ShuttingDown,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LifecycleState::Running,
            2 => LifecycleState::ShuttingDown,
            _ => LifecycleState::Uninitialized,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            LifecycleState::Uninitialized => 0,
            LifecycleState::Running => 1,
            LifecycleState::ShuttingDown => 2,
        }
    }
}

/// Shared with every handle so it can tell whether its session is still alive
#[derive(Debug, Default)]
pub(crate) struct Lifeline {
    generation: AtomicU64,
    running: AtomicBool,
}

impl Lifeline {
    /// Generation of the live session, if any
    pub(crate) fn current(&self) -> Option<u64> {
        if self.running.load(Ordering::Acquire) {
            Some(self.generation.load(Ordering::Acquire))
        } else {
            None
        }
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.current() == Some(generation)
    }

    fn begin(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.running.store(true, Ordering::Release);
        generation
    }

    fn end(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// What a running interpreter was actually started with, as it reported at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Increments on every successful start
    pub generation: u64,
    pub home_path: String,
    pub program_name: String,
    /// Search path as established by interpreter startup
    pub default_search_path: Vec<String>,
    pub started_at: SystemTime,
}

/// Supervisor for one embedded interpreter
pub struct Runtime<E: Engine = CPython> {
    engine: E,
    config: RwLock<InterpreterConfig>,
    transition: Mutex<Option<Session>>,
    state: AtomicU8,
    lifeline: Arc<Lifeline>,
}

static GLOBAL_RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    let config = InterpreterConfig::load().unwrap_or_else(|e| {
        logger::warn(&format!(
            "Failed to load interpreter config, using defaults: {}",
            e
        ));
        InterpreterConfig::default()
    });
    Runtime::new(config)
});

impl Runtime<CPython> {
    pub fn new(config: InterpreterConfig) -> Self {
        Runtime::with_engine(CPython::default(), config)
    }

    /// Process-wide runtime seeded from the user's config file
    pub fn global() -> &'static Runtime {
        &GLOBAL_RUNTIME
    }

    /// Run `f` with the lock held, tagged with the live session
    pub(crate) fn attached<R>(
        &self,
        f: impl for<'py> FnOnce(Python<'py>, u64) -> Result<R, RuntimeError>,
    ) -> Result<R, RuntimeError> {
        let generation = self.ensure_running()?;
        engine::attach(|py| f(py, generation))
    }

    pub(crate) fn handle(&self, object: Bound<'_, PyAny>, generation: u64) -> PyHandle {
        PyHandle::from_bound(object, generation, &self.lifeline)
    }
}

impl<E: Engine> Runtime<E> {
    pub fn with_engine(engine: E, config: InterpreterConfig) -> Self {
        Runtime {
            engine,
            config: RwLock::new(config),
            transition: Mutex::new(None),
            state: AtomicU8::new(LifecycleState::Uninitialized.as_u8()),
            lifeline: Arc::new(Lifeline::default()),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Lock-free; safe from any thread at any time
    pub fn is_initialized(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Snapshot of the staged configuration
    pub fn config(&self) -> InterpreterConfig {
        self.config.read().clone()
    }

    /// Stage configuration changes for the next start
    pub fn update_config(&self, update: impl FnOnce(&mut InterpreterConfig)) {
        update(&mut self.config.write());
    }

    /// The current session, if running
    pub fn session(&self) -> Option<Session> {
        self.transition.lock().clone()
    }

    /// Home of the running interpreter, or the staged home when stopped
    ///
    /// While running the value is read back from the interpreter itself.
    pub fn home_path(&self) -> String {
        let Some(session) = self.session() else {
            return self.config.read().home_path();
        };
        self.engine.read_home_path().unwrap_or_else(|e| {
            logger::debug(&format!("Reading the live home failed: {}", e));
            session.home_path
        })
    }

    /// Stage a home directory; applies at the next `initialize`
    pub fn set_home_path(&self, home: impl Into<String>) {
        self.config.write().set_home_path(home);
    }

    /// Program name of the running interpreter, or the staged one when stopped
    pub fn program_name(&self) -> String {
        let Some(session) = self.session() else {
            return self.config.read().program_name();
        };
        self.engine.read_program_name().unwrap_or_else(|e| {
            logger::debug(&format!("Reading the live program name failed: {}", e));
            session.program_name
        })
    }

    /// Stage a program name; applies at the next `initialize`
    pub fn set_program_name(&self, name: impl Into<String>) {
        self.config.write().set_program_name(name);
    }

    /// Start the interpreter with the staged configuration
    ///
    /// Does nothing if already running. On success the calling thread holds
    /// the interpreter's execution lock, so it can use the interpreter
    /// straight away; call [`Runtime::allow_threads`] to let other threads in.
    pub fn initialize(&self) -> Result<(), RuntimeError> {
        let mut current = self.transition.lock();
        if current.is_some() {
            logger::debug("Interpreter already running, initialize is a no-op");
            return Ok(());
        }

        let start_time = Instant::now();
        let staged = self.config.read().clone();
        let startup = StartupConfig::from(&staged);
        logger::step(&format!(
            "Starting embedded interpreter with home='{}', program_name='{}'",
            staged.home_path(),
            staged.program_name()
        ));

        if let Err(e) = self.engine.start(&startup) {
            logger::error(&format!("Interpreter failed to start: {}", e));
            return Err(e);
        }

        let (default_search_path, home_path, program_name) = match self.observe_startup(&staged) {
            Ok(observed) => observed,
            Err(e) => {
                logger::error(&format!("Interpreter setup after start failed: {}", e));
                if let Err(stop_err) = self.engine.stop() {
                    logger::warn(&format!("Cleanup after failed start: {}", stop_err));
                }
                return Err(e);
            }
        };

        let generation = self.lifeline.begin();
        *current = Some(Session {
            generation,
            home_path,
            program_name,
            default_search_path,
            started_at: SystemTime::now(),
        });
        self.state
            .store(LifecycleState::Running.as_u8(), Ordering::Release);

        logger::success(&format!(
            "Interpreter session {} started in {:?}",
            generation,
            start_time.elapsed()
        ));
        Ok(())
    }

    /// Default search path, home and program name as the new interpreter sees them
    fn observe_startup(
        &self,
        staged: &InterpreterConfig,
    ) -> Result<(Vec<String>, String, String), RuntimeError> {
        let home_path = self.engine.read_home_path()?;
        let program_name = self.engine.read_program_name()?;
        let default_search_path = self.engine.read_search_path()?;
        if let Some(entries) = staged.search_path_entries() {
            self.engine.write_search_path(entries)?;
            logger::debug(&format!(
                "Applied staged search path with {} entries",
                entries.len()
            ));
        }
        Ok((default_search_path, home_path, program_name))
    }

    /// Tear the interpreter down
    ///
    /// Fails with [`RuntimeError::NotInitialized`] if nothing is running; the
    /// state is left untouched in that case. Every handle and lock scope from
    /// the ending session becomes inert.
    pub fn shutdown(&self) -> Result<(), RuntimeError> {
        let mut current = self.transition.lock();
        let Some(session) = current.take() else {
            logger::warn("Shutdown requested but the interpreter is not initialized");
            return Err(RuntimeError::NotInitialized);
        };

        let start_time = Instant::now();
        logger::step(&format!("Shutting down interpreter session {}", session.generation));
        self.state
            .store(LifecycleState::ShuttingDown.as_u8(), Ordering::Release);
        self.lifeline.end();

        let result = self.engine.stop();
        self.state
            .store(LifecycleState::Uninitialized.as_u8(), Ordering::Release);

        match &result {
            Ok(()) => logger::debug(&format!(
                "Interpreter session {} shut down in {:?}",
                session.generation,
                start_time.elapsed()
            )),
            Err(e) => logger::error(&format!(
                "Interpreter session {} shut down with error: {}",
                session.generation, e
            )),
        }
        result
    }

    /// Generation of the live session, or `NotInitialized`
    pub(crate) fn ensure_running(&self) -> Result<u64, RuntimeError> {
        self.lifeline.current().ok_or(RuntimeError::NotInitialized)
    }

    pub(crate) fn lifeline(&self) -> &Arc<Lifeline> {
        &self.lifeline
    }

    pub(crate) fn staged(&self) -> &RwLock<InterpreterConfig> {
        &self.config
    }
}

impl<E: Engine> Drop for Runtime<E> {
    fn drop(&mut self) {
        if self.is_initialized() {
            logger::warn("Runtime dropped while the interpreter is still running");
        }
    }
}
