//! In-memory engine with the same locking contract as CPython

use super::{Engine, StartupConfig};
use crate::errors::RuntimeError;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

#[derive(Default)]
struct GateCell {
    owner: Option<ThreadId>,
    depth: usize,
}

#[derive(Default)]
pub(crate) struct FakeEngine {
    gate: Mutex<GateCell>,
    released: Condvar,
    running: AtomicBool,
    startup_path: Vec<String>,
    live_path: Mutex<Vec<String>>,
    unstartable_home: Option<String>,
    failed_start: Mutex<Option<String>>,
    applied: Mutex<StartupConfig>,
    starts: Mutex<Vec<StartupConfig>>,
    stops: AtomicUsize,
}

pub(crate) struct FakeGate;

pub(crate) struct FakeSuspended(usize);

impl FakeEngine {
    pub(crate) fn new(startup_path: &[&str]) -> Self {
        FakeEngine {
            startup_path: startup_path.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Startup fails whenever this home is requested, like a missing stdlib,
    /// and the engine refuses every later start
    pub(crate) fn refusing_home(mut self, home: &str) -> Self {
        self.unstartable_home = Some(home.to_string());
        self
    }

    pub(crate) fn starts(&self) -> Vec<StartupConfig> {
        self.starts.lock().clone()
    }

    pub(crate) fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    fn wait_for_gate(&self) -> MutexGuard<'_, GateCell> {
        let me = thread::current().id();
        let mut cell = self.gate.lock();
        while cell.owner.is_some() && cell.owner != Some(me) {
            self.released.wait(&mut cell);
        }
        cell.owner = Some(me);
        cell
    }
}

impl Engine for FakeEngine {
    type Gate = FakeGate;
    type Suspended = FakeSuspended;

    fn start(&self, startup: &StartupConfig) -> Result<(), RuntimeError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RuntimeError::EngineBusy);
        }
        if let Some(status) = self.failed_start.lock().as_ref() {
            return Err(RuntimeError::EngineUnusable(status.clone()));
        }
        if self.unstartable_home.as_deref() == Some(startup.home.as_str()) {
            let status = "Py_InitializeFromConfig: init_fs_encoding: failed to get the Python codec of the filesystem encoding".to_string();
            *self.failed_start.lock() = Some(status.clone());
            return Err(RuntimeError::Startup(status));
        }

        self.starts.lock().push(startup.clone());
        *self.applied.lock() = startup.clone();
        *self.live_path.lock() = self.startup_path.clone();
        self.running.store(true, Ordering::SeqCst);

        let mut cell = self.wait_for_gate();
        cell.depth += 1;
        Ok(())
    }

    fn stop(&self) -> Result<(), RuntimeError> {
        let mut cell = self.wait_for_gate();
        cell.owner = None;
        cell.depth = 0;
        self.running.store(false, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.released.notify_all();
        Ok(())
    }

    fn enter(&self) -> FakeGate {
        let mut cell = self.wait_for_gate();
        cell.depth += 1;
        FakeGate
    }

    fn exit(&self, _gate: FakeGate) {
        let mut cell = self.gate.lock();
        cell.depth = cell.depth.saturating_sub(1);
        if cell.depth == 0 {
            cell.owner = None;
            self.released.notify_all();
        }
    }

    fn holds_gate(&self) -> bool {
        self.gate.lock().owner == Some(thread::current().id())
    }

    fn suspend(&self) -> FakeSuspended {
        let mut cell = self.gate.lock();
        let depth = cell.depth;
        cell.owner = None;
        cell.depth = 0;
        self.released.notify_all();
        FakeSuspended(depth)
    }

    fn resume(&self, suspended: FakeSuspended) {
        let mut cell = self.wait_for_gate();
        cell.depth = suspended.0;
    }

    fn read_search_path(&self) -> Result<Vec<String>, RuntimeError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(RuntimeError::NotInitialized);
        }
        Ok(self.live_path.lock().clone())
    }

    fn write_search_path(&self, entries: &[String]) -> Result<(), RuntimeError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(RuntimeError::NotInitialized);
        }
        *self.live_path.lock() = entries.to_vec();
        Ok(())
    }

    fn read_home_path(&self) -> Result<String, RuntimeError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(RuntimeError::NotInitialized);
        }
        Ok(self.applied.lock().home.clone())
    }

    fn read_program_name(&self) -> Result<String, RuntimeError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(RuntimeError::NotInitialized);
        }
        Ok(self.applied.lock().program_name.clone())
    }
}
