//! CPython driven through the raw C API
//!
//! pyo3 only ever initializes the interpreter once per process. Restart
//! cycles with a different home or program name need `PyConfig`,
//! `Py_InitializeFromConfig` and `Py_FinalizeEx` directly, so this engine owns
//! those calls and leaves everything between them to pyo3.
//!
//! The GIL alone does not keep a host thread's scope exclusive: while bytecode
//! runs, CPython hands it to any waiting thread every switch interval. Host
//! threads therefore queue on a re-entrant host gate first and only then take
//! the GIL, and they wait for that gate detached from the interpreter.

use super::{Engine, StartupConfig};
use crate::convert::{extract_string, extract_strings};
use crate::errors::RuntimeError;
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use pyo3::ffi;
use pyo3::prelude::*;
use pyo3::types::{PyList, PyModule};
use std::ffi::{c_char, CStr, CString};
use std::mem::MaybeUninit;
use std::ptr::addr_of_mut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

/// Set while any `CPython` engine in this process has the interpreter up
static PROCESS_CLAIM: AtomicBool = AtomicBool::new(false);

/// Status of a failed `Py_InitializeFromConfig` in this process
///
/// CPython keeps half-built runtime state after such a failure and every
/// later initialization fails with it, whatever the configuration.
static FAILED_START: OnceCell<String> = OnceCell::new();

static HOST_GATE: HostGate = HostGate::new();

/// The CPython interpreter linked into this process
#[derive(Debug, Default)]
pub struct CPython {
    claimed: AtomicBool,
}

/// `PyGILState_Ensure` result, released by `PyGILState_Release`
pub struct CPythonGate(ffi::PyGILState_STATE);

/// Thread state saved by `PyEval_SaveThread`, plus the host gate depth
pub struct CPythonSuspended {
    thread_state: *mut ffi::PyThreadState,
    depth: usize,
}

struct GateCell {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Which host thread owns the interpreter, across its outermost scope
struct HostGate {
    cell: Mutex<GateCell>,
    released: Condvar,
}

impl HostGate {
    const fn new() -> Self {
        HostGate {
            cell: Mutex::new(GateCell {
                owner: None,
                depth: 0,
            }),
            released: Condvar::new(),
        }
    }

    fn held_by_current(&self) -> bool {
        self.cell.lock().owner == Some(thread::current().id())
    }

    /// Take the gate, or nest once more on the thread that owns it
    fn enter(&self) {
        let me = thread::current().id();
        let mut cell = self.cell.lock();
        if cell.owner == Some(me) {
            cell.depth += 1;
            return;
        }
        if cell.owner.is_none() {
            cell.owner = Some(me);
            cell.depth = 1;
            return;
        }

        // The owner needs the GIL to finish its scope.
        let detached = detach_if_attached();
        while cell.owner.is_some() {
            self.released.wait(&mut cell);
        }
        cell.owner = Some(me);
        cell.depth = 1;
        drop(cell);

        if let Some(thread_state) = detached {
            // SAFETY: saved above on this thread.
            unsafe { ffi::PyEval_RestoreThread(thread_state) };
        }
    }

    fn exit(&self) {
        let mut cell = self.cell.lock();
        cell.depth = cell.depth.saturating_sub(1);
        if cell.depth == 0 {
            cell.owner = None;
            self.released.notify_all();
        }
    }

    /// Give the gate up whatever the nesting depth, returning that depth
    fn release_all(&self) -> usize {
        let mut cell = self.cell.lock();
        let depth = cell.depth;
        cell.owner = None;
        cell.depth = 0;
        self.released.notify_all();
        depth
    }

    /// Wait for the gate and restore a depth saved by `release_all`
    fn reclaim(&self, depth: usize) {
        let me = thread::current().id();
        let mut cell = self.cell.lock();
        while cell.owner.is_some() && cell.owner != Some(me) {
            self.released.wait(&mut cell);
        }
        cell.owner = Some(me);
        cell.depth = depth;
    }

    /// Forget every hold; the interpreter they guarded is gone
    fn reset(&self) {
        let mut cell = self.cell.lock();
        cell.owner = None;
        cell.depth = 0;
        self.released.notify_all();
    }
}

fn detach_if_attached() -> Option<*mut ffi::PyThreadState> {
    // SAFETY: the GIL state is only inspected while the interpreter is up.
    unsafe {
        if ffi::Py_IsInitialized() != 0 && ffi::PyGILState_Check() == 1 {
            Some(ffi::PyEval_SaveThread())
        } else {
            None
        }
    }
}

/// Host gate hold released on drop, also when `f` unwinds
struct HostEntry;

impl HostEntry {
    fn enter() -> Self {
        HOST_GATE.enter();
        HostEntry
    }
}

impl Drop for HostEntry {
    fn drop(&mut self) {
        HOST_GATE.exit();
    }
}

/// Run `f` attached to the interpreter while owning the host gate
///
/// Every interpreter access outside a [`GilScope`](crate::GilScope) goes
/// through here so it cannot interleave with another thread's scope.
pub(crate) fn attach<R>(f: impl for<'py> FnOnce(Python<'py>) -> R) -> R {
    let _entry = HostEntry::enter();
    Python::attach(f)
}

impl Engine for CPython {
    type Gate = CPythonGate;
    type Suspended = CPythonSuspended;

    fn start(&self, startup: &StartupConfig) -> Result<(), RuntimeError> {
        if PROCESS_CLAIM
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RuntimeError::EngineBusy);
        }

        if let Some(status) = FAILED_START.get() {
            PROCESS_CLAIM.store(false, Ordering::Release);
            return Err(RuntimeError::EngineUnusable(status.clone()));
        }

        // Someone outside this crate already brought the interpreter up.
        if unsafe { ffi::Py_IsInitialized() } != 0 {
            PROCESS_CLAIM.store(false, Ordering::Release);
            return Err(RuntimeError::EngineBusy);
        }

        // SAFETY: the process claim guarantees no other engine is configuring
        // or running the interpreter concurrently.
        match unsafe { initialize_from_config(startup) } {
            Ok(()) => {
                // The initializing thread holds the GIL, so it owns the gate too.
                HOST_GATE.reset();
                HOST_GATE.enter();
                self.claimed.store(true, Ordering::Release);
                Ok(())
            }
            Err(err) => {
                PROCESS_CLAIM.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    fn stop(&self) -> Result<(), RuntimeError> {
        if !self.claimed.swap(false, Ordering::AcqRel) {
            return Err(RuntimeError::NotInitialized);
        }

        HOST_GATE.enter();
        // SAFETY: the interpreter is running. The ensured state is never
        // released because finalization discards it.
        let _gil = unsafe { ffi::PyGILState_Ensure() };

        // Apply decrefs pyo3 deferred while no thread was attached; after
        // finalization those pointers would dangle.
        Python::attach(|_py| ());

        let status = unsafe { ffi::Py_FinalizeEx() };
        HOST_GATE.reset();
        PROCESS_CLAIM.store(false, Ordering::Release);

        if status < 0 {
            return Err(RuntimeError::Finalize(
                "flushing buffered data failed during Py_FinalizeEx".to_string(),
            ));
        }
        Ok(())
    }

    fn enter(&self) -> CPythonGate {
        HOST_GATE.enter();
        // SAFETY: only called by the runtime while the interpreter is running.
        CPythonGate(unsafe { ffi::PyGILState_Ensure() })
    }

    fn exit(&self, gate: CPythonGate) {
        // SAFETY: `gate` came from `enter` on this thread (the guard is !Send).
        unsafe { ffi::PyGILState_Release(gate.0) }
        HOST_GATE.exit();
    }

    fn holds_gate(&self) -> bool {
        HOST_GATE.held_by_current()
    }

    fn suspend(&self) -> CPythonSuspended {
        // SAFETY: the runtime checks `holds_gate` first.
        let thread_state = unsafe { ffi::PyEval_SaveThread() };
        let depth = HOST_GATE.release_all();
        CPythonSuspended {
            thread_state,
            depth,
        }
    }

    fn resume(&self, suspended: CPythonSuspended) {
        HOST_GATE.reclaim(suspended.depth);
        // SAFETY: the thread state came from `suspend` on this thread.
        unsafe { ffi::PyEval_RestoreThread(suspended.thread_state) }
    }

    fn read_search_path(&self) -> Result<Vec<String>, RuntimeError> {
        attach(|py| {
            let sys = PyModule::import(py, "sys").map_err(|e| RuntimeError::python(py, e))?;
            let path = sys
                .getattr("path")
                .map_err(|e| RuntimeError::python(py, e))?;
            extract_strings(&path)
        })
    }

    fn write_search_path(&self, entries: &[String]) -> Result<(), RuntimeError> {
        attach(|py| {
            let sys = PyModule::import(py, "sys").map_err(|e| RuntimeError::python(py, e))?;
            let path = sys
                .getattr("path")
                .map_err(|e| RuntimeError::python(py, e))?;
            let replacement = PyList::new(py, entries).map_err(|e| RuntimeError::python(py, e))?;
            // Mutate in place so code holding a reference to sys.path sees the change.
            path.call_method0("clear")
                .and_then(|_| path.call_method1("extend", (replacement,)))
                .map_err(|e| RuntimeError::python(py, e))?;
            Ok(())
        })
    }

    fn read_home_path(&self) -> Result<String, RuntimeError> {
        attach(|py| {
            // Deprecated in 3.13 but still the only view of the applied home
            // before PyConfig_Get.
            #[allow(deprecated)]
            let home = unsafe { ffi::Py_GetPythonHome() };
            // SAFETY: the string is owned by the running interpreter.
            unsafe { wide_string(py, home.cast_const()) }
        })
    }

    fn read_program_name(&self) -> Result<String, RuntimeError> {
        attach(|py| {
            #[allow(deprecated)]
            let name = unsafe { ffi::Py_GetProgramName() };
            // SAFETY: the string is owned by the running interpreter.
            unsafe { wide_string(py, name.cast_const()) }
        })
    }
}

/// Copy a NUL-terminated wide string out of the interpreter; null reads as ""
unsafe fn wide_string<W>(py: Python<'_>, ptr: *const W) -> Result<String, RuntimeError> {
    if ptr.is_null() {
        return Ok(String::new());
    }
    let text = Bound::from_owned_ptr_or_err(py, ffi::PyUnicode_FromWideChar(ptr.cast(), -1))
        .map_err(|e| RuntimeError::python(py, e))?;
    extract_string(&text)
}

unsafe fn initialize_from_config(startup: &StartupConfig) -> Result<(), RuntimeError> {
    let mut raw = MaybeUninit::<ffi::PyConfig>::uninit();
    ffi::PyConfig_InitPythonConfig(raw.as_mut_ptr());
    let config = raw.as_mut_ptr();

    let mut result = configure(config, startup);
    if result.is_ok() {
        result = check_status(ffi::Py_InitializeFromConfig(config), "Py_InitializeFromConfig");
        if let Err(RuntimeError::Startup(status)) = &result {
            let _ = FAILED_START.set(status.clone());
        }
    }
    ffi::PyConfig_Clear(config);
    result
}

unsafe fn configure(config: *mut ffi::PyConfig, startup: &StartupConfig) -> Result<(), RuntimeError> {
    // Signal handling belongs to the host process.
    (*config).install_signal_handlers = 0;

    // Set even when empty: Py_FinalizeEx keeps the previous cycle's path
    // configuration and would otherwise fill an unset home from it.
    let home = to_cstring(&startup.home, "home")?;
    check_status(
        ffi::PyConfig_SetBytesString(config, addr_of_mut!((*config).home), home.as_ptr()),
        "home",
    )?;

    let name = to_cstring(&startup.program_name, "program name")?;
    check_status(
        ffi::PyConfig_SetBytesString(
            config,
            addr_of_mut!((*config).program_name),
            name.as_ptr(),
        ),
        "program name",
    )?;
    Ok(())
}

fn to_cstring(value: &str, what: &str) -> Result<CString, RuntimeError> {
    CString::new(value)
        .map_err(|_| RuntimeError::Startup(format!("{} contains an interior NUL byte", what)))
}

fn check_status(status: ffi::PyStatus, context: &str) -> Result<(), RuntimeError> {
    let func = status.func;
    let err_msg = status.err_msg;
    let exitcode = status.exitcode;

    if unsafe { ffi::PyStatus_Exception(status) } == 0 {
        return Ok(());
    }

    // SAFETY: PyStatus strings are static C literals or null.
    let message = unsafe { c_string(err_msg) }
        .unwrap_or_else(|| format!("interpreter requested exit with code {}", exitcode));
    let detail = match unsafe { c_string(func) } {
        Some(func) => format!("{}: {}: {}", context, func, message),
        None => format!("{}: {}", context, message),
    };
    Err(RuntimeError::Startup(detail))
}

unsafe fn c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_host_gate_nests_on_owner() {
        let gate = HostGate::new();
        gate.enter();
        gate.enter();
        gate.exit();
        assert!(gate.held_by_current());
        gate.exit();
        assert!(!gate.held_by_current());
    }

    #[test]
    fn test_host_gate_excludes_other_threads() {
        let gate = Arc::new(HostGate::new());
        let inside = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..100 {
                        gate.enter();
                        gate.enter();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                        gate.exit();
                        gate.exit();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn test_host_gate_release_all_and_reclaim() {
        let gate = Arc::new(HostGate::new());
        gate.enter();
        gate.enter();
        let depth = gate.release_all();
        assert_eq!(depth, 2);

        let other = Arc::clone(&gate);
        thread::spawn(move || {
            other.enter();
            assert!(other.held_by_current());
            other.exit();
        })
        .join()
        .unwrap();

        gate.reclaim(depth);
        gate.exit();
        assert!(gate.held_by_current());
        gate.exit();
        assert!(!gate.held_by_current());
    }
}
