//! Scoped ownership of the interpreter's execution lock
//!
//! [`GilScope`] is the only way host threads other than the initializing one
//! get to run interpreter code. Scopes nest on one thread; across threads they
//! exclude each other for the whole outermost scope, including while Python
//! bytecode runs inside it.

use crate::engine::{CPython, Engine};
use crate::errors::RuntimeError;
use crate::lifecycle::Runtime;
use pyo3::prelude::*;
use std::marker::PhantomData;
use std::mem;
use tracing::trace;

/// The current thread's hold on the execution lock, released on drop
#[must_use = "the lock is released as soon as the scope is dropped"]
pub struct GilScope<'rt, E: Engine = CPython> {
    runtime: &'rt Runtime<E>,
    gate: Option<E::Gate>,
    generation: u64,
    // Lock ownership is per thread.
    _not_send: PhantomData<*const ()>,
}

/// Lock released by the initializing thread, taken back on drop
#[must_use = "the lock is taken back as soon as the guard is dropped"]
pub struct ThreadsAllowed<'rt, E: Engine = CPython> {
    runtime: &'rt Runtime<E>,
    suspended: Option<E::Suspended>,
    generation: u64,
    _not_send: PhantomData<*const ()>,
}

impl<E: Engine> Runtime<E> {
    /// Block until this thread holds the execution lock
    ///
    /// Re-entrant: acquiring again on a thread that already holds the lock
    /// returns immediately, and the lock is only given up when the outermost
    /// scope drops.
    pub fn acquire(&self) -> Result<GilScope<'_, E>, RuntimeError> {
        let generation = self.ensure_running()?;
        let gate = self.engine().enter();
        trace!(generation, "entered interpreter");
        Ok(GilScope {
            runtime: self,
            gate: Some(gate),
            generation,
            _not_send: PhantomData,
        })
    }

    /// Release the lock this thread holds implicitly since `initialize`
    ///
    /// Fails with [`RuntimeError::GateNotHeld`] when the calling thread does
    /// not hold it.
    pub fn allow_threads(&self) -> Result<ThreadsAllowed<'_, E>, RuntimeError> {
        let generation = self.ensure_running()?;
        if !self.engine().holds_gate() {
            return Err(RuntimeError::GateNotHeld);
        }
        let suspended = self.engine().suspend();
        trace!(generation, "released interpreter to other threads");
        Ok(ThreadsAllowed {
            runtime: self,
            suspended: Some(suspended),
            generation,
            _not_send: PhantomData,
        })
    }
}

impl<'rt, E: Engine> GilScope<'rt, E> {
    /// Session this scope belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the session that issued this scope has ended
    pub fn is_stale(&self) -> bool {
        !self.runtime.lifeline().is_current(self.generation)
    }
}

impl<'rt> GilScope<'rt, CPython> {
    /// Run `f` with a pyo3 token for the held lock
    pub fn with<R>(&self, f: impl for<'py> FnOnce(Python<'py>) -> R) -> Result<R, RuntimeError> {
        if self.is_stale() {
            return Err(RuntimeError::StaleHandle);
        }
        Ok(Python::attach(f))
    }
}

impl<E: Engine> Drop for GilScope<'_, E> {
    fn drop(&mut self) {
        let Some(gate) = self.gate.take() else {
            return;
        };
        if self.is_stale() {
            // The lock died with the interpreter.
            mem::forget(gate);
            return;
        }
        self.runtime.engine().exit(gate);
        trace!(generation = self.generation, "left interpreter");
    }
}

impl<E: Engine> Drop for ThreadsAllowed<'_, E> {
    fn drop(&mut self) {
        let Some(suspended) = self.suspended.take() else {
            return;
        };
        if !self.runtime.lifeline().is_current(self.generation) {
            mem::forget(suspended);
            return;
        }
        self.runtime.engine().resume(suspended);
        trace!(generation = self.generation, "reclaimed interpreter");
    }
}
