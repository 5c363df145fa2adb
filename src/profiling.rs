//! Nested wall-clock profiling with pause support.
//!
//! Pausing a profiler also pauses every profiler it is nested in, so time a
//! user spends at the debugger prompt is excluded from all enclosing
//! measurements.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::warn;

use crate::error::ProfilingError;

#[derive(Debug, Default)]
struct State {
    start: Option<Instant>,
    end: Option<Instant>,
    parent: Option<Profiler>,
    // outermost pause first
    paused_since: Vec<Instant>,
    paused: Duration,
}

impl State {
    fn paused_total(&self, now: Instant) -> Duration {
        match self.paused_since.first() {
            Some(&since) if self.end.is_none() => {
                self.paused + now.saturating_duration_since(since)
            }
            _ => self.paused,
        }
    }
}

/// A shared handle to one measurement.
#[derive(Debug, Clone, Default)]
pub struct Profiler(Rc<RefCell<State>>);

impl Profiler {
    pub fn new() -> Profiler {
        Profiler::default()
    }

    pub fn with_parent(parent: &Profiler) -> Profiler {
        let profiler = Profiler::new();
        profiler.0.borrow_mut().parent = Some(parent.clone());
        profiler
    }

    pub fn parent(&self) -> Option<Profiler> {
        self.0.borrow().parent.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.0.borrow().end.is_some()
    }

    pub fn is_paused(&self) -> bool {
        !self.0.borrow().paused_since.is_empty()
    }

    pub fn same_as(&self, other: &Profiler) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn start(&self) {
        let mut state = self.0.borrow_mut();
        state.start = Some(Instant::now());
        state.end = None;
    }

    pub fn stop(&self) -> Result<(), ProfilingError> {
        let mut state = self.0.borrow_mut();
        if state.start.is_none() {
            return Err(ProfilingError::NotStarted);
        }
        if !state.paused_since.is_empty() {
            return Err(ProfilingError::StoppedWhilePaused);
        }
        state.end = Some(Instant::now());
        Ok(())
    }

    /// This profiler and its ancestors, innermost first.
    fn chain(&self) -> Vec<Profiler> {
        let mut chain = vec![self.clone()];
        while let Some(parent) = chain.last().and_then(Profiler::parent) {
            chain.push(parent);
        }
        chain
    }

    /// Pauses this profiler and every enclosing one.
    pub fn pause(&self) -> Result<(), ProfilingError> {
        let chain = self.chain();
        if chain.iter().any(Profiler::is_complete) {
            return Err(ProfilingError::Completed);
        }
        let now = Instant::now();
        for profiler in chain {
            profiler.0.borrow_mut().paused_since.push(now);
        }
        Ok(())
    }

    /// Undoes one [`pause`](Profiler::pause) on this profiler and every enclosing one.
    pub fn unpause(&self) -> Result<(), ProfilingError> {
        let chain = self.chain();
        if chain.iter().any(Profiler::is_complete) {
            return Err(ProfilingError::Completed);
        }
        if !chain.iter().all(Profiler::is_paused) {
            return Err(ProfilingError::NotPaused);
        }
        let now = Instant::now();
        for profiler in chain {
            let mut state = profiler.0.borrow_mut();
            if let Some(since) = state.paused_since.pop() {
                if state.paused_since.is_empty() {
                    state.paused += now.saturating_duration_since(since);
                }
            }
        }
        Ok(())
    }

    /// Time since `start`, up to `stop` if stopped, minus time spent paused.
    pub fn elapsed(&self) -> Result<Duration, ProfilingError> {
        let state = self.0.borrow();
        let start = state.start.ok_or(ProfilingError::NotStarted)?;
        let now = Instant::now();
        let end = state.end.unwrap_or(now);
        Ok(end.saturating_duration_since(start).saturating_sub(state.paused_total(now)))
    }

    pub fn elapsed_ms(&self) -> Result<f64, ProfilingError> {
        self.elapsed().map(|d| d.as_secs_f64() * 1000.0)
    }
}

/// The profilers currently running, innermost last.
#[derive(Debug, Default)]
pub struct ProfilerStack {
    active: Vec<Profiler>,
}

impl ProfilerStack {
    pub fn new() -> ProfilerStack {
        ProfilerStack::default()
    }

    /// Starts `profiler`, nesting it in the innermost running one.
    pub fn enter(&mut self, profiler: &Profiler) {
        profiler.start();
        if profiler.parent().is_none() {
            if let Some(top) = self.active.last() {
                profiler.0.borrow_mut().parent = Some(top.clone());
            }
        }
        self.active.push(profiler.clone());
    }

    pub fn exit(&mut self, profiler: &Profiler) -> Result<(), ProfilingError> {
        let stopped = profiler.stop();
        match self.active.iter().rposition(|p| p.same_as(profiler)) {
            Some(i) if i + 1 == self.active.len() => {
                self.active.pop();
            }
            Some(i) => {
                warn!("a profiler was stopped before its children stopped");
                self.active.remove(i);
            }
            None => warn!("stopped a profiler that was never entered"),
        }
        stopped
    }

    pub fn current(&self) -> Option<&Profiler> {
        self.active.last()
    }

    pub fn depth(&self) -> usize {
        self.active.len()
    }

    /// Pauses the innermost running profiler until the guard is dropped.
    pub fn unprofiled(&self) -> Unprofiled {
        Unprofiled::new(self.current().cloned())
    }
}

/// Keeps a profiler (and its ancestors) paused while alive.
#[must_use]
pub struct Unprofiled {
    profiler: Option<Profiler>,
}

impl Unprofiled {
    pub fn new(profiler: Option<Profiler>) -> Unprofiled {
        let profiler = profiler.filter(|p| match p.pause() {
            Ok(()) => true,
            Err(e) => {
                warn!("could not pause profiling: {}", e);
                false
            }
        });
        Unprofiled { profiler }
    }
}

impl Drop for Unprofiled {
    fn drop(&mut self) {
        if let Some(profiler) = self.profiler.take() {
            if let Err(e) = profiler.unpause() {
                warn!("could not resume profiling: {}", e);
            }
        }
    }
}
