//! The tick loop.
//!
//! A [`Scheduler`] owns a [`Graph`] and, once started, ticks it continuously on its own
//! thread. There is no timer: device reads and writes inside the nodes block for about
//! one chunk's duration, and that is what paces the loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use crate::error::EngineError;
use crate::graph::{Graph, TickReport};

/// Lifecycle of a [`Scheduler`]. Transitions only go forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

/// Counters readable while the loop runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Ticks completed
    pub ticks: u64,
    /// Node faults absorbed across all ticks
    pub faults: u64,
    /// Wall time of the most recent tick, device waits included
    pub last_tick: Duration,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    faults: AtomicU64,
    last_tick_nanos: AtomicU64,
}

impl Counters {
    fn record(&self, report: &TickReport, elapsed: Duration) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.faults.fetch_add(report.faults as u64, Ordering::Relaxed);
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.last_tick_nanos.store(nanos, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TickStats {
        TickStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            last_tick: Duration::from_nanos(self.last_tick_nanos.load(Ordering::Relaxed)),
        }
    }
}

/// Drives a graph on a dedicated thread.
///
/// The graph sits behind a mutex that the loop holds for exactly one tick at a time.
/// Editing the graph from another thread therefore waits for the current tick to finish
/// and never races a node's `process`.
///
/// ```
/// use nodedsp::{Graph, Scheduler, SchedulerState};
///
/// let mut scheduler = Scheduler::new(Graph::new());
/// scheduler.start().unwrap();
/// assert_eq!(scheduler.state(), SchedulerState::Running);
/// assert!(scheduler.start().is_err());
///
/// scheduler.stop().unwrap();
/// assert_eq!(scheduler.state(), SchedulerState::Stopped);
/// ```
pub struct Scheduler {
    graph: Arc<Mutex<Graph>>,
    state: SchedulerState,
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(graph: Graph) -> Self {
        Self {
            graph: Arc::new(Mutex::new(graph)),
            state: SchedulerState::Idle,
            stop: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            handle: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Lock the graph for inspection or editing. Blocks while a tick is in progress.
    pub fn graph(&self) -> MutexGuard<'_, Graph> {
        self.graph.lock()
    }

    pub fn stats(&self) -> TickStats {
        self.counters.snapshot()
    }

    /// Run one tick on the calling thread.
    pub fn run_tick(&self) -> TickReport {
        tick_once(&self.graph, &self.counters)
    }

    /// Spawn the tick thread. Only valid from [`SchedulerState::Idle`].
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.state != SchedulerState::Idle {
            return Err(EngineError::InvalidTransition {
                action: "start",
                state: self.state,
            });
        }

        let graph = Arc::clone(&self.graph);
        let stop = Arc::clone(&self.stop);
        let counters = Arc::clone(&self.counters);
        let handle = thread::Builder::new()
            .name("nodedsp-tick".to_owned())
            .spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    tick_once(&graph, &counters);
                    thread::yield_now();
                }
            })?;

        self.handle = Some(handle);
        self.state = SchedulerState::Running;
        tracing::info!(nodes = self.graph.lock().len(), "scheduler started");
        Ok(())
    }

    /// Let the current tick finish, then join the tick thread. Only valid while running.
    pub fn stop(&mut self) -> Result<(), EngineError> {
        if self.state != SchedulerState::Running {
            return Err(EngineError::InvalidTransition {
                action: "stop",
                state: self.state,
            });
        }

        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("tick thread panicked");
            }
        }
        self.state = SchedulerState::Stopped;

        let stats = self.stats();
        tracing::info!(ticks = stats.ticks, faults = stats.faults, "scheduler stopped");
        Ok(())
    }

    /// Stop if running, then tear down every node.
    pub fn shutdown(mut self) -> Result<(), EngineError> {
        if self.state == SchedulerState::Running {
            self.stop()?;
        }
        self.graph.lock().teardown()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.state == SchedulerState::Running {
            let _ = self.stop();
        }
    }
}

fn tick_once(graph: &Mutex<Graph>, counters: &Counters) -> TickReport {
    let started = Instant::now();
    let report = graph.lock().tick();
    counters.record(&report, started.elapsed());
    report
}
