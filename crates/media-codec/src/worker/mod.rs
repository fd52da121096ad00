//! Worker threads and the primitives they park on.
//!
//! Each active session runs three threads: the input worker (client → engine),
//! the output worker (engine → client) and the display pump (display release
//! events). All of them loop on a bounded step so a cleared `alive` flag is
//! observed within [`MAX_WAIT_MS`](crate::config::MAX_WAIT_MS).

pub(crate) mod input;
pub(crate) mod output;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::config::MAX_WAIT_MS;
use crate::display::DisplayEvent;
use crate::error::{CodecError, Result};
use crate::session::SessionCore;
use crate::status::SessionStats;

/// Activity flag plus bookkeeping of which threads are mid-unit.
///
/// A unit of work begins with [`enter`](Self::enter) and ends when the returned
/// guard drops. Flush and stop deactivate the gate and then
/// [`wait_idle`](Self::wait_idle) so no worker touches a slot while they reset.
#[derive(Debug)]
pub(crate) struct WorkerGate {
    inner: Mutex<GateInner>,
    cv: Condvar,
}

#[derive(Debug)]
struct GateInner {
    active: bool,
    in_unit: Vec<ThreadId>,
}

pub(crate) struct UnitGuard<'a> {
    gate: &'a WorkerGate,
    thread: ThreadId,
}

impl Drop for UnitGuard<'_> {
    fn drop(&mut self) {
        let mut g = self.gate.lock();
        if let Some(pos) = g.in_unit.iter().position(|t| *t == self.thread) {
            g.in_unit.swap_remove(pos);
        }
        drop(g);
        self.gate.cv.notify_all();
    }
}

impl WorkerGate {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(GateInner {
                active: false,
                in_unit: Vec::new(),
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.lock().active = active;
        self.cv.notify_all();
    }

    pub(crate) fn is_active(&self) -> bool {
        self.lock().active
    }

    /// Begin a unit of work, or `None` while inactive.
    pub(crate) fn enter(&self) -> Option<UnitGuard<'_>> {
        let mut g = self.lock();
        if !g.active {
            return None;
        }
        let thread = thread::current().id();
        g.in_unit.push(thread);
        Some(UnitGuard { gate: self, thread })
    }

    /// Sleep until activated or `timeout` elapses.
    pub(crate) fn wait_active(&self, timeout: Duration) -> bool {
        let g = self.lock();
        let (g, _) = self
            .cv
            .wait_timeout_while(g, timeout, |g| !g.active)
            .unwrap_or_else(PoisonError::into_inner);
        g.active
    }

    /// Wait until no other thread is inside a unit.
    ///
    /// The calling thread is excluded so a worker can flush or stop the
    /// session from inside a client callback.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let me = thread::current().id();
        let deadline = Instant::now() + timeout;
        let mut g = self.lock();
        loop {
            if g.in_unit.iter().all(|t| *t == me) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(busy = g.in_unit.len(), "workers still busy after drain timeout");
                return false;
            }
            let (ng, _) = self
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }
    }
}

/// Monotonic progress counter one worker bumps to unpark the other.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    generation: Mutex<u64>,
    cv: Condvar,
}

impl Signal {
    pub(crate) fn generation(&self) -> u64 {
        *self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn notify(&self) {
        let mut g = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *g = g.wrapping_add(1);
        drop(g);
        self.cv.notify_all();
    }

    /// Park until the generation moves past `seen` or `timeout` elapses.
    pub(crate) fn wait_for_change(&self, seen: u64, timeout: Duration) {
        let g = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = self
            .cv
            .wait_timeout_while(g, timeout, |g| *g == seen)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Running worker threads of one session.
pub(crate) struct WorkerHandles {
    alive: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerHandles {
    pub(crate) fn spawn(core: &Arc<SessionCore>, events: Receiver<DisplayEvent>) -> Result<Self> {
        let alive = Arc::new(AtomicBool::new(true));
        let mut handles = Self {
            alive: alive.clone(),
            threads: Vec::with_capacity(3),
        };

        let spawn = |name: String, body: Box<dyn FnOnce() + Send>| {
            thread::Builder::new()
                .name(name.clone())
                .spawn(body)
                .map_err(|e| CodecError::no_memory(format!("spawn {name}: {e}")))
        };

        let input = {
            let core = core.clone();
            let alive = alive.clone();
            spawn(
                format!("{}-input", core.name),
                Box::new(move || {
                    while alive.load(Ordering::Acquire) {
                        input::step(&core);
                    }
                    tracing::debug!(session = %core.name, "input worker exited");
                }),
            )
        };
        handles.push(input)?;

        let output = {
            let core = core.clone();
            let alive = alive.clone();
            spawn(
                format!("{}-output", core.name),
                Box::new(move || {
                    while alive.load(Ordering::Acquire) {
                        output::step(&core);
                    }
                    tracing::debug!(session = %core.name, "output worker exited");
                }),
            )
        };
        handles.push(output)?;

        let pump = {
            let core = core.clone();
            let alive = alive.clone();
            spawn(
                format!("{}-display", core.name),
                Box::new(move || display_pump(&core, &events, &alive)),
            )
        };
        handles.push(pump)?;

        tracing::info!(session = %core.name, "workers started");
        Ok(handles)
    }

    fn push(&mut self, spawned: Result<JoinHandle<()>>) -> Result<()> {
        match spawned {
            Ok(handle) => {
                self.threads.push(handle);
                Ok(())
            }
            Err(e) => {
                self.dispose();
                self.join_others();
                Err(e)
            }
        }
    }

    /// Ask every thread to exit after its current step.
    pub(crate) fn dispose(&self) {
        self.alive.store(false, Ordering::Release);
    }

    pub(crate) fn is_disposed(&self) -> bool {
        !self.alive.load(Ordering::Acquire)
    }

    /// Threads that have not exited yet.
    pub(crate) fn running(&self) -> usize {
        self.threads.iter().filter(|h| !h.is_finished()).count()
    }

    /// Join every thread except the caller's own.
    pub(crate) fn join(mut self) {
        self.dispose();
        self.join_others();
    }

    fn join_others(&mut self) {
        let me = thread::current().id();
        for handle in self.threads.drain(..) {
            if handle.thread().id() == me {
                continue;
            }
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                tracing::error!(thread = %name, "worker thread panicked");
            }
        }
    }
}

/// Apply display release events until disposed.
fn display_pump(core: &SessionCore, events: &Receiver<DisplayEvent>, alive: &AtomicBool) {
    let timeout = Duration::from_millis(MAX_WAIT_MS);
    while alive.load(Ordering::Acquire) {
        match events.recv_timeout(timeout) {
            Ok(DisplayEvent::Released {
                display_id,
                buffer_id,
            }) => {
                let released = core.display.handle_release(
                    &core.output_pool,
                    &core.display_q,
                    &core.engine_q,
                    display_id,
                    buffer_id,
                );
                if let Some(index) = released {
                    SessionStats::bump(&core.stats.display_releases);
                    tracing::debug!(index, buffer_id, "display buffer released");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!(session = %core.name, "display pump exited");
}
