//! Per-session serialized task queues running on a shared worker pool.
//!
//! Every queue is a FIFO of closures. A queue is handed to the pool only
//! while it has work and is not already scheduled, so at most one closure of
//! a queue runs at any time while different queues run in parallel.

use std::any::Any;
use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, bounded};
use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, error, trace, warn};

use crate::actor::{self, Receiver};
use crate::common::collections::VecDeque;
use crate::common::error::{WmError, WmResult};
use crate::model::session::SessionId;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Closures a worker runs from one queue before giving others a turn.
const BATCH: usize = 16;

thread_local! {
    static RUNNING: Cell<usize> = const { Cell::new(0) };
}

enum Wake {
    Run(Arc<QueueCore>),
    Stop,
}

#[derive(Default)]
struct Idle {
    pending: Mutex<usize>,
    cv: Condvar,
}

impl Idle {
    fn add(&self, n: usize) { *self.pending.lock() += n }

    fn done(&self, n: usize) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(n);
        if *pending == 0 {
            self.cv.notify_all();
        }
    }
}

struct Shared {
    ready: actor::Sender<Wake>,
    idle: Idle,
}

/// Owns the worker threads. Dropping it stops the workers once they are
/// done with what they are running.
pub struct TaskExecutor {
    shared: Arc<Shared>,
    workers: usize,
}

impl TaskExecutor {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (ready, rx) = actor::channel();
        let shared = Arc::new(Shared { ready, idle: Idle::default() });
        let rx = Arc::new(Mutex::new(rx));
        for n in 0..workers {
            let rx = rx.clone();
            let spawned = thread::Builder::new()
                .name(format!("scene-worker-{n}"))
                .spawn(move || worker_loop(rx));
            if let Err(e) = spawned {
                warn!(?e, "failed to spawn worker thread");
            }
        }
        debug!(workers, "task executor started");
        TaskExecutor { shared, workers }
    }

    pub fn queue(&self, owner: SessionId) -> TaskQueue {
        TaskQueue(Arc::new(QueueCore {
            owner,
            state: Mutex::new(QueueState::default()),
            cancel: CancellationToken::new(),
            shared: self.shared.clone(),
            waiters: AtomicUsize::new(0),
        }))
    }

    /// Blocks until no queue has outstanding closures, or `timeout` passes.
    /// Work posted from running closures counts as outstanding.
    pub fn wait_idle(&self, timeout: Duration) -> WmResult<()> {
        let deadline = Instant::now() + timeout;
        let mut pending = self.shared.idle.pending.lock();
        while *pending > 0 {
            if self.shared.idle.cv.wait_until(&mut pending, deadline).timed_out() {
                return Err(WmError::Timeout(timeout));
            }
        }
        Ok(())
    }

    pub fn outstanding(&self) -> usize { *self.shared.idle.pending.lock() }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        for _ in 0..self.workers {
            self.shared.ready.send(Wake::Stop);
        }
    }
}

fn worker_loop(rx: Arc<Mutex<Receiver<Wake>>>) {
    loop {
        let msg = rx.lock().blocking_recv();
        match msg {
            Some((span, Wake::Run(queue))) => {
                let _guard = span.enter();
                queue.run_batch();
            }
            Some((_, Wake::Stop)) | None => break,
        }
    }
    trace!("worker exiting");
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<(Span, Job)>,
    scheduled: bool,
}

struct QueueCore {
    owner: SessionId,
    state: Mutex<QueueState>,
    cancel: CancellationToken,
    shared: Arc<Shared>,
    waiters: AtomicUsize,
}

impl QueueCore {
    fn id(self: &Arc<Self>) -> usize { Arc::as_ptr(self) as usize }

    fn run_batch(self: &Arc<Self>) {
        RUNNING.with(|r| r.set(self.id()));
        for _ in 0..BATCH {
            let next = {
                let mut state = self.state.lock();
                match state.jobs.pop_front() {
                    Some(job) if !self.cancel.is_cancelled() => job,
                    _ => {
                        state.scheduled = false;
                        RUNNING.with(|r| r.set(0));
                        return;
                    }
                }
            };
            let (span, job) = next;
            // A panicking closure must not take the worker or the queue's
            // `scheduled` flag down with it.
            if let Err(payload) = catch_unwind(AssertUnwindSafe(move || span.in_scope(job))) {
                error!(owner = %self.owner, panic = panic_message(&*payload), "task panicked");
            }
            self.shared.idle.done(1);
        }
        RUNNING.with(|r| r.set(0));

        let mut state = self.state.lock();
        if state.jobs.is_empty() || self.cancel.is_cancelled() {
            state.scheduled = false;
        } else {
            drop(state);
            self.shared.ready.send(Wake::Run(self.clone()));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string payload")
}

/// Handle to one session's queue.
#[derive(Clone)]
pub struct TaskQueue(Arc<QueueCore>);

impl TaskQueue {
    pub fn owner(&self) -> SessionId { self.0.owner }

    /// Enqueues `f` and returns without waiting for it.
    pub fn post_task(&self, f: impl FnOnce() + Send + 'static) -> WmResult<()> {
        let mut state = self.0.state.lock();
        if self.0.cancel.is_cancelled() {
            return Err(WmError::Destroyed(self.0.owner));
        }
        state.jobs.push_back((Span::current(), Box::new(f)));
        self.0.shared.idle.add(1);
        if !state.scheduled {
            state.scheduled = true;
            drop(state);
            self.0.shared.ready.send(Wake::Run(self.0.clone()));
        }
        Ok(())
    }

    /// Enqueues `f` and blocks until it has run or `timeout` elapses.
    ///
    /// A timeout only releases the caller: `f` stays queued and still runs.
    /// Cancelling the queue while the caller waits yields
    /// [`WmError::Destroyed`]; a panic in `f` yields
    /// [`WmError::NullReference`]. Called from a closure of this same queue,
    /// `f` runs inline.
    ///
    /// Called from a closure of a *different* queue, the worker running that
    /// closure blocks until `f` finishes or `timeout` passes. With a single
    /// worker that is always the timeout, since `f` cannot be scheduled.
    pub fn post_sync_task<R: Send + 'static>(
        &self,
        f: impl FnOnce() -> R + Send + 'static,
        timeout: Duration,
    ) -> WmResult<R> {
        if self.is_current() {
            return Ok(f());
        }
        let (tx, rx) = bounded(1);
        self.post_task(move || {
            _ = tx.send(f());
        })?;
        self.0.waiters.fetch_add(1, Ordering::SeqCst);
        let res = rx.recv_timeout(timeout);
        self.0.waiters.fetch_sub(1, Ordering::SeqCst);
        match res {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => {
                warn!(owner = %self.0.owner, ?timeout, "synchronous task timed out");
                Err(WmError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) if self.is_cancelled() => {
                Err(WmError::Destroyed(self.0.owner))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(WmError::NullReference("task ended without a result"))
            }
        }
    }

    /// Drops every queued closure without running it and refuses new ones.
    /// Blocked synchronous callers are released with `Destroyed`.
    pub fn cancel(&self) {
        let drained = {
            let mut state = self.0.state.lock();
            self.0.cancel.cancel();
            std::mem::take(&mut state.jobs)
        };
        let n = drained.len();
        drop(drained);
        self.0.shared.idle.done(n);
        debug!(owner = %self.0.owner, dropped = n, "queue cancelled");
    }

    pub fn is_cancelled(&self) -> bool { self.0.cancel.is_cancelled() }

    pub fn pending(&self) -> usize { self.0.state.lock().jobs.len() }

    /// Whether a `post_sync_task` caller is currently blocked on this queue.
    pub fn has_blocked_caller(&self) -> bool { self.0.waiters.load(Ordering::SeqCst) > 0 }

    /// Whether the calling thread is running one of this queue's closures.
    pub fn is_current(&self) -> bool { RUNNING.with(|r| r.get()) == self.0.id() }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("owner", &self.0.owner)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
