//! Bounded waiting for referenced objects that are not in the store yet.
//!
//! Every missing target becomes one job on a shared queue. A small pool of
//! threads takes jobs off the queue, checks the store once, and puts
//! unresolved jobs back with their next check time, so any number of targets
//! is polled concurrently against one common deadline.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::schema::ObjectType;
use crate::store::{Store, StoreError};

/// Longest a waiter sleeps before looking at the cancel flag again.
pub(crate) const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Shared flag that aborts a running sync.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An object the run is waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaitTarget {
    pub object_type: ObjectType,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Resolved,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct WaitResult {
    pub target: WaitTarget,
    pub outcome: WaitOutcome,
    /// Time from the start of the wait until the outcome was known.
    pub waited: Duration,
}

/// A queued check for one target.
struct WaitToken {
    target: WaitTarget,
    due: Instant,
}

/// Polls the store for missing objects until they appear or time runs out.
pub struct WaitPool {
    workers: usize,
    poll_interval: Duration,
    timeout: Duration,
    cancel: CancelFlag,
}

impl WaitPool {
    pub fn new(workers: usize, poll_interval: Duration, timeout: Duration, cancel: CancelFlag) -> Self {
        Self {
            workers: workers.max(1),
            poll_interval,
            timeout,
            cancel,
        }
    }

    /// Waits for all targets. The result order is unspecified.
    ///
    /// A store error stops every waiter and is returned as is.
    pub fn wait_all(
        &self,
        store: &dyn Store,
        targets: Vec<WaitTarget>,
    ) -> Result<Vec<WaitResult>, StoreError> {
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let deadline = started + self.timeout;
        let worker_count = self.workers.min(targets.len());
        let remaining = AtomicUsize::new(targets.len());
        let failed = AtomicBool::new(false);

        log::info!(
            "Waiting up to {}s for {} missing object(s) with {} worker(s)",
            self.timeout.as_secs(),
            targets.len(),
            worker_count
        );

        let (job_tx, job_rx) = unbounded::<WaitToken>();
        let (result_tx, result_rx) = unbounded::<Result<WaitResult, StoreError>>();
        for target in targets {
            // Receivers are alive in this scope, so sending cannot fail.
            let _ = job_tx.send(WaitToken {
                target,
                due: started,
            });
        }

        thread::scope(|scope| {
            for worker_id in 0..worker_count {
                let waiter = Waiter {
                    worker_id,
                    store,
                    jobs: job_rx.clone(),
                    requeue: job_tx.clone(),
                    results: result_tx.clone(),
                    remaining: &remaining,
                    failed: &failed,
                    started,
                    deadline,
                    poll_interval: self.poll_interval,
                    cancel: &self.cancel,
                };
                scope.spawn(move || waiter.run());
            }
        });
        drop(result_tx);

        let mut results = Vec::new();
        for result in result_rx.try_iter() {
            results.push(result?);
        }
        Ok(results)
    }
}

struct Waiter<'a> {
    worker_id: usize,
    store: &'a dyn Store,
    jobs: Receiver<WaitToken>,
    requeue: Sender<WaitToken>,
    results: Sender<Result<WaitResult, StoreError>>,
    remaining: &'a AtomicUsize,
    failed: &'a AtomicBool,
    started: Instant,
    deadline: Instant,
    poll_interval: Duration,
    cancel: &'a CancelFlag,
}

impl Waiter<'_> {
    fn run(self) {
        log::debug!("Waiter {} started", self.worker_id);

        while self.remaining.load(Ordering::SeqCst) > 0 && !self.failed.load(Ordering::SeqCst) {
            let token = match self.jobs.recv_timeout(CANCEL_CHECK_INTERVAL) {
                Ok(token) => token,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            if !self.sleep_until(token.due) {
                self.finish(token.target, WaitOutcome::Cancelled);
                continue;
            }

            match self.store.exists(token.target.object_type, &token.target.name) {
                Ok(true) => {
                    log::info!(
                        "{} '{}' is now available",
                        token.target.object_type.display_name(),
                        token.target.name
                    );
                    self.finish(token.target, WaitOutcome::Resolved);
                }
                Ok(false) => {
                    let now = Instant::now();
                    if now >= self.deadline {
                        self.finish(token.target, WaitOutcome::TimedOut);
                    } else {
                        let due = (now + self.poll_interval).min(self.deadline);
                        let _ = self.requeue.send(WaitToken {
                            target: token.target,
                            due,
                        });
                    }
                }
                Err(e) => {
                    log::error!(
                        "Waiter {} could not check {} '{}': {}",
                        self.worker_id,
                        token.target.object_type,
                        token.target.name,
                        e
                    );
                    self.failed.store(true, Ordering::SeqCst);
                    let _ = self.results.send(Err(e));
                }
            }
        }

        log::debug!("Waiter {} stopped", self.worker_id);
    }

    /// Sleeps until `due`, returning false if the run was cancelled.
    fn sleep_until(&self, due: Instant) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= due {
                return true;
            }
            thread::sleep((due - now).min(CANCEL_CHECK_INTERVAL));
        }
    }

    fn finish(&self, target: WaitTarget, outcome: WaitOutcome) {
        let _ = self.results.send(Ok(WaitResult {
            target,
            outcome,
            waited: self.started.elapsed(),
        }));
        self.remaining.fetch_sub(1, Ordering::SeqCst);
    }
}
