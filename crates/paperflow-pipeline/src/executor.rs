//! Bounded-concurrency execution of one stage's batch.
//!
//! Each executor owns a rayon pool with exactly `concurrency` threads.
//! Workers claim units from a shared [`WorkQueue`], run the stage action
//! under the rate limiter and retry policy, and send every terminal outcome
//! over a completion channel. The calling thread drains the channel and
//! persists outcomes one at a time, so the store sees a single writer per
//! stage.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use paperflow_core::{
    Attempted, CancelToken, CollaboratorError, ConfigError, ErrorKind, Paper, RateLimiter,
    RetryPolicy, Stage, StageOutput, WorkUnit,
};
use paperflow_store::{StateStore, StoreError};

use crate::work_queue::WorkQueue;

/// Outcome counts of one stage run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub stage: Stage,
    /// Units handed to the executor
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Subset of `succeeded` that needed more than one call
    pub retried_then_succeeded: usize,
    /// Units never started because the pass was cancelled
    pub skipped: usize,
    /// Action calls across all units, retries included
    pub calls: usize,
    pub elapsed: Duration,
}

impl ExecutionReport {
    pub fn empty(stage: Stage) -> Self {
        Self {
            stage,
            total: 0,
            succeeded: 0,
            failed: 0,
            retried_then_succeeded: 0,
            skipped: 0,
            calls: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Units that reached a terminal outcome.
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn log(&self) {
        log::info!(
            "{}: {}/{} succeeded ({} after retry), {} failed, {} skipped, {} calls in {:.1}s",
            self.stage,
            self.succeeded,
            self.total,
            self.retried_then_succeeded,
            self.failed,
            self.skipped,
            self.calls,
            self.elapsed.as_secs_f64()
        );
    }
}

/// Runs a stage action over a batch with bounded parallelism, per-call
/// rate limiting and retry.
pub struct StageExecutor {
    stage: Stage,
    concurrency: usize,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    pool: rayon::ThreadPool,
}

impl StageExecutor {
    /// Fails fast on a zero concurrency limit.
    pub fn new(
        stage: Stage,
        concurrency: usize,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let field = format!("stages.{stage}.concurrency");
        if concurrency == 0 {
            return Err(ConfigError::new(field, "must be at least 1"));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(move |i| format!("{stage}-{i}"))
            .build()
            .map_err(|e| ConfigError::new(field, e.to_string()))?;
        Ok(Self {
            stage,
            concurrency,
            limiter,
            retry,
            pool,
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// One unit: rate-limited calls under the retry policy. A panicking
    /// action counts as a permanent failure of this unit only.
    fn attempt<T>(
        &self,
        label: &str,
        key: &str,
        call: impl Fn() -> Result<T, CollaboratorError>,
    ) -> Attempted<T> {
        self.retry.run(label, |_| {
            self.limiter.acquire(key);
            catch_unwind(AssertUnwindSafe(|| call())).unwrap_or_else(|_| {
                Err(CollaboratorError::new(
                    ErrorKind::Unsupported,
                    "stage action panicked",
                ))
            })
        })
    }

    /// Run `action` for every item and hand each terminal result to
    /// `persist` on the calling thread.
    ///
    /// Collaborator failures never escape: they are counted and persisted.
    /// A `persist` error is an integrity failure: no further units are
    /// started, in-flight units are drained without being persisted, and the
    /// error is returned. Cancellation stops workers from claiming new
    /// units; units already claimed run to completion and are persisted.
    #[allow(clippy::too_many_arguments)]
    pub fn execute<I, T, L, A, P>(
        &self,
        items: &[I],
        key: &str,
        label: L,
        action: A,
        mut persist: P,
        cancel: &CancelToken,
        pb: &ProgressBar,
    ) -> Result<ExecutionReport, StoreError>
    where
        I: Sync,
        T: Send,
        L: Fn(&I) -> &str + Sync,
        A: Fn(&I) -> Result<T, CollaboratorError> + Sync,
        P: FnMut(&I, Result<T, CollaboratorError>) -> Result<(), StoreError>,
    {
        let started = Instant::now();
        let mut report = ExecutionReport::empty(self.stage);
        report.total = items.len();
        if items.is_empty() {
            return Ok(report);
        }

        let queue = WorkQueue::new(items);
        let abort = AtomicBool::new(false);
        let workers = self.concurrency.min(items.len());
        let (tx, rx) = mpsc::channel::<(usize, Attempted<T>)>();
        let mut integrity: Option<StoreError> = None;

        log::info!(
            "{}: {} units on {workers} workers (collaborator: {key})",
            self.stage,
            items.len()
        );

        self.pool.in_place_scope(|s| {
            for _ in 0..workers {
                let tx = tx.clone();
                let queue = &queue;
                let abort = &abort;
                let label = &label;
                let action = &action;
                s.spawn(move |_| {
                    while !cancel.is_cancelled() && !abort.load(Ordering::Relaxed) {
                        let Some((index, item)) = queue.next() else {
                            break;
                        };
                        let attempted = self.attempt(label(item), key, || action(item));
                        if tx.send((index, attempted)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            for (index, attempted) in rx {
                let item = &items[index];
                pb.inc(1);
                if integrity.is_some() {
                    continue;
                }

                report.calls += attempted.attempts as usize;
                match &attempted.result {
                    Ok(_) => {
                        report.succeeded += 1;
                        if attempted.attempts > 1 {
                            report.retried_then_succeeded += 1;
                        }
                    }
                    Err(e) => {
                        report.failed += 1;
                        log::warn!(
                            "{} {}: {e} (after {} attempt{})",
                            self.stage,
                            label(item),
                            attempted.attempts,
                            if attempted.attempts == 1 { "" } else { "s" }
                        );
                    }
                }

                if let Err(e) = persist(item, attempted.result) {
                    log::error!("{} {}: {e}; aborting stage", self.stage, label(item));
                    abort.store(true, Ordering::Relaxed);
                    integrity = Some(e);
                }
            }
        });

        report.skipped = queue.total() - queue.claimed();
        report.elapsed = started.elapsed();
        if let Some(e) = integrity {
            return Err(e);
        }
        if report.skipped > 0 {
            log::info!(
                "{}: cancelled, {} units not started",
                self.stage,
                report.skipped
            );
        }
        report.log();
        Ok(report)
    }

    /// Run a tracked stage's action over `units` and record each outcome in
    /// `store`: success writes the output and `completed_at`, failure
    /// overwrites the stage error.
    pub fn run<A>(
        &self,
        units: &[WorkUnit],
        action: A,
        key: &str,
        store: &dyn StateStore,
        cancel: &CancelToken,
        pb: &ProgressBar,
    ) -> Result<ExecutionReport, StoreError>
    where
        A: Fn(&Paper) -> Result<StageOutput, CollaboratorError> + Sync,
    {
        let stage = self.stage;
        self.execute(
            units,
            key,
            WorkUnit::id,
            |unit| action(&unit.paper),
            |unit, result| {
                match result {
                    Ok(output) => {
                        if !store.record_success(unit.id(), output)? {
                            log::debug!("{stage} {}: already complete, kept first result", unit.id());
                        }
                    }
                    Err(e) => {
                        store.record_failure(unit.id(), stage, &e.to_string())?;
                    }
                }
                Ok(())
            },
            cancel,
            pb,
        )
    }
}
