//! Supervised deferred commits for read-only query transactions.
//!
//! Read transactions opened by [`super::Database`] may be kept open for a
//! short window after the caller has its rows. The [`DeferredCommitter`] owns
//! those transactions until they are committed: each one runs as a task in a
//! `JoinSet` supervised by a single worker, and every outcome lands in
//! [`CommitStats`]. Failures are logged, never returned to the query caller.

use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use authplane_observability::{Counter, Gauge};
use sqlx::{Postgres, Transaction};
use tokio::sync::{Notify, mpsc};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, sleep_until};
use tracing::{Instrument, Span, debug, warn};

/// A transaction waiting to be committed.
#[async_trait]
pub trait PendingCommit: Send + 'static {
    async fn commit(self: Box<Self>) -> Result<(), sqlx::Error>;
}

#[async_trait]
impl PendingCommit for Transaction<'static, Postgres> {
    async fn commit(self: Box<Self>) -> Result<(), sqlx::Error> {
        Transaction::commit(*self).await
    }
}

/// Outcome counters for query transaction commits, inline and deferred.
#[derive(Debug)]
pub struct CommitStats {
    scheduled: Counter,
    committed: Counter,
    failed: Counter,
    pending: Gauge,
}

impl CommitStats {
    const fn new() -> Self {
        Self {
            scheduled: Counter::new("query_commits_scheduled"),
            committed: Counter::new("query_commits_committed"),
            failed: Counter::new("query_commits_failed"),
            pending: Gauge::new("query_commits_pending"),
        }
    }

    pub fn scheduled(&self) -> u64 {
        self.scheduled.get()
    }

    pub fn committed(&self) -> u64 {
        self.committed.get()
    }

    pub fn failed(&self) -> u64 {
        self.failed.get()
    }

    /// Commits handed over but not finished yet.
    pub fn pending(&self) -> i64 {
        self.pending.get()
    }
}

struct Shared {
    stats: CommitStats,
    idle: Notify,
}

impl Shared {
    fn begin(&self) {
        self.stats.scheduled.inc();
        self.stats.pending.increment();
    }

    fn succeeded(&self) {
        self.stats.committed.inc();
        self.finish();
    }

    fn failed(&self, delay: Duration, error: &dyn Display) {
        self.stats.failed.inc();
        warn!(
            error = %error,
            delay_ms = delay.as_millis() as u64,
            failed_total = self.stats.failed.get(),
            "deferred commit failed"
        );
        self.finish();
    }

    fn finish(&self) {
        if self.stats.pending.decrement() <= 0 {
            self.idle.notify_waiters();
        }
    }

    fn record(&self, delay: Duration, result: Result<(), sqlx::Error>) {
        match result {
            Ok(()) => self.succeeded(),
            Err(e) => self.failed(delay, &e),
        }
    }
}

struct Scheduled {
    commit: Box<dyn PendingCommit>,
    delay: Duration,
    due: Instant,
    // Span of the query that opened the transaction.
    span: Span,
}

// An inline commit whose caller is dropped mid-commit rolls back with the
// transaction and counts as failed, so `pending` always returns to zero.
struct InlineCommit<'a> {
    shared: &'a Shared,
    delay: Duration,
    armed: bool,
}

impl InlineCommit<'_> {
    fn finish(mut self, result: Result<(), sqlx::Error>) {
        self.armed = false;
        self.shared.record(self.delay, result);
    }
}

impl Drop for InlineCommit<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared
                .failed(self.delay, &"caller dropped before the commit finished");
        }
    }
}

/// Commits read transactions after a delay without blocking the caller.
///
/// Must be created inside a Tokio runtime.
pub struct DeferredCommitter {
    sender: Mutex<Option<mpsc::UnboundedSender<Scheduled>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for DeferredCommitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredCommitter")
            .field("stats", &self.shared.stats)
            .finish_non_exhaustive()
    }
}

impl DeferredCommitter {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            stats: CommitStats::new(),
            idle: Notify::new(),
        });
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(supervise(receiver, Arc::clone(&shared)));

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            shared,
        }
    }

    pub fn stats(&self) -> &CommitStats {
        &self.shared.stats
    }

    /// Commit `commit` once `delay` has elapsed.
    ///
    /// A zero delay commits before returning. After [`Self::shutdown`] every
    /// commit is inline. Neither path reports the commit outcome to the caller.
    pub async fn schedule(&self, commit: Box<dyn PendingCommit>, delay: Duration) {
        self.shared.begin();

        let job = Scheduled {
            commit,
            delay,
            due: Instant::now() + delay,
            span: Span::current(),
        };

        let job = if delay.is_zero() {
            job
        } else {
            match self.sender() {
                Some(sender) => match sender.send(job) {
                    Ok(()) => return,
                    Err(mpsc::error::SendError(job)) => job,
                },
                None => job,
            }
        };

        let guard = InlineCommit {
            shared: &self.shared,
            delay: job.delay,
            armed: true,
        };
        let result = job.commit.commit().await;
        guard.finish(result);
    }

    /// Wait until every scheduled commit has finished.
    pub async fn flush(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.stats.pending() <= 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting deferred commits and wait for the outstanding ones.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().ok().and_then(|mut s| s.take()));
        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "deferred commit worker stopped abnormally");
            }
        }
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Scheduled>> {
        self.sender.lock().ok().and_then(|s| s.clone())
    }
}

impl Default for DeferredCommitter {
    fn default() -> Self {
        Self::new()
    }
}

async fn supervise(mut receiver: mpsc::UnboundedReceiver<Scheduled>, shared: Arc<Shared>) {
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            next = receiver.recv() => match next {
                Some(job) => {
                    let span = job.span.clone();
                    in_flight.spawn(commit_when_due(job, Arc::clone(&shared)).instrument(span));
                }
                None => break,
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                reap(joined, &shared);
            }
        }
    }

    debug!(outstanding = in_flight.len(), "draining deferred commits");
    while let Some(joined) = in_flight.join_next().await {
        reap(joined, &shared);
    }
}

async fn commit_when_due(job: Scheduled, shared: Arc<Shared>) {
    sleep_until(job.due).await;
    let result = job.commit.commit().await;
    shared.record(job.delay, result);
}

// A task that panicked or was aborted never recorded its outcome.
fn reap(joined: Result<(), JoinError>, shared: &Shared) {
    if let Err(e) = joined {
        shared.failed(Duration::ZERO, &e);
    }
}
