//! Background propagation to the secondary stores.
//!
//! A fixed pool of worker tasks executes mirror/tracker jobs off the
//! request path. Submission never blocks: a full queue drops the job with
//! an error log, which is the accepted best-effort loss mode.
//!
//! Failed jobs land in an in-memory backlog that a reconciliation loop
//! retries on a fixed interval up to an attempt cap. The backlog is
//! deliberately not durable; its depth is observable through `health()` and
//! a restart abandons it.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;

/// A re-runnable unit of external synchronization work.
///
/// The closure owns everything it needs and can be invoked again by the
/// reconciliation loop after a failure.
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

#[derive(Clone)]
pub struct SyncTask {
    pub label: String,
    run: JobFn,
}

impl SyncTask {
    async fn run(&self) -> bool {
        (self.run)().await
    }
}

struct Pending {
    task: SyncTask,
    attempts: u32,
}

pub struct SyncWorkers {
    queue: mpsc::Sender<SyncTask>,
    backlog: Arc<Mutex<Vec<Pending>>>,
    workers: Vec<JoinHandle<()>>,
    reconciler: JoinHandle<()>,
}

impl SyncWorkers {
    pub fn start(config: &SyncConfig) -> Self {
        let (queue, rx) = mpsc::channel::<SyncTask>(config.queue_depth.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let backlog: Arc<Mutex<Vec<Pending>>> = Arc::new(Mutex::new(Vec::new()));

        let mut workers = Vec::with_capacity(config.workers.max(1));
        for worker in 0..config.workers.max(1) {
            let rx = Arc::clone(&rx);
            let backlog = Arc::clone(&backlog);
            workers.push(tokio::spawn(async move {
                loop {
                    let task = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(task) = task else { break };

                    if task.run().await {
                        debug!(worker, label = %task.label, "sync job completed");
                    } else {
                        warn!(worker, label = %task.label, "sync job failed, queued for reconciliation");
                        backlog.lock().push(Pending { task, attempts: 1 });
                    }
                }
            }));
        }

        let reconciler = tokio::spawn(Self::reconcile_loop(
            Arc::clone(&backlog),
            config.retry_interval_secs,
            config.max_attempts,
        ));

        Self {
            queue,
            backlog,
            workers,
            reconciler,
        }
    }

    /// Submit a job. Non-blocking; a full or closed queue drops the job.
    pub fn submit<F, Fut>(&self, label: impl Into<String>, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = bool> + Send + 'static,
    {
        let task = SyncTask {
            label: label.into(),
            run: Arc::new(move || Box::pin(job()) as BoxFuture<'static, bool>),
        };
        if let Err(e) = self.queue.try_send(task) {
            match e {
                mpsc::error::TrySendError::Full(task) => {
                    error!(label = %task.label, "sync queue full, dropping job");
                }
                mpsc::error::TrySendError::Closed(task) => {
                    error!(label = %task.label, "sync workers stopped, dropping job");
                }
            }
        }
    }

    /// Depth of the retry backlog.
    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().len()
    }

    /// Close the queue, let workers drain in-flight jobs, stop the
    /// reconciliation loop. Backlogged entries are abandoned (and logged).
    pub async fn shutdown(self) {
        drop(self.queue);
        for worker in self.workers {
            let _ = worker.await;
        }
        self.reconciler.abort();

        let abandoned = self.backlog.lock().len();
        if abandoned > 0 {
            warn!(abandoned, "shutting down with unreconciled sync jobs");
        }
    }

    async fn reconcile_loop(
        backlog: Arc<Mutex<Vec<Pending>>>,
        interval_secs: u64,
        max_attempts: u32,
    ) {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so fresh failures get a
        // full interval before their first retry.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let pending: Vec<Pending> = std::mem::take(&mut *backlog.lock());
            if pending.is_empty() {
                continue;
            }
            info!(jobs = pending.len(), "reconciling failed sync jobs");

            for mut entry in pending {
                if entry.task.run().await {
                    info!(label = %entry.task.label, attempts = entry.attempts, "sync job reconciled");
                    continue;
                }
                entry.attempts += 1;
                if entry.attempts >= max_attempts {
                    error!(
                        label = %entry.task.label,
                        attempts = entry.attempts,
                        "giving up on sync job, manual reconciliation required"
                    );
                } else {
                    backlog.lock().push(entry);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn test_config(retry_interval_secs: u64) -> SyncConfig {
        SyncConfig {
            workers: 2,
            queue_depth: 8,
            retry_interval_secs,
            max_attempts: 3,
        }
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn test_successful_job_runs_once() {
        let workers = SyncWorkers::start(&test_config(60));
        let runs = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&runs);
        workers.submit("ok-job", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }
        });

        wait_for(|| runs.load(Ordering::SeqCst) == 1).await;
        assert_eq!(workers.backlog_len(), 0);
        workers.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_job_lands_in_backlog() {
        let workers = SyncWorkers::start(&test_config(3600));

        workers.submit("failing-job", || async { false });
        wait_for(|| workers.backlog_len() == 1).await;
        workers.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconciler_retries_until_success() {
        let workers = SyncWorkers::start(&test_config(1));
        let runs = Arc::new(AtomicU32::new(0));

        // Fails on the first run, succeeds on the retry.
        let counter = Arc::clone(&runs);
        workers.submit("flaky-job", move || {
            let counter = Arc::clone(&counter);
            async move { counter.fetch_add(1, Ordering::SeqCst) >= 1 }
        });

        wait_for(|| runs.load(Ordering::SeqCst) >= 2).await;
        wait_for(|| workers.backlog_len() == 0).await;
        workers.shutdown().await;
    }
}
