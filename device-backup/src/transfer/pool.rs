//! Fixed-size worker pools over bounded queues.
//!
//! ```text
//! submit ──► [job queue, bounded] ──► N workers ──► [result stream, bounded] ──► collector
//!    └── dedup hit ──────────────── Skipped ──────────────┘
//! ```
//!
//! Both queues are bounded, so the producer calling `submit` and the
//! collector draining results must run as separate tasks: a producer that
//! also drains results would block on a full queue forever.
//!
//! Shutdown order is fixed: `close` drops the job sender, waits for every
//! worker to finish its last job, and only then drops the final result
//! sender. The result stream therefore ends after the last result.

use super::{JobResult, Outcome, PoolJob, TransferJob};
use crate::dedup::DedupRegistry;
use crate::BackupError;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Performs a single job.
pub trait JobHandler: Send + Sync + 'static {
    type Job: PoolJob;

    fn handle(&self, job: &Self::Job) -> impl Future<Output = crate::Result<()>> + Send;
}

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub workers: usize,
    pub queue_capacity: usize,
    pub result_capacity: usize,
    /// Upper bound for one handler call
    pub job_timeout: Option<Duration>,
}

impl PoolOptions {
    pub fn backup() -> Self {
        Self {
            workers: 5,
            queue_capacity: 100,
            result_capacity: 100,
            job_timeout: None,
        }
    }

    /// Restores are mostly many small pushes
    pub fn restore() -> Self {
        Self {
            workers: 10,
            queue_capacity: 500,
            result_capacity: 500,
            job_timeout: None,
        }
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::backup()
    }
}

type SharedReceiver<J> = Arc<Mutex<mpsc::Receiver<J>>>;

pub struct WorkerPool<H: JobHandler> {
    jobs_tx: mpsc::Sender<H::Job>,
    results_tx: mpsc::Sender<JobResult<H::Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl<H: JobHandler> WorkerPool<H> {
    /// Spawn the workers. Must be called inside a tokio runtime.
    pub fn start(
        handler: Arc<H>,
        options: PoolOptions,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<JobResult<H::Job>>) {
        let (jobs_tx, jobs_rx) = mpsc::channel(options.queue_capacity.max(1));
        let (results_tx, results_rx) = mpsc::channel(options.result_capacity.max(1));
        let jobs_rx: SharedReceiver<H::Job> = Arc::new(Mutex::new(jobs_rx));

        let workers = (0..options.workers.max(1))
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    Arc::clone(&handler),
                    Arc::clone(&jobs_rx),
                    results_tx.clone(),
                    options.job_timeout,
                    cancel.clone(),
                ))
            })
            .collect();

        debug!(
            "Started pool: {} workers, queue {}, results {}",
            options.workers.max(1),
            options.queue_capacity,
            options.result_capacity
        );

        (
            Self {
                jobs_tx,
                results_tx,
                workers,
            },
            results_rx,
        )
    }

    /// Queue a job, waiting while the queue is full.
    pub async fn submit(&self, job: H::Job) {
        if let Err(mpsc::error::SendError(job)) = self.jobs_tx.send(job).await {
            // Only reachable if every worker is gone; still answer the job.
            warn!("No workers left for {}", job.label());
            self.emit(job, Outcome::Failed("worker pool stopped".to_string())).await;
        }
    }

    /// Resolve a job without running it.
    pub async fn emit(&self, job: H::Job, outcome: Outcome) {
        if self.results_tx.send(JobResult { job, outcome }).await.is_err() {
            debug!("Result stream closed, dropping result");
        }
    }

    /// Stop accepting jobs, wait for the workers to drain the queue, then
    /// end the result stream.
    pub async fn close(self) {
        let Self {
            jobs_tx,
            results_tx,
            workers,
        } = self;

        drop(jobs_tx);
        for handle in workers {
            if let Err(e) = handle.await {
                warn!("Worker task failed: {}", e);
            }
        }
        drop(results_tx);
    }
}

async fn worker<H: JobHandler>(
    id: usize,
    handler: Arc<H>,
    jobs: SharedReceiver<H::Job>,
    results: mpsc::Sender<JobResult<H::Job>>,
    job_timeout: Option<Duration>,
    cancel: CancellationToken,
) {
    loop {
        let next = {
            let mut rx = jobs.lock().await;
            rx.recv().await
        };
        let Some(job) = next else {
            break;
        };

        // After cancellation keep draining so every job still gets a result.
        let outcome = if cancel.is_cancelled() {
            Outcome::Failed(BackupError::Cancelled.to_string())
        } else {
            run_job(handler.as_ref(), &job, job_timeout, &cancel).await
        };

        if let Outcome::Failed(reason) = &outcome {
            debug!("Worker {} failed {}: {}", id, job.label(), reason);
        }

        if results.send(JobResult { job, outcome }).await.is_err() {
            debug!("Worker {}: result stream closed", id);
        }
    }
    debug!("Worker {} finished", id);
}

async fn run_job<H: JobHandler>(
    handler: &H,
    job: &H::Job,
    job_timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Outcome {
    let attempt = AssertUnwindSafe(handler.handle(job)).catch_unwind();

    let bounded = async {
        match job_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Ok(Err(BackupError::Timeout {
                    path: job.label().to_string(),
                    secs: limit.as_secs(),
                })),
            },
            None => attempt.await,
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => Outcome::Failed(BackupError::Cancelled.to_string()),
        result = bounded => match result {
            Ok(Ok(())) => Outcome::Completed,
            Ok(Err(e)) => Outcome::Failed(e.to_string()),
            Err(_) => Outcome::Failed(format!("worker panicked while handling {}", job.label())),
        },
    }
}

/// Backup pool: consults the dedup registry before queueing.
pub struct TransferPool<H: JobHandler<Job = TransferJob>> {
    pool: WorkerPool<H>,
    registry: Option<Arc<DedupRegistry>>,
}

impl<H: JobHandler<Job = TransferJob>> TransferPool<H> {
    pub fn start(
        handler: Arc<H>,
        registry: Option<Arc<DedupRegistry>>,
        options: PoolOptions,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<JobResult<TransferJob>>) {
        let (pool, results) = WorkerPool::start(handler, options, cancel);
        (Self { pool, registry }, results)
    }

    /// Queue a transfer, or answer it as skipped straight away when the
    /// registry already knows the file. Skips never occupy a worker.
    pub async fn submit(&self, job: TransferJob) {
        let known = self
            .registry
            .as_ref()
            .is_some_and(|registry| registry.contains(&job.dedup_key()));

        if known {
            self.pool.emit(job, Outcome::Skipped).await;
        } else {
            self.pool.submit(job).await;
        }
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Restore pool: jobs come straight from the manifest, nothing is skipped.
pub type RestorePool<H> = WorkerPool<H>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::DedupKey;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockProcessor {
        processed: AtomicUsize,
        failures: HashSet<String>,
        delay: Duration,
        panic_on: Option<String>,
    }

    impl MockProcessor {
        fn new(delay: Duration) -> Self {
            Self {
                processed: AtomicUsize::new(0),
                failures: HashSet::new(),
                delay,
                panic_on: None,
            }
        }

        fn failing(mut self, paths: &[&str]) -> Self {
            self.failures = paths.iter().map(|p| p.to_string()).collect();
            self
        }
    }

    impl JobHandler for MockProcessor {
        type Job = TransferJob;

        async fn handle(&self, job: &TransferJob) -> crate::Result<()> {
            tokio::time::sleep(self.delay).await;

            if self.panic_on.as_deref() == Some(job.source_path.as_str()) {
                panic!("simulated panic");
            }
            if self.failures.contains(&job.source_path) {
                return Err(BackupError::Transfer {
                    path: job.source_path.clone(),
                    reason: "simulated failure".to_string(),
                });
            }

            self.processed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn job(path: &str, size: u64) -> TransferJob {
        TransferJob {
            source_path: path.to_string(),
            dest_path: PathBuf::from("/tmp/backup"),
            size,
            timestamp: String::new(),
        }
    }

    fn options(workers: usize, capacity: usize) -> PoolOptions {
        PoolOptions {
            workers,
            queue_capacity: capacity,
            result_capacity: capacity,
            job_timeout: None,
        }
    }

    /// Feed `jobs` from a separate task and collect every result.
    async fn run_all<H: JobHandler<Job = TransferJob>>(
        pool: TransferPool<H>,
        mut results: mpsc::Receiver<JobResult<TransferJob>>,
        jobs: Vec<TransferJob>,
    ) -> Vec<JobResult<TransferJob>> {
        let producer = tokio::spawn(async move {
            for job in jobs {
                pool.submit(job).await;
            }
            pool.close().await;
        });

        let mut collected = Vec::new();
        while let Some(result) = results.recv().await {
            collected.push(result);
        }
        producer.await.unwrap();
        collected
    }

    #[tokio::test]
    async fn test_pool_isolates_failures() {
        let processor = Arc::new(
            MockProcessor::new(Duration::from_millis(10))
                .failing(&["/data/fail1", "/data/fail2", "/data/fail3"]),
        );
        let (pool, results) = TransferPool::start(
            Arc::clone(&processor),
            None,
            options(5, 100),
            CancellationToken::new(),
        );

        let jobs = (0..20)
            .map(|i| match i {
                0 => job("/data/fail1", 1),
                1 => job("/data/fail2", 1),
                2 => job("/data/fail3", 1),
                _ => job(&format!("/data/file{}", i), 1),
            })
            .collect();

        let results = run_all(pool, results, jobs).await;

        let failed = results.iter().filter(|r| r.error().is_some()).count();
        let completed = results
            .iter()
            .filter(|r| r.outcome == Outcome::Completed)
            .count();
        assert_eq!(results.len(), 20);
        assert_eq!(failed, 3);
        assert_eq!(completed, 17);
        assert_eq!(processor.processed.load(Ordering::SeqCst), 17);

        let unique: HashSet<&str> = results.iter().map(|r| r.job.source_path.as_str()).collect();
        assert_eq!(unique.len(), 20);
    }

    #[tokio::test]
    async fn test_backpressure_with_small_queues() {
        let processor = Arc::new(MockProcessor::new(Duration::from_millis(1)));
        let (pool, results) = TransferPool::start(
            Arc::clone(&processor),
            None,
            options(3, 2),
            CancellationToken::new(),
        );

        let jobs = (0..50).map(|i| job(&format!("/data/{}", i), i)).collect();
        let results = run_all(pool, results, jobs).await;

        assert_eq!(results.len(), 50);
        assert_eq!(processor.processed.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn test_registry_hits_are_skipped_without_a_worker() {
        let registry = Arc::new(DedupRegistry::new());
        registry.insert(DedupKey::new("known.jpg", 10));

        let processor = Arc::new(MockProcessor::new(Duration::from_millis(1)));
        let (pool, results) = TransferPool::start(
            Arc::clone(&processor),
            Some(registry),
            options(2, 10),
            CancellationToken::new(),
        );

        let jobs = vec![
            job("/sdcard/DCIM/known.jpg", 10),
            job("/sdcard/Other/known.jpg", 10),
            job("/sdcard/DCIM/known.jpg", 11),
            job("/sdcard/DCIM/new.jpg", 10),
        ];
        let results = run_all(pool, results, jobs).await;

        assert_eq!(results.len(), 4);
        assert_eq!(results.iter().filter(|r| r.is_skipped()).count(), 2);
        assert_eq!(processor.processed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancellation_still_answers_every_job() {
        let processor = Arc::new(MockProcessor::new(Duration::from_millis(20)));
        let cancel = CancellationToken::new();
        let (pool, mut results) =
            TransferPool::start(Arc::clone(&processor), None, options(2, 100), cancel.clone());

        for i in 0..30 {
            pool.submit(job(&format!("/data/{}", i), 1)).await;
        }
        cancel.cancel();
        let closer = tokio::spawn(pool.close());

        let mut count = 0;
        let mut cancelled = 0;
        while let Some(result) = results.recv().await {
            count += 1;
            if result.error() == Some("Cancelled") {
                cancelled += 1;
            }
        }
        closer.await.unwrap();

        assert_eq!(count, 30);
        assert!(cancelled >= 28);
        assert!(processor.processed.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_job_timeout() {
        let processor = Arc::new(MockProcessor::new(Duration::from_secs(5)));
        let mut opts = options(1, 4);
        opts.job_timeout = Some(Duration::from_millis(20));
        let (pool, results) =
            TransferPool::start(Arc::clone(&processor), None, opts, CancellationToken::new());

        let results = run_all(pool, results, vec![job("/data/slow.mp4", 1)]).await;

        assert_eq!(results.len(), 1);
        assert!(results[0].error().unwrap().contains("Timed out"));
        assert_eq!(processor.processed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_job_is_isolated() {
        let mut processor = MockProcessor::new(Duration::from_millis(1));
        processor.panic_on = Some("/data/bad".to_string());
        let processor = Arc::new(processor);
        let (pool, results) = TransferPool::start(
            Arc::clone(&processor),
            None,
            options(1, 4),
            CancellationToken::new(),
        );

        let jobs = vec![job("/data/a", 1), job("/data/bad", 1), job("/data/b", 1)];
        let results = run_all(pool, results, jobs).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|r| r.error().is_some()).count(), 1);
        assert_eq!(processor.processed.load(Ordering::SeqCst), 2);
    }
}
