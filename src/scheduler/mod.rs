//! Non-preemptive, priority-ordered job admission scheduler.
//!
//! Submitted jobs wait in a priority heap (priority descending, submission
//! order ascending within a tier) and a fixed number of job slots bounds how
//! many run at once. When a running job terminates the next eligible job is
//! admitted. Retryable processor errors re-run the job after a backoff delay
//! within its single `Running` lifetime; the job never re-enters the heap.

/// Job types and the processor plug point.
pub mod job;
/// Retry decisions for transient failures.
pub mod retry;
/// Bounded document slot pool.
pub mod slots;

pub use job::{JobDescriptor, JobPriority, JobProcessor, JobSnapshot, JobStatus, SchedulerError};
pub use retry::{RetryDecision, RetryPolicy, Retryable};
pub use slots::{SlotError, SlotGuard, SlotPool};

use crate::metrics::IngestMetrics;
use crate::pipeline::batch::{BatchRunError, FileResult, FileSpec, PipelineContext};
use crate::progress::TrackerRegistry;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock};
use time::{Duration as TimeDuration, OffsetDateTime};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Tunables for the scheduler, derived from configuration.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Jobs allowed in the running state at once.
    pub max_concurrent_jobs: usize,
    /// Pending jobs accepted before submissions are rejected.
    pub max_queue_depth: usize,
    /// Policy applied to retryable processor errors.
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            max_queue_depth: 256,
            retry: RetryPolicy::default(),
        }
    }
}

struct JobRecord {
    job_type: String,
    owner_id: String,
    priority: JobPriority,
    files: Arc<Vec<FileSpec>>,
    processor: Arc<dyn JobProcessor>,
    status: JobStatus,
    attempts: u32,
    created_at: OffsetDateTime,
    started_at: Option<OffsetDateTime>,
    completed_at: Option<OffsetDateTime>,
    results: Vec<FileResult>,
    errors: Vec<String>,
    cancel: CancellationToken,
    tracker_id: Uuid,
}

/// Heap entry ordering admission: priority descending, then submission order.
struct PendingEntry {
    priority: JobPriority,
    seq: u64,
    id: Uuid,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for PendingEntry {}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: higher priority first, then earlier submission
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct DispatchState {
    pending: BinaryHeap<PendingEntry>,
    running: usize,
}

struct Inner {
    config: SchedulerConfig,
    jobs: RwLock<HashMap<Uuid, JobRecord>>,
    dispatch: Mutex<DispatchState>,
    trackers: Arc<TrackerRegistry>,
    slots: SlotPool,
    metrics: Arc<IngestMetrics>,
    seq: AtomicU64,
}

/// Priority-ordered job scheduler with a bounded running set.
///
/// Cheap to clone; all clones share the same state. Construct once near
/// process start.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Build a scheduler over the shared tracker registry, slot pool, and
    /// metrics.
    pub fn new(
        config: SchedulerConfig,
        slots: SlotPool,
        trackers: Arc<TrackerRegistry>,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                jobs: RwLock::new(HashMap::new()),
                dispatch: Mutex::new(DispatchState {
                    pending: BinaryHeap::new(),
                    running: 0,
                }),
                trackers,
                slots,
                metrics,
                seq: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueue a job. Non-blocking: returns as soon as the job is recorded
    /// in `Queued` state, or rejects with backpressure when the pending
    /// queue is full.
    pub fn submit(
        &self,
        descriptor: JobDescriptor,
        processor: Arc<dyn JobProcessor>,
    ) -> Result<Uuid, SchedulerError> {
        let id = Uuid::new_v4();
        let priority = descriptor.priority;
        let seq = self.inner.seq.fetch_add(1, AtomicOrdering::Relaxed);

        {
            let mut dispatch = self.lock_dispatch();
            if dispatch.pending.len() >= self.inner.config.max_queue_depth {
                return Err(SchedulerError::QueueFull {
                    depth: dispatch.pending.len(),
                });
            }

            let tracker_id = self.inner.trackers.create(&descriptor.owner_id);
            let record = JobRecord {
                job_type: descriptor.job_type,
                owner_id: descriptor.owner_id,
                priority,
                files: Arc::new(descriptor.files),
                processor,
                status: JobStatus::Queued,
                attempts: 0,
                created_at: OffsetDateTime::now_utc(),
                started_at: None,
                completed_at: None,
                results: Vec::new(),
                errors: Vec::new(),
                cancel: CancellationToken::new(),
                tracker_id,
            };
            self.write_jobs().insert(id, record);
            dispatch.pending.push(PendingEntry {
                priority,
                seq,
                id,
            });
        }

        self.inner.metrics.record_submission();
        tracing::info!(job = %id, priority = ?priority, "Job queued");
        self.dispatch_ready();
        Ok(id)
    }

    /// Snapshot a job's current state.
    pub fn status(&self, id: Uuid) -> Result<JobSnapshot, SchedulerError> {
        let jobs = self.read_jobs();
        let record = jobs.get(&id).ok_or(SchedulerError::NotFound(id))?;

        let (progress_percent, current_step) = match self.inner.trackers.snapshot(record.tracker_id)
        {
            Ok(tracker) => (tracker.percent, tracker.stage),
            Err(_) => {
                let percent = if record.status == JobStatus::Completed {
                    100
                } else {
                    0
                };
                (percent, format!("{:?}", record.status).to_lowercase())
            }
        };

        Ok(JobSnapshot {
            id,
            job_type: record.job_type.clone(),
            owner_id: record.owner_id.clone(),
            priority: record.priority,
            status: record.status,
            progress_percent,
            current_step,
            attempts: record.attempts,
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            results: record.results.clone(),
            errors: record.errors.clone(),
            tracker_id: record.tracker_id,
            is_complete: record.status.is_terminal(),
        })
    }

    /// Request cooperative cancellation.
    ///
    /// The flag is observed by the processor between stages; a still-queued
    /// job is marked cancelled at admission time without running. Idempotent
    /// for terminal jobs.
    pub fn cancel(&self, id: Uuid) -> Result<(), SchedulerError> {
        let jobs = self.read_jobs();
        let record = jobs.get(&id).ok_or(SchedulerError::NotFound(id))?;
        record.cancel.cancel();
        tracing::info!(job = %id, status = ?record.status, "Cancellation requested");
        Ok(())
    }

    /// Remove terminal jobs (and their trackers) older than the retention
    /// window. Returns the number of jobs purged.
    pub fn purge_expired(&self, retention: std::time::Duration) -> usize {
        let cutoff = OffsetDateTime::now_utc()
            - TimeDuration::try_from(retention).unwrap_or(TimeDuration::ZERO);
        let mut purged_trackers = Vec::new();
        let purged = {
            let mut jobs = self.write_jobs();
            let before = jobs.len();
            jobs.retain(|_, record| {
                let expired = record.status.is_terminal()
                    && record.completed_at.is_some_and(|at| at <= cutoff);
                if expired {
                    purged_trackers.push(record.tracker_id);
                }
                !expired
            });
            before - jobs.len()
        };
        for tracker_id in purged_trackers {
            self.inner.trackers.remove(tracker_id);
        }
        if purged > 0 {
            tracing::debug!(purged, "Purged expired jobs");
        }
        purged
    }

    /// Jobs currently in the running state.
    pub fn running_count(&self) -> usize {
        self.lock_dispatch().running
    }

    /// Jobs currently waiting in the priority queue.
    pub fn pending_count(&self) -> usize {
        self.lock_dispatch().pending.len()
    }

    /// Admit pending jobs while job slots are free.
    fn dispatch_ready(&self) {
        loop {
            let admitted = {
                let mut dispatch = self.lock_dispatch();
                if dispatch.running >= self.inner.config.max_concurrent_jobs {
                    return;
                }
                let Some(entry) = dispatch.pending.pop() else {
                    return;
                };

                let mut jobs = self.write_jobs();
                let Some(record) = jobs.get_mut(&entry.id) else {
                    continue;
                };
                if record.cancel.is_cancelled() {
                    // cancelled while queued: terminal without running
                    record.status = JobStatus::Cancelled;
                    record.completed_at = Some(OffsetDateTime::now_utc());
                    self.inner.metrics.record_cancellation();
                    tracing::info!(job = %entry.id, "Queued job cancelled before admission");
                    continue;
                }

                record.status = JobStatus::Running;
                record.started_at = Some(OffsetDateTime::now_utc());
                dispatch.running += 1;
                entry.id
            };

            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.run_job(admitted).await;
            });
        }
    }

    /// Drive one admitted job to a terminal state, then admit the next.
    async fn run_job(&self, id: Uuid) {
        let (files, processor, ctx) = {
            let jobs = self.read_jobs();
            let Some(record) = jobs.get(&id) else {
                tracing::warn!(job = %id, "Admitted job disappeared before start");
                let mut dispatch = self.lock_dispatch();
                dispatch.running -= 1;
                return;
            };
            (
                record.files.clone(),
                record.processor.clone(),
                PipelineContext {
                    owner_id: record.owner_id.clone(),
                    cancel: record.cancel.clone(),
                    trackers: self.inner.trackers.clone(),
                    tracker_id: record.tracker_id,
                    slots: self.inner.slots.clone(),
                },
            )
        };

        loop {
            let attempts = {
                let mut jobs = self.write_jobs();
                let record = jobs.get_mut(&id).expect("running job present");
                record.attempts += 1;
                record.attempts
            };

            match processor.run(&files, &ctx).await {
                Ok(outcome) => {
                    let (succeeded, failed) = (outcome.succeeded() as u64, outcome.failed() as u64);
                    {
                        let mut jobs = self.write_jobs();
                        let record = jobs.get_mut(&id).expect("running job present");
                        record.errors.extend(
                            outcome
                                .errors
                                .iter()
                                .map(|error| format!("{}: {}", error.file_name, error.message)),
                        );
                        record.results = outcome.results;
                        record.status = JobStatus::Completed;
                        record.completed_at = Some(OffsetDateTime::now_utc());
                    }
                    self.inner.metrics.record_completion();
                    self.inner.metrics.record_batch(succeeded, failed);
                    tracing::info!(job = %id, succeeded, failed, attempts, "Job completed");
                    break;
                }
                Err(BatchRunError::Cancelled { partial }) => {
                    let (succeeded, failed) = (partial.succeeded() as u64, partial.failed() as u64);
                    {
                        let mut jobs = self.write_jobs();
                        let record = jobs.get_mut(&id).expect("running job present");
                        record.errors.extend(
                            partial
                                .errors
                                .iter()
                                .map(|error| format!("{}: {}", error.file_name, error.message)),
                        );
                        // files finished before the checkpoint stay queryable
                        record.results = partial.results;
                        record.status = JobStatus::Cancelled;
                        record.completed_at = Some(OffsetDateTime::now_utc());
                    }
                    self.inner.metrics.record_cancellation();
                    self.inner.metrics.record_batch(succeeded, failed);
                    tracing::info!(job = %id, succeeded, attempts, "Job cancelled");
                    break;
                }
                Err(error) => match self.inner.config.retry.decide(&error, attempts) {
                    RetryDecision::Retry(delay) => {
                        {
                            let mut jobs = self.write_jobs();
                            let record = jobs.get_mut(&id).expect("running job present");
                            record.errors.push(error.to_string());
                        }
                        self.inner.metrics.record_retry();
                        tracing::warn!(
                            job = %id,
                            attempts,
                            delay_ms = delay.as_millis() as u64,
                            %error,
                            "Job failed with retryable error; backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::GiveUp => {
                        {
                            let mut jobs = self.write_jobs();
                            let record = jobs.get_mut(&id).expect("running job present");
                            record.errors.push(error.to_string());
                            record.status = JobStatus::Failed;
                            record.completed_at = Some(OffsetDateTime::now_utc());
                        }
                        self.inner.metrics.record_failure();
                        tracing::error!(job = %id, attempts, %error, "Job failed");
                        break;
                    }
                },
            }
        }

        {
            let mut dispatch = self.lock_dispatch();
            dispatch.running -= 1;
        }
        self.dispatch_ready();
    }

    fn lock_dispatch(&self) -> std::sync::MutexGuard<'_, DispatchState> {
        self.inner
            .dispatch
            .lock()
            .expect("scheduler dispatch lock poisoned")
    }

    fn read_jobs(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, JobRecord>> {
        self.inner.jobs.read().expect("scheduler jobs lock poisoned")
    }

    fn write_jobs(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, JobRecord>> {
        self.inner
            .jobs
            .write()
            .expect("scheduler jobs lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::batch::BatchOutcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn scheduler(config: SchedulerConfig) -> Scheduler {
        Scheduler::new(
            config,
            SlotPool::new(8),
            Arc::new(TrackerRegistry::new()),
            Arc::new(IngestMetrics::new()),
        )
    }

    fn descriptor(priority: JobPriority) -> JobDescriptor {
        JobDescriptor {
            job_type: "batch-ingest".to_string(),
            owner_id: "owner-1".to_string(),
            priority,
            files: vec![FileSpec {
                file_name: "a.txt".to_string(),
                path: "/uploads/a.txt".to_string(),
            }],
        }
    }

    async fn wait_terminal(scheduler: &Scheduler, id: Uuid) -> JobSnapshot {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snapshot = scheduler.status(id).expect("job present");
                if snapshot.is_complete {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job reached a terminal state")
    }

    async fn wait_running(scheduler: &Scheduler, id: Uuid) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if scheduler.status(id).expect("job present").status == JobStatus::Running {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job admitted");
    }

    /// Records admission order and blocks until the gate hands out permits.
    struct GatedProcessor {
        name: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl JobProcessor for GatedProcessor {
        async fn run(
            &self,
            _files: &[FileSpec],
            _ctx: &PipelineContext,
        ) -> Result<BatchOutcome, BatchRunError> {
            self.order
                .lock()
                .expect("order lock poisoned")
                .push(self.name);
            let _permit = self.gate.acquire().await.expect("gate open");
            Ok(BatchOutcome::default())
        }
    }

    #[tokio::test]
    async fn high_priority_is_admitted_before_earlier_low_priority() {
        let scheduler = scheduler(SchedulerConfig {
            max_concurrent_jobs: 1,
            ..SchedulerConfig::default()
        });
        let order = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Semaphore::new(0));

        let submit = |name, priority| {
            scheduler
                .submit(
                    descriptor(priority),
                    Arc::new(GatedProcessor {
                        name,
                        order: order.clone(),
                        gate: gate.clone(),
                    }),
                )
                .expect("submit")
        };

        let a = submit("a", JobPriority::Low);
        wait_running(&scheduler, a).await;
        let b = submit("b", JobPriority::High);
        let c = submit("c", JobPriority::Low);

        gate.add_permits(3);
        wait_terminal(&scheduler, a).await;
        wait_terminal(&scheduler, b).await;
        wait_terminal(&scheduler, c).await;

        let order = order.lock().expect("order lock poisoned").clone();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn fifo_within_a_priority_tier() {
        let scheduler = scheduler(SchedulerConfig {
            max_concurrent_jobs: 1,
            ..SchedulerConfig::default()
        });
        let order = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Semaphore::new(0));

        let mut ids = Vec::new();
        for name in ["first", "second", "third"] {
            ids.push(
                scheduler
                    .submit(
                        descriptor(JobPriority::Normal),
                        Arc::new(GatedProcessor {
                            name,
                            order: order.clone(),
                            gate: gate.clone(),
                        }),
                    )
                    .expect("submit"),
            );
        }
        gate.add_permits(3);
        for id in ids {
            wait_terminal(&scheduler, id).await;
        }

        let order = order.lock().expect("order lock poisoned").clone();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn running_jobs_never_exceed_the_concurrency_bound() {
        struct CountingProcessor {
            in_flight: Arc<AtomicUsize>,
            observed_max: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl JobProcessor for CountingProcessor {
            async fn run(
                &self,
                _files: &[FileSpec],
                _ctx: &PipelineContext,
            ) -> Result<BatchOutcome, BatchRunError> {
                let now = self.in_flight.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                self.observed_max.fetch_max(now, AtomicOrdering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.in_flight.fetch_sub(1, AtomicOrdering::SeqCst);
                Ok(BatchOutcome::default())
            }
        }

        let scheduler = scheduler(SchedulerConfig {
            max_concurrent_jobs: 2,
            ..SchedulerConfig::default()
        });
        let in_flight = Arc::new(AtomicUsize::new(0));
        let observed_max = Arc::new(AtomicUsize::new(0));

        let ids: Vec<Uuid> = (0..6)
            .map(|_| {
                scheduler
                    .submit(
                        descriptor(JobPriority::Normal),
                        Arc::new(CountingProcessor {
                            in_flight: in_flight.clone(),
                            observed_max: observed_max.clone(),
                        }),
                    )
                    .expect("submit")
            })
            .collect();
        for id in ids {
            wait_terminal(&scheduler, id).await;
        }

        assert!(observed_max.load(AtomicOrdering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn retry_ceiling_marks_the_job_failed() {
        struct AlwaysTransient;

        #[async_trait]
        impl JobProcessor for AlwaysTransient {
            async fn run(
                &self,
                _files: &[FileSpec],
                _ctx: &PipelineContext,
            ) -> Result<BatchOutcome, BatchRunError> {
                Err(BatchRunError::Embedding("backend flapping".to_string()))
            }
        }

        let metrics = Arc::new(IngestMetrics::new());
        let scheduler = Scheduler::new(
            SchedulerConfig {
                max_concurrent_jobs: 1,
                max_queue_depth: 16,
                retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)),
            },
            SlotPool::new(2),
            Arc::new(TrackerRegistry::new()),
            metrics.clone(),
        );

        let id = scheduler
            .submit(descriptor(JobPriority::Normal), Arc::new(AlwaysTransient))
            .expect("submit");
        let snapshot = wait_terminal(&scheduler, id).await;

        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.attempts, 3);
        assert!(!snapshot.errors.is_empty());
        assert_eq!(metrics.snapshot().retries, 2);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_without_retry() {
        struct FatalProcessor;

        #[async_trait]
        impl JobProcessor for FatalProcessor {
            async fn run(
                &self,
                _files: &[FileSpec],
                _ctx: &PipelineContext,
            ) -> Result<BatchOutcome, BatchRunError> {
                Err(BatchRunError::Fatal("payload rejected".to_string()))
            }
        }

        let scheduler = scheduler(SchedulerConfig::default());
        let id = scheduler
            .submit(descriptor(JobPriority::Normal), Arc::new(FatalProcessor))
            .expect("submit");
        let snapshot = wait_terminal(&scheduler, id).await;
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.attempts, 1);
    }

    #[tokio::test]
    async fn queue_full_rejects_with_backpressure() {
        let scheduler = scheduler(SchedulerConfig {
            max_concurrent_jobs: 1,
            max_queue_depth: 1,
            ..SchedulerConfig::default()
        });
        let order = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Semaphore::new(0));

        let blocker = scheduler
            .submit(
                descriptor(JobPriority::Normal),
                Arc::new(GatedProcessor {
                    name: "blocker",
                    order: order.clone(),
                    gate: gate.clone(),
                }),
            )
            .expect("submit blocker");
        wait_running(&scheduler, blocker).await;

        let _queued = scheduler
            .submit(
                descriptor(JobPriority::Normal),
                Arc::new(GatedProcessor {
                    name: "queued",
                    order: order.clone(),
                    gate: gate.clone(),
                }),
            )
            .expect("one pending job fits");

        let rejected = scheduler.submit(
            descriptor(JobPriority::Normal),
            Arc::new(GatedProcessor {
                name: "rejected",
                order: order.clone(),
                gate: gate.clone(),
            }),
        );
        assert!(matches!(
            rejected,
            Err(SchedulerError::QueueFull { depth: 1 })
        ));

        gate.add_permits(2);
    }

    #[tokio::test]
    async fn cancelling_a_queued_job_skips_execution() {
        struct MustNotRun {
            ran: Arc<AtomicBool>,
        }

        #[async_trait]
        impl JobProcessor for MustNotRun {
            async fn run(
                &self,
                _files: &[FileSpec],
                _ctx: &PipelineContext,
            ) -> Result<BatchOutcome, BatchRunError> {
                self.ran.store(true, AtomicOrdering::SeqCst);
                Ok(BatchOutcome::default())
            }
        }

        let scheduler = scheduler(SchedulerConfig {
            max_concurrent_jobs: 1,
            ..SchedulerConfig::default()
        });
        let order = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Semaphore::new(0));

        let blocker = scheduler
            .submit(
                descriptor(JobPriority::Normal),
                Arc::new(GatedProcessor {
                    name: "blocker",
                    order,
                    gate: gate.clone(),
                }),
            )
            .expect("submit blocker");
        wait_running(&scheduler, blocker).await;

        let ran = Arc::new(AtomicBool::new(false));
        let victim = scheduler
            .submit(
                descriptor(JobPriority::Normal),
                Arc::new(MustNotRun { ran: ran.clone() }),
            )
            .expect("submit victim");
        scheduler.cancel(victim).expect("cancel");

        gate.add_permits(1);
        let snapshot = wait_terminal(&scheduler, victim).await;
        assert_eq!(snapshot.status, JobStatus::Cancelled);
        assert!(!ran.load(AtomicOrdering::SeqCst));
        assert!(snapshot.started_at.is_none());
    }

    #[tokio::test]
    async fn cancelled_job_keeps_partial_results() {
        /// Finishes one file, then parks until cancellation is requested.
        struct OneFileThenCancel;

        #[async_trait]
        impl JobProcessor for OneFileThenCancel {
            async fn run(
                &self,
                files: &[FileSpec],
                ctx: &PipelineContext,
            ) -> Result<BatchOutcome, BatchRunError> {
                let mut partial = BatchOutcome::default();
                partial.results.push(FileResult {
                    file_name: files[0].file_name.clone(),
                    succeeded: true,
                    chunk_count: 2,
                    extraction_ms: Some(1),
                    error: None,
                });
                ctx.cancel.cancelled().await;
                Err(BatchRunError::Cancelled { partial })
            }
        }

        let metrics = Arc::new(IngestMetrics::new());
        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            SlotPool::new(2),
            Arc::new(TrackerRegistry::new()),
            metrics.clone(),
        );
        let id = scheduler
            .submit(descriptor(JobPriority::Normal), Arc::new(OneFileThenCancel))
            .expect("submit");
        wait_running(&scheduler, id).await;
        scheduler.cancel(id).expect("cancel");

        let snapshot = wait_terminal(&scheduler, id).await;
        assert_eq!(snapshot.status, JobStatus::Cancelled);
        assert_eq!(snapshot.results.len(), 1);
        assert!(snapshot.results[0].succeeded);
        assert_eq!(metrics.snapshot().files_processed, 1);
    }

    #[tokio::test]
    async fn unknown_job_reports_not_found() {
        let scheduler = scheduler(SchedulerConfig::default());
        let missing = Uuid::new_v4();
        assert!(matches!(
            scheduler.status(missing),
            Err(SchedulerError::NotFound(_))
        ));
        assert!(matches!(
            scheduler.cancel(missing),
            Err(SchedulerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn purge_forgets_terminal_jobs() {
        struct Immediate;

        #[async_trait]
        impl JobProcessor for Immediate {
            async fn run(
                &self,
                _files: &[FileSpec],
                _ctx: &PipelineContext,
            ) -> Result<BatchOutcome, BatchRunError> {
                Ok(BatchOutcome::default())
            }
        }

        let scheduler = scheduler(SchedulerConfig::default());
        let id = scheduler
            .submit(descriptor(JobPriority::Normal), Arc::new(Immediate))
            .expect("submit");
        wait_terminal(&scheduler, id).await;

        let purged = scheduler.purge_expired(Duration::ZERO);
        assert_eq!(purged, 1);
        assert!(matches!(
            scheduler.status(id),
            Err(SchedulerError::NotFound(_))
        ));
    }
}
