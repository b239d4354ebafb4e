//! Job runner: bounded-concurrency FIFO queue with flat-delay retry.
//!
//! Jobs are zero-argument async closures. At most `concurrency` jobs run at
//! once; the rest wait in FIFO order. A job that fails (returns an error or
//! panics) is put back on the queue after `retry_delay`. Without a
//! `max_attempts` limit a job is retried forever; with one, it is handed to the
//! dead-letter hook after its last attempt.
//!
//! The runner is an explicit handle: construct it once at startup and clone it
//! into whatever needs to enqueue work. All methods that start jobs must be
//! called from inside a tokio runtime.

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::Notify;

/// Default number of jobs allowed in flight.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Default pause between a failure and the retry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(2000);

/// How often `drain` re-checks for quiescence.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Boxed future returned by a job invocation.
pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Called once for a job that exhausted `max_attempts`: label, attempts, last error.
pub type DeadLetterHook = Arc<dyn Fn(&str, u32, &anyhow::Error) + Send + Sync>;

/// Runner tuning knobs.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum number of jobs in flight (clamped to at least 1).
    pub concurrency: usize,
    /// Flat delay before a failed job is re-queued.
    pub retry_delay: Duration,
    /// Attempts before a job is dead-lettered. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_attempts: None,
        }
    }
}

/// Point-in-time view of the runner's bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunnerStats {
    pub queued: usize,
    pub in_flight: usize,
    /// Failed jobs sitting out their retry delay.
    pub retrying: usize,
}

impl RunnerStats {
    pub fn is_idle(&self) -> bool {
        self.queued == 0 && self.in_flight == 0 && self.retrying == 0
    }
}

struct Job {
    label: String,
    attempts: u32,
    task: JobFn,
}

#[derive(Default)]
struct RunnerState {
    queue: VecDeque<Job>,
    in_flight: usize,
    retrying: usize,
    /// Whether a coordinator task is currently alive.
    coordinating: bool,
}

struct Inner {
    config: RunnerConfig,
    state: Mutex<RunnerState>,
    wake: Notify,
    dead_letter: Option<DeadLetterHook>,
}

/// Handle to the process-wide job runner. Cloning shares the same queue.
///
/// Every job body is polled by a single coordinator task, so jobs start in
/// exactly the order they leave the queue, whatever the runtime flavor.
#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<Inner>,
}

impl JobRunner {
    pub fn new(mut config: RunnerConfig) -> Self {
        config.concurrency = config.concurrency.max(1);
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(RunnerState::default()),
                wake: Notify::new(),
                dead_letter: None,
            }),
        }
    }

    /// Install a hook for jobs dropped after `max_attempts` failures.
    ///
    /// Must be called before the handle is cloned.
    pub fn with_dead_letter(self, hook: DeadLetterHook) -> Self {
        let inner = match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(shared) => {
                tracing::warn!("Dead-letter hook ignored: runner handle already shared");
                return Self { inner: shared };
            }
        };
        Self {
            inner: Arc::new(Inner {
                dead_letter: Some(hook),
                ..inner
            }),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    /// Queue a job and return immediately.
    ///
    /// `task` may be invoked several times if it fails, so it must be `Fn`.
    /// Errors and panics inside the job never reach the caller.
    pub fn enqueue<F, Fut>(&self, label: impl Into<String>, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let task: JobFn = Arc::new(move || Box::pin(task()) as JobFuture);
        let job = Job {
            label: label.into(),
            attempts: 0,
            task,
        };
        tracing::debug!(job = %job.label, "Job enqueued");
        self.submit(job, false);
    }

    pub fn stats(&self) -> RunnerStats {
        let state = self.state();
        RunnerStats {
            queued: state.queue.len(),
            in_flight: state.in_flight,
            retrying: state.retrying,
        }
    }

    /// Wait until nothing is queued, running, or waiting to be retried.
    ///
    /// Resolves immediately when the runner is already idle. With unlimited
    /// retries a permanently failing job keeps this pending, so callers should
    /// bound it with a timeout during shutdown.
    pub async fn drain(&self) {
        loop {
            if self.stats().is_idle() {
                return;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    fn state(&self) -> MutexGuard<'_, RunnerState> {
        // Nothing panics while holding the lock, so a poisoned guard is still consistent.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append to the tail and make sure a coordinator will pick it up.
    fn submit(&self, job: Job, retried: bool) {
        let start = {
            let mut state = self.state();
            if retried {
                state.retrying -= 1;
            }
            state.queue.push_back(job);
            !std::mem::replace(&mut state.coordinating, true)
        };

        if start {
            let runner = self.clone();
            tokio::spawn(async move { runner.coordinate().await });
        } else {
            self.inner.wake.notify_one();
        }
    }

    /// Start queued jobs up to the concurrency ceiling and keep refilling
    /// free slots until the queue and the running set are both empty.
    async fn coordinate(self) {
        let mut running = FuturesUnordered::new();

        loop {
            {
                let mut state = self.state();
                while running.len() < self.inner.config.concurrency {
                    let Some(job) = state.queue.pop_front() else {
                        break;
                    };
                    state.in_flight += 1;
                    running.push(self.clone().run(job));
                }
                if running.is_empty() {
                    // Decided under the lock, so a concurrent submit starts a fresh coordinator.
                    state.coordinating = false;
                    return;
                }
            }

            tokio::select! {
                Some(()) = running.next() => {
                    // Let other tasks run before refilling the free slot.
                    tokio::task::yield_now().await;
                }
                _ = self.inner.wake.notified() => {}
            }
        }
    }

    async fn run(self, mut job: Job) {
        job.attempts += 1;

        let outcome = match AssertUnwindSafe((job.task)()).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!("job panicked: {}", panic_message(&*panic))),
        };

        match outcome {
            Ok(()) => {
                tracing::debug!(job = %job.label, attempts = job.attempts, "Job completed");
            }
            Err(error) => self.handle_failure(job, error),
        }

        self.state().in_flight -= 1;
    }

    fn handle_failure(&self, job: Job, error: anyhow::Error) {
        if let Some(max_attempts) = self.inner.config.max_attempts {
            if job.attempts >= max_attempts {
                tracing::error!(
                    job = %job.label,
                    attempts = job.attempts,
                    error = %format!("{error:#}"),
                    "Job exhausted its attempts, dead-lettering"
                );
                if let Some(hook) = &self.inner.dead_letter {
                    hook(&job.label, job.attempts, &error);
                }
                return;
            }
        }

        let delay = self.inner.config.retry_delay;
        tracing::warn!(
            job = %job.label,
            attempt = job.attempts,
            retry_in_ms = delay.as_millis() as u64,
            error = %format!("{error:#}"),
            "Job failed, scheduling retry"
        );

        self.state().retrying += 1;
        let runner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            runner.submit(job, true);
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_runs_jobs_in_order_under_concurrency_ceiling() {
        let runner = JobRunner::default();
        let started = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        for i in 0..10 {
            let started = started.clone();
            let running = running.clone();
            let peak = peak.clone();
            let runs = runs.clone();
            runner.enqueue(format!("job-{i}"), move || {
                let started = started.clone();
                let running = running.clone();
                let peak = peak.clone();
                let runs = runs.clone();
                async move {
                    started.lock().unwrap().push(i);
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }

        runner.drain().await;

        assert_eq!(runs.load(Ordering::SeqCst), 10);
        assert_eq!(*started.lock().unwrap(), (0..10).collect::<Vec<_>>());
        assert_eq!(peak.load(Ordering::SeqCst), DEFAULT_CONCURRENCY);
        assert!(runner.stats().is_idle());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_start_order_is_fifo_on_multi_thread_runtime() {
        for _ in 0..20 {
            let runner = JobRunner::default();
            let started = Arc::new(Mutex::new(Vec::new()));

            for i in 0..30 {
                let started = started.clone();
                runner.enqueue(format!("job-{i}"), move || {
                    let started = started.clone();
                    async move {
                        started.lock().unwrap().push(i);
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        Ok(())
                    }
                });
            }

            runner.drain().await;
            assert_eq!(*started.lock().unwrap(), (0..30).collect::<Vec<_>>());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_is_retried_after_delay() {
        let runner = JobRunner::default();
        let calls = Arc::new(Mutex::new(Vec::<Instant>::new()));

        let recorded = calls.clone();
        runner.enqueue("flaky", move || {
            let recorded = recorded.clone();
            async move {
                let attempt = {
                    let mut calls = recorded.lock().unwrap();
                    calls.push(Instant::now());
                    calls.len()
                };
                if attempt == 1 {
                    anyhow::bail!("smtp connection refused");
                }
                Ok(())
            }
        });

        runner.drain().await;

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[1] - calls[0] >= DEFAULT_RETRY_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_resolves_immediately_when_idle() {
        let runner = JobRunner::default();
        let drained = tokio::time::timeout(Duration::from_millis(1), runner.drain()).await;
        assert!(drained.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_in_flight_job() {
        let runner = JobRunner::default();
        let done = Arc::new(AtomicUsize::new(0));

        let flag = done.clone();
        runner.enqueue("slow", move || {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                flag.store(1, Ordering::SeqCst);
                Ok(())
            }
        });

        assert!(!runner.stats().is_idle());
        runner.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_job_is_contained_and_retried() {
        let runner = JobRunner::default();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        runner.enqueue("panics-once", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("template exploded");
                }
                Ok(())
            }
        });

        runner.drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_attempts_dead_letters_job() {
        let dead = Arc::new(Mutex::new(Vec::new()));
        let sink = dead.clone();
        let runner = JobRunner::new(RunnerConfig {
            max_attempts: Some(3),
            ..RunnerConfig::default()
        })
        .with_dead_letter(Arc::new(move |label, attempts, _error| {
            sink.lock().unwrap().push((label.to_string(), attempts));
        }));

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        runner.enqueue("invalid-recipient", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("mailbox does not exist"))
            }
        });

        runner.drain().await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *dead.lock().unwrap(),
            vec![("invalid-recipient".to_string(), 3)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_goes_to_back_of_queue() {
        let runner = JobRunner::new(RunnerConfig {
            concurrency: 1,
            retry_delay: Duration::from_millis(10),
            max_attempts: None,
        });
        let order = Arc::new(Mutex::new(Vec::new()));
        let failed_once = Arc::new(AtomicU32::new(0));

        let log = order.clone();
        let flag = failed_once.clone();
        runner.enqueue("a", move || {
            let log = log.clone();
            let flag = flag.clone();
            async move {
                log.lock().unwrap().push("a");
                if flag.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("first attempt fails");
                }
                Ok(())
            }
        });
        for label in ["b", "c"] {
            let log = order.clone();
            runner.enqueue(label, move || {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(label);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(())
                }
            });
        }

        runner.drain().await;
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c", "a"]);
    }
}
