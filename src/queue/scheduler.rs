//! Concurrency-bounded wave scheduler for calls to the synthesis provider
//!
//! Tasks are queued FIFO and drained in waves of at most `max_concurrent`.
//! A wave runs all of its tasks concurrently and settles only when every
//! member has produced a result or failed. The next wave starts after
//! `inter_wave_delay`. Order inside a wave is not guaranteed, order across
//! waves is.
//!
//! The pending queue and the "wave loop active" flag live behind a single
//! mutex. Submitting checks and sets the flag under that lock, and the wave
//! loop clears it under the same lock at the moment it observes an empty
//! queue, so at most one loop exists and no submission is stranded.

use futures::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::traits::GenerationRequest;
use crate::config::SchedulerSettings;
use crate::error::{AppError, Result};

/// Configuration for the wave scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of tasks executing at once, and the wave size
    pub max_concurrent: usize,
    /// Pause between the end of one wave and the start of the next
    pub inter_wave_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            inter_wave_delay: Duration::from_millis(1000),
        }
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            max_concurrent: settings.max_concurrent,
            inter_wave_delay: settings.inter_wave_delay(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Succeeded,
    Failed,
}

/// Type-erased unit of work together with its completion channel
trait Runnable: Send {
    fn run(self: Box<Self>) -> BoxFuture<'static, TaskOutcome>;

    fn reject(self: Box<Self>, error: AppError);
}

struct TypedTask<T, F> {
    task: F,
    response_tx: oneshot::Sender<Result<T>>,
}

impl<T, F, Fut> Runnable for TypedTask<T, F>
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    fn run(self: Box<Self>) -> BoxFuture<'static, TaskOutcome> {
        let TypedTask { task, response_tx } = *self;

        async move {
            let result = AssertUnwindSafe(async move { task().await })
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(AppError::Internal("Task panicked".to_string())));

            let outcome = if result.is_ok() {
                TaskOutcome::Succeeded
            } else {
                TaskOutcome::Failed
            };

            // The caller may have dropped its handle; the result is discarded then
            let _ = response_tx.send(result);
            outcome
        }
        .boxed()
    }

    fn reject(self: Box<Self>, error: AppError) {
        let _ = self.response_tx.send(Err(error));
    }
}

/// A queued task, owned by the scheduler until its result is delivered
pub struct ScheduledTask {
    id: u64,
    request: Option<GenerationRequest>,
    token: CancellationToken,
    work: Box<dyn Runnable>,
}

impl ScheduledTask {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn request(&self) -> Option<&GenerationRequest> {
        self.request.as_ref()
    }
}

struct QueueState {
    pending: VecDeque<ScheduledTask>,
    active: bool,
}

struct Inner {
    config: SchedulerConfig,
    state: Mutex<QueueState>,
    next_id: AtomicU64,
    waves_completed: AtomicU64,
    tasks_succeeded: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_cancelled: AtomicU64,
}

/// Wave scheduler. Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a new scheduler. `max_concurrent` must be at least one.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        if config.max_concurrent == 0 {
            return Err(AppError::Config(config::ConfigError::Message(
                "max_concurrent must be at least 1".to_string(),
            )));
        }

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    active: false,
                }),
                next_id: AtomicU64::new(0),
                waves_completed: AtomicU64::new(0),
                tasks_succeeded: AtomicU64::new(0),
                tasks_failed: AtomicU64::new(0),
                tasks_cancelled: AtomicU64::new(0),
            }),
        })
    }

    /// Queue a task. Must be called from within a tokio runtime.
    ///
    /// The returned handle resolves with this task's own result; failures
    /// of other tasks never reach it.
    pub fn submit<T, F, Fut>(&self, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.enqueue(None, task)
    }

    /// Queue a task on behalf of a generation request
    pub fn submit_request<T, F, Fut>(&self, request: GenerationRequest, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.enqueue(Some(request), task)
    }

    fn enqueue<T, F, Fut>(&self, request: Option<GenerationRequest>, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (response_tx, response_rx) = oneshot::channel();
        let token = CancellationToken::new();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let scheduled = ScheduledTask {
            id,
            request,
            token: token.clone(),
            work: Box::new(TypedTask { task, response_tx }),
        };

        let (start_loop, pending) = {
            let mut state = self.inner.state.lock();
            state.pending.push_back(scheduled);
            let was_active = std::mem::replace(&mut state.active, true);
            (!was_active, state.pending.len())
        };

        debug!(task_id = id, pending = pending, "Task queued");

        if start_loop {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                inner.run_waves().await;
            });
        }

        TaskHandle {
            id,
            response_rx,
            token,
        }
    }

    /// Number of tasks waiting for a wave
    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Whether a wave loop is currently running
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            pending: self.queue_len(),
            waves_completed: self.inner.waves_completed.load(Ordering::Relaxed),
            tasks_succeeded: self.inner.tasks_succeeded.load(Ordering::Relaxed),
            tasks_failed: self.inner.tasks_failed.load(Ordering::Relaxed),
            tasks_cancelled: self.inner.tasks_cancelled.load(Ordering::Relaxed),
            max_concurrent: self.inner.config.max_concurrent,
        }
    }
}

impl Inner {
    async fn run_waves(self: Arc<Self>) {
        let mut guard = LoopGuard {
            inner: &self,
            armed: true,
        };

        loop {
            let wave = self.detach_wave();

            if !wave.is_empty() {
                self.run_wave(wave).await;
            }

            if !self.continue_or_stop() {
                guard.armed = false;
                debug!("Queue drained, wave loop stopped");
                return;
            }

            if !self.config.inter_wave_delay.is_zero() {
                tokio::time::sleep(self.config.inter_wave_delay).await;
            }
        }
    }

    /// Pop up to `max_concurrent` live tasks from the head of the queue.
    /// Tasks cancelled while waiting are rejected here and take no slot.
    fn detach_wave(&self) -> Vec<ScheduledTask> {
        let max = self.config.max_concurrent;
        let mut cancelled = Vec::new();

        let wave = {
            let mut state = self.state.lock();
            let mut wave = Vec::with_capacity(max.min(state.pending.len()));
            while wave.len() < max {
                let Some(task) = state.pending.pop_front() else {
                    break;
                };
                if task.token.is_cancelled() {
                    cancelled.push(task);
                } else {
                    wave.push(task);
                }
            }
            wave
        };

        self.reject_cancelled(cancelled);
        wave
    }

    fn reject_cancelled(&self, cancelled: Vec<ScheduledTask>) {
        for task in cancelled {
            debug!(task_id = task.id, "Task cancelled before start");
            self.tasks_cancelled.fetch_add(1, Ordering::Relaxed);
            task.work.reject(AppError::Cancelled);
        }
    }

    async fn run_wave(&self, wave: Vec<ScheduledTask>) {
        let wave_number = self.waves_completed.load(Ordering::Relaxed) + 1;
        let size = wave.len();
        info!(wave = wave_number, size = size, "Starting wave");

        let runs = wave.into_iter().map(|task| {
            match &task.request {
                Some(request) => debug!(
                    task_id = task.id,
                    index = ?request.index,
                    prompt = %request.prompt,
                    "Running task"
                ),
                None => debug!(task_id = task.id, "Running task"),
            }
            let id = task.id;
            task.work.run().map(move |outcome| (id, outcome))
        });

        let mut failed = 0;
        for (id, outcome) in join_all(runs).await {
            match outcome {
                TaskOutcome::Succeeded => {
                    self.tasks_succeeded.fetch_add(1, Ordering::Relaxed);
                }
                TaskOutcome::Failed => {
                    failed += 1;
                    self.tasks_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(task_id = id, wave = wave_number, "Task failed");
                }
            }
        }

        self.waves_completed.fetch_add(1, Ordering::Relaxed);
        info!(wave = wave_number, size = size, failed = failed, "Wave settled");
    }

    /// Rejects tasks cancelled while the wave ran, then clears the active
    /// flag and returns false when no live task is pending
    fn continue_or_stop(&self) -> bool {
        let (cancelled, keep_running) = {
            let mut state = self.state.lock();
            let (cancelled, live): (Vec<_>, Vec<_>) = state
                .pending
                .drain(..)
                .partition(|task| task.token.is_cancelled());
            state.pending = VecDeque::from(live);

            let keep_running = !state.pending.is_empty();
            if !keep_running {
                state.active = false;
            }
            (cancelled, keep_running)
        };

        self.reject_cancelled(cancelled);
        keep_running
    }
}

/// Clears the active flag and fails everything still queued when the wave
/// loop exits without draining the queue, e.g. on a panic or runtime
/// shutdown. Otherwise no later submission would start a new loop.
struct LoopGuard<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl Drop for LoopGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let stranded: Vec<_> = {
            let mut state = self.inner.state.lock();
            state.active = false;
            state.pending.drain(..).collect()
        };

        warn!(stranded = stranded.len(), "Wave loop stopped with tasks queued");
        for task in stranded {
            task.work.reject(AppError::Internal(
                "Scheduler wave loop stopped".to_string(),
            ));
        }
    }
}

/// Handle to a submitted task. Awaiting it yields the task's result.
///
/// Cancellation is cooperative: [`TaskHandle::cancel`] only takes effect if
/// the task has not been picked up by a wave yet, in which case it resolves
/// with [`AppError::Cancelled`] without running. A task that is already
/// running stays in its wave and runs to completion; dropping the handle
/// discards its result.
pub struct TaskHandle<T> {
    id: u64,
    response_rx: oneshot::Receiver<Result<T>>,
    token: CancellationToken,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Request cancellation of this task
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token shared with the scheduler, e.g. to cancel from another task
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.response_rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(AppError::Internal(
                    "Scheduler dropped the task before completion".to_string(),
                ))
            })
        })
    }
}

/// Scheduler statistics
#[derive(Debug, Clone)]
pub struct SchedulerStats {
    pub pending: usize,
    pub waves_completed: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_cancelled: u64,
    pub max_concurrent: usize,
}
