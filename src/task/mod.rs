// src/task/mod.rs

//! Long-running units of work with cooperative cancellation
//!
//! A [`Task`] never gets interrupted from the outside. The algorithm it runs
//! calls [`Task::checkpoint`] (directly or through [`TaskContext`]) at regular
//! points, and the checkpoint fails with a cancellation error once somebody
//! called [`Task::cancel`]. Observers identify the task through its
//! [`NotifiableTaskMetadata`] without holding the task itself.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::TaskConfig;
use crate::error::{Error, Result};
use crate::event::TaskNotifier;

mod cancel;
mod identity;
mod metadata;
mod state;

pub use cancel::CancellationSignal;
pub use identity::TaskIdentity;
pub use metadata::{NotifiableTaskMetadata, TaskMetadata};
pub use state::TaskState;

use state::StateCell;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    /// `None` when the amount of remaining work is unknown
    pub percent: Option<u8>,
    pub message: String,
    pub current_step: Option<u32>,
    pub total_steps: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

impl TaskProgress {
    pub fn new(percent: u8, message: impl Into<String>) -> Self {
        Self {
            percent: Some(percent.min(100)),
            message: message.into(),
            current_step: None,
            total_steps: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_steps(current: u32, total: u32, message: impl Into<String>) -> Self {
        let percent = if total > 0 {
            ((current.min(total) as f64 / total as f64) * 100.0) as u8
        } else {
            0
        };

        Self {
            percent: Some(percent),
            message: message.into(),
            current_step: Some(current),
            total_steps: Some(total),
            updated_at: Utc::now(),
        }
    }

    pub fn undetermined(message: impl Into<String>) -> Self {
        Self {
            percent: None,
            message: message.into(),
            current_step: None,
            total_steps: None,
            updated_at: Utc::now(),
        }
    }
}

/// The processing logic a task runs, e.g. merging or splitting documents.
///
/// Implementations must call [`TaskContext::checkpoint`] at least once per
/// unit of externally visible work and propagate its error with `?`.
pub trait TaskAlgorithm: Send {
    type Output: Send;

    fn execute(&mut self, ctx: &TaskContext) -> Result<Self::Output>;
}

impl<F, T> TaskAlgorithm for F
where
    F: FnMut(&TaskContext) -> Result<T> + Send,
    T: Send,
{
    type Output = T;

    fn execute(&mut self, ctx: &TaskContext) -> Result<T> {
        self(ctx)
    }
}

/// What a running algorithm can see of its task
#[derive(Debug)]
pub struct TaskContext {
    task: Arc<Task>,
    notifier: TaskNotifier,
    emit_progress: bool,
}

impl TaskContext {
    pub fn new(task: Arc<Task>, notifier: TaskNotifier) -> Self {
        Self {
            task,
            notifier,
            emit_progress: true,
        }
    }

    pub fn with_progress_events(mut self, enabled: bool) -> Self {
        self.emit_progress = enabled;
        self
    }

    pub fn checkpoint(&self) -> Result<()> {
        self.task.checkpoint()
    }

    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancelled()
    }

    pub fn identity(&self) -> &TaskIdentity {
        self.task.identity()
    }

    pub fn metadata(&self) -> &TaskMetadata {
        self.notifier.metadata()
    }

    pub fn report_progress(&self, progress: TaskProgress) {
        tracing::debug!(
            "Task {} progress: {:?}% - {}",
            self.task.identity().id(),
            progress.percent,
            progress.message
        );
        if self.emit_progress {
            self.notifier.progress(progress);
        }
    }

    pub fn report_percent(&self, percent: u8, message: impl Into<String>) {
        self.report_progress(TaskProgress::new(percent, message));
    }

    pub fn report_step(&self, current: u32, total: u32, message: impl Into<String>) {
        self.report_progress(TaskProgress::with_steps(current, total, message));
    }
}

/// One instance of cancellable work.
///
/// Always handed out as `Arc<Task>` so that metadata snapshots can refer
/// back to it without owning it.
pub struct Task {
    identity: TaskIdentity,
    signal: CancellationSignal,
    state: StateCell,
    running: AtomicBool,
    metadata: OnceCell<NotifiableTaskMetadata>,
    created_at: DateTime<Utc>,
    started_at: OnceCell<DateTime<Utc>>,
    finished_at: OnceCell<DateTime<Utc>>,
    slow_checkpoint: Option<Duration>,
    last_checkpoint: Mutex<Option<Instant>>,
}

impl Task {
    pub fn new(type_tag: impl Into<String>) -> Arc<Self> {
        Self::with_identity(TaskIdentity::new(type_tag), &TaskConfig::default())
    }

    /// Task tagged with the fully qualified name of `T`
    pub fn of<T: ?Sized>() -> Arc<Self> {
        Self::with_identity(TaskIdentity::of::<T>(), &TaskConfig::default())
    }

    pub fn with_config(type_tag: impl Into<String>, config: &TaskConfig) -> Arc<Self> {
        Self::with_identity(TaskIdentity::new(type_tag), config)
    }

    fn with_identity(identity: TaskIdentity, config: &TaskConfig) -> Arc<Self> {
        tracing::trace!("Created task {}", identity);
        Arc::new(Self {
            identity,
            signal: CancellationSignal::new(),
            state: StateCell::new(),
            running: AtomicBool::new(false),
            metadata: OnceCell::new(),
            created_at: Utc::now(),
            started_at: OnceCell::new(),
            finished_at: OnceCell::new(),
            slow_checkpoint: config.slow_checkpoint_warn_ms.map(Duration::from_millis),
            last_checkpoint: Mutex::new(None),
        })
    }

    pub fn identity(&self) -> &TaskIdentity {
        &self.identity
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at.get().copied()
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at.get().copied()
    }

    /// The canonical metadata snapshot of this task, created on first use.
    pub fn metadata(self: &Arc<Self>) -> NotifiableTaskMetadata {
        self.metadata
            .get_or_init(|| NotifiableTaskMetadata::from(self))
            .clone()
    }

    /// Asks the task to stop at its next checkpoint. Safe to call from any thread, any number of times.
    pub fn cancel(&self) {
        if self.signal.request_cancel() {
            tracing::info!(
                "Cancellation requested for task {} ({})",
                self.identity.id(),
                self.identity.type_tag()
            );
        }
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.signal.cancelled().await;
    }

    /// CREATED -> RUNNING. Returns false if the task had already been started.
    pub fn start(&self) -> bool {
        let started = self.state.start();
        if started {
            let _ = self.started_at.set(Utc::now());
            tracing::debug!("Task {} started", self.identity.id());
        }
        started
    }

    /// Cooperative cancellation point.
    ///
    /// Fails with a cancellation error the first time it sees a pending
    /// cancel request, moving the task to `CANCELLED`. Once the task is in
    /// any terminal state every further call is rejected.
    pub fn checkpoint(&self) -> Result<()> {
        let state = self.state.get();
        if state.is_terminal() {
            return Err(Error::finished(self.identity.id(), state));
        }
        if state == TaskState::Created {
            self.start();
        }

        if let Some(threshold) = self.slow_checkpoint {
            self.track_checkpoint_gap(threshold);
        }

        if !self.signal.is_cancelled() {
            return Ok(());
        }

        match self.state.finish(TaskState::Cancelled) {
            Ok(()) => {
                let _ = self.finished_at.set(Utc::now());
                tracing::debug!("Task {} observed cancellation at checkpoint", self.identity.id());
                Err(Error::cancelled(self.identity.id(), self.identity.type_tag()))
            }
            Err(state) => Err(Error::finished(self.identity.id(), state)),
        }
    }

    fn track_checkpoint_gap(&self, threshold: Duration) {
        let now = Instant::now();
        let previous = self.last_checkpoint.lock().replace(now);
        if let Some(previous) = previous {
            let gap = now.duration_since(previous);
            if gap > threshold {
                tracing::warn!(
                    "Task {} went {:?} between checkpoints (threshold {:?})",
                    self.identity.id(),
                    gap,
                    threshold
                );
            }
        }
    }

    fn finish(&self, terminal: TaskState) -> std::result::Result<(), TaskState> {
        self.state.finish(terminal)?;
        let _ = self.finished_at.set(Utc::now());
        Ok(())
    }

    /// Runs `algorithm` to completion without emitting events
    pub fn run<A: TaskAlgorithm>(self: &Arc<Self>, algorithm: A) -> Result<A::Output> {
        let notifier = TaskNotifier::silent(TaskMetadata::from(self));
        self.run_with(algorithm, TaskContext::new(Arc::clone(self), notifier))
    }

    /// Runs `algorithm` and drives the lifecycle: COMPLETED on success,
    /// CANCELLED when one of this task's checkpoints stopped it, FAILED on
    /// any other error. A task runs at most one algorithm, once.
    pub fn run_with<A: TaskAlgorithm>(
        self: &Arc<Self>,
        mut algorithm: A,
        ctx: TaskContext,
    ) -> Result<A::Output> {
        let state = self.state.get();
        if state.is_terminal() {
            return Err(Error::finished(self.identity.id(), state));
        }
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::task(
                Some(self.identity.id()),
                Some(self.identity.type_tag().to_string()),
                "Task is already being run",
            ));
        }

        self.start();
        ctx.notifier.started();
        tracing::info!("Executing task {}", self.identity);

        let clock = Instant::now();
        let result = algorithm.execute(&ctx);
        let elapsed = clock.elapsed();

        match result {
            Ok(output) => match self.finish(TaskState::Completed) {
                Ok(()) => {
                    tracing::info!("Task {} completed in {:?}", self.identity.id(), elapsed);
                    ctx.notifier.completed(elapsed);
                    Ok(output)
                }
                Err(TaskState::Cancelled) => {
                    tracing::warn!(
                        "Task {} returned normally after its cancellation was observed",
                        self.identity.id()
                    );
                    ctx.notifier.cancelled();
                    Err(Error::cancelled(self.identity.id(), self.identity.type_tag()))
                }
                Err(state) => Err(Error::finished(self.identity.id(), state)),
            },
            // only this task's own checkpoint can move it to CANCELLED; a
            // cancellation error from anywhere else is an ordinary failure
            Err(error) => {
                match self.finish(TaskState::Failed) {
                    Ok(()) => {
                        tracing::error!("Task {} failed: {}", self.identity.id(), error);
                        ctx.notifier.failed(&error);
                    }
                    Err(TaskState::Cancelled) => {
                        tracing::info!("Task {} cancelled after {:?}", self.identity.id(), elapsed);
                        ctx.notifier.cancelled();
                    }
                    Err(state) => {
                        tracing::warn!(
                            "Task {} already finished as {} when its algorithm failed",
                            self.identity.id(),
                            state
                        );
                    }
                }
                Err(error)
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .field("cancel_requested", &self.is_cancelled())
            .field("created_at", &self.created_at)
            .finish()
    }
}
