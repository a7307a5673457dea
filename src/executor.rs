// src/executor.rs

//! Runs a single task on a worker thread and reports its lifecycle

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::TaskConfig;
use crate::error::{Result, ResultExt};
use crate::event::{EventBus, TaskNotifier};
use crate::task::{NotifiableTaskMetadata, Task, TaskAlgorithm, TaskContext, TaskState};

/// Hands tasks to tokio's blocking pool, one worker thread per task.
///
/// There is no queue and no retry: a task that failed or was cancelled is
/// finished for good, and trying again means building a new task.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    config: TaskConfig,
    bus: Arc<EventBus>,
}

impl TaskExecutor {
    pub fn new(config: TaskConfig, bus: Arc<EventBus>) -> Self {
        Self { config, bus }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    /// New task carrying this executor's task settings
    pub fn create_task(&self, type_tag: impl Into<String>) -> Arc<Task> {
        Task::with_config(type_tag, &self.config)
    }

    /// Starts `algorithm` for `task` on a blocking worker thread.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<A>(&self, task: Arc<Task>, algorithm: A) -> TaskHandle<A::Output>
    where
        A: TaskAlgorithm + 'static,
        A::Output: 'static,
    {
        let notifier = TaskNotifier::for_task(&task, Arc::clone(&self.bus));
        let ctx = TaskContext::new(Arc::clone(&task), notifier)
            .with_progress_events(self.config.emit_progress_events);

        tracing::debug!("Spawning task {}", task.identity());
        let worker_task = Arc::clone(&task);
        let join = tokio::task::spawn_blocking(move || worker_task.run_with(algorithm, ctx));

        TaskHandle { task, join }
    }
}

/// Caller-side view of a spawned task
pub struct TaskHandle<T> {
    task: Arc<Task>,
    join: JoinHandle<Result<T>>,
}

impl<T> TaskHandle<T> {
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    pub fn metadata(&self) -> NotifiableTaskMetadata {
        self.task.metadata()
    }

    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    pub fn cancel(&self) {
        self.task.cancel();
    }

    /// Waits for the worker to finish and returns the algorithm's outcome.
    pub async fn join(self) -> Result<T> {
        let identity = self.task.identity();
        self.join
            .await
            .with_task(identity.id(), identity.type_tag())
            .map_err(|error| {
                tracing::error!("Worker for task {} terminated abnormally: {}", identity.id(), error);
                error
            })?
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task", &self.task)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::event::{EventFilter, TaskEvent};
    use crate::types::TaskId;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn executor() -> TaskExecutor {
        TaskExecutor::new(TaskConfig::default(), Arc::new(EventBus::default()))
    }

    async fn collect_until_terminal(
        receiver: &mut futures::channel::mpsc::UnboundedReceiver<Arc<TaskEvent>>,
    ) -> Vec<Arc<TaskEvent>> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), receiver.next())
                .await
                .expect("event should arrive")
                .expect("channel open");
            let terminal = event.kind.is_terminal();
            events.push(event);
            if terminal {
                return events;
            }
        }
    }

    #[tokio::test]
    async fn test_spawned_task_completes() {
        let executor = executor();
        let task = executor.create_task("merge");
        let (_, mut receiver) = executor
            .bus()
            .subscribe(EventFilter::new().for_task(task.identity().id()))
            .unwrap();

        let handle = executor.spawn(task, |ctx: &TaskContext| -> Result<u32> {
            for page in 1..=4 {
                ctx.checkpoint()?;
                ctx.report_step(page, 4, "merging");
            }
            Ok(4)
        });
        let metadata = handle.metadata();

        assert_eq!(handle.join().await.unwrap(), 4);

        let events = collect_until_terminal(&mut receiver).await;
        assert_eq!(events.first().unwrap().event_type(), "task.started");
        assert_eq!(events.last().unwrap().event_type(), "task.completed");
        assert_eq!(events.len(), 6);
        assert!(events
            .iter()
            .all(|event| event.metadata.as_task() == Some(&metadata)));
    }

    #[tokio::test]
    async fn test_cancel_from_caller_thread() {
        let executor = executor();
        let task = executor.create_task("split");
        let (_, mut receiver) = executor
            .bus()
            .subscribe(EventFilter::new().for_task(task.identity().id()))
            .unwrap();

        let processed = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&processed);
        let handle = executor.spawn(Arc::clone(&task), move |ctx: &TaskContext| -> Result<()> {
            loop {
                ctx.checkpoint()?;
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(1));
            }
        });

        while processed.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        handle.cancel();

        let error = handle.join().await.unwrap_err();
        assert!(error.is_cancellation());
        assert_eq!(task.state(), TaskState::Cancelled);

        let events = collect_until_terminal(&mut receiver).await;
        assert_eq!(events.last().unwrap().event_type(), "task.cancelled");
    }

    #[tokio::test]
    async fn test_failed_task_reports_reason() {
        let executor = executor();
        let task = executor.create_task("decrypt");
        let id: TaskId = task.identity().id();
        let (_, mut receiver) = executor
            .bus()
            .subscribe(EventFilter::new().for_task(id).with_event_type("task.failed"))
            .unwrap();

        let handle = executor.spawn(task, |ctx: &TaskContext| -> Result<()> {
            ctx.checkpoint()?;
            Err(Error::task(None, None, "unsupported encryption"))
        });
        assert!(!handle.join().await.unwrap_err().is_cancellation());

        let events = collect_until_terminal(&mut receiver).await;
        match &events[0].kind {
            crate::event::TaskEventKind::Failed { reason } => {
                assert_eq!(reason, "unsupported encryption")
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_progress_events_can_be_disabled() {
        let config = TaskConfig {
            emit_progress_events: false,
            ..TaskConfig::default()
        };
        let executor = TaskExecutor::new(config, Arc::new(EventBus::default()));
        let task = executor.create_task("rotate");
        let (_, mut receiver) = executor.bus().subscribe(EventFilter::new()).unwrap();

        let handle = executor.spawn(task, |ctx: &TaskContext| -> Result<()> {
            ctx.report_percent(50, "half");
            Ok(())
        });
        handle.join().await.unwrap();

        let events = collect_until_terminal(&mut receiver).await;
        let types: Vec<_> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["task.started", "task.completed"]);
    }
}
