// src/event.rs

//! Task lifecycle notifications
//!
//! Every event carries the [`TaskMetadata`] of the task it is about, so
//! listeners can correlate events with tasks without ever touching the task:
//! - Typed lifecycle events (started, progress, completed, failed, cancelled)
//! - Filtered subscriptions delivered over unbounded channels
//! - Async handlers driven by a tokio task per subscription
//! - A notifier that binds one task's metadata to the bus

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EventBusConfig;
use crate::error::{Error, EventOperation, Result};
use crate::task::{Task, TaskMetadata, TaskProgress};
use crate::types::{EventId, TaskId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskEventKind {
    Started,
    Progress(TaskProgress),
    Completed { elapsed_ms: u64 },
    Failed { reason: String },
    Cancelled,
}

impl TaskEventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Started => "task.started",
            Self::Progress(_) => "task.progress",
            Self::Completed { .. } => "task.completed",
            Self::Failed { .. } => "task.failed",
            Self::Cancelled => "task.cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: EventId,
    pub kind: TaskEventKind,
    pub metadata: TaskMetadata,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub fn new(kind: TaskEventKind, metadata: TaskMetadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            metadata,
            timestamp: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }
}

/// Event handler trait for processing events
#[async_trait]
pub trait TaskEventHandler: Send + Sync + Debug {
    async fn handle(&self, event: &TaskEvent) -> Result<()>;

    /// Get handler name for debugging
    fn name(&self) -> &str;
}

/// Event subscription filter
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Event types to match (empty means all)
    pub event_types: Vec<String>,
    /// Only events about this task
    pub task_identifier: Option<TaskId>,
    /// Substrings of the qualified name to match (empty means all)
    pub qualified_name_patterns: Vec<String>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.push(event_type.into());
        self
    }

    pub fn for_task(mut self, task_identifier: TaskId) -> Self {
        self.task_identifier = Some(task_identifier);
        self
    }

    pub fn with_qualified_name(mut self, pattern: impl Into<String>) -> Self {
        self.qualified_name_patterns.push(pattern.into());
        self
    }

    pub fn matches(&self, event: &TaskEvent) -> bool {
        if !self.event_types.is_empty()
            && !self.event_types.iter().any(|t| t == event.event_type())
        {
            return false;
        }

        if let Some(task_identifier) = self.task_identifier {
            if event.metadata.identifier() != Some(task_identifier) {
                return false;
            }
        }

        if !self.qualified_name_patterns.is_empty() {
            let name = event.metadata.qualified_name();
            if !self
                .qualified_name_patterns
                .iter()
                .any(|pattern| pattern == "*" || name.contains(pattern.as_str()))
            {
                return false;
            }
        }

        true
    }
}

struct EventSubscription {
    filter: EventFilter,
    sender: mpsc::UnboundedSender<Arc<TaskEvent>>,
    created_at: DateTime<Utc>,
}

impl Debug for EventSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubscription")
            .field("filter", &self.filter)
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventStats {
    pub total_published: u64,
    pub total_delivered: u64,
    pub total_failed_deliveries: u64,
    pub events_by_type: HashMap<String, u64>,
    pub active_subscriptions: usize,
}

/// Fan-out of task events to filtered subscribers. Publishing never blocks.
pub struct EventBus {
    config: EventBusConfig,
    subscriptions: DashMap<EventId, EventSubscription>,
    stats: RwLock<EventStats>,
}

impl Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.config)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            config,
            subscriptions: DashMap::new(),
            stats: RwLock::new(EventStats::default()),
        }
    }

    /// Delivers `event` to every matching subscription and returns how many received it.
    pub fn publish(&self, event: TaskEvent) -> usize {
        let start_time = Instant::now();
        let event = Arc::new(event);

        let mut delivered = 0usize;
        let mut closed = Vec::new();

        for entry in self.subscriptions.iter() {
            if !entry.filter.matches(&event) {
                continue;
            }
            match entry.sender.unbounded_send(Arc::clone(&event)) {
                Ok(()) => {
                    delivered += 1;
                    if self.config.log_deliveries {
                        tracing::trace!(
                            "Delivered '{}' for {} to subscription {}",
                            event.event_type(),
                            event.metadata,
                            entry.key()
                        );
                    }
                }
                Err(_) => closed.push(*entry.key()),
            }
        }

        for subscription_id in &closed {
            self.subscriptions.remove(subscription_id);
            tracing::warn!(
                "Dropped subscription {} after its receiver went away",
                subscription_id
            );
        }

        {
            let mut stats = self.stats.write();
            stats.total_published += 1;
            stats.total_delivered += delivered as u64;
            stats.total_failed_deliveries += closed.len() as u64;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.active_subscriptions = self.subscriptions.len();
        }

        tracing::trace!(
            "Published '{}' in {:?} (delivered to {} subscriptions, {} closed)",
            event.event_type(),
            start_time.elapsed(),
            delivered,
            closed.len()
        );

        delivered
    }

    /// Subscribe to events with a filter
    pub fn subscribe(
        &self,
        filter: EventFilter,
    ) -> Result<(EventId, mpsc::UnboundedReceiver<Arc<TaskEvent>>)> {
        if self.subscriptions.len() >= self.config.max_subscriptions {
            return Err(Error::event(
                EventOperation::Subscribe,
                format!(
                    "Subscription limit of {} reached",
                    self.config.max_subscriptions
                ),
            )
            .source("event_bus"));
        }

        let (sender, receiver) = mpsc::unbounded::<Arc<TaskEvent>>();
        let subscription_id = Uuid::new_v4();

        self.subscriptions.insert(
            subscription_id,
            EventSubscription {
                filter,
                sender,
                created_at: Utc::now(),
            },
        );
        self.stats.write().active_subscriptions = self.subscriptions.len();

        tracing::debug!("Added subscription: {}", subscription_id);
        Ok((subscription_id, receiver))
    }

    /// Subscribe with a handler running on its own tokio task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe_with_handler(
        &self,
        filter: EventFilter,
        handler: Arc<dyn TaskEventHandler>,
    ) -> Result<EventId> {
        let (subscription_id, mut receiver) = self.subscribe(filter)?;
        let handler_name = handler.name().to_string();

        tokio::spawn(async move {
            while let Some(event) = receiver.next().await {
                let start_time = Instant::now();

                match handler.handle(event.as_ref()).await {
                    Ok(()) => {
                        tracing::trace!(
                            "Handler '{}' processed event in {:?}",
                            handler_name,
                            start_time.elapsed()
                        );
                    }
                    Err(e) => {
                        tracing::error!(
                            "Handler '{}' failed to process event: {}",
                            handler_name,
                            e
                        );
                    }
                }
            }
            tracing::debug!("Handler '{}' stopped", handler_name);
        });

        Ok(subscription_id)
    }

    /// Unsubscribe from events
    pub fn unsubscribe(&self, subscription_id: EventId) -> Result<()> {
        self.subscriptions.remove(&subscription_id).ok_or_else(|| {
            Error::new(
                crate::error::ErrorKind::Event {
                    event_type: None,
                    subscriber_id: Some(subscription_id),
                    operation: EventOperation::Unsubscribe,
                },
                "Subscription not found",
            )
        })?;

        self.stats.write().active_subscriptions = self.subscriptions.len();
        tracing::debug!("Removed subscription: {}", subscription_id);

        Ok(())
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn stats(&self) -> EventStats {
        self.stats.read().clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

/// Emits events about one task, always with the same metadata.
#[derive(Debug, Clone)]
pub struct TaskNotifier {
    metadata: TaskMetadata,
    bus: Option<Arc<EventBus>>,
}

impl TaskNotifier {
    /// Notifier carrying the canonical metadata of `task`
    pub fn for_task(task: &Arc<Task>, bus: Arc<EventBus>) -> Self {
        Self {
            metadata: TaskMetadata::from(task),
            bus: Some(bus),
        }
    }

    /// Notifier for events raised before any task context exists
    pub fn detached(bus: Arc<EventBus>) -> Self {
        Self {
            metadata: TaskMetadata::NULL,
            bus: Some(bus),
        }
    }

    /// Notifier that only keeps the metadata and publishes nowhere
    pub fn silent(metadata: TaskMetadata) -> Self {
        Self {
            metadata,
            bus: None,
        }
    }

    pub fn metadata(&self) -> &TaskMetadata {
        &self.metadata
    }

    pub fn started(&self) {
        self.emit(TaskEventKind::Started);
    }

    pub fn progress(&self, progress: TaskProgress) {
        self.emit(TaskEventKind::Progress(progress));
    }

    pub fn completed(&self, elapsed: Duration) {
        self.emit(TaskEventKind::Completed {
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }

    pub fn failed(&self, error: &Error) {
        self.emit(TaskEventKind::Failed {
            reason: error.message.clone(),
        });
    }

    pub fn cancelled(&self) {
        self.emit(TaskEventKind::Cancelled);
    }

    fn emit(&self, kind: TaskEventKind) {
        if let Some(bus) = &self.bus {
            bus.publish(TaskEvent::new(kind, self.metadata.clone()));
        }
    }
}
