// src/task/metadata.rs

//! Immutable metadata describing the task an event is notifying about.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use super::{Task, TaskIdentity};
use crate::error::{Error, Result};
use crate::types::TaskId;

/// Snapshot of a task's identity plus a non-owning handle used only to
/// forward cancellation checks back to the task.
///
/// Equality, ordering and hashing look at the identity alone. Two snapshots
/// of the same task are always equal no matter when they were taken.
#[derive(Clone, Serialize, Deserialize)]
pub struct NotifiableTaskMetadata {
    identity: TaskIdentity,
    #[serde(skip)]
    task: Weak<Task>,
}

impl NotifiableTaskMetadata {
    /// Metadata for `task`; fails when no task is given.
    ///
    /// Use [`TaskMetadata::NULL`] where there is legitimately no task yet.
    pub fn try_from_task(task: Option<&Arc<Task>>) -> Result<Self> {
        task.map(Self::from).ok_or_else(|| {
            Error::invalid_argument(
                "task",
                "No task given, unable to create notifiable metadata",
            )
            .source("task_metadata")
        })
    }

    pub fn identity(&self) -> &TaskIdentity {
        &self.identity
    }

    pub fn identifier(&self) -> TaskId {
        self.identity.id()
    }

    pub fn qualified_name(&self) -> &str {
        self.identity.type_tag()
    }

    /// Runs the originating task's checkpoint.
    ///
    /// A task that no longer exists has nothing left to cancel, so this is a no-op then.
    pub fn stop_if_cancelled(&self) -> Result<()> {
        match self.task.upgrade() {
            Some(task) => task.checkpoint(),
            None => Ok(()),
        }
    }
}

impl From<&Arc<Task>> for NotifiableTaskMetadata {
    fn from(task: &Arc<Task>) -> Self {
        Self {
            identity: task.identity().clone(),
            task: Arc::downgrade(task),
        }
    }
}

impl PartialEq for NotifiableTaskMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for NotifiableTaskMetadata {}

impl PartialOrd for NotifiableTaskMetadata {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NotifiableTaskMetadata {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity.cmp(&other.identity)
    }
}

impl Hash for NotifiableTaskMetadata {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

impl fmt::Debug for NotifiableTaskMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifiableTaskMetadata")
            .field("task_identifier", &self.identifier())
            .field("qualified_name", &self.qualified_name())
            .field("task_alive", &(self.task.strong_count() > 0))
            .finish()
    }
}

impl fmt::Display for NotifiableTaskMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NotifiableTaskMetadata[taskIdentifier={}, qualifiedName={}]",
            self.identifier(),
            self.qualified_name()
        )
    }
}

/// Metadata attached to every task event: either a real task snapshot or
/// the null substitute used before any task context exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskMetadata {
    #[default]
    Null,
    Task(NotifiableTaskMetadata),
}

impl TaskMetadata {
    pub const NULL: TaskMetadata = TaskMetadata::Null;

    pub fn identifier(&self) -> Option<TaskId> {
        match self {
            Self::Null => None,
            Self::Task(meta) => Some(meta.identifier()),
        }
    }

    pub fn qualified_name(&self) -> &str {
        match self {
            Self::Null => "",
            Self::Task(meta) => meta.qualified_name(),
        }
    }

    /// Never fails for the null substitute.
    pub fn stop_if_cancelled(&self) -> Result<()> {
        match self {
            Self::Null => Ok(()),
            Self::Task(meta) => meta.stop_if_cancelled(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_task(&self) -> Option<&NotifiableTaskMetadata> {
        match self {
            Self::Null => None,
            Self::Task(meta) => Some(meta),
        }
    }
}

impl From<NotifiableTaskMetadata> for TaskMetadata {
    fn from(meta: NotifiableTaskMetadata) -> Self {
        Self::Task(meta)
    }
}

impl From<&Arc<Task>> for TaskMetadata {
    fn from(task: &Arc<Task>) -> Self {
        Self::Task(task.metadata())
    }
}

impl fmt::Display for TaskMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NotifiableTaskMetadata[taskIdentifier=null, qualifiedName=]"),
            Self::Task(meta) => meta.fmt(f),
        }
    }
}
