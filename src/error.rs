// src/error.rs - Structured errors for task execution and its collaborators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::task::TaskState;
use crate::types::{Metadata, TaskId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A checkpoint observed a cancellation request
    TaskCancelled {
        task_id: TaskId,
        qualified_name: String,
    },
    /// A checkpoint was reached after the task had already finished
    TaskFinished {
        task_id: TaskId,
        state: TaskState,
    },
    /// A caller broke an API contract, e.g. derived metadata from no task
    InvalidArgument {
        argument: String,
    },
    /// Failure raised by the algorithm a task was running
    Task {
        task_id: Option<TaskId>,
        qualified_name: Option<String>,
    },
    Configuration {
        key: Option<String>,
        validation_errors: Vec<String>,
    },
    Event {
        event_type: Option<String>,
        subscriber_id: Option<Uuid>,
        operation: EventOperation,
    },
    Application,
    Io,
    Serialization,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventOperation {
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Error {
    pub id: Uuid,
    pub kind: ErrorKind,
    pub message: String,
    pub severity: ErrorSeverity,
    pub source: String,
    pub task_id: Option<TaskId>,
    pub timestamp: DateTime<Utc>,
    pub metadata: Metadata,
    pub causes: Vec<String>,
}

impl Error {
    /// Creates a new error with the specified kind and message
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let task_id = match &kind {
            ErrorKind::TaskCancelled { task_id, .. } | ErrorKind::TaskFinished { task_id, .. } => {
                Some(*task_id)
            }
            ErrorKind::Task { task_id, .. } => *task_id,
            _ => None,
        };

        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            severity: ErrorSeverity::Medium,
            source: "unknown".to_string(),
            task_id,
            timestamp: Utc::now(),
            metadata: Metadata::new(),
            causes: Vec::new(),
        }
    }

    /// Sets the error severity
    pub fn severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the error source
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Adds metadata to the error
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Adds a cause to the error chain
    pub fn caused_by(mut self, cause: impl fmt::Display) -> Self {
        self.causes.push(cause.to_string());
        self
    }

    /// True when this error is the cooperative cancellation signal raised by a checkpoint
    pub fn is_cancellation(&self) -> bool {
        matches!(self.kind, ErrorKind::TaskCancelled { .. })
    }

    /// Creates the error a checkpoint raises once cancellation is observed
    pub fn cancelled(task_id: TaskId, qualified_name: impl Into<String>) -> Self {
        let qualified_name = qualified_name.into();
        let message = format!("Task {} ({}) was cancelled", task_id, qualified_name);
        Self::new(
            ErrorKind::TaskCancelled {
                task_id,
                qualified_name,
            },
            message,
        )
        .severity(ErrorSeverity::Low)
        .source("task")
    }

    /// Creates the error for a checkpoint reached after a terminal state
    pub fn finished(task_id: TaskId, state: TaskState) -> Self {
        Self::new(
            ErrorKind::TaskFinished { task_id, state },
            format!("Task {} has already finished with state {}", task_id, state),
        )
        .source("task")
    }

    /// Creates a contract violation error
    pub fn invalid_argument(argument: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::InvalidArgument {
                argument: argument.into(),
            },
            message,
        )
        .severity(ErrorSeverity::High)
    }

    /// Creates a task error
    pub fn task(
        task_id: Option<TaskId>,
        qualified_name: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorKind::Task {
                task_id,
                qualified_name,
            },
            message,
        )
    }

    /// Creates a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Configuration {
                key: None,
                validation_errors: Vec::new(),
            },
            message,
        )
        .severity(ErrorSeverity::High)
    }

    /// Creates a configuration error tied to a key
    pub fn config_key(key: impl Into<String>, errors: Vec<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Configuration {
                key: Some(key.into()),
                validation_errors: errors,
            },
            message,
        )
        .severity(ErrorSeverity::High)
    }

    /// Creates an event bus error
    pub fn event(operation: EventOperation, message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Event {
                event_type: None,
                subscriber_id: None,
                operation,
            },
            message,
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}): {}",
            self.severity, self.source, self.id, self.message
        )
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let msg = err.to_string();

        let mut error = Error::new(ErrorKind::Io, msg);
        error.source = "std::io::Error".to_string();
        error.severity = ErrorSeverity::High;

        error
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::new(ErrorKind::Serialization, err.to_string()).source("serde_json")
    }
}

/// Extension trait for Results to add context
pub trait ResultExt<T> {
    /// Adds context to an error
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Attributes the error to a task
    fn with_task(self, task_id: TaskId, qualified_name: impl Into<String>) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::new(ErrorKind::Application, f()).caused_by(e))
    }

    fn with_task(self, task_id: TaskId, qualified_name: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            Error::task(Some(task_id), Some(qualified_name.into()), e.to_string()).caused_by(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_error() {
        let task_id = Uuid::new_v4();
        let error = Error::cancelled(task_id, "merge");

        assert!(error.is_cancellation());
        assert_eq!(error.task_id, Some(task_id));
        assert_eq!(error.severity, ErrorSeverity::Low);
        assert!(error.message.contains("cancelled"));
    }

    #[test]
    fn test_invalid_argument_error() {
        let error = Error::invalid_argument("task", "No task given");
        assert!(matches!(error.kind, ErrorKind::InvalidArgument { .. }));
        assert_eq!(error.severity, ErrorSeverity::High);
        assert!(!error.is_cancellation());
    }

    #[test]
    fn test_config_error_with_metadata() {
        let error = Error::config("Invalid configuration value")
            .source("config_loader")
            .metadata("key", serde_json::Value::String("tasks.slow_checkpoint_warn_ms".to_string()));

        assert_eq!(error.severity, ErrorSeverity::High);
        assert_eq!(error.source, "config_loader");
        assert!(matches!(error.kind, ErrorKind::Configuration { .. }));
        assert!(error.metadata.contains_key("key"));
    }

    #[test]
    fn test_result_ext_with_task() {
        let task_id = Uuid::new_v4();
        let io: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));

        let error = io.with_task(task_id, "split").unwrap_err();
        assert_eq!(error.task_id, Some(task_id));
        assert_eq!(error.causes, vec!["disk full".to_string()]);
        assert!(matches!(error.kind, ErrorKind::Task { .. }));
    }
}
