// src/lib.rs

//! Docbatch core - cooperative cancellation, task identity and lifecycle
//! notification for long-running document transformations

#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::result_large_err)]

pub mod config;
pub mod error;
pub mod event;
pub mod executor;
pub mod logging;
pub mod task;
pub mod types;

// Re-export commonly used types
pub use config::{EngineConfig, EventBusConfig, LoggingConfig, TaskConfig};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use event::{EventBus, EventFilter, TaskEvent, TaskEventKind, TaskNotifier};
pub use executor::{TaskExecutor, TaskHandle};
pub use task::{
    CancellationSignal, NotifiableTaskMetadata, Task, TaskAlgorithm, TaskContext, TaskIdentity,
    TaskMetadata, TaskProgress, TaskState,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
