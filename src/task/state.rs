// src/task/state.rs

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Created,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Running => 1,
            Self::Completed => 2,
            Self::Cancelled => 3,
            Self::Failed => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Cancelled,
            _ => Self::Failed,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Lock-free holder of a task's lifecycle state. Transitions only move forward.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(TaskState::Created.as_u8()))
    }

    pub(crate) fn get(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// CREATED -> RUNNING. Returns true if this call performed the transition.
    pub(crate) fn start(&self) -> bool {
        self.0
            .compare_exchange(
                TaskState::Created.as_u8(),
                TaskState::Running.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Moves a non-terminal state into `terminal`.
    ///
    /// Returns `Err` with the state already reached when the task had finished.
    pub(crate) fn finish(&self, terminal: TaskState) -> Result<(), TaskState> {
        debug_assert!(terminal.is_terminal());
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let state = TaskState::from_u8(current);
            if state.is_terminal() {
                return Err(state);
            }
            match self.0.compare_exchange_weak(
                current,
                terminal.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), TaskState::Created);

        assert!(cell.start());
        assert!(!cell.start());
        assert_eq!(cell.get(), TaskState::Running);

        assert_eq!(cell.finish(TaskState::Completed), Ok(()));
        assert_eq!(cell.get(), TaskState::Completed);
    }

    #[test]
    fn test_terminal_state_is_final() {
        let cell = StateCell::new();
        cell.start();
        cell.finish(TaskState::Cancelled).unwrap();

        assert_eq!(cell.finish(TaskState::Failed), Err(TaskState::Cancelled));
        assert_eq!(cell.finish(TaskState::Completed), Err(TaskState::Cancelled));
        assert!(!cell.start());
        assert_eq!(cell.get(), TaskState::Cancelled);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(TaskState::Created.to_string(), "CREATED");
        assert_eq!(TaskState::Cancelled.to_string(), "CANCELLED");
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Failed.is_terminal());
    }
}
