// src/task/cancel.rs

//! One-way cancellation flag shared between a task and whoever asks it to stop.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

/// Monotonic cancellation flag.
///
/// Any thread may request cancellation; the executing thread observes it at
/// its next checkpoint. Once set the flag is never cleared.
#[derive(Default)]
pub struct CancellationSignal {
    token: CancellationToken,
    requested: AtomicBool,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag. Returns `true` only for the call that actually flipped it.
    pub fn request_cancel(&self) -> bool {
        let first = !self.requested.swap(true, Ordering::AcqRel);
        self.token.cancel();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

impl fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
