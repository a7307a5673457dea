// src/types.rs

use std::collections::HashMap;

use serde_json::Value;
use uuid::Uuid;

/// Free-form key/value data attached to errors and events
pub type Metadata = HashMap<String, Value>;

/// Unique identifier of a running task
pub type TaskId = Uuid;

/// Identifier of a single emitted event or event subscription
pub type EventId = Uuid;
