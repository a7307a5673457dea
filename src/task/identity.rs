// src/task/identity.rs

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::TaskId;

/// Immutable identity of one running task instance.
///
/// The id is a random v4 UUID generated once per task, so two identities
/// compare equal only when both the id and the type tag match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskIdentity {
    id: TaskId,
    type_tag: String,
}

impl TaskIdentity {
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            type_tag: type_tag.into(),
        }
    }

    /// Identity tagged with the fully qualified Rust type name of `T`
    pub fn of<T: ?Sized>() -> Self {
        Self::new(std::any::type_name::<T>())
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskIdentity[id={}, typeTag={}]", self.id, self.type_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct MergeTask;

    #[test]
    fn test_identities_are_unique() {
        let ids: HashSet<TaskId> = (0..1000).map(|_| TaskIdentity::new("merge").id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_equality_requires_id_and_tag() {
        let identity = TaskIdentity::new("merge");
        assert_eq!(identity, identity.clone());
        assert_ne!(identity, TaskIdentity::new("merge"));
    }

    #[test]
    fn test_identity_of_type() {
        let identity = TaskIdentity::of::<MergeTask>();
        assert!(identity.type_tag().ends_with("MergeTask"));
        assert!(identity.type_tag().contains("::"));
    }

    #[test]
    fn test_serde_preserves_identity() {
        let identity = TaskIdentity::new("rotate");
        let json = serde_json::to_string(&identity).unwrap();
        let restored: TaskIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(identity, restored);
    }
}
