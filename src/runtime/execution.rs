use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::ActivityIndex;

/// One node of the execution tree: a token positioned somewhere in the
/// process graph.
///
/// Parent/child links are ids into the tree's arena, never references.
/// An inactive node has arrived at its activity but is parked, waiting
/// to be joined or retired; an active node is eligible to be advanced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionNode {
    pub id: Uuid,
    pub parent: Option<Uuid>,
    pub children: Vec<Uuid>,
    pub current_activity: Option<ActivityIndex>,
    pub active: bool,
    /// Set when this node is one of several sibling branches produced by
    /// a fork. Concurrent siblings share a concurrency root (their
    /// parent).
    pub concurrent: bool,
    /// Set when this node delimits a sub-scope (the process-instance
    /// root, or a parked fork anchor holding its branches).
    pub scope: bool,
}

impl ExecutionNode {
    pub fn root(activity: ActivityIndex) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent: None,
            children: Vec::new(),
            current_activity: Some(activity),
            active: true,
            concurrent: false,
            scope: true,
        }
    }

    pub fn child(parent: Uuid, activity: ActivityIndex, concurrent: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent: Some(parent),
            children: Vec::new(),
            current_activity: Some(activity),
            active: true,
            concurrent,
            scope: false,
        }
    }
}

/// Serializable image of a whole tree. An external persistence layer
/// round-trips this; the decision log is observability, not state, and
/// is not included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub root: Uuid,
    pub ended: bool,
    pub nodes: Vec<ExecutionNode>,
}
