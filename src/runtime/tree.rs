use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

use crate::model::{ActivityIndex, Transition};
use crate::runtime::error::EngineError;
use crate::runtime::execution::{ExecutionNode, TreeSnapshot};

/// One fire / no-fire decision taken at a joining activity. This is the
/// externally visible signal distinguishing a completed join from a
/// pending one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayDecision {
    pub activity: String,
    pub joined: usize,
    pub required: usize,
    pub fired: bool,
}

/// Exclusive hold on a concurrency root. Dropping the guard releases the
/// root, so release happens on every exit path.
///
/// Not re-entrant: locking a root already held by the same logical
/// operation blocks forever (or raises `LockTimeout` when a bound is
/// configured).
pub struct RootGuard {
    root: Uuid,
    _guard: OwnedMutexGuard<()>,
}

impl RootGuard {
    pub fn root(&self) -> Uuid {
        self.root
    }
}

/// Mutable runtime state of one process instance: an arena of execution
/// nodes keyed by id, plus a per-concurrency-root lock registry.
///
/// Single-node mutations (flag flips) are safe on their own; any
/// sequence that reads a sibling arrival count and conditionally commits
/// a join must run under `lock_concurrency_root`.
pub struct ExecutionTree {
    nodes: DashMap<Uuid, ExecutionNode>,
    root: Uuid,
    locks: DashMap<Uuid, Arc<AsyncMutex<()>>>,
    lock_timeout: Option<Duration>,
    decisions: Mutex<Vec<GatewayDecision>>,
    ended: AtomicBool,
}

impl ExecutionTree {
    /// Creates a tree with a single active root execution positioned at
    /// `initial`.
    pub fn new(initial: ActivityIndex) -> Self {
        let root_node = ExecutionNode::root(initial);
        let root = root_node.id;
        let nodes = DashMap::new();
        nodes.insert(root, root_node);
        Self {
            nodes,
            root,
            locks: DashMap::new(),
            lock_timeout: None,
            decisions: Mutex::new(Vec::new()),
            ended: AtomicBool::new(false),
        }
    }

    /// Bounds every concurrency-root lock wait. Expired waits surface as
    /// `EngineError::LockTimeout` for the driver to retry.
    pub fn with_lock_timeout(mut self, wait: Duration) -> Self {
        self.lock_timeout = Some(wait);
        self
    }

    pub fn root(&self) -> Uuid {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True once the root execution has retired.
    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Copy of a node's current state.
    pub fn node(&self, id: Uuid) -> Result<ExecutionNode, EngineError> {
        self.nodes
            .get(&id)
            .map(|n| n.clone())
            .ok_or(EngineError::StaleExecution(id))
    }

    /// Parks an execution at its current activity. The node stays in the
    /// tree and remains countable by `find_inactive_concurrent_executions`.
    pub fn inactivate(&self, id: Uuid) -> Result<(), EngineError> {
        let mut node = self
            .nodes
            .get_mut(&id)
            .ok_or(EngineError::StaleExecution(id))?;
        node.active = false;
        Ok(())
    }

    /// Nearest ancestor (or self) owning the set of concurrent siblings:
    /// the parent for a concurrent execution, the execution itself
    /// otherwise. Derived, never stored.
    pub fn concurrency_root(&self, id: Uuid) -> Result<Uuid, EngineError> {
        let node = self.node(id)?;
        if node.concurrent {
            Ok(node.parent.unwrap_or(id))
        } else {
            Ok(id)
        }
    }

    /// Acquires the exclusive lock for `id`'s concurrency root. The lock
    /// scope is the shared ancestor, not the whole tree, so unrelated
    /// branches never contend.
    pub async fn lock_concurrency_root(&self, id: Uuid) -> Result<RootGuard, EngineError> {
        let root = self.concurrency_root(id)?;
        // Clone the Arc out of the registry so no map shard is held
        // while waiting.
        let lock = self
            .locks
            .entry(root)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .value()
            .clone();

        let guard = match self.lock_timeout {
            Some(waited) => timeout(waited, lock.lock_owned())
                .await
                .map_err(|_| EngineError::LockTimeout { root, waited })?,
            None => lock.lock_owned().await,
        };
        debug!(%root, "locked concurrency root");
        Ok(RootGuard { root, _guard: guard })
    }

    /// Ordered siblings under `id`'s concurrency root that are inactive
    /// and positioned at `activity` — the join arrival count. For a
    /// non-concurrent execution this is the execution itself.
    ///
    /// Callers deciding a join must hold the concurrency-root lock
    /// across this call and the commit.
    pub fn find_inactive_concurrent_executions(
        &self,
        id: Uuid,
        activity: ActivityIndex,
    ) -> Result<Vec<Uuid>, EngineError> {
        let node = self.node(id)?;
        if !node.concurrent {
            if !node.active && node.current_activity == Some(activity) {
                return Ok(vec![id]);
            }
            return Ok(Vec::new());
        }

        let root = self.concurrency_root(id)?;
        let root_node = self.node(root)?;
        let mut joined = Vec::new();
        for child_id in &root_node.children {
            if let Some(child) = self.nodes.get(child_id) {
                if child.concurrent && !child.active && child.current_activity == Some(activity) {
                    joined.push(*child_id);
                }
            }
        }
        Ok(joined)
    }

    /// Retires the consumed executions and produces one new active
    /// execution per transition.
    ///
    /// Shapes:
    /// - one transition, one consumed: simple step — the node is
    ///   repositioned and reactivated, no fork;
    /// - several transitions, one consumed: fork — the consumed node
    ///   parks inactive as the scope anchor and gains one concurrent
    ///   child per transition;
    /// - several consumed: join — the consumed siblings are pruned and
    ///   flow resumes from their concurrency root (repositioned for one
    ///   transition, re-forked for several).
    ///
    /// Returns the executions that are now active, in transition order.
    pub fn leave_via(
        &self,
        transitions: &[Transition],
        consumed: &[Uuid],
    ) -> Result<Vec<Uuid>, EngineError> {
        if consumed.is_empty() {
            return Err(EngineError::Invariant(
                "leave_via requires at least one consumed execution".to_string(),
            ));
        }
        if transitions.is_empty() {
            return Err(EngineError::Invariant(
                "leave_via requires at least one transition".to_string(),
            ));
        }
        for id in consumed {
            if !self.nodes.contains_key(id) {
                return Err(EngineError::StaleExecution(*id));
            }
        }

        // Simple step: one token moves across one transition.
        if transitions.len() == 1 && consumed.len() == 1 {
            let id = consumed[0];
            let target = transitions[0].target;
            let mut node = self
                .nodes
                .get_mut(&id)
                .ok_or(EngineError::StaleExecution(id))?;
            node.current_activity = Some(target);
            node.active = true;
            // Only the process-instance root stays a scope once it is a
            // plain token again.
            node.scope = id == self.root;
            return Ok(vec![id]);
        }

        // Fork from a single token: the token itself anchors the new
        // concurrent branches. A join resumes from the shared root.
        let anchor = if consumed.len() == 1 {
            consumed[0]
        } else {
            let root = self.concurrency_root(consumed[0])?;
            for id in &consumed[1..] {
                if self.concurrency_root(*id)? != root {
                    return Err(EngineError::Invariant(
                        "joined executions span multiple concurrency roots".to_string(),
                    ));
                }
            }
            root
        };

        // Prune the joined siblings (the anchor itself stays).
        if consumed.len() > 1 {
            {
                let mut anchor_node = self
                    .nodes
                    .get_mut(&anchor)
                    .ok_or(EngineError::StaleExecution(anchor))?;
                anchor_node.children.retain(|c| !consumed.contains(c));
            }
            for id in consumed {
                if *id != anchor {
                    self.nodes.remove(id);
                    self.locks.remove(id);
                }
            }
        }

        if transitions.len() == 1 {
            // Join without fork: flow collapses back into the root.
            let mut anchor_node = self
                .nodes
                .get_mut(&anchor)
                .ok_or(EngineError::StaleExecution(anchor))?;
            anchor_node.current_activity = Some(transitions[0].target);
            anchor_node.active = true;
            anchor_node.scope = anchor == self.root;
            return Ok(vec![anchor]);
        }

        // Fork: one new concurrent child per transition, anchored under
        // the parked scope holder.
        let mut created = Vec::with_capacity(transitions.len());
        for transition in transitions {
            let child = ExecutionNode::child(anchor, transition.target, true);
            created.push(child.id);
            self.nodes.insert(child.id, child);
        }
        {
            let mut anchor_node = self
                .nodes
                .get_mut(&anchor)
                .ok_or(EngineError::StaleExecution(anchor))?;
            anchor_node.active = false;
            anchor_node.scope = true;
            anchor_node.children.extend(created.iter().copied());
        }
        Ok(created)
    }

    /// Forcibly retires an execution and its whole subtree. External
    /// cancellation entry point; also used by end events, where the node
    /// is a leaf.
    ///
    /// Takes the node's concurrency-root lock first, so a sibling join
    /// that is mid-decision commits or parks before anything is removed
    /// from under its count.
    pub async fn cancel(&self, id: Uuid) -> Result<(), EngineError> {
        let _scope = self.lock_concurrency_root(id).await?;
        let node = self.node(id)?;
        if let Some(parent) = node.parent {
            if let Some(mut parent_node) = self.nodes.get_mut(&parent) {
                parent_node.children.retain(|c| *c != id);
            }
        }

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some((_, removed)) = self.nodes.remove(&current) {
                self.locks.remove(&current);
                stack.extend(removed.children);
            }
        }

        if id == self.root {
            self.ended.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Currently active positions across the whole tree.
    pub fn active_executions(&self) -> Vec<(Uuid, ActivityIndex)> {
        self.nodes
            .iter()
            .filter(|n| n.active)
            .filter_map(|n| n.current_activity.map(|a| (n.id, a)))
            .collect()
    }

    pub fn record_decision(&self, decision: GatewayDecision) {
        self.decisions_guard().push(decision);
    }

    /// Append-only log of join decisions, in commit order.
    pub fn decisions(&self) -> Vec<GatewayDecision> {
        self.decisions_guard().clone()
    }

    fn decisions_guard(&self) -> MutexGuard<'_, Vec<GatewayDecision>> {
        self.decisions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Serializable image of the tree for an external persistence layer.
    /// Nodes are ordered by id for a stable representation; child order
    /// inside each node is the order that matters.
    pub fn snapshot(&self) -> TreeSnapshot {
        let mut nodes: Vec<ExecutionNode> = self.nodes.iter().map(|n| n.clone()).collect();
        nodes.sort_by_key(|n| n.id);
        TreeSnapshot {
            root: self.root,
            ended: self.has_ended(),
            nodes,
        }
    }

    /// Rebuilds a tree from a snapshot. Lock registry and decision log
    /// start empty; locks are created on demand.
    pub fn restore(snapshot: TreeSnapshot) -> Self {
        let nodes = DashMap::new();
        for node in snapshot.nodes {
            nodes.insert(node.id, node);
        }
        Self {
            nodes,
            root: snapshot.root,
            locks: DashMap::new(),
            lock_timeout: None,
            decisions: Mutex::new(Vec::new()),
            ended: AtomicBool::new(snapshot.ended),
        }
    }
}
