use procflow::model::Transition;
use procflow::runtime::error::EngineError;
use procflow::runtime::execution::TreeSnapshot;
use procflow::runtime::tree::ExecutionTree;
use std::time::Duration;
use uuid::Uuid;

fn t(source: usize, target: usize) -> Transition {
    Transition { source, target }
}

#[test]
fn simple_step_repositions_the_token() {
    let tree = ExecutionTree::new(0);
    let root = tree.root();

    let next = tree.leave_via(&[t(0, 1)], &[root]).expect("step failed");

    assert_eq!(next, vec![root], "a simple step reuses the token");
    let node = tree.node(root).unwrap();
    assert_eq!(node.current_activity, Some(1));
    assert!(node.active);
    assert!(!node.concurrent);
    assert_eq!(tree.len(), 1);
}

#[test]
fn inactivate_parks_the_token_without_other_mutation() {
    let tree = ExecutionTree::new(0);
    let root = tree.root();

    tree.inactivate(root).expect("inactivate failed");

    let node = tree.node(root).unwrap();
    assert!(!node.active);
    assert_eq!(node.current_activity, Some(0), "position unchanged");
    assert_eq!(tree.len(), 1, "node stays in the tree, countable");
}

#[test]
fn fork_creates_concurrent_children_under_the_anchor() {
    let tree = ExecutionTree::new(0);
    let root = tree.root();

    let children = tree
        .leave_via(&[t(0, 1), t(0, 2), t(0, 3)], &[root])
        .expect("fork failed");

    assert_eq!(children.len(), 3);
    for (i, child) in children.iter().enumerate() {
        let node = tree.node(*child).unwrap();
        assert!(node.active);
        assert!(node.concurrent);
        assert_eq!(node.parent, Some(root));
        assert_eq!(node.current_activity, Some(i + 1));
        assert_eq!(tree.concurrency_root(*child).unwrap(), root);
    }

    let root_node = tree.node(root).unwrap();
    assert!(!root_node.active, "fork anchor parks inactive");
    assert!(root_node.scope);
    assert_eq!(root_node.children, children);
}

#[test]
fn find_inactive_counts_only_parked_siblings_at_the_activity() {
    let tree = ExecutionTree::new(0);
    let root = tree.root();
    let children = tree
        .leave_via(&[t(0, 1), t(0, 1), t(0, 2)], &[root])
        .unwrap();
    let (c0, c1, c2) = (children[0], children[1], children[2]);

    tree.inactivate(c1).unwrap();
    assert_eq!(
        tree.find_inactive_concurrent_executions(c1, 1).unwrap(),
        vec![c1],
        "active siblings at the activity are not counted"
    );

    tree.inactivate(c0).unwrap();
    assert_eq!(
        tree.find_inactive_concurrent_executions(c1, 1).unwrap(),
        vec![c0, c1],
        "ordered by the root's child order"
    );

    tree.inactivate(c2).unwrap();
    assert_eq!(
        tree.find_inactive_concurrent_executions(c2, 2).unwrap(),
        vec![c2],
        "siblings parked at other activities are not counted"
    );
}

#[test]
fn find_inactive_for_a_non_concurrent_execution_is_itself() {
    let tree = ExecutionTree::new(0);
    let root = tree.root();

    assert!(
        tree.find_inactive_concurrent_executions(root, 0)
            .unwrap()
            .is_empty(),
        "an active token has not arrived yet"
    );

    tree.inactivate(root).unwrap();
    assert_eq!(
        tree.find_inactive_concurrent_executions(root, 0).unwrap(),
        vec![root]
    );
}

#[test]
fn join_collapses_back_into_the_concurrency_root() {
    let tree = ExecutionTree::new(0);
    let root = tree.root();
    let children = tree.leave_via(&[t(0, 1), t(0, 1)], &[root]).unwrap();
    for child in &children {
        tree.inactivate(*child).unwrap();
    }

    let next = tree.leave_via(&[t(1, 2)], &children).expect("join failed");

    assert_eq!(next, vec![root]);
    let root_node = tree.node(root).unwrap();
    assert!(root_node.active);
    assert!(root_node.scope, "the instance root is always a scope");
    assert_eq!(root_node.current_activity, Some(2));
    assert!(root_node.children.is_empty());
    assert_eq!(tree.len(), 1);
    for child in children {
        assert!(!tree.contains(child), "joined executions are retired");
    }
}

#[test]
fn join_with_several_outgoing_transitions_reforks() {
    let tree = ExecutionTree::new(0);
    let root = tree.root();
    let first = tree.leave_via(&[t(0, 1), t(0, 1)], &[root]).unwrap();
    for child in &first {
        tree.inactivate(*child).unwrap();
    }

    let second = tree.leave_via(&[t(1, 2), t(1, 3)], &first).unwrap();

    assert_eq!(second.len(), 2);
    let root_node = tree.node(root).unwrap();
    assert!(!root_node.active, "root keeps anchoring the new branches");
    assert_eq!(root_node.children, second);
    for child in first {
        assert!(!tree.contains(child));
    }
}

#[test]
fn nested_forks_get_their_own_concurrency_root() {
    let tree = ExecutionTree::new(0);
    let root = tree.root();
    let outer = tree.leave_via(&[t(0, 1), t(0, 1)], &[root]).unwrap();
    let (a, b) = (outer[0], outer[1]);

    let inner = tree.leave_via(&[t(1, 2), t(1, 3)], &[a]).unwrap();

    for child in &inner {
        assert_eq!(
            tree.concurrency_root(*child).unwrap(),
            a,
            "inner branches are scoped to the forked token, not the outer root"
        );
    }
    assert_eq!(tree.concurrency_root(b).unwrap(), root);

    // Inner join resumes the branch token; the outer structure is intact.
    for child in &inner {
        tree.inactivate(*child).unwrap();
    }
    let resumed = tree.leave_via(&[t(2, 4)], &inner).unwrap();
    assert_eq!(resumed, vec![a]);
    let a_node = tree.node(a).unwrap();
    assert!(a_node.active);
    assert!(a_node.concurrent, "still one of the outer branches");
    assert!(
        !a_node.scope,
        "a collapsed fork anchor is a plain token again"
    );
    assert_eq!(a_node.parent, Some(root));
    assert_eq!(
        tree.concurrency_root(a).unwrap(),
        root,
        "follow-up joins count against the outer root"
    );
}

#[tokio::test]
async fn operations_on_missing_executions_are_stale() {
    let tree = ExecutionTree::new(0);
    let ghost = Uuid::new_v4();

    assert!(matches!(
        tree.inactivate(ghost),
        Err(EngineError::StaleExecution(id)) if id == ghost
    ));
    assert!(matches!(tree.node(ghost), Err(EngineError::StaleExecution(_))));
    assert!(matches!(
        tree.leave_via(&[t(0, 1)], &[ghost]),
        Err(EngineError::StaleExecution(_))
    ));
    assert!(matches!(
        tree.cancel(ghost).await,
        Err(EngineError::StaleExecution(_))
    ));
}

#[test]
fn leave_via_rejects_empty_inputs() {
    let tree = ExecutionTree::new(0);
    let root = tree.root();

    assert!(matches!(
        tree.leave_via(&[], &[root]),
        Err(EngineError::Invariant(_))
    ));
    assert!(matches!(
        tree.leave_via(&[t(0, 1)], &[]),
        Err(EngineError::Invariant(_))
    ));
}

#[tokio::test]
async fn cancel_retires_a_whole_subtree() {
    let tree = ExecutionTree::new(0);
    let root = tree.root();
    let outer = tree.leave_via(&[t(0, 1), t(0, 1)], &[root]).unwrap();
    let (a, b) = (outer[0], outer[1]);
    let inner = tree.leave_via(&[t(1, 2), t(1, 3)], &[a]).unwrap();

    tree.cancel(a).await.expect("cancel failed");

    assert!(!tree.contains(a));
    for child in inner {
        assert!(!tree.contains(child));
    }
    assert!(tree.contains(b));
    assert_eq!(tree.node(root).unwrap().children, vec![b]);
    assert!(!tree.has_ended());

    tree.cancel(root).await.unwrap();
    assert!(tree.is_empty());
    assert!(tree.has_ended());
}

#[test]
fn snapshot_round_trips_every_execution_attribute() {
    let tree = ExecutionTree::new(0);
    let root = tree.root();
    let children = tree.leave_via(&[t(0, 1), t(0, 2)], &[root]).unwrap();
    tree.inactivate(children[0]).unwrap();

    let snapshot = tree.snapshot();
    let json = serde_json::to_string(&snapshot).expect("serialize failed");
    let decoded: TreeSnapshot = serde_json::from_str(&json).expect("deserialize failed");
    let restored = ExecutionTree::restore(decoded);

    assert_eq!(restored.root(), root);
    assert_eq!(restored.len(), tree.len());
    assert!(!restored.has_ended());
    for id in [root, children[0], children[1]] {
        assert_eq!(restored.node(id).unwrap(), tree.node(id).unwrap());
    }
}

#[tokio::test]
async fn lock_guard_scopes_to_the_concurrency_root() {
    let tree = ExecutionTree::new(0);
    let root = tree.root();
    let children = tree.leave_via(&[t(0, 1), t(0, 1)], &[root]).unwrap();

    let guard = tree.lock_concurrency_root(children[0]).await.unwrap();
    assert_eq!(guard.root(), root, "siblings map to the shared ancestor");
    drop(guard);

    let guard = tree.lock_concurrency_root(root).await.unwrap();
    assert_eq!(guard.root(), root, "a non-concurrent execution is its own root");
}

#[tokio::test]
async fn bounded_lock_wait_times_out() {
    let tree = ExecutionTree::new(0).with_lock_timeout(Duration::from_millis(50));
    let root = tree.root();
    let children = tree.leave_via(&[t(0, 1), t(0, 1)], &[root]).unwrap();

    let _held = tree.lock_concurrency_root(children[0]).await.unwrap();
    let result = tree.lock_concurrency_root(children[1]).await;

    assert!(matches!(
        result,
        Err(EngineError::LockTimeout { root: r, .. }) if r == root
    ));
}
