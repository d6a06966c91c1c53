use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::behaviors::{ArrivalCx, Behavior, behavior_table};
use crate::model::{ActivityIndex, ActivityKind, ProcessDefinition};
use crate::runtime::error::EngineError;
use crate::runtime::execution::TreeSnapshot;
use crate::runtime::tree::{ExecutionTree, GatewayDecision};

/// One "execution arrived at an activity" event.
#[derive(Debug, Clone)]
pub struct Arrival {
    pub instance_id: Uuid,
    pub execution_id: Uuid,
    pub activity: ActivityIndex,
}

struct Instance {
    definition: Arc<ProcessDefinition>,
    behaviors: Arc<Vec<Behavior>>,
    tree: ExecutionTree,
    /// Arrivals queued or currently being handled for this instance.
    in_flight: AtomicUsize,
}

/// Drives process instances by draining an explicit arrival queue.
///
/// Behaviors never recurse into one another: each execution made active
/// by an arrival is put back on the queue as a fresh event, so any
/// number of workers can drain the queue concurrently.
pub struct Engine {
    definitions: DashMap<String, Arc<ProcessDefinition>>,
    behavior_cache: DashMap<String, Arc<Vec<Behavior>>>,
    instances: DashMap<Uuid, Arc<Instance>>,
    sender: mpsc::Sender<Arrival>,
    receiver: Mutex<mpsc::Receiver<Arrival>>,
    lock_timeout: Option<Duration>,
}

impl Engine {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(100);
        Self {
            definitions: DashMap::new(),
            behavior_cache: DashMap::new(),
            instances: DashMap::new(),
            sender: tx,
            receiver: Mutex::new(rx),
            lock_timeout: None,
        }
    }

    /// Bounds concurrency-root lock waits for all instances started
    /// after the call. Expired waits fail the arrival with
    /// `LockTimeout`, which the driver may redeliver.
    pub fn with_lock_timeout(mut self, wait: Duration) -> Self {
        self.lock_timeout = Some(wait);
        self
    }

    pub fn register_definition(&self, definition: ProcessDefinition) {
        let id = definition.id.clone();
        let behaviors = Arc::new(behavior_table(&definition));
        self.definitions.insert(id.clone(), Arc::new(definition));
        self.behavior_cache.insert(id, behaviors);
    }

    /// Creates an instance of the definition with a single root
    /// execution at the initial activity and enqueues its first arrival.
    pub fn start_process(&self, definition_id: &str) -> Result<Uuid, EngineError> {
        let definition = self
            .definitions
            .get(definition_id)
            .map(|d| d.clone())
            .ok_or_else(|| EngineError::UnknownDefinition(definition_id.to_string()))?;
        let behaviors = self
            .behavior_cache
            .get(definition_id)
            .map(|b| b.clone())
            .ok_or_else(|| EngineError::UnknownDefinition(definition_id.to_string()))?;

        let mut tree = ExecutionTree::new(definition.initial);
        if let Some(wait) = self.lock_timeout {
            tree = tree.with_lock_timeout(wait);
        }
        let root = tree.root();
        let initial = definition.initial;

        let instance_id = Uuid::new_v4();
        let instance = Arc::new(Instance {
            definition,
            behaviors,
            tree,
            in_flight: AtomicUsize::new(0),
        });
        self.instances.insert(instance_id, instance.clone());

        info!(%instance_id, definition = definition_id, "process started");
        self.enqueue(
            &instance,
            Arrival {
                instance_id,
                execution_id: root,
                activity: initial,
            },
        );
        Ok(instance_id)
    }

    /// Drains arrivals until the queue closes. Safe to run from several
    /// tasks over the same `Arc<Engine>`; workers share one queue.
    pub async fn run_worker(&self) {
        loop {
            let arrival = {
                let mut rx = self.receiver.lock().await;
                match rx.recv().await {
                    Some(arrival) => arrival,
                    None => break,
                }
            };
            self.handle(arrival).await;
        }
    }

    async fn handle(&self, arrival: Arrival) {
        let Some(instance) = self.instances.get(&arrival.instance_id).map(|i| i.clone()) else {
            warn!(instance_id = %arrival.instance_id, "instance not found for arrival");
            return;
        };

        match self.dispatch(&instance, &arrival).await {
            Ok(next) => {
                for execution_id in next {
                    // Read where leave_via positioned the execution; a
                    // node retired in the meantime is simply skipped.
                    let activity = instance
                        .tree
                        .node(execution_id)
                        .ok()
                        .and_then(|n| n.current_activity);
                    if let Some(activity) = activity {
                        self.enqueue(
                            &instance,
                            Arrival {
                                instance_id: arrival.instance_id,
                                execution_id,
                                activity,
                            },
                        );
                    }
                }
            }
            Err(EngineError::StaleExecution(id)) => {
                // The execution was retired by a concurrent join or a
                // cancellation; the event is obsolete.
                warn!(
                    instance_id = %arrival.instance_id,
                    execution = %id,
                    "discarding arrival for stale execution"
                );
            }
            Err(e) => {
                error!(
                    instance_id = %arrival.instance_id,
                    activity = arrival.activity,
                    error = %e,
                    "arrival failed"
                );
            }
        }

        instance.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    async fn dispatch(
        &self,
        instance: &Instance,
        arrival: &Arrival,
    ) -> Result<Vec<Uuid>, EngineError> {
        let behavior = instance
            .behaviors
            .get(arrival.activity)
            .ok_or(EngineError::UnknownActivity(arrival.activity))?;
        let activity_id = &instance.definition.activity(arrival.activity)?.id;

        let cx = ArrivalCx {
            definition: &instance.definition,
            tree: &instance.tree,
            execution: arrival.execution_id,
            activity: arrival.activity,
        };
        behavior
            .on_arrival(&cx)
            .await
            .map_err(|e| e.in_activity(activity_id))
    }

    fn enqueue(&self, instance: &Arc<Instance>, arrival: Arrival) {
        instance.in_flight.fetch_add(1, Ordering::SeqCst);
        // Sends are spawned so a worker never deadlocks against a full
        // channel it is itself draining.
        let sender = self.sender.clone();
        let instance = instance.clone();
        tokio::spawn(async move {
            if sender.send(arrival).await.is_err() {
                error!("failed to schedule arrival (queue closed?)");
                instance.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        });
    }

    /// Externally completes a waiting execution: the token leaves via
    /// its activity's outgoing transitions, or retires if there are
    /// none.
    ///
    /// Only an active token at a `Wait` activity may be signalled; a
    /// token parked inactive is owned by a pending join and moving it
    /// would falsify that join's arrival count.
    pub async fn signal(&self, instance_id: Uuid, execution_id: Uuid) -> Result<(), EngineError> {
        let instance = self.instance(instance_id)?;
        let node = instance.tree.node(execution_id)?;
        if !node.active {
            return Err(EngineError::Invariant(format!(
                "execution {execution_id} is parked inactive and cannot be signalled"
            )));
        }
        let index = node.current_activity.ok_or_else(|| {
            EngineError::Invariant(format!("execution {execution_id} is not positioned"))
        })?;
        let activity = instance.definition.activity(index)?;
        if activity.kind != ActivityKind::Wait {
            return Err(EngineError::Invariant(format!(
                "activity `{}` is not a wait state",
                activity.id
            )));
        }
        let outgoing = instance.definition.outgoing_transitions(index)?;
        if outgoing.is_empty() {
            instance.tree.cancel(execution_id).await?;
            return Ok(());
        }

        let next = instance.tree.leave_via(outgoing, &[execution_id])?;
        for execution_id in next {
            if let Some(activity) = instance
                .tree
                .node(execution_id)
                .ok()
                .and_then(|n| n.current_activity)
            {
                self.enqueue(
                    &instance,
                    Arrival {
                        instance_id,
                        execution_id,
                        activity,
                    },
                );
            }
        }
        Ok(())
    }

    /// Externally cancels an execution and its whole subtree.
    pub async fn cancel_execution(
        &self,
        instance_id: Uuid,
        execution_id: Uuid,
    ) -> Result<(), EngineError> {
        let instance = self.instance(instance_id)?;
        instance.tree.cancel(execution_id).await
    }

    /// True once the instance's root execution has retired and no
    /// arrivals remain in flight for it.
    pub fn is_completed(&self, instance_id: Uuid) -> bool {
        self.instances
            .get(&instance_id)
            .map(|i| i.tree.has_ended() && i.in_flight.load(Ordering::SeqCst) == 0)
            .unwrap_or(false)
    }

    /// Activity ids of the currently active executions, sorted.
    pub fn active_activities(&self, instance_id: Uuid) -> Result<Vec<String>, EngineError> {
        let instance = self.instance(instance_id)?;
        let mut activities: Vec<String> = instance
            .tree
            .active_executions()
            .into_iter()
            .filter_map(|(_, idx)| instance.definition.activity(idx).ok().map(|a| a.id.clone()))
            .collect();
        activities.sort();
        Ok(activities)
    }

    /// Active execution ids positioned at the given activity.
    pub fn executions_at(
        &self,
        instance_id: Uuid,
        activity_id: &str,
    ) -> Result<Vec<Uuid>, EngineError> {
        let instance = self.instance(instance_id)?;
        let Some(index) = instance.definition.activity_index(activity_id) else {
            return Err(EngineError::Definition(format!(
                "unknown activity id: {activity_id}"
            )));
        };
        Ok(instance
            .tree
            .active_executions()
            .into_iter()
            .filter(|(_, idx)| *idx == index)
            .map(|(id, _)| id)
            .collect())
    }

    /// Join decision log of the instance, in commit order.
    pub fn decisions(&self, instance_id: Uuid) -> Result<Vec<GatewayDecision>, EngineError> {
        Ok(self.instance(instance_id)?.tree.decisions())
    }

    /// Persistence seam: serializable image of the instance's tree.
    pub fn snapshot(&self, instance_id: Uuid) -> Result<TreeSnapshot, EngineError> {
        Ok(self.instance(instance_id)?.tree.snapshot())
    }

    fn instance(&self, instance_id: Uuid) -> Result<Arc<Instance>, EngineError> {
        self.instances
            .get(&instance_id)
            .map(|i| i.clone())
            .ok_or(EngineError::UnknownInstance(instance_id))
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
