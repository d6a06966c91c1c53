pub mod common;
pub mod gateway;

use uuid::Uuid;

use crate::behaviors::common::{EndBehavior, TaskBehavior, WaitBehavior};
use crate::behaviors::gateway::ParallelGatewayBehavior;
use crate::model::{ActivityIndex, ActivityKind, ProcessDefinition};
use crate::runtime::error::EngineError;
use crate::runtime::tree::ExecutionTree;

/// Everything a behavior may touch while handling one arrival: the
/// read-only graph, the instance's tree, and the arriving execution.
pub struct ArrivalCx<'a> {
    pub definition: &'a ProcessDefinition,
    pub tree: &'a ExecutionTree,
    pub execution: Uuid,
    pub activity: ActivityIndex,
}

/// Tagged dispatch over activity behaviors, resolved once per activity
/// when a definition is registered.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Task(TaskBehavior),
    ParallelGateway(ParallelGatewayBehavior),
    Wait(WaitBehavior),
    End(EndBehavior),
}

impl Behavior {
    pub fn for_kind(kind: ActivityKind) -> Self {
        match kind {
            ActivityKind::Task => Behavior::Task(TaskBehavior),
            ActivityKind::ParallelGateway => Behavior::ParallelGateway(ParallelGatewayBehavior),
            ActivityKind::Wait => Behavior::Wait(WaitBehavior),
            ActivityKind::End => Behavior::End(EndBehavior),
        }
    }

    /// Handles one "execution arrived at activity" event. Returns the
    /// executions the arrival made active; the engine enqueues each as a
    /// fresh arrival instead of recursing.
    pub async fn on_arrival(&self, cx: &ArrivalCx<'_>) -> Result<Vec<Uuid>, EngineError> {
        match self {
            Behavior::Task(b) => b.on_arrival(cx),
            Behavior::ParallelGateway(b) => b.on_arrival(cx).await,
            Behavior::Wait(b) => b.on_arrival(cx),
            Behavior::End(b) => b.on_arrival(cx).await,
        }
    }
}

/// Lookup table parallel to the definition's activity table.
pub fn behavior_table(definition: &ProcessDefinition) -> Vec<Behavior> {
    definition
        .activities
        .iter()
        .map(|a| Behavior::for_kind(a.kind))
        .collect()
}
