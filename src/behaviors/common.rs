use tracing::debug;
use uuid::Uuid;

use crate::behaviors::ArrivalCx;
use crate::runtime::error::EngineError;

/// Automatic step: leaves via all outgoing transitions as soon as the
/// token arrives. Several outgoing transitions act as an implicit fork;
/// none parks the token.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskBehavior;

impl TaskBehavior {
    pub fn on_arrival(&self, cx: &ArrivalCx<'_>) -> Result<Vec<Uuid>, EngineError> {
        let outgoing = cx.definition.outgoing_transitions(cx.activity)?;
        if outgoing.is_empty() {
            // Dead end without an explicit end event.
            cx.tree.inactivate(cx.execution)?;
            return Ok(Vec::new());
        }
        cx.tree.leave_via(outgoing, &[cx.execution])
    }
}

/// Wait state: the token stays active at the activity until the driver
/// signals it onward.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitBehavior;

impl WaitBehavior {
    pub fn on_arrival(&self, cx: &ArrivalCx<'_>) -> Result<Vec<Uuid>, EngineError> {
        let activity = cx.definition.activity(cx.activity)?;
        debug!(activity = %activity.id, execution = %cx.execution, "execution waiting");
        Ok(Vec::new())
    }
}

/// End event: retires the arriving token. The instance ends when the
/// root execution retires.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndBehavior;

impl EndBehavior {
    pub async fn on_arrival(&self, cx: &ArrivalCx<'_>) -> Result<Vec<Uuid>, EngineError> {
        cx.tree.cancel(cx.execution).await?;
        Ok(Vec::new())
    }
}
