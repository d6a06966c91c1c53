use tracing::info;
use uuid::Uuid;

use crate::behaviors::ArrivalCx;
use crate::runtime::error::EngineError;
use crate::runtime::tree::GatewayDecision;

/// Parallel (AND) gateway.
///
/// Splits one path of execution into one path per outgoing transition,
/// and merges incoming paths by holding each arriving token until as
/// many tokens are parked at the gateway as the activity declares
/// incoming transitions.
///
/// The join compares the arrival count against the declared number of
/// incoming transitions, not against the distinct flows actually
/// traversed. If two tokens arrive through the same incoming transition
/// the gateway still activates once the count is reached, even though
/// another incoming transition contributed nothing. This deviation from
/// the per-flow rule is deliberate and covered by tests; do not
/// "correct" it.
///
/// Outgoing transitions carry no conditions; when the gateway activates,
/// all of them are taken.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelGatewayBehavior;

impl ParallelGatewayBehavior {
    pub async fn on_arrival(&self, cx: &ArrivalCx<'_>) -> Result<Vec<Uuid>, EngineError> {
        let activity = cx.definition.activity(cx.activity)?;
        let outgoing = cx.definition.outgoing_transitions(cx.activity)?;

        // Park the arriving token so it is countable, then serialize the
        // count-and-decide sequence against sibling arrivals. The guard
        // releases the root on every path out of this function.
        cx.tree.inactivate(cx.execution)?;
        let _root = cx.tree.lock_concurrency_root(cx.execution).await?;

        let joined = cx
            .tree
            .find_inactive_concurrent_executions(cx.execution, cx.activity)?;
        let required = cx.definition.incoming_transition_count(cx.activity)?;

        if joined.len() == required {
            // Commit first: a failed leave_via must not leave a fire in
            // the decision log.
            let next = cx.tree.leave_via(outgoing, &joined)?;
            info!(
                activity = %activity.id,
                joined = joined.len(),
                required,
                "parallel gateway activated"
            );
            cx.tree.record_decision(GatewayDecision {
                activity: activity.id.clone(),
                joined: joined.len(),
                required,
                fired: true,
            });
            Ok(next)
        } else {
            info!(
                activity = %activity.id,
                joined = joined.len(),
                required,
                "parallel gateway not yet activated"
            );
            cx.tree.record_decision(GatewayDecision {
                activity: activity.id.clone(),
                joined: joined.len(),
                required,
                fired: false,
            });
            Ok(Vec::new())
        }
    }
}
