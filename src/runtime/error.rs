use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Failures surfaced by the execution core.
///
/// `StaleExecution` is recoverable: the driver should discard the event.
/// Everything else is fatal to the branch that raised it and propagates
/// to the driver unchanged.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The referenced execution is no longer in the tree (already joined
    /// away, completed, or cancelled by a concurrent operation).
    #[error("stale execution: {0}")]
    StaleExecution(Uuid),

    /// Bounded lock wait on a concurrency root expired. Only raised when
    /// a lock timeout is configured; otherwise acquisition blocks.
    #[error("timed out after {waited:?} waiting for concurrency root {root}")]
    LockTimeout { root: Uuid, waited: Duration },

    /// Wraps any failure raised while handling an arrival at an activity.
    #[error("activity `{activity}` failed: {source}")]
    Activity {
        activity: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("no activity at index {0}")]
    UnknownActivity(usize),

    #[error("unknown process definition: {0}")]
    UnknownDefinition(String),

    #[error("unknown process instance: {0}")]
    UnknownInstance(Uuid),

    /// Construction-time graph error: duplicate ids, dangling transition
    /// endpoints, missing initial activity.
    #[error("invalid definition: {0}")]
    Definition(String),

    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl EngineError {
    /// Wraps a behavior failure with the activity it arose in. Stale
    /// executions pass through unwrapped so drivers can still discard
    /// the event.
    pub fn in_activity(self, activity: &str) -> EngineError {
        match self {
            e @ EngineError::StaleExecution(_) => e,
            other => EngineError::Activity {
                activity: activity.to_string(),
                source: Box::new(other),
            },
        }
    }
}
