pub mod loader;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::runtime::error::EngineError;

pub type ActivityIndex = usize;

/// Directed edge of the process graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub source: ActivityIndex,
    pub target: ActivityIndex,
}

/// Behavior key of an activity, resolved once at definition load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// Automatic step: leaves via all outgoing transitions as soon as a
    /// token arrives. More than one outgoing transition acts as an
    /// implicit fork.
    Task,
    /// Fork/join coordination without conditions on outgoing flows.
    ParallelGateway,
    /// The token parks active until the instance is signalled from
    /// outside (receive/external task).
    Wait,
    /// Retires the arriving token; the instance ends when the root
    /// execution retires.
    End,
}

/// Graph vertex. Immutable after definition load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub kind: ActivityKind,
    pub outgoing: Vec<Transition>,
    /// Number of declared incoming transitions. Joins compare arrival
    /// counts against this number only; the identity of the flow a token
    /// actually traversed is never tracked.
    pub incoming: usize,
}

/// Immutable process graph, shared across all instances of the
/// definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub id: String,
    pub name: String,
    pub activities: Vec<Activity>,
    pub initial: ActivityIndex,
}

impl ProcessDefinition {
    pub fn activity(&self, index: ActivityIndex) -> Result<&Activity, EngineError> {
        self.activities
            .get(index)
            .ok_or(EngineError::UnknownActivity(index))
    }

    pub fn outgoing_transitions(&self, index: ActivityIndex) -> Result<&[Transition], EngineError> {
        Ok(&self.activity(index)?.outgoing)
    }

    pub fn incoming_transition_count(&self, index: ActivityIndex) -> Result<usize, EngineError> {
        Ok(self.activity(index)?.incoming)
    }

    pub fn activity_index(&self, id: &str) -> Option<ActivityIndex> {
        self.activities.iter().position(|a| a.id == id)
    }
}

/// Programmatic graph construction with string activity ids. Ids are
/// resolved to indices and incoming flows are counted at `build`.
pub struct DefinitionBuilder {
    id: String,
    name: String,
    activities: Vec<(String, ActivityKind)>,
    transitions: Vec<(String, String)>,
    initial: Option<String>,
}

impl DefinitionBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            activities: Vec::new(),
            transitions: Vec::new(),
            initial: None,
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn activity(mut self, id: &str, kind: ActivityKind) -> Self {
        self.activities.push((id.to_string(), kind));
        self
    }

    pub fn transition(mut self, from: &str, to: &str) -> Self {
        self.transitions.push((from.to_string(), to.to_string()));
        self
    }

    /// Overrides the initial activity. Defaults to the first activity
    /// added.
    pub fn initial(mut self, id: &str) -> Self {
        self.initial = Some(id.to_string());
        self
    }

    pub fn build(self) -> Result<ProcessDefinition, EngineError> {
        if self.activities.is_empty() {
            return Err(EngineError::Definition(format!(
                "definition `{}` has no activities",
                self.id
            )));
        }

        let mut index: HashMap<String, ActivityIndex> = HashMap::new();
        let mut activities = Vec::with_capacity(self.activities.len());
        for (idx, (id, kind)) in self.activities.into_iter().enumerate() {
            if index.insert(id.clone(), idx).is_some() {
                return Err(EngineError::Definition(format!("duplicate activity id: {id}")));
            }
            activities.push(Activity {
                id,
                kind,
                outgoing: Vec::new(),
                incoming: 0,
            });
        }

        let resolve = |id: &str| {
            index.get(id).copied().ok_or_else(|| {
                EngineError::Definition(format!("transition references unknown activity: {id}"))
            })
        };

        for (from, to) in &self.transitions {
            let source = resolve(from)?;
            let target = resolve(to)?;
            activities[source].outgoing.push(Transition { source, target });
            activities[target].incoming += 1;
        }

        let initial = match self.initial {
            Some(id) => resolve(&id)?,
            None => 0,
        };

        Ok(ProcessDefinition {
            id: self.id,
            name: self.name,
            activities,
            initial,
        })
    }
}
