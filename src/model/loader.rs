use anyhow::{Context as AnyhowContext, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::model::{ActivityKind, DefinitionBuilder, ProcessDefinition};

/// Raw YAML form of a process definition. Activities and transitions
/// reference each other by string id; resolution to indices happens in
/// the builder.
#[derive(Debug, Deserialize)]
pub struct RawDefinition {
    pub id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub initial: Option<String>,
    pub activities: Vec<RawActivity>,
    #[serde(default)]
    pub transitions: Vec<RawTransition>,
}

#[derive(Debug, Deserialize)]
pub struct RawActivity {
    pub id: String,
    pub kind: ActivityKind,
}

#[derive(Debug, Deserialize)]
pub struct RawTransition {
    pub from: String,
    pub to: String,
}

pub fn load_definition_from_yaml(path: impl AsRef<Path>) -> Result<ProcessDefinition> {
    let path = path.as_ref();
    let yaml_content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read YAML file from {}", path.display()))?;

    let raw: RawDefinition = serde_yaml::from_str(&yaml_content)
        .with_context(|| format!("Failed to deserialize YAML content from {}", path.display()))?;

    let mut builder = DefinitionBuilder::new(&raw.id);
    if let Some(name) = &raw.name {
        builder = builder.name(name);
    }
    for activity in &raw.activities {
        builder = builder.activity(&activity.id, activity.kind);
    }
    for transition in &raw.transitions {
        builder = builder.transition(&transition.from, &transition.to);
    }
    if let Some(initial) = &raw.initial {
        builder = builder.initial(initial);
    }

    builder
        .build()
        .with_context(|| format!("Invalid process definition in {}", path.display()))
}
