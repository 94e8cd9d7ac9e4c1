use std::collections::HashMap;

use serde::Serialize;

use crate::models::Entity;

/// Minimal change a renderer has to apply to go from one visible list to the next.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum MarkerDelta {
    Added(Entity),
    Updated(Entity),
    Removed { id: String },
}

impl MarkerDelta {
    pub fn id(&self) -> &str {
        match self {
            MarkerDelta::Added(e) | MarkerDelta::Updated(e) => &e.id,
            MarkerDelta::Removed { id } => id,
        }
    }
}

/// Removals in `old` order, then additions and updates in `new` order.
pub fn diff(old: &[Entity], new: &[Entity]) -> Vec<MarkerDelta> {
    let old_by_id: HashMap<&str, &Entity> = old.iter().map(|e| (e.id.as_str(), e)).collect();
    let new_by_id: HashMap<&str, &Entity> = new.iter().map(|e| (e.id.as_str(), e)).collect();

    let mut deltas: Vec<MarkerDelta> = old
        .iter()
        .filter(|e| !new_by_id.contains_key(e.id.as_str()))
        .map(|e| MarkerDelta::Removed { id: e.id.clone() })
        .collect();

    for entity in new {
        match old_by_id.get(entity.id.as_str()) {
            None => deltas.push(MarkerDelta::Added(entity.clone())),
            Some(previous) if *previous != entity => {
                deltas.push(MarkerDelta::Updated(entity.clone()))
            }
            Some(_) => {}
        }
    }
    deltas
}
