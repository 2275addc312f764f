// Requirement extraction for Aperture
// Which inputs an operation needs, and where each one goes

use crate::models::{Operation, ParameterLocation};
use std::collections::BTreeMap;

/// Required input name to its placement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequirementSet {
    entries: BTreeMap<String, ParameterLocation>,
}

impl RequirementSet {
    pub fn insert(&mut self, name: &str, location: ParameterLocation) {
        self.entries.insert(name.to_string(), location);
    }

    pub fn get(&self, name: &str) -> Option<ParameterLocation> {
        self.entries.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ParameterLocation)> {
        self.entries.iter().map(|(name, loc)| (name.as_str(), *loc))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names an object owner must supply itself. Headers come from the caller
    /// and body fields are synthesized, so only path and query count.
    pub fn owner_supplied(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|(_, loc)| matches!(loc, ParameterLocation::Path | ParameterLocation::Query))
            .map(|(name, _)| name)
    }
}

/// Required parameters (path-item and operation level) plus, for a required
/// JSON body, the top-level required property names of its schema.
pub fn required_inputs(operation: &Operation) -> RequirementSet {
    let mut set = RequirementSet::default();
    for p in operation.parameters.iter().filter(|p| p.required) {
        set.insert(&p.name, p.location);
    }
    if let Some(body) = operation.request_body.as_ref().filter(|rb| rb.required) {
        if let Some(schema) = &body.schema {
            // a declared parameter keeps its placement
            for name in &schema.required {
                if set.get(name).is_some() {
                    continue;
                }
                set.insert(name, ParameterLocation::Body);
            }
        }
    }
    set
}
