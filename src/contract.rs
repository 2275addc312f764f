// Navigable API contract model for Aperture
// Parsers hand back a Contract; the scan only ever reads it

use crate::error::ContractError;
use crate::models::Operation;
use crate::schema::{component_name, Schema};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct Contract {
    /// First declared server, with variables substituted and no trailing slash.
    pub base_url: Option<String>,
    /// Number of path items in the document.
    pub path_count: usize,
    pub operations: Vec<Operation>,
    /// Flat `components.schemas` dictionary.
    pub components: BTreeMap<String, Schema>,
    pub global_security: bool,
}

impl Contract {
    /// Operations in document order.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Look up a `#/components/schemas/<Name>` reference.
    pub fn resolve_schema_ref(&self, reference: &str) -> Option<&Schema> {
        component_name(reference).and_then(|name| self.components.get(name))
    }

    pub fn global_security_required(&self) -> bool {
        self.global_security
    }

    /// Whether the operation declares, or inherits, a security requirement.
    pub fn requires_auth(&self, operation: &Operation) -> bool {
        operation.security.unwrap_or(self.global_security)
    }

    /// Every input name the contract mentions anywhere: path placeholders,
    /// declared parameters and top-level JSON body properties.
    pub fn known_field_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for op in &self.operations {
            names.extend(crate::pairing::path_placeholders(&op.path));
            names.extend(op.parameters.iter().map(|p| p.name.clone()));
            if let Some(schema) = op.body_schema() {
                names.extend(schema.declared_names().map(str::to_string));
            }
        }
        names
    }
}

/// Trait for reading API contracts (OpenAPI JSON or YAML)
pub trait ContractParser {
    /// Parse contract text into the navigable model
    fn parse(&self, document: &str) -> Result<Contract, ContractError>;
}
