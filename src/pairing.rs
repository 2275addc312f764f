// Owner eligibility and owner/attacker pairing for Aperture
//
// An owner lends its identifiers to both requests of a pair; the attacker
// only lends its credential to the second one.

use crate::identity::Identity;
use crate::models::Operation;
use crate::requirements::RequirementSet;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // "{note_id}" in "/notes/{note_id}"
    pub(crate) static ref PATH_PLACEHOLDER: Regex = Regex::new(r"\{([^{}/]+)\}").unwrap();
}

/// One (owner, attacker) combination to test
#[derive(Debug, Clone, Copy)]
pub struct Pairing<'a> {
    pub owner: &'a Identity,
    pub attacker: &'a Identity,
}

/// Placeholder names of a path template, in order of appearance.
pub fn path_placeholders(path: &str) -> Vec<String> {
    PATH_PLACEHOLDER
        .captures_iter(path)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Identities holding every required path and query field.
pub fn eligible_owners<'a>(
    requirements: &RequirementSet,
    identities: &'a [Identity],
) -> Vec<&'a Identity> {
    identities
        .iter()
        .filter(|user| requirements.owner_supplied().all(|name| user.has_field(name)))
        .collect()
}

/// Every eligible owner against every other identity of the full pool.
pub fn pairs_for_owners<'a>(eligible: &[&'a Identity], all: &'a [Identity]) -> Vec<Pairing<'a>> {
    let mut pairs = Vec::with_capacity(eligible.len() * all.len().saturating_sub(1));
    for &owner in eligible {
        for attacker in all.iter().filter(|a| a.name != owner.name) {
            pairs.push(Pairing { owner, attacker });
        }
    }
    pairs
}

/// Whether the operation mentions any of the owner's field names in its path
/// placeholders, declared parameters or JSON body properties.
pub fn references_identity_fields(operation: &Operation, owner: &Identity) -> bool {
    if PATH_PLACEHOLDER
        .captures_iter(&operation.path)
        .any(|cap| owner.has_field(&cap[1]))
    {
        return true;
    }
    if operation.parameters.iter().any(|p| owner.has_field(&p.name)) {
        return true;
    }
    operation
        .body_schema()
        .map_or(false, |schema| schema.declared_names().any(|name| owner.has_field(name)))
}
