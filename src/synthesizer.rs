// Request body synthesis for Aperture
//
// Builds a JSON value that satisfies a schema's required shape, preferring
// the object owner's field values over generated placeholders.
//
//   schema:  {type: object, required: [owner, title], properties: {...}}
//   fields:  {owner: "alice"}
//   result:  {"owner": "alice", "title": "example"}

use crate::contract::Contract;
use crate::schema::{component_name, Schema};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

pub const EXAMPLE_STRING: &str = "example";
pub const EXAMPLE_EMAIL: &str = "user@example.com";
pub const EXAMPLE_UUID: &str = "123e4567-e89b-12d3-a456-426614174000";
pub const EXAMPLE_URI: &str = "https://example.com/resource";
pub const EXAMPLE_HOSTNAME: &str = "example.com";
pub const EXAMPLE_IPV4: &str = "203.0.113.10";
pub const EXAMPLE_IPV6: &str = "2001:db8::1";

pub struct BodySynthesizer<'a> {
    contract: &'a Contract,
}

impl<'a> BodySynthesizer<'a> {
    pub fn new(contract: &'a Contract) -> Self {
        Self { contract }
    }

    /// Synthesize a value for `schema`. `Value::Null` means no usable body.
    pub fn synthesize(&self, schema: &Schema, fields: &BTreeMap<String, String>) -> Value {
        let mut active_refs = Vec::new();
        self.build(schema, fields, &mut active_refs)
    }

    // `active_refs` holds the component names currently being expanded; meeting
    // one of them again means the schema refers to itself.
    fn build(
        &self,
        schema: &Schema,
        fields: &BTreeMap<String, String>,
        active_refs: &mut Vec<String>,
    ) -> Value {
        if let Some(reference) = &schema.reference {
            let Some(name) = component_name(reference) else {
                debug!(reference = %reference, "unsupported schema reference");
                return Value::Null;
            };
            if active_refs.iter().any(|active| active == name) {
                debug!(component = name, "self-referential schema, stopping expansion");
                return Value::Null;
            }
            let Some(target) = self.contract.resolve_schema_ref(reference) else {
                debug!(component = name, "unresolved schema reference");
                return Value::Null;
            };
            active_refs.push(name.to_string());
            let value = self.build(target, fields, active_refs);
            active_refs.pop();
            return value;
        }

        // Composition: first alternative only
        if let Some(first) = schema
            .one_of
            .first()
            .or(schema.any_of.first())
            .or(schema.all_of.first())
        {
            return self.build(first, fields, active_refs);
        }

        match &schema.schema_type {
            Some(t) if !t.is("object") => {
                explicit_value(schema).unwrap_or_else(|| self.dummy(schema, active_refs))
            }
            Some(_) => self.object(schema, fields, active_refs),
            None => explicit_value(schema).unwrap_or_else(|| json!(EXAMPLE_STRING)),
        }
    }

    fn object(
        &self,
        schema: &Schema,
        fields: &BTreeMap<String, String>,
        active_refs: &mut Vec<String>,
    ) -> Value {
        let mut obj = Map::new();

        for name in &schema.required {
            let value = if let Some(v) = fields.get(name) {
                Value::String(v.clone())
            } else if let Some(prop) = schema.properties.get(name) {
                self.build(prop, fields, active_refs)
            } else {
                json!(EXAMPLE_STRING)
            };
            obj.insert(name.clone(), value);
        }

        // Optional properties are passed through, never generated
        for name in schema.properties.keys() {
            if schema.required.contains(name) {
                continue;
            }
            if let Some(v) = fields.get(name) {
                obj.insert(name.clone(), Value::String(v.clone()));
            }
        }

        Value::Object(obj)
    }

    fn dummy(&self, schema: &Schema, active_refs: &mut Vec<String>) -> Value {
        if schema.is_type("array") {
            return match &schema.items {
                Some(items) => json!([self.build(items, &BTreeMap::new(), active_refs)]),
                None => json!([EXAMPLE_STRING]),
            };
        }
        if schema.is_type("boolean") {
            return json!(true);
        }
        if schema.is_type("integer") {
            return json!(1);
        }
        if schema.is_type("number") {
            return json!(1.0);
        }
        Value::String(string_for_format(schema.format.as_deref(), schema.min_length))
    }
}

fn explicit_value(schema: &Schema) -> Option<Value> {
    schema
        .example
        .clone()
        .or_else(|| schema.default.clone())
        .or_else(|| schema.enum_values.first().cloned())
}

/// Placeholder string for a `format`, or `min_length` copies of 'a'.
pub fn string_for_format(format: Option<&str>, min_length: Option<u64>) -> String {
    let now = Utc::now();
    match format.map(str::to_ascii_lowercase).as_deref() {
        Some("email") => return EXAMPLE_EMAIL.to_string(),
        Some("uuid") => return EXAMPLE_UUID.to_string(),
        Some("date-time") => return now.to_rfc3339_opts(SecondsFormat::Secs, true),
        Some("date") => return now.format("%Y-%m-%d").to_string(),
        Some("time") => return now.format("%H:%M:%SZ").to_string(),
        Some("uri") => return EXAMPLE_URI.to_string(),
        Some("hostname") => return EXAMPLE_HOSTNAME.to_string(),
        Some("ipv4") => return EXAMPLE_IPV4.to_string(),
        Some("ipv6") => return EXAMPLE_IPV6.to_string(),
        _ => {}
    }
    match min_length {
        Some(n) if n > 0 => "a".repeat(n as usize),
        _ => EXAMPLE_STRING.to_string(),
    }
}
