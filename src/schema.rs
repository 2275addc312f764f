// JSON Schema subset used by request bodies
// Only the keywords the body synthesizer and requirement extractor look at are modelled

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

const COMPONENT_SCHEMA_PREFIX: &str = "#/components/schemas/";

/// `type` may be a single name or (OpenAPI 3.1) a list of names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaType {
    Single(String),
    Multiple(Vec<String>),
}

impl SchemaType {
    pub fn is(&self, name: &str) -> bool {
        match self {
            SchemaType::Single(t) => t == name,
            SchemaType::Multiple(ts) => ts.iter().any(|t| t == name),
        }
    }
}

// Every keyword is read on its own: one that does not fit the model is
// dropped without taking its siblings or parent schema with it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "$ref", default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaType>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(rename = "minLength", default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(rename = "enum", default, deserialize_with = "lenient", skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<Value>,
    #[serde(rename = "oneOf", default, deserialize_with = "schema_list", skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<Schema>,
    #[serde(rename = "anyOf", default, deserialize_with = "schema_list", skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<Schema>,
    #[serde(rename = "allOf", default, deserialize_with = "schema_list", skip_serializing_if = "Vec::is_empty")]
    pub all_of: Vec<Schema>,
    #[serde(default, deserialize_with = "schema_box", skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
    #[serde(default, deserialize_with = "schema_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Schema>,
    /// Swagger 2 style `required: true` on a property is ignored.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl Schema {
    /// Read a schema from raw contract JSON. Anything but a mapping degrades to an empty schema.
    pub fn from_value(value: &Value) -> Schema {
        if !value.is_object() {
            warn!(found = %value, "schema is not a mapping, treating it as untyped");
            return Schema::default();
        }
        match serde_json::from_value(value.clone()) {
            Ok(schema) => schema,
            Err(e) => {
                warn!(error = %e, "unreadable schema, treating it as untyped");
                Schema::default()
            }
        }
    }

    pub fn reference(target: &str) -> Schema {
        Schema {
            reference: Some(target.to_string()),
            ..Schema::default()
        }
    }

    pub fn typed(name: &str) -> Schema {
        Schema {
            schema_type: Some(SchemaType::Single(name.to_string())),
            ..Schema::default()
        }
    }

    pub fn object<I>(properties: I, required: &[&str]) -> Schema
    where
        I: IntoIterator<Item = (&'static str, Schema)>,
    {
        Schema {
            schema_type: Some(SchemaType::Single("object".to_string())),
            properties: properties
                .into_iter()
                .map(|(name, schema)| (name.to_string(), schema))
                .collect(),
            required: required.iter().map(|r| r.to_string()).collect(),
            ..Schema::default()
        }
    }

    pub fn with_format(mut self, format: &str) -> Schema {
        self.format = Some(format.to_string());
        self
    }

    pub fn is_type(&self, name: &str) -> bool {
        self.schema_type.as_ref().map_or(false, |t| t.is(name))
    }

    /// Property and required names declared at the top level.
    pub fn declared_names(&self) -> impl Iterator<Item = &str> {
        self.properties
            .keys()
            .map(String::as_str)
            .chain(self.required.iter().map(String::as_str))
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(raw.clone()).unwrap_or_else(|e| {
        debug!(keyword = %raw, error = %e, "ignoring unreadable schema keyword");
        T::default()
    }))
}

fn schema_list<'de, D>(deserializer: D) -> Result<Vec<Schema>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(raw
        .as_array()
        .map(|items| items.iter().map(Schema::from_value).collect())
        .unwrap_or_default())
}

fn schema_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, Schema>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(raw
        .as_object()
        .map(|props| {
            props
                .iter()
                .map(|(name, schema)| (name.clone(), Schema::from_value(schema)))
                .collect()
        })
        .unwrap_or_default())
}

fn schema_box<'de, D>(deserializer: D) -> Result<Option<Box<Schema>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok((!raw.is_null()).then(|| Box::new(Schema::from_value(&raw))))
}

/// Component name behind a local `#/components/schemas/<Name>` reference.
pub fn component_name(reference: &str) -> Option<&str> {
    reference
        .strip_prefix(COMPONENT_SCHEMA_PREFIX)
        .filter(|name| !name.is_empty())
}
