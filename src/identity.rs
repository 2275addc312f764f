// Identity pool for Aperture
// Named users with credentials and the object identifiers they own, read from YAML

use crate::error::ConfigError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

pub const DEFAULT_AUTH_HEADER: &str = "Authorization";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Header,
    Cookie,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "type")]
    pub kind: CredentialKind,
    pub value: String,
    /// Header to carry a header credential in; the pool default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub auth: Credential,
    /// Field name to value: path/query/header substitutions and body overrides.
    #[serde(default, deserialize_with = "scalar_fields")]
    pub fields: BTreeMap<String, String>,
}

impl Identity {
    pub fn new(name: &str, auth: Credential) -> Self {
        Self {
            name: name.to_string(),
            auth,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.fields.insert(name.to_string(), value.to_string());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityPool {
    #[serde(default)]
    pub users: Vec<Identity>,
    #[serde(default)]
    pub default_auth_header_name: String,
}

impl Default for IdentityPool {
    fn default() -> Self {
        Self {
            users: Vec::new(),
            default_auth_header_name: DEFAULT_AUTH_HEADER.to_string(),
        }
    }
}

impl IdentityPool {
    pub fn new(users: Vec<Identity>) -> Result<Self, ConfigError> {
        let pool = Self {
            users,
            ..Self::default()
        };
        pool.validate()?;
        Ok(pool)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let mut pool: IdentityPool = serde_yaml::from_str(content)?;
        if pool.default_auth_header_name.trim().is_empty() {
            pool.default_auth_header_name = DEFAULT_AUTH_HEADER.to_string();
        }
        for user in &mut pool.users {
            if user.auth.header_name.as_deref().map_or(false, |h| h.trim().is_empty()) {
                user.auth.header_name = None;
            }
        }
        pool.validate()?;
        Ok(pool)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for (idx, user) in self.users.iter().enumerate() {
            if user.name.trim().is_empty() {
                return Err(ConfigError::EmptyName(idx));
            }
            if !seen.insert(user.name.as_str()) {
                return Err(ConfigError::DuplicateIdentity(user.name.clone()));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Field names per identity that do not appear in `known`, for identities that have any.
    pub fn unknown_fields(&self, known: &BTreeSet<String>) -> Vec<(&Identity, Vec<&str>)> {
        self.users
            .iter()
            .filter_map(|user| {
                let unknown: Vec<&str> = user
                    .fields
                    .keys()
                    .filter(|name| !known.contains(*name))
                    .map(String::as_str)
                    .collect();
                (!unknown.is_empty()).then_some((user, unknown))
            })
            .collect()
    }
}

// Field values may be any YAML scalar; they are used as strings.
fn scalar_fields<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, serde_yaml::Value>> = Option::deserialize(deserializer)?;
    let mut fields = BTreeMap::new();
    for (name, value) in raw.unwrap_or_default() {
        let text = match value {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Null => String::new(),
            _ => {
                return Err(serde::de::Error::custom(format!(
                    "field '{}' must be a scalar value",
                    name
                )))
            }
        };
        fields.insert(name, text);
    }
    Ok(fields)
}
