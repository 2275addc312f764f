// OpenAPI 3 parser for Aperture
// Reads JSON or YAML documents into the Contract model, keeping document order

use crate::contract::{Contract, ContractParser};
use crate::error::ContractError;
use crate::models::{Method, Operation, Parameter, ParameterLocation, RequestBody};
use crate::schema::Schema;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

const JSON_CONTENT_TYPE: &str = "application/json";
const MAX_REF_HOPS: usize = 16;

pub struct OpenApiParser;

impl OpenApiParser {
    // JSON first, YAML otherwise. YAML goes through serde_yaml::Value so that
    // unquoted numeric keys (response codes) survive the conversion.
    fn read_document(document: &str) -> Result<Value, ContractError> {
        if document.trim_start().starts_with('{') {
            if let Ok(json) = serde_json::from_str::<Value>(document) {
                return Ok(json);
            }
        }
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(document).map_err(|e| ContractError::Parse(e.to_string()))?;
        serde_json::to_value(yaml).map_err(|e| ContractError::Parse(e.to_string()))
    }

    // Resolve local JSON Pointer refs like "/components/parameters/Id"
    fn resolve_local_ref<'a>(root: &'a Value, pointer: &str) -> Option<&'a Value> {
        let path = pointer.strip_prefix('/')?;
        let mut cur = root;
        for part in path.split('/') {
            let part = part.replace("~1", "/").replace("~0", "~");
            cur = cur.get(part.as_str())?;
        }
        Some(cur)
    }

    // Follow local `$ref` chains; anything unresolvable is returned as-is
    fn deref<'a>(root: &'a Value, value: &'a Value) -> &'a Value {
        let mut current = value;
        for _ in 0..MAX_REF_HOPS {
            let next = current
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix('#'))
                .and_then(|pointer| OpenApiParser::resolve_local_ref(root, pointer));
            match next {
                Some(v) => current = v,
                None => break,
            }
        }
        current
    }

    // If server URL contains variables like {env}, replace with defaults when available
    fn server_with_vars(server: &Value) -> Option<String> {
        let url = server.get("url")?.as_str()?;
        let mut result = url.to_string();
        if let Some(vars) = server.get("variables").and_then(|v| v.as_object()) {
            for (k, v) in vars {
                if let Some(def) = v.get("default").and_then(|d| d.as_str()) {
                    result = result.replace(&format!("{{{}}}", k), def);
                }
            }
        }
        Some(result)
    }

    fn parameters(root: &Value, list: Option<&Value>) -> Vec<Parameter> {
        let mut out = Vec::new();
        for raw in list.and_then(Value::as_array).into_iter().flatten() {
            let p = OpenApiParser::deref(root, raw);
            let Some(name) = p.get("name").and_then(Value::as_str) else {
                continue;
            };
            let location = p.get("in").and_then(Value::as_str).unwrap_or_default();
            let Some(location) = ParameterLocation::from_openapi(location) else {
                debug!(parameter = name, location, "ignoring parameter location");
                continue;
            };
            out.push(Parameter {
                name: name.to_string(),
                location,
                required: p.get("required").and_then(Value::as_bool).unwrap_or(false),
            });
        }
        out
    }

    // Operation-level parameters replace path-level ones with the same name and location
    fn merge_parameters(path_level: Vec<Parameter>, op_level: Vec<Parameter>) -> Vec<Parameter> {
        let mut merged: Vec<Parameter> = path_level
            .into_iter()
            .filter(|p| {
                !op_level
                    .iter()
                    .any(|o| o.name == p.name && o.location == p.location)
            })
            .collect();
        merged.extend(op_level);
        merged
    }

    fn request_body(root: &Value, details: &Value) -> Option<RequestBody> {
        let rb = OpenApiParser::deref(root, details.get("requestBody")?);
        let schema = rb
            .get("content")
            .and_then(|c| c.get(JSON_CONTENT_TYPE))
            .and_then(|media| media.get("schema"))
            .map(|s| Schema::from_value(OpenApiParser::deref(root, s)));
        Some(RequestBody {
            required: rb.get("required").and_then(Value::as_bool).unwrap_or(false),
            schema,
        })
    }

    fn security_flag(value: Option<&Value>) -> Option<bool> {
        value.map(|v| v.as_array().map_or(false, |reqs| !reqs.is_empty()))
    }
}

impl ContractParser for OpenApiParser {
    fn parse(&self, document: &str) -> Result<Contract, ContractError> {
        let root = OpenApiParser::read_document(document)?;
        if !root.is_object() {
            return Err(ContractError::Invalid(
                "top level of the document must be a mapping".to_string(),
            ));
        }
        if root.get("openapi").is_none() {
            warn!("document has no 'openapi' version field; reading it as OpenAPI 3");
        }

        // Prefer servers[0].url and substitute variables if present
        let base_url = root
            .get("servers")
            .and_then(|s| s.as_array())
            .and_then(|arr| arr.first())
            .and_then(OpenApiParser::server_with_vars)
            .map(|s| s.trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty());

        let components: BTreeMap<String, Schema> = root
            .pointer("/components/schemas")
            .and_then(Value::as_object)
            .map(|schemas| {
                schemas
                    .iter()
                    .map(|(name, raw)| (name.clone(), Schema::from_value(raw)))
                    .collect()
            })
            .unwrap_or_default();

        let global_security = OpenApiParser::security_flag(root.get("security")).unwrap_or(false);

        let mut operations = Vec::new();
        let mut path_count = 0;
        if let Some(paths) = root.get("paths").and_then(Value::as_object) {
            path_count = paths.len();
            for (path, item) in paths {
                let item = OpenApiParser::deref(&root, item);
                let shared = OpenApiParser::parameters(&root, item.get("parameters"));
                for method in Method::ALL {
                    let Some(details) = item.get(method.path_item_key()) else {
                        continue;
                    };
                    let own = OpenApiParser::parameters(&root, details.get("parameters"));
                    operations.push(Operation {
                        method,
                        path: path.clone(),
                        parameters: OpenApiParser::merge_parameters(shared.clone(), own),
                        request_body: OpenApiParser::request_body(&root, details),
                        security: OpenApiParser::security_flag(details.get("security")),
                    });
                }
            }
        } else {
            warn!("document declares no paths");
        }

        debug!(
            paths = path_count,
            operations = operations.len(),
            components = components.len(),
            "contract parsed"
        );
        Ok(Contract {
            base_url,
            path_count,
            operations,
            components,
            global_security,
        })
    }
}

/// Load a contract from a local file or an http(s) URL.
pub async fn load_contract(location: &str) -> Result<Contract, ContractError> {
    let document = if location.starts_with("http://") || location.starts_with("https://") {
        let fetch_err = |source| ContractError::Fetch {
            url: location.to_string(),
            source,
        };
        let resp = reqwest::get(location)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fetch_err)?;
        resp.text().await.map_err(fetch_err)?
    } else {
        std::fs::read_to_string(location).map_err(|source| ContractError::Io {
            path: location.into(),
            source,
        })?
    };
    OpenApiParser.parse(&document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn local_ref_unescapes_pointer_tokens() {
        let root = json!({"paths": {"/a/b": {"x~y": 1}}});
        let found = OpenApiParser::resolve_local_ref(&root, "/paths/~1a~1b/x~0y");
        assert_eq!(found, Some(&json!(1)));
        assert!(OpenApiParser::resolve_local_ref(&root, "paths").is_none());
    }

    #[test]
    fn deref_stops_on_ref_cycles() {
        let root = json!({"components": {"parameters": {
            "A": {"$ref": "#/components/parameters/B"},
            "B": {"$ref": "#/components/parameters/A"}
        }}});
        let start = json!({"$ref": "#/components/parameters/A"});
        let resolved = OpenApiParser::deref(&root, &start);
        assert!(resolved.get("$ref").is_some());
    }

    #[test]
    fn server_variables_use_defaults() {
        let server = json!({
            "url": "https://{env}.example.com/v1",
            "variables": {"env": {"default": "staging"}}
        });
        assert_eq!(
            OpenApiParser::server_with_vars(&server).as_deref(),
            Some("https://staging.example.com/v1")
        );
    }

    #[test]
    fn operation_parameters_override_path_level() {
        let shared = vec![
            Parameter::new("note_id", ParameterLocation::Path, false),
            Parameter::new("trace", ParameterLocation::Header, false),
        ];
        let own = vec![Parameter::new("note_id", ParameterLocation::Path, true)];
        let merged = OpenApiParser::merge_parameters(shared, own);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "trace");
        assert!(merged[1].required);
    }

    #[test]
    fn security_flag_distinguishes_absent_and_empty() {
        assert_eq!(OpenApiParser::security_flag(None), None);
        assert_eq!(OpenApiParser::security_flag(Some(&json!([]))), Some(false));
        assert_eq!(
            OpenApiParser::security_flag(Some(&json!([{"ApiKey": []}]))),
            Some(true)
        );
    }
}
