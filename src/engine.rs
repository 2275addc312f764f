// Async HTTP engine for Aperture
// Builds one request for an (object owner, caller) combination, sends it with
// reqwest and captures the full exchange

use crate::auth::AuthStrategy;
use crate::contract::Contract;
use crate::error::ExchangeError;
use crate::identity::Identity;
use crate::models::{
    Exchange, Method, Operation, ParameterLocation, RequestDetails, ResponseDetails,
};
use crate::pairing::PATH_PLACEHOLDER;
use crate::progress::{ExecutionContext, ProgressEvent};
use crate::synthesizer::BodySynthesizer;
use reqwest::header::HeaderMap;
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

pub struct AttackEngine {
    pub client: Client,
    base_url: String,
    default_auth_header: String,
}

impl AttackEngine {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        default_auth_header: &str,
    ) -> Result<Self, ExchangeError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|e| ExchangeError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url,
            default_auth_header: default_auth_header.to_string(),
        })
    }

    /// Resolve the request without sending it. Identifiers (path, query,
    /// missing required headers, body) come from `owner`; the credential
    /// comes from `caller`.
    pub fn prepare(
        &self,
        contract: &Contract,
        operation: &Operation,
        owner: &Identity,
        caller: &Identity,
    ) -> Result<RequestDetails, ExchangeError> {
        let (segments, path_params) = resolve_path(&operation.path, &owner.fields)?;

        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ExchangeError::InvalidUrl(format!("{}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| ExchangeError::InvalidUrl(format!("{} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments.iter());

        let mut query_params = BTreeMap::new();
        for p in operation.parameters_in(ParameterLocation::Query) {
            match owner.field(&p.name) {
                Some(v) => {
                    query_params.insert(p.name.clone(), v.to_string());
                }
                None if p.required => return Err(ExchangeError::MissingQueryParam(p.name.clone())),
                None => {}
            }
        }
        if !query_params.is_empty() {
            url.query_pairs_mut().extend_pairs(query_params.iter());
        }

        let mut headers = BTreeMap::new();
        let (auth_name, auth_value) = caller.auth.auth_header(&self.default_auth_header);
        headers.insert(auth_name, auth_value);
        headers.insert("Accept".to_string(), "application/json".to_string());
        for p in operation
            .parameters_in(ParameterLocation::Header)
            .filter(|p| p.required)
        {
            if headers.keys().any(|k| k.eq_ignore_ascii_case(&p.name)) {
                continue;
            }
            if let Some(v) = owner.field(&p.name) {
                headers.insert(p.name.clone(), v.to_string());
            }
        }

        let body = operation
            .body_schema()
            .map(|schema| BodySynthesizer::new(contract).synthesize(schema, &owner.fields))
            .filter(|value| !value.is_null());
        if body.is_some() {
            headers.insert("Content-Type".to_string(), "application/json".to_string());
        }

        Ok(RequestDetails {
            method: operation.method.to_string(),
            url: url.to_string(),
            headers,
            path_params,
            query_params,
            body,
            auth_user: caller.name.clone(),
        })
    }

    /// Prepare, announce, send and record one request.
    pub async fn send_one(
        &self,
        ctx: &mut ExecutionContext,
        contract: &Contract,
        operation: &Operation,
        owner: &Identity,
        caller: &Identity,
    ) -> Result<Exchange, ExchangeError> {
        let request = self.prepare(contract, operation, owner, caller)?;

        let progress = ctx.snapshot();
        ctx.emit(ProgressEvent::RequestPrepared {
            method: operation.method,
            path: operation.path.clone(),
            request: Box::new(request.clone()),
            completed: progress.completed,
            total: progress.total,
        });

        let outcome = self.dispatch(operation.method, &request).await;
        ctx.record_completed();
        let response = outcome?;

        debug!(
            method = %operation.method,
            url = %request.url,
            creds = %caller.name,
            object = %owner.name,
            status = response.status,
            duration_ms = response.duration_ms,
            "exchange complete"
        );
        Ok(Exchange { request, response })
    }

    async fn dispatch(
        &self,
        method: Method,
        request: &RequestDetails,
    ) -> Result<ResponseDetails, ExchangeError> {
        let mut req = self.client.request(method.as_reqwest(), request.url.as_str());
        for (k, v) in &request.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(body) = &request.body {
            req = req.body(serde_json::to_vec(body)?);
        }

        let start = Instant::now();
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let headers = simplify_headers(resp.headers());
        let body = resp.text().await?;
        Ok(ResponseDetails {
            status,
            headers,
            body,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

// Split the template into URL segments with every {name} replaced by the
// owner's value. Values are percent-encoded later, per segment. A value that
// leaves a whole segment as `.` or `..` is refused, since the URL would
// collapse it.
fn resolve_path(
    template: &str,
    fields: &BTreeMap<String, String>,
) -> Result<(Vec<String>, BTreeMap<String, String>), ExchangeError> {
    let mut used = BTreeMap::new();
    let mut missing = Vec::new();
    let mut segments = Vec::new();

    for segment in template.trim_start_matches('/').split('/') {
        let mut resolved = String::new();
        let mut last = 0;
        for cap in PATH_PLACEHOLDER.captures_iter(segment) {
            let whole = cap.get(0).map_or(0..0, |m| m.range());
            let name = &cap[1];
            resolved.push_str(&segment[last..whole.start]);
            match fields.get(name) {
                Some(value) => {
                    used.insert(name.to_string(), value.clone());
                    resolved.push_str(value);
                }
                None => missing.push(name.to_string()),
            }
            last = whole.end;
        }
        resolved.push_str(&segment[last..]);
        if last > 0 && matches!(resolved.as_str(), "." | "..") {
            return Err(ExchangeError::DotSegment {
                path: template.to_string(),
                segment: resolved,
            });
        }
        segments.push(resolved);
    }

    if !missing.is_empty() {
        return Err(ExchangeError::MissingPathParams {
            path: template.to_string(),
            names: missing,
        });
    }
    Ok((segments, used))
}

// First value of every response header
fn simplify_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for name in headers.keys() {
        if let Some(value) = headers.get(name) {
            out.insert(
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Credential, CredentialKind};
    use crate::models::Parameter;
    use crate::schema::Schema;
    use serde_json::json;

    fn engine(base: &str) -> AttackEngine {
        AttackEngine::new(base, Duration::from_secs(5), "Authorization").unwrap()
    }

    fn user(name: &str, key: &str) -> Identity {
        Identity::new(
            name,
            Credential {
                kind: CredentialKind::Header,
                value: key.to_string(),
                header_name: Some("X-API-Key".to_string()),
            },
        )
    }

    #[test]
    fn owner_identifiers_with_caller_credentials() {
        let op = Operation::new(Method::GET, "/users/{user_id}/notes")
            .with_parameter(Parameter::new("user_id", ParameterLocation::Path, true))
            .with_parameter(Parameter::new("limit", ParameterLocation::Query, false))
            .with_parameter(Parameter::new("page", ParameterLocation::Query, false));
        let alice = user("alice", "KEY_ALICE").with_field("user_id", "alice").with_field("limit", "5");
        let bob = user("bob", "KEY_BOB").with_field("user_id", "bob");

        let req = engine("http://api.test")
            .prepare(&Contract::default(), &op, &alice, &bob)
            .unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.url, "http://api.test/users/alice/notes?limit=5");
        assert_eq!(req.headers["X-API-Key"], "KEY_BOB");
        assert_eq!(req.headers["Accept"], "application/json");
        assert_eq!(req.path_params["user_id"], "alice");
        assert_eq!(req.query_params.len(), 1);
        assert_eq!(req.auth_user, "bob");
        assert!(req.body.is_none());
    }

    #[test]
    fn base_path_is_kept_and_values_are_encoded() {
        let op = Operation::new(Method::GET, "/files/{name}");
        let alice = user("alice", "k").with_field("name", "a b/c");
        let req = engine("https://api.test/v1/")
            .prepare(&Contract::default(), &op, &alice, &alice)
            .unwrap();
        assert_eq!(req.url, "https://api.test/v1/files/a%20b%2Fc");
        assert_eq!(req.path_params["name"], "a b/c");
    }

    #[test]
    fn missing_path_value_is_a_build_error() {
        let op = Operation::new(Method::GET, "/notes/{note_id}/tags/{tag}");
        let alice = user("alice", "k").with_field("note_id", "1");
        let err = engine("http://api.test")
            .prepare(&Contract::default(), &op, &alice, &alice)
            .unwrap_err();
        assert!(
            matches!(&err, ExchangeError::MissingPathParams { names, .. } if names == &vec!["tag".to_string()])
        );
        assert!(err.to_string().starts_with("missing required path params"));
    }

    #[test]
    fn dot_segment_values_are_refused() {
        let op = Operation::new(Method::POST, "/notes/{note_id}/share");
        for value in ["..", "."] {
            let alice = user("alice", "k").with_field("note_id", value);
            let err = engine("http://api.test")
                .prepare(&Contract::default(), &op, &alice, &alice)
                .unwrap_err();
            assert!(
                matches!(&err, ExchangeError::DotSegment { segment, .. } if segment == value),
                "{:?}",
                err
            );
        }

        let alice = user("alice", "k").with_field("note_id", "..x");
        let req = engine("http://api.test")
            .prepare(&Contract::default(), &op, &alice, &alice)
            .unwrap();
        assert_eq!(req.url, "http://api.test/notes/..x/share");
    }

    #[test]
    fn missing_required_query_value_is_a_build_error() {
        let op = Operation::new(Method::GET, "/search")
            .with_parameter(Parameter::new("q", ParameterLocation::Query, true));
        let alice = user("alice", "k");
        let err = engine("http://api.test")
            .prepare(&Contract::default(), &op, &alice, &alice)
            .unwrap_err();
        assert!(matches!(err, ExchangeError::MissingQueryParam(name) if name == "q"));
    }

    #[test]
    fn required_headers_filled_from_owner_unless_set() {
        let op = Operation::new(Method::GET, "/tenant")
            .with_parameter(Parameter::new("X-Tenant", ParameterLocation::Header, true))
            .with_parameter(Parameter::new("x-api-key", ParameterLocation::Header, true))
            .with_parameter(Parameter::new("X-Optional", ParameterLocation::Header, false));
        let alice = user("alice", "KEY_ALICE")
            .with_field("X-Tenant", "acme")
            .with_field("x-api-key", "OWNER_KEY")
            .with_field("X-Optional", "nope");
        let bob = user("bob", "KEY_BOB");
        let req = engine("http://api.test")
            .prepare(&Contract::default(), &op, &alice, &bob)
            .unwrap();
        assert_eq!(req.headers["X-Tenant"], "acme");
        assert_eq!(req.headers["X-API-Key"], "KEY_BOB");
        assert!(!req.headers.contains_key("x-api-key"));
        assert!(!req.headers.contains_key("X-Optional"));
    }

    #[test]
    fn cookie_credentials_and_default_header() {
        let op = Operation::new(Method::GET, "/me");
        let cookie_user = Identity::new(
            "carol",
            Credential {
                kind: CredentialKind::Cookie,
                value: "session=c".to_string(),
                header_name: None,
            },
        );
        let bearer_user = Identity::new(
            "dave",
            Credential {
                kind: CredentialKind::Header,
                value: "Bearer d".to_string(),
                header_name: None,
            },
        );
        let e = engine("http://api.test");
        let req = e.prepare(&Contract::default(), &op, &bearer_user, &cookie_user).unwrap();
        assert_eq!(req.headers["Cookie"], "session=c");
        let req = e.prepare(&Contract::default(), &op, &cookie_user, &bearer_user).unwrap();
        assert_eq!(req.headers["Authorization"], "Bearer d");
    }

    #[test]
    fn json_body_is_synthesized_from_owner_fields() {
        let op = Operation::new(Method::POST, "/notes/vuln-owner").with_body(
            Schema::object(
                [("owner", Schema::typed("string")), ("title", Schema::typed("string"))],
                &["owner", "title"],
            ),
            true,
        );
        let alice = user("alice", "KEY_ALICE").with_field("owner", "alice");
        let bob = user("bob", "KEY_BOB").with_field("owner", "bob");
        let req = engine("http://api.test")
            .prepare(&Contract::default(), &op, &alice, &bob)
            .unwrap();
        assert_eq!(req.body, Some(json!({"owner": "alice", "title": "example"})));
        assert_eq!(req.headers["Content-Type"], "application/json");
    }

    #[test]
    fn unresolvable_body_is_omitted() {
        let op = Operation::new(Method::POST, "/things")
            .with_body(Schema::reference("#/components/schemas/Missing"), true);
        let alice = user("alice", "k");
        let req = engine("http://api.test")
            .prepare(&Contract::default(), &op, &alice, &alice)
            .unwrap();
        assert!(req.body.is_none());
        assert!(!req.headers.contains_key("Content-Type"));
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(matches!(
            AttackEngine::new("not a url", Duration::from_secs(1), "Authorization"),
            Err(ExchangeError::InvalidUrl(_))
        ));
    }
}
