//! Prefetch hydration.
//!
//! Fills the prefetch keys a caller did not supply by fetching them from the
//! caller's FHIR server with the caller's bearer token. Templates reference
//! the hook context as `{{context.<field>}}`.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use rems_core::HookEvent;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::services::PrefetchTemplate;

#[derive(Debug, thiserror::Error)]
pub enum HydrationError {
    #[error("fetch of {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
}

/// Fetches one FHIR resource by path relative to the caller's server.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<Value, HydrationError>;
}

/// [`ResourceFetcher`] bound to the caller's FHIR server and access token.
#[derive(Debug, Clone)]
pub struct FhirServerFetcher {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    timeout: Duration,
}

impl FhirServerFetcher {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            access_token: access_token.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ResourceFetcher for FhirServerFetcher {
    async fn fetch(&self, path: &str) -> Result<Value, HydrationError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'));
        let http_error = |e: reqwest::Error| HydrationError::Http {
            url: url.clone(),
            message: e.to_string(),
        };

        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token))
            .header(ACCEPT, "application/fhir+json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(http_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(HydrationError::Status {
                url: url.clone(),
                status: status.as_u16(),
            });
        }
        response.json().await.map_err(http_error)
    }
}

/// Substitutes `{{context.<field>}}` tokens from the hook context.
///
/// Returns `None` if any token cannot be resolved.
pub fn resolve_template(template: &str, context: &Value) -> Option<String> {
    let mut resolved = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        resolved.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}")?;
        let field = after[..end].trim().strip_prefix("context.")?;
        let value = match context.get(field)? {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        resolved.push_str(&value);
        rest = &after[end + 2..];
    }
    resolved.push_str(rest);
    Some(resolved)
}

/// Fetches the template keys missing from `event.prefetch`.
///
/// Returns the merged prefetch map, or `None` when nothing was added. A
/// failed fetch drops only its own key.
pub async fn hydrate(
    fetcher: &dyn ResourceFetcher,
    template: &PrefetchTemplate,
    event: &HookEvent,
) -> Option<Map<String, Value>> {
    let existing = event.prefetch.clone().unwrap_or_default();

    let pending: Vec<(&String, String)> = template
        .iter()
        .filter(|(key, _)| !existing.contains_key(key.as_str()))
        .filter_map(|(key, query)| match resolve_template(query, &event.context) {
            Some(path) => Some((key, path)),
            None => {
                debug!(key = %key, "Prefetch template has unresolved tokens, skipping");
                None
            }
        })
        .collect();
    if pending.is_empty() {
        return None;
    }

    let fetched = join_all(pending.into_iter().map(|(key, path)| async move {
        match fetcher.fetch(&path).await {
            Ok(resource) => Some((key.clone(), resource)),
            Err(e) => {
                warn!(key = %key, error = %e, "Prefetch fetch failed");
                None
            }
        }
    }))
    .await;

    let mut merged = existing;
    let mut added = 0;
    for (key, resource) in fetched.into_iter().flatten() {
        merged.insert(key, resource);
        added += 1;
    }
    debug!(added, "Hydrated prefetch");
    (added > 0).then_some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct MapFetcher(HashMap<String, Value>);

    #[async_trait]
    impl ResourceFetcher for MapFetcher {
        async fn fetch(&self, path: &str) -> Result<Value, HydrationError> {
            self.0.get(path).cloned().ok_or_else(|| HydrationError::Status {
                url: path.to_string(),
                status: 404,
            })
        }
    }

    fn event(prefetch: Option<Value>) -> HookEvent {
        let mut body = json!({
            "hook": "order-sign",
            "context": { "patientId": "pat-1", "userId": "Practitioner/doc-1" }
        });
        if let Some(prefetch) = prefetch {
            body["prefetch"] = prefetch;
        }
        serde_json::from_value(body).unwrap()
    }

    fn template() -> PrefetchTemplate {
        let mut template = PrefetchTemplate::new();
        template.insert("patient".into(), "Patient/{{context.patientId}}".into());
        template.insert("practitioner".into(), "{{context.userId}}".into());
        template.insert("encounter".into(), "Encounter/{{context.encounterId}}".into());
        template
    }

    #[test]
    fn test_resolve_template() {
        let context = json!({ "patientId": "pat-1", "count": 3 });
        assert_eq!(
            resolve_template("Patient/{{context.patientId}}", &context).as_deref(),
            Some("Patient/pat-1")
        );
        assert_eq!(
            resolve_template("Observation?_count={{ context.count }}", &context).as_deref(),
            Some("Observation?_count=3")
        );
        assert_eq!(resolve_template("Encounter/{{context.encounterId}}", &context), None);
        assert_eq!(resolve_template("Patient/{{user.id}}", &context), None);
        assert_eq!(resolve_template("metadata", &context).as_deref(), Some("metadata"));
    }

    #[tokio::test]
    async fn test_hydrate_fills_missing_keys_only() {
        let fetcher = MapFetcher(HashMap::from([
            ("Patient/pat-1".to_string(), json!({"resourceType": "Patient", "id": "pat-1"})),
            ("Practitioner/doc-1".to_string(), json!({"resourceType": "Practitioner"})),
        ]));
        let ev = event(Some(json!({ "patient": {"resourceType": "Patient", "id": "given"} })));

        let hydrated = hydrate(&fetcher, &template(), &ev).await.unwrap();
        assert_eq!(hydrated["patient"]["id"], "given");
        assert_eq!(hydrated["practitioner"]["resourceType"], "Practitioner");
        assert!(!hydrated.contains_key("encounter"));
    }

    #[tokio::test]
    async fn test_hydrate_returns_none_when_nothing_added() {
        let fetcher = MapFetcher(HashMap::new());
        assert!(hydrate(&fetcher, &template(), &event(None)).await.is_none());
    }

    #[tokio::test]
    async fn test_fhir_server_fetcher_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r4/MedicationRequest"))
            .and(query_param("subject", "pat-1"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"resourceType": "Bundle"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = FhirServerFetcher::new(
            reqwest::Client::new(),
            format!("{}/r4/", server.uri()),
            "secret",
            Duration::from_secs(2),
        );
        let bundle = fetcher.fetch("MedicationRequest?subject=pat-1").await.unwrap();
        assert_eq!(bundle["resourceType"], "Bundle");
    }
}
