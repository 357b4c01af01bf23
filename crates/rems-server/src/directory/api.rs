//! Directory API strategy: search a remote directory by product identifier.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use super::{DirectoryError, Discovered};

#[derive(Debug, Clone)]
pub(crate) struct ApiDirectory {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl ApiDirectory {
    pub(crate) fn new(client: reqwest::Client, url: String, timeout: Duration) -> Self {
        Self {
            client,
            url,
            timeout,
        }
    }

    /// Administrator base URL registered for `code`, if any.
    pub(crate) async fn lookup(&self, code: &str) -> Result<Option<Discovered>, DirectoryError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("ndc", code)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DirectoryError::http(&self.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let bundle: Value = response
            .json()
            .await
            .map_err(|e| DirectoryError::http(&self.url, e))?;
        let address = first_endpoint_address(&bundle);
        debug!(code, address = ?address, "Directory API answered");

        Ok(address.map(|base_url| Discovered {
            base_url,
            brand_name: None,
            generic_name: None,
        }))
    }
}

/// First non-empty `Endpoint.address` in a search bundle.
fn first_endpoint_address(bundle: &Value) -> Option<String> {
    bundle
        .get("entry")?
        .as_array()?
        .iter()
        .filter_map(|entry| entry.get("resource")?.get("address")?.as_str())
        .map(str::trim)
        .find(|address| !address.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_first_endpoint_address_skips_empty() {
        let bundle = json!({
            "resourceType": "Bundle",
            "entry": [
                {"resource": {"resourceType": "Endpoint", "address": ""}},
                {"resource": {"resourceType": "Endpoint", "address": "http://rems.example/"}}
            ]
        });
        assert_eq!(first_endpoint_address(&bundle).as_deref(), Some("http://rems.example/"));
        assert_eq!(first_endpoint_address(&json!({"resourceType": "Bundle"})), None);
    }

    #[tokio::test]
    async fn test_lookup_queries_by_ndc() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/directory"))
            .and(query_param("ndc", "0245-0571-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resourceType": "Bundle",
                "entry": [{"resource": {"resourceType": "Endpoint", "address": "http://ipledge.example"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = ApiDirectory::new(
            reqwest::Client::new(),
            format!("{}/directory", server.uri()),
            Duration::from_secs(2),
        );
        let found = api.lookup("0245-0571-01").await.unwrap().unwrap();
        assert_eq!(found.base_url, "http://ipledge.example");
    }

    #[tokio::test]
    async fn test_lookup_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let api = ApiDirectory::new(reqwest::Client::new(), server.uri(), Duration::from_secs(2));
        let err = api.lookup("1").await.unwrap_err();
        assert!(matches!(err, DirectoryError::Status { status: 503, .. }));
    }
}
