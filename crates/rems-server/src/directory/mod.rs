//! Directory resolution: populates routing records whose lookup strategy is
//! dynamic.
//!
//! Two strategies are available:
//! - **Directory API**: one query by product identifier returning `Endpoint`s
//! - **SPL document**: the dated product label archive, searched by drug name
//!
//! Any failure falls back to the default administrator. Results are written
//! through [`ConnectionStore::upsert`](rems_storage::ConnectionStore::upsert),
//! so an unchanged upstream target produces no write. Resolution runs during
//! maintenance only, never inline with hook dispatch.

mod api;
pub mod spl;

use std::sync::Arc;

use axum::body::Bytes;
use rems_core::{LookupStrategy, RoutingRecord};
use rems_storage::{DynConnectionStore, StorageResult, UpsertOutcome};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{AdminConfig, DirectoryConfig};
use api::ApiDirectory;
use spl::SplDirectory;

/// Why a strategy produced no administrator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("invalid SPL document: {0}")]
    Xml(String),

    #[error("release {0} contains no XML document")]
    MissingDocument(String),

    #[error("SPL document has no {0} section")]
    MissingSection(String),

    #[error("record has no reference date for SPL lookup")]
    NoReferenceDate,

    #[error("{0} strategy is not configured")]
    NotConfigured(&'static str),
}

impl DirectoryError {
    fn http(url: &str, err: reqwest::Error) -> Self {
        Self::Http {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    fn archive(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

/// Administrator found by a strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct Discovered {
    pub base_url: String,
    pub brand_name: Option<String>,
    pub generic_name: Option<String>,
}

/// Result of refreshing one record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshEntry {
    pub id: String,
    pub code: String,
    pub system: String,
    pub strategy: LookupStrategy,
    /// Hook base written for the record.
    pub target_hook_base: String,
    pub outcome: UpsertOutcome,
    /// Set when the default administrator was used, with the cause.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub refreshed: Vec<RefreshEntry>,
    /// Records whose write failed, with the error.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<String>,
}

impl RefreshReport {
    pub fn written(&self) -> usize {
        self.refreshed.iter().filter(|e| e.outcome.wrote()).count()
    }

    pub fn fallbacks(&self) -> usize {
        self.refreshed.iter().filter(|e| e.fallback.is_some()).count()
    }
}

/// Outer SPL archive, downloaded at most once per maintenance run.
#[derive(Default)]
struct ArchiveCache(Option<Result<Bytes, DirectoryError>>);

pub struct DirectoryResolver {
    store: DynConnectionStore,
    admin: AdminConfig,
    api: Option<ApiDirectory>,
    spl: Option<SplDirectory>,
}

impl DirectoryResolver {
    pub fn new(
        store: DynConnectionStore,
        http_client: reqwest::Client,
        admin: AdminConfig,
        config: &DirectoryConfig,
    ) -> Self {
        let api = config
            .api_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .map(|url| ApiDirectory::new(http_client.clone(), url, config.api_timeout()));
        let spl = config
            .spl_archive_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .map(|url| {
                SplDirectory::new(
                    http_client.clone(),
                    url,
                    config.spl_timeout(),
                    config.discovery_prefix.clone(),
                )
            });
        Self {
            store,
            admin,
            api,
            spl,
        }
    }

    /// Runs the record's strategy and writes the result through the store.
    ///
    /// Returns `None` for records without a dynamic strategy.
    pub async fn refresh(&self, record: &RoutingRecord) -> StorageResult<Option<RefreshEntry>> {
        self.refresh_with(record, &mut ArchiveCache::default()).await
    }

    /// Refreshes every stored record with a dynamic strategy.
    pub async fn refresh_all(&self) -> StorageResult<RefreshReport> {
        let records = self.store.list().await?;
        let mut cache = ArchiveCache::default();
        let mut report = RefreshReport::default();

        for record in records.iter().filter(|r| r.lookup_strategy.is_some_and(|s| s.is_dynamic())) {
            match self.refresh_with(record, &mut cache).await {
                Ok(Some(entry)) => report.refreshed.push(entry),
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %record.key(), error = %e, "Failed to write refreshed record");
                    report.failed.push(format!("{}: {e}", record.key()));
                }
            }
        }

        info!(
            refreshed = report.refreshed.len(),
            written = report.written(),
            fallbacks = report.fallbacks(),
            failed = report.failed.len(),
            "Directory maintenance completed"
        );
        Ok(report)
    }

    /// Starts background maintenance according to `config`.
    ///
    /// Returns `None` when neither a startup run nor an interval is configured.
    pub fn spawn_maintenance(self: Arc<Self>, config: &DirectoryConfig) -> Option<JoinHandle<()>> {
        let on_startup = config.refresh_on_startup;
        let interval = config.refresh_interval();
        if !on_startup && interval.is_none() {
            return None;
        }

        Some(tokio::spawn(async move {
            if on_startup {
                self.run_maintenance().await;
            }
            if let Some(period) = interval {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick completes immediately.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    self.run_maintenance().await;
                }
            }
        }))
    }

    async fn run_maintenance(&self) {
        if let Err(e) = self.refresh_all().await {
            warn!(error = %e, "Directory maintenance skipped");
        }
    }

    async fn refresh_with(
        &self,
        record: &RoutingRecord,
        cache: &mut ArchiveCache,
    ) -> StorageResult<Option<RefreshEntry>> {
        let Some(strategy) = record.lookup_strategy.filter(LookupStrategy::is_dynamic) else {
            return Ok(None);
        };

        let (found, fallback) = match self.discover(strategy, record, cache).await {
            Ok(Some(found)) => (Some(found), None),
            Ok(None) => {
                info!(
                    key = %record.key(),
                    strategy = %strategy,
                    "No administrator found, using default administrator"
                );
                (None, Some("not found".to_string()))
            }
            Err(e) => {
                warn!(
                    key = %record.key(),
                    strategy = %strategy,
                    error = %e,
                    "Directory resolution failed, using default administrator"
                );
                (None, Some(e.to_string()))
            }
        };

        let resolved = self.resolved_record(record, strategy, found.as_ref());
        let target_hook_base = resolved.target_hook_base.clone();
        let outcome = self.store.upsert(resolved).await?;
        debug!(key = %record.key(), strategy = %strategy, outcome = %outcome, "Directory upsert");

        Ok(Some(RefreshEntry {
            id: record.id.clone(),
            code: record.code.clone(),
            system: record.coding_system.clone(),
            strategy,
            target_hook_base,
            outcome,
            fallback,
        }))
    }

    async fn discover(
        &self,
        strategy: LookupStrategy,
        record: &RoutingRecord,
        cache: &mut ArchiveCache,
    ) -> Result<Option<Discovered>, DirectoryError> {
        match strategy {
            LookupStrategy::DirectoryApi => {
                let api = self.api.as_ref().ok_or(DirectoryError::NotConfigured("directory API"))?;
                api.lookup(&record.code).await
            }
            LookupStrategy::SplDocument => {
                let spl = self.spl.as_ref().ok_or(DirectoryError::NotConfigured("SPL document"))?;
                let date = record.last_resolved_date.ok_or(DirectoryError::NoReferenceDate)?;
                let archive = match &cache.0 {
                    Some(fetched) => fetched.clone()?,
                    None => {
                        let fetched = spl.fetch_archive().await;
                        cache.0 = Some(fetched.clone());
                        fetched?
                    }
                };
                let names = [&record.brand_name, &record.generic_name]
                    .into_iter()
                    .flatten()
                    .cloned()
                    .collect();
                spl.lookup(archive, date, names).await
            }
            LookupStrategy::Static => Ok(None),
        }
    }

    /// Record to upsert for a resolution result; the default administrator
    /// when nothing was found.
    fn resolved_record(
        &self,
        record: &RoutingRecord,
        strategy: LookupStrategy,
        found: Option<&Discovered>,
    ) -> RoutingRecord {
        let (hook_base, etasu_url) = match found {
            Some(found) => (
                self.admin.hook_base_for(&found.base_url),
                self.admin.etasu_url_for(&found.base_url),
            ),
            None => (self.admin.default_hook_base(), self.admin.default_etasu_url()),
        };

        let mut resolved = RoutingRecord::new(&record.code, &record.coding_system, hook_base, etasu_url)
            .with_strategy(strategy);
        resolved.brand_name = found
            .and_then(|f| f.brand_name.clone())
            .or_else(|| record.brand_name.clone());
        resolved.generic_name = found
            .and_then(|f| f.generic_name.clone())
            .or_else(|| record.generic_name.clone());
        resolved.last_resolved_date = record.last_resolved_date;
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rems_core::{NDC_SYSTEM, RXNORM_SYSTEM};
    use rems_db_memory::create_connection_store;
    use serde_json::json;
    use time::macros::date;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn admin() -> AdminConfig {
        AdminConfig {
            default_base_url: "http://default-admin".into(),
            ..AdminConfig::default()
        }
    }

    fn resolver(store: DynConnectionStore, config: DirectoryConfig) -> DirectoryResolver {
        DirectoryResolver::new(store, reqwest::Client::new(), admin(), &config)
    }

    #[tokio::test]
    async fn test_static_records_are_skipped() {
        let store = create_connection_store();
        let record = RoutingRecord::new("6064", RXNORM_SYSTEM, "http://a/", "http://a/e")
            .with_strategy(LookupStrategy::Static);
        let resolver = resolver(store, DirectoryConfig::default());
        assert!(resolver.refresh(&record).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_strategy_falls_back() {
        let store = create_connection_store();
        let record = RoutingRecord::new("0245-0571-01", NDC_SYSTEM, "http://old/", "http://old/e")
            .with_strategy(LookupStrategy::DirectoryApi);
        store.create(record.clone()).await.unwrap();

        let resolver = resolver(store.clone(), DirectoryConfig::default());
        let entry = resolver.refresh(&record).await.unwrap().unwrap();
        assert_eq!(entry.outcome, UpsertOutcome::TargetsUpdated);
        assert!(entry.fallback.unwrap().contains("not configured"));

        let stored = store.find("0245-0571-01", NDC_SYSTEM).await.unwrap().unwrap();
        assert_eq!(stored.target_hook_base, "http://default-admin/cds-services/rems-");
    }

    #[tokio::test]
    async fn test_api_refresh_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/endpoints"))
            .and(query_param("ndc", "0245-0571-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resourceType": "Bundle",
                "entry": [{"resource": {"resourceType": "Endpoint", "address": "http://ipledge/"}}]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let store = create_connection_store();
        let record = RoutingRecord::new("0245-0571-01", NDC_SYSTEM, "http://old/", "http://old/e")
            .with_strategy(LookupStrategy::DirectoryApi);
        store.create(record.clone()).await.unwrap();

        let config = DirectoryConfig {
            api_url: Some(format!("{}/endpoints", server.uri())),
            ..DirectoryConfig::default()
        };
        let resolver = resolver(store.clone(), config);

        let first = resolver.refresh_all().await.unwrap();
        assert_eq!(first.written(), 1);
        let after_first = store.find("0245-0571-01", NDC_SYSTEM).await.unwrap().unwrap();
        assert_eq!(after_first.target_hook_base, "http://ipledge/cds-services/rems-");

        let second = resolver.refresh_all().await.unwrap();
        assert_eq!(second.refreshed[0].outcome, UpsertOutcome::Unchanged);
        let after_second = store.find("0245-0571-01", NDC_SYSTEM).await.unwrap().unwrap();
        assert_eq!(after_first.revision, after_second.revision);
    }

    #[tokio::test]
    async fn test_spl_without_reference_date_falls_back() {
        let store = create_connection_store();
        let record = RoutingRecord::new("6064", RXNORM_SYSTEM, "http://old/", "http://old/e")
            .with_names("iPLEDGE", None)
            .with_strategy(LookupStrategy::SplDocument);
        store.create(record.clone()).await.unwrap();

        let config = DirectoryConfig {
            spl_archive_url: Some("http://127.0.0.1:1/spl.zip".into()),
            ..DirectoryConfig::default()
        };
        let entry = resolver(store, config).refresh(&record).await.unwrap().unwrap();
        assert!(entry.fallback.unwrap().contains("reference date"));
    }

    #[tokio::test]
    async fn test_spl_release_missing_for_date_falls_back() {
        let xml = spl::tests::spl_document("iPLEDGE", "isotretinoin", Some("cds-hooks-discovery:http://ipledge"));
        let archive = spl::tests::spl_archive(&[("20240110", xml.as_str())]);

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spl.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
            .expect(1)
            .mount(&server)
            .await;

        let store = create_connection_store();
        let record = RoutingRecord::new("6064", RXNORM_SYSTEM, "http://old/", "http://old/e")
            .with_names("iPLEDGE", Some("isotretinoin"))
            .with_strategy(LookupStrategy::SplDocument)
            .with_reference_date(date!(2023 - 05 - 05));
        store.create(record.clone()).await.unwrap();

        let config = DirectoryConfig {
            spl_archive_url: Some(format!("{}/spl.zip", server.uri())),
            ..DirectoryConfig::default()
        };
        let entry = resolver(store.clone(), config).refresh(&record).await.unwrap().unwrap();
        assert_eq!(entry.fallback.as_deref(), Some("not found"));
        assert_eq!(entry.outcome, UpsertOutcome::TargetsUpdated);

        let stored = store.find("6064", RXNORM_SYSTEM).await.unwrap().unwrap();
        assert_eq!(stored.target_hook_base, "http://default-admin/cds-services/rems-");
    }

    #[tokio::test]
    async fn test_spl_archive_downloaded_once_per_run() {
        let xml = spl::tests::spl_document("iPLEDGE", "isotretinoin", Some("cds-hooks-discovery:http://ipledge"));
        let archive = spl::tests::spl_archive(&[("20240110", xml.as_str())]);

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spl.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
            .expect(1)
            .mount(&server)
            .await;

        let store = create_connection_store();
        for (code, system) in [("6064", RXNORM_SYSTEM), ("0245-0571-01", NDC_SYSTEM)] {
            let record = RoutingRecord::new(code, system, "http://old/", "http://old/e")
                .with_names("iPLEDGE", Some("isotretinoin"))
                .with_strategy(LookupStrategy::SplDocument)
                .with_reference_date(date!(2024 - 01 - 10));
            store.create(record).await.unwrap();
        }

        let config = DirectoryConfig {
            spl_archive_url: Some(format!("{}/spl.zip", server.uri())),
            ..DirectoryConfig::default()
        };
        let report = resolver(store.clone(), config).refresh_all().await.unwrap();
        assert_eq!(report.written(), 2);
        assert_eq!(report.fallbacks(), 0);

        let stored = store.find("6064", RXNORM_SYSTEM).await.unwrap().unwrap();
        assert_eq!(stored.target_hook_base, "http://ipledge/cds-services/rems-");
        assert_eq!(stored.target_etasu_base, "http://ipledge/4_0_0/GuidanceResponse/$rems-etasu");
    }
}
