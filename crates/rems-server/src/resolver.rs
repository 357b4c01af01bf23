//! Endpoint resolution: medication coding and requester to routing record.
//!
//! Lookups only read the store. Discovery of unknown codes happens during
//! directory maintenance, never inline.

use rems_core::{MedicationCoding, RoutingRecord};
use rems_storage::DynConnectionStore;
use tracing::{debug, info, warn};

/// Outcome of a resolution, kept distinct for logging.
///
/// Everything but [`Resolution::Routed`] presents to callers as "no route".
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Routed(RoutingRecord),
    /// No record for the key, or the record has no hook target.
    NotFound,
    /// A record exists but its allow-list excludes the requester.
    Denied,
    /// The store could not be reached.
    Unavailable,
}

impl Resolution {
    pub fn into_record(self) -> Option<RoutingRecord> {
        match self {
            Self::Routed(record) => Some(record),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct EndpointResolver {
    store: DynConnectionStore,
}

impl EndpointResolver {
    pub fn new(store: DynConnectionStore) -> Self {
        Self { store }
    }

    /// Authorized routing record for `coding`, or `None`.
    pub async fn resolve(&self, coding: &MedicationCoding, requester: &str) -> Option<RoutingRecord> {
        self.lookup(coding, requester).await.into_record()
    }

    pub async fn lookup(&self, coding: &MedicationCoding, requester: &str) -> Resolution {
        let record = match self.store.find(&coding.code, &coding.system).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(code = %coding.code, system = %coding.system, "No routing record");
                return Resolution::NotFound;
            }
            Err(e) => {
                warn!(
                    code = %coding.code,
                    system = %coding.system,
                    error = %e,
                    category = %e.category(),
                    "Connection store unavailable during resolution"
                );
                return Resolution::Unavailable;
            }
        };

        if !record.permits(requester) {
            info!(
                code = %coding.code,
                system = %coding.system,
                requester,
                "Requester denied by routing allow-list"
            );
            return Resolution::Denied;
        }

        if !record.is_forwardable() {
            debug!(code = %coding.code, system = %coding.system, "Routing record has no hook target");
            return Resolution::NotFound;
        }

        debug!(
            code = %coding.code,
            system = %coding.system,
            requester,
            target = %record.target_hook_base,
            "Resolved routing record"
        );
        Resolution::Routed(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rems_core::RXNORM_SYSTEM;
    use rems_db_memory::InMemoryConnectionStore;
    use rems_storage::{ConnectionStore, StorageError, StorageResult, UpsertOutcome};
    use std::sync::Arc;

    async fn resolver_with(records: Vec<RoutingRecord>) -> EndpointResolver {
        let store = InMemoryConnectionStore::new();
        for record in records {
            store.create(record).await.unwrap();
        }
        EndpointResolver::new(Arc::new(store))
    }

    fn record(code: &str) -> RoutingRecord {
        RoutingRecord::new(code, RXNORM_SYSTEM, "http://admin/hooks-", "http://admin/etasu")
    }

    #[tokio::test]
    async fn test_wildcard_resolves_for_any_requester() {
        let resolver = resolver_with(vec![record("6064")]).await;
        let coding = MedicationCoding::new(RXNORM_SYSTEM, "6064");
        for requester in ["", "http://ehr/r4", "anything"] {
            assert!(resolver.resolve(&coding, requester).await.is_some());
        }
    }

    #[tokio::test]
    async fn test_allow_list_is_enforced() {
        let resolver =
            resolver_with(vec![record("6064").with_allowed_requesters(["http://ehr-a/r4"])]).await;
        let coding = MedicationCoding::new(RXNORM_SYSTEM, "6064");

        assert_eq!(resolver.lookup(&coding, "http://ehr-b/r4").await, Resolution::Denied);
        assert!(resolver.resolve(&coding, "http://ehr-a/r4").await.is_some());
    }

    #[tokio::test]
    async fn test_absent_code_is_not_found() {
        let resolver = resolver_with(vec![record("6064")]).await;
        let coding = MedicationCoding::new(RXNORM_SYSTEM, "999");
        assert_eq!(resolver.lookup(&coding, "").await, Resolution::NotFound);

        let other_system = MedicationCoding::new("http://hl7.org/fhir/sid/ndc", "6064");
        assert!(resolver.resolve(&other_system, "").await.is_none());
    }

    struct DownStore;

    #[async_trait]
    impl ConnectionStore for DownStore {
        async fn find(&self, _: &str, _: &str) -> StorageResult<Option<RoutingRecord>> {
            Err(StorageError::unavailable("offline"))
        }
        async fn upsert(&self, _: RoutingRecord) -> StorageResult<UpsertOutcome> {
            Err(StorageError::unavailable("offline"))
        }
        async fn seed_if_absent(&self, _: RoutingRecord) -> StorageResult<bool> {
            Err(StorageError::unavailable("offline"))
        }
        async fn list(&self) -> StorageResult<Vec<RoutingRecord>> {
            Err(StorageError::unavailable("offline"))
        }
        async fn get(&self, _: &str) -> StorageResult<Option<RoutingRecord>> {
            Err(StorageError::unavailable("offline"))
        }
        async fn create(&self, _: RoutingRecord) -> StorageResult<RoutingRecord> {
            Err(StorageError::unavailable("offline"))
        }
        async fn replace(&self, _: &str, _: RoutingRecord) -> StorageResult<RoutingRecord> {
            Err(StorageError::unavailable("offline"))
        }
        async fn delete(&self, _: &str) -> StorageResult<RoutingRecord> {
            Err(StorageError::unavailable("offline"))
        }
    }

    #[tokio::test]
    async fn test_unavailable_store_is_no_route() {
        let resolver = EndpointResolver::new(Arc::new(DownStore));
        let coding = MedicationCoding::new(RXNORM_SYSTEM, "6064");
        assert_eq!(resolver.lookup(&coding, "").await, Resolution::Unavailable);
        assert!(resolver.resolve(&coding, "").await.is_none());
    }
}
