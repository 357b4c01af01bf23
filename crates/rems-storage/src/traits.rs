use async_trait::async_trait;
use rems_core::RoutingRecord;

use crate::{StorageResult, UpsertOutcome};

/// Durable registry mapping `(code, codingSystem)` to a [`RoutingRecord`].
///
/// Every operation fails with [`StorageError::Unavailable`](crate::StorageError::Unavailable)
/// when the backend cannot be reached. Callers on the dispatch path treat that
/// as "no route".
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Looks up the record for a drug code in a coding system.
    async fn find(&self, code: &str, system: &str) -> StorageResult<Option<RoutingRecord>>;

    /// Inserts or updates the record keyed by `(code, codingSystem)`.
    ///
    /// Targets are overwritten only when they differ; strategy, display names
    /// and reference date are refreshed. The stored `id` and allow-list are
    /// kept. An identical record produces no write.
    async fn upsert(&self, record: RoutingRecord) -> StorageResult<UpsertOutcome>;

    /// Inserts the record unless its key is already present.
    ///
    /// Returns `true` if the record was inserted.
    async fn seed_if_absent(&self, record: RoutingRecord) -> StorageResult<bool>;

    /// All records, ordered by key.
    async fn list(&self) -> StorageResult<Vec<RoutingRecord>>;

    async fn get(&self, id: &str) -> StorageResult<Option<RoutingRecord>>;

    /// Creates a record with a fresh id; fails on a duplicate key.
    async fn create(&self, record: RoutingRecord) -> StorageResult<RoutingRecord>;

    /// Replaces the record with the given id, keeping the id.
    async fn replace(&self, id: &str, record: RoutingRecord) -> StorageResult<RoutingRecord>;

    /// Deletes the record with the given id and returns it.
    async fn delete(&self, id: &str) -> StorageResult<RoutingRecord>;
}
