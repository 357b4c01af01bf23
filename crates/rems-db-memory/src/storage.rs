use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rems_core::{ConnectionKey, RoutingRecord};
use rems_storage::{
    ConnectionStore, StorageError, StorageResult, UpsertOutcome, merge_upsert,
};
use uuid::Uuid;

use crate::snapshot::SnapshotFile;

/// In-memory connection store using DashMap for concurrent access.
///
/// This storage implementation provides:
/// - Lock-free reads across keys, serialized writes per key
/// - Update-if-changed upserts via [`merge_upsert`]
/// - Optional write-through JSON snapshot
///
/// No map guard is held across an `.await`.
#[derive(Debug, Default)]
pub struct InMemoryConnectionStore {
    records: DashMap<ConnectionKey, RoutingRecord>,
    snapshot: Option<SnapshotFile>,
}

impl InMemoryConnectionStore {
    /// Creates an empty store without persistence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store persisted to `path`, loading any existing snapshot.
    pub async fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let snapshot = SnapshotFile::new(path.into());
        let records = DashMap::new();
        for mut record in snapshot.load().await? {
            record.normalize();
            if record.id.is_empty() {
                record.id = new_id();
            }
            records.insert(record.key(), record);
        }
        tracing::info!(
            path = %snapshot.path().display(),
            count = records.len(),
            "Loaded connection snapshot"
        );
        Ok(Self {
            records,
            snapshot: Some(snapshot),
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn sorted_records(&self) -> Vec<RoutingRecord> {
        let mut records: Vec<RoutingRecord> =
            self.records.iter().map(|e| e.value().clone()).collect();
        records.sort_by(|a, b| a.key().cmp(&b.key()));
        records
    }

    /// Key and revision of the record with `id`.
    fn locate(&self, id: &str) -> Option<(ConnectionKey, u64)> {
        self.records
            .iter()
            .find(|e| e.value().id == id)
            .map(|e| (e.key().clone(), e.value().revision))
    }

    async fn persist(&self) -> StorageResult<()> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };
        let generation = snapshot.next_generation();
        snapshot.write(generation, self.sorted_records()).await
    }

    /// Persists the map, putting each `(key, previous)` back on failure so a
    /// rejected write never stays visible.
    async fn persist_or_revert(
        &self,
        changes: Vec<(ConnectionKey, Option<RoutingRecord>)>,
    ) -> StorageResult<()> {
        let Err(err) = self.persist().await else {
            return Ok(());
        };
        tracing::warn!(error = %err, "Snapshot write failed, reverting in-memory change");
        for (key, previous) in changes {
            match previous {
                Some(record) => {
                    self.records.insert(key, record);
                }
                None => {
                    self.records.remove(&key);
                }
            }
        }
        Err(err)
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn prepare(mut record: RoutingRecord) -> StorageResult<RoutingRecord> {
    record.normalize();
    record.validate()?;
    Ok(record)
}

#[async_trait]
impl ConnectionStore for InMemoryConnectionStore {
    async fn find(&self, code: &str, system: &str) -> StorageResult<Option<RoutingRecord>> {
        let key = ConnectionKey::new(code, system);
        Ok(self.records.get(&key).map(|r| r.value().clone()))
    }

    async fn upsert(&self, record: RoutingRecord) -> StorageResult<UpsertOutcome> {
        let mut record = prepare(record)?;
        let key = record.key();
        let (outcome, previous) = match self.records.entry(key.clone()) {
            Entry::Occupied(mut existing) => match merge_upsert(existing.get(), &record) {
                Some((merged, outcome)) => (outcome, Some(existing.insert(merged))),
                None => (UpsertOutcome::Unchanged, None),
            },
            Entry::Vacant(slot) => {
                record.id = new_id();
                record.revision = 1;
                slot.insert(record);
                (UpsertOutcome::Inserted, None)
            }
        };

        if outcome.wrote() {
            self.persist_or_revert(vec![(key, previous)]).await?;
        }
        Ok(outcome)
    }

    async fn seed_if_absent(&self, record: RoutingRecord) -> StorageResult<bool> {
        let mut record = prepare(record)?;
        let key = record.key();
        let inserted = match self.records.entry(key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                record.id = new_id();
                record.revision = 1;
                slot.insert(record);
                true
            }
        };

        if inserted {
            self.persist_or_revert(vec![(key, None)]).await?;
        }
        Ok(inserted)
    }

    async fn list(&self) -> StorageResult<Vec<RoutingRecord>> {
        Ok(self.sorted_records())
    }

    async fn get(&self, id: &str) -> StorageResult<Option<RoutingRecord>> {
        Ok(self
            .records
            .iter()
            .find(|e| e.value().id == id)
            .map(|e| e.value().clone()))
    }

    async fn create(&self, record: RoutingRecord) -> StorageResult<RoutingRecord> {
        let mut record = prepare(record)?;
        record.id = new_id();
        record.revision = 1;
        let key = record.key();

        match self.records.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(StorageError::already_exists(&record.code, &record.coding_system));
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
            }
        }

        self.persist_or_revert(vec![(key, None)]).await?;
        Ok(record)
    }

    async fn replace(&self, id: &str, record: RoutingRecord) -> StorageResult<RoutingRecord> {
        let (old_key, revision) = self.locate(id).ok_or_else(|| StorageError::not_found(id))?;
        let mut record = prepare(record)?;
        record.id = id.to_string();
        record.revision = revision + 1;
        let new_key = record.key();

        let changes = if new_key == old_key {
            let previous = match self.records.get_mut(&old_key) {
                Some(mut current) if current.id == id => {
                    std::mem::replace(&mut *current, record.clone())
                }
                _ => return Err(StorageError::not_found(id)),
            };
            vec![(old_key, Some(previous))]
        } else {
            match self.records.entry(new_key.clone()) {
                Entry::Occupied(_) => {
                    return Err(StorageError::already_exists(
                        &record.code,
                        &record.coding_system,
                    ));
                }
                Entry::Vacant(slot) => {
                    slot.insert(record.clone());
                }
            };
            let mut changes = vec![(new_key, None)];
            if let Some((key, removed)) =
                self.records.remove_if(&old_key, |_, current| current.id == id)
            {
                changes.push((key, Some(removed)));
            }
            changes
        };

        self.persist_or_revert(changes).await?;
        Ok(record)
    }

    async fn delete(&self, id: &str) -> StorageResult<RoutingRecord> {
        let (key, _) = self.locate(id).ok_or_else(|| StorageError::not_found(id))?;
        let (_, removed) = self
            .records
            .remove_if(&key, |_, current| current.id == id)
            .ok_or_else(|| StorageError::not_found(id))?;

        self.persist_or_revert(vec![(key, Some(removed.clone()))]).await?;
        Ok(removed)
    }
}
