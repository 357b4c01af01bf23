//! In-memory connection store for the REMS Intermediary.
//!
//! [`InMemoryConnectionStore`] keeps the routing table in a `DashMap` keyed by
//! `(code, system)`. Writes to one key go through the map's entry API, so two
//! concurrent upserts of the same drug are applied one after the other.
//! With a snapshot path configured, every write is persisted to a JSON file
//! that is reloaded on startup.
//!
//! # Example
//!
//! ```ignore
//! use rems_db_memory::InMemoryConnectionStore;
//! use rems_storage::ConnectionStore;
//!
//! let store = InMemoryConnectionStore::open("connections.json").await?;
//! let record = store.find("6064", rems_core::RXNORM_SYSTEM).await?;
//! ```

mod snapshot;
pub mod storage;

pub use rems_storage::{ConnectionStore, StorageError, UpsertOutcome};
pub use storage::InMemoryConnectionStore;

/// Creates a new shareable in-memory store without persistence.
pub fn create_connection_store() -> rems_storage::DynConnectionStore {
    std::sync::Arc::new(InMemoryConnectionStore::new())
}
