//! # rems-storage
//!
//! Storage abstraction for the routing table of the REMS Intermediary.
//!
//! The main trait is [`ConnectionStore`], the single shared resource every
//! dispatch reads from and directory maintenance writes to. This crate holds
//! no backend; see `rems-db-memory`.
//!
//! ## Write discipline
//!
//! Backends must serialize writes per `(code, system)` key. The
//! update-if-changed rule used by [`ConnectionStore::upsert`] lives in
//! [`merge_upsert`] so every backend applies it identically.

mod error;
mod traits;
mod upsert;

pub use error::{ErrorCategory, StorageError};
pub use traits::ConnectionStore;
pub use upsert::{UpsertOutcome, merge_upsert};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shareable store.
pub type DynConnectionStore = std::sync::Arc<dyn ConnectionStore>;
