//! JSON snapshot file behind the in-memory map.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rems_core::RoutingRecord;
use rems_storage::{StorageError, StorageResult};

#[derive(Debug)]
pub(crate) struct SnapshotFile {
    path: PathBuf,
    generation: AtomicU64,
    /// Generation of the snapshot currently on disk.
    written: Arc<Mutex<u64>>,
}

impl SnapshotFile {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            generation: AtomicU64::new(0),
            written: Arc::new(Mutex::new(0)),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Must be taken after the map write and before collecting records, so a
    /// higher generation always includes every lower one's write.
    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) async fn load(&self) -> StorageResult<Vec<RoutingRecord>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                StorageError::unavailable(format!(
                    "failed to parse snapshot {}: {e}",
                    self.path.display()
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StorageError::unavailable(format!(
                "failed to read snapshot {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Writes `records` unless a newer generation is already on disk.
    pub(crate) async fn write(
        &self,
        generation: u64,
        records: Vec<RoutingRecord>,
    ) -> StorageResult<()> {
        let path = self.path.clone();
        let written = Arc::clone(&self.written);

        tokio::task::spawn_blocking(move || {
            let mut last = written
                .lock()
                .map_err(|_| StorageError::unavailable("snapshot lock poisoned"))?;
            if generation <= *last {
                return Ok(());
            }

            let json = serde_json::to_vec_pretty(&records)
                .map_err(|e| StorageError::unavailable(format!("failed to encode snapshot: {e}")))?;
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, json)
                .and_then(|_| std::fs::rename(&tmp, &path))
                .map_err(|e| {
                    StorageError::unavailable(format!(
                        "failed to write snapshot {}: {e}",
                        path.display()
                    ))
                })?;

            *last = generation;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::unavailable(format!("snapshot task failed: {e}")))?
    }
}
