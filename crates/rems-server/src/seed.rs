//! Built-in routing table loaded at startup.

use rems_core::{LookupStrategy, NDC_SYSTEM, RXNORM_SYSTEM, RoutingRecord};
use rems_storage::{DynConnectionStore, StorageResult};

use crate::config::AdminConfig;

struct SeedEntry {
    code: &'static str,
    system: &'static str,
    brand: &'static str,
    generic: &'static str,
}

const SEED_TABLE: &[SeedEntry] = &[
    SeedEntry { code: "6064", system: RXNORM_SYSTEM, brand: "iPLEDGE", generic: "isotretinoin" },
    SeedEntry { code: "1237051", system: RXNORM_SYSTEM, brand: "TIRF", generic: "fentanyl" },
    SeedEntry { code: "2183126", system: RXNORM_SYSTEM, brand: "Turalio", generic: "pexidartinib" },
    SeedEntry { code: "1666386", system: RXNORM_SYSTEM, brand: "Addyi", generic: "flibanserin" },
    SeedEntry { code: "0245-0571-01", system: NDC_SYSTEM, brand: "iPLEDGE", generic: "isotretinoin" },
    SeedEntry { code: "63459-502-30", system: NDC_SYSTEM, brand: "TIRF", generic: "fentanyl" },
    SeedEntry { code: "65597-402-20", system: NDC_SYSTEM, brand: "Turalio", generic: "pexidartinib" },
];

/// Seed records, all pointing at the default administrator.
pub fn seed_records(admin: &AdminConfig) -> Vec<RoutingRecord> {
    let hook_base = admin.default_hook_base();
    let etasu_url = admin.default_etasu_url();
    SEED_TABLE
        .iter()
        .map(|entry| {
            RoutingRecord::new(entry.code, entry.system, &hook_base, &etasu_url)
                .with_names(entry.brand, Some(entry.generic))
                .with_strategy(LookupStrategy::Static)
        })
        .collect()
}

/// Inserts every seed record whose key is not yet stored.
///
/// Returns the number of records inserted.
pub async fn load_seed(store: &DynConnectionStore, admin: &AdminConfig) -> StorageResult<usize> {
    let mut inserted = 0;
    for record in seed_records(admin) {
        let key = record.key();
        if store.seed_if_absent(record).await? {
            inserted += 1;
        } else {
            tracing::debug!(key = %key, "Skipping seed entry, already stored");
        }
    }
    tracing::info!(inserted, total = SEED_TABLE.len(), "Seeded routing table");
    Ok(inserted)
}
