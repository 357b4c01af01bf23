//! Update-if-changed rule shared by all store backends.

use std::fmt;

use rems_core::RoutingRecord;
use serde::Serialize;

/// Result of [`ConnectionStore::upsert`](crate::ConnectionStore::upsert).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UpsertOutcome {
    /// No record existed for the key.
    Inserted,
    /// Hook or ETASU target changed.
    TargetsUpdated,
    /// Targets equal; strategy, names or reference date changed.
    MetadataRefreshed,
    /// Nothing differed; nothing was written.
    Unchanged,
}

impl UpsertOutcome {
    /// Whether the store was written to.
    pub fn wrote(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Inserted => "inserted",
            Self::TargetsUpdated => "targets updated",
            Self::MetadataRefreshed => "metadata refreshed",
            Self::Unchanged => "unchanged",
        };
        f.write_str(s)
    }
}

/// Applies `incoming` onto `existing`.
///
/// Returns the record to store and the outcome, or `None` when nothing
/// differs. Identity (`id`, key) and `allowed_requesters` always come from
/// `existing`; the returned record has its revision bumped.
pub fn merge_upsert(
    existing: &RoutingRecord,
    incoming: &RoutingRecord,
) -> Option<(RoutingRecord, UpsertOutcome)> {
    let targets_same = existing.targets_match(incoming);
    let metadata_same = existing.metadata_matches(incoming);
    if targets_same && metadata_same {
        return None;
    }

    let mut merged = existing.clone();
    if !targets_same {
        merged.target_hook_base = incoming.target_hook_base.clone();
        merged.target_etasu_base = incoming.target_etasu_base.clone();
    }
    merged.lookup_strategy = incoming.lookup_strategy;
    merged.brand_name = incoming.brand_name.clone();
    merged.generic_name = incoming.generic_name.clone();
    merged.last_resolved_date = incoming.last_resolved_date;
    merged.revision = existing.revision + 1;

    let outcome = if targets_same {
        UpsertOutcome::MetadataRefreshed
    } else {
        UpsertOutcome::TargetsUpdated
    };
    Some((merged, outcome))
}
