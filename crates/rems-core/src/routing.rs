//! Routing records: the mapping from a medication identity to the REMS
//! administrator that owns compliance logic for it.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::error::{CoreError, Result};
use crate::hook::HookType;

/// Requester value that permits any caller.
pub const WILDCARD_REQUESTER: &str = "any";

/// How a routing record was most recently populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LookupStrategy {
    /// Built-in seed table or administrator entry.
    Static,
    /// Remote directory API queried by product identifier.
    DirectoryApi,
    /// Structured product label archive.
    SplDocument,
}

impl LookupStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::DirectoryApi => "directoryApi",
            Self::SplDocument => "splDocument",
        }
    }

    /// Returns `true` for strategies refreshed by directory maintenance.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::DirectoryApi | Self::SplDocument)
    }
}

impl fmt::Display for LookupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique key of a routing record: `(code, codingSystem)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey {
    pub code: String,
    pub system: String,
}

impl ConnectionKey {
    pub fn new(code: impl Into<String>, system: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            system: system.into(),
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.system, self.code)
    }
}

/// A resolved mapping from a medication identity to an administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRecord {
    /// Store-assigned identifier, empty until the record is first written.
    #[serde(default)]
    pub id: String,

    /// Drug identifier value.
    pub code: String,

    /// URI of the code system (RxNorm, NDC, SNOMED, ...).
    #[serde(alias = "system")]
    pub coding_system: String,

    /// Prefix the hook type is appended to when forwarding hook events.
    #[serde(alias = "to")]
    pub target_hook_base: String,

    /// Where compliance-check (ETASU) requests are forwarded.
    #[serde(alias = "toEtasu")]
    pub target_etasu_base: String,

    /// Requesters allowed to use this route; contains [`WILDCARD_REQUESTER`] by default.
    #[serde(default = "default_allowed_requesters", alias = "from")]
    pub allowed_requesters: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_strategy: Option<LookupStrategy>,

    /// Reference date of the SPL release this record resolves against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_resolved_date: Option<Date>,

    /// Incremented by the store on every write that changes the record.
    #[serde(default)]
    pub revision: u64,
}

fn default_allowed_requesters() -> BTreeSet<String> {
    BTreeSet::from([WILDCARD_REQUESTER.to_string()])
}

impl RoutingRecord {
    /// Creates a record open to any requester.
    pub fn new(
        code: impl Into<String>,
        coding_system: impl Into<String>,
        target_hook_base: impl Into<String>,
        target_etasu_base: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            code: code.into(),
            coding_system: coding_system.into(),
            target_hook_base: target_hook_base.into(),
            target_etasu_base: target_etasu_base.into(),
            allowed_requesters: default_allowed_requesters(),
            brand_name: None,
            generic_name: None,
            lookup_strategy: None,
            last_resolved_date: None,
            revision: 0,
        }
    }

    pub fn with_names(mut self, brand: impl Into<String>, generic: Option<&str>) -> Self {
        self.brand_name = Some(brand.into());
        self.generic_name = generic.map(str::to_string);
        self
    }

    pub fn with_strategy(mut self, strategy: LookupStrategy) -> Self {
        self.lookup_strategy = Some(strategy);
        self
    }

    pub fn with_reference_date(mut self, date: Date) -> Self {
        self.last_resolved_date = Some(date);
        self
    }

    pub fn with_allowed_requesters<I, S>(mut self, requesters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_requesters = requesters.into_iter().map(Into::into).collect();
        self
    }

    pub fn key(&self) -> ConnectionKey {
        ConnectionKey::new(&self.code, &self.coding_system)
    }

    /// Whether `requester` may use this route.
    pub fn permits(&self, requester: &str) -> bool {
        self.allowed_requesters.contains(WILDCARD_REQUESTER)
            || self.allowed_requesters.contains(requester)
    }

    /// Whether the record can be used for hook forwarding.
    pub fn is_forwardable(&self) -> bool {
        !self.target_hook_base.is_empty()
    }

    /// Full hook URL for the given hook type.
    pub fn hook_url(&self, hook: HookType) -> String {
        format!("{}{}", self.target_hook_base, hook.as_str())
    }

    pub fn targets_match(&self, other: &RoutingRecord) -> bool {
        self.target_hook_base == other.target_hook_base
            && self.target_etasu_base == other.target_etasu_base
    }

    /// Strategy, display names and reference date.
    pub fn metadata_matches(&self, other: &RoutingRecord) -> bool {
        self.lookup_strategy == other.lookup_strategy
            && self.brand_name == other.brand_name
            && self.generic_name == other.generic_name
            && self.last_resolved_date == other.last_resolved_date
    }

    /// Trims identity fields and restores the wildcard on an empty allow-list.
    pub fn normalize(&mut self) {
        self.code = self.code.trim().to_string();
        self.coding_system = self.coding_system.trim().to_string();
        self.target_hook_base = self.target_hook_base.trim().to_string();
        self.target_etasu_base = self.target_etasu_base.trim().to_string();
        self.allowed_requesters = std::mem::take(&mut self.allowed_requesters)
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if self.allowed_requesters.is_empty() {
            self.allowed_requesters = default_allowed_requesters();
        }
    }

    /// Checks the fields every stored record must carry.
    pub fn validate(&self) -> Result<()> {
        if self.code.is_empty() {
            return Err(CoreError::invalid_record("code must not be empty"));
        }
        if self.coding_system.is_empty() {
            return Err(CoreError::invalid_record("codingSystem must not be empty"));
        }
        if self.target_hook_base.is_empty() || self.target_etasu_base.is_empty() {
            return Err(CoreError::invalid_record(
                "targetHookBase and targetEtasuBase must not be empty",
            ));
        }
        Ok(())
    }
}
