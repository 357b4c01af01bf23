//! CDS Hooks request payload.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Supported hook types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookType {
    PatientView,
    EncounterStart,
    OrderSelect,
    OrderSign,
}

impl HookType {
    pub const ALL: [HookType; 4] = [
        HookType::OrderSign,
        HookType::OrderSelect,
        HookType::PatientView,
        HookType::EncounterStart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PatientView => "patient-view",
            Self::EncounterStart => "encounter-start",
            Self::OrderSelect => "order-select",
            Self::OrderSign => "order-sign",
        }
    }

    /// Order hooks carry the medication directly in `context.draftOrders`;
    /// the others work over a prefetched bundle of orders.
    pub fn requires_draft_order(&self) -> bool {
        matches!(self, Self::OrderSelect | Self::OrderSign)
    }
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HookType::ALL
            .into_iter()
            .find(|hook| hook.as_str() == s)
            .ok_or_else(|| CoreError::unsupported_hook(s))
    }
}

/// OAuth credential the caller grants for reading its FHIR server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FhirAuthorization {
    pub access_token: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Inbound hook event.
///
/// Unknown top-level members are kept in `extra` so the event is forwarded
/// with everything the caller sent, minus the credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookEvent {
    pub hook: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_instance: Option<String>,

    /// Caller's FHIR server; doubles as the requester identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fhir_server: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fhir_authorization: Option<FhirAuthorization>,

    #[serde(default)]
    pub context: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefetch: Option<Map<String, Value>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HookEvent {
    pub fn hook_type(&self) -> Result<HookType, CoreError> {
        self.hook.parse()
    }

    /// Requester identity used against routing allow-lists.
    pub fn requester(&self) -> &str {
        self.fhir_server.as_deref().unwrap_or("")
    }

    /// The caller's server and bearer token, when both are present.
    pub fn credential(&self) -> Option<(&str, &str)> {
        let server = self.fhir_server.as_deref().filter(|s| !s.is_empty())?;
        let token = self
            .fhir_authorization
            .as_ref()
            .map(|auth| auth.access_token.as_str())
            .filter(|t| !t.is_empty())?;
        Some((server, token))
    }

    pub fn strip_credentials(&mut self) {
        self.fhir_authorization = None;
    }

    /// Prefetched resources of type `Bundle`.
    pub fn prefetch_bundles(&self) -> impl Iterator<Item = &Value> {
        self.prefetch
            .iter()
            .flat_map(|prefetch| prefetch.values())
            .filter(|value| value.get("resourceType").and_then(Value::as_str) == Some("Bundle"))
    }
}
