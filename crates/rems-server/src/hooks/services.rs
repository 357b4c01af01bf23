//! CDS Hooks service definitions and the discovery manifest.

use indexmap::IndexMap;
use rems_core::HookType;
use serde::Serialize;
use serde_json::{Value, json};

/// Prefetch key to templated FHIR query.
pub type PrefetchTemplate = IndexMap<String, String>;

#[derive(Debug, Clone, Serialize)]
pub struct ServiceDefinition {
    pub id: String,
    pub hook: HookType,
    pub title: String,
    pub description: String,
    pub prefetch: PrefetchTemplate,
}

impl ServiceDefinition {
    fn rems(hook: HookType) -> Self {
        let mut prefetch = PrefetchTemplate::new();
        prefetch.insert("patient".into(), "Patient/{{context.patientId}}".into());
        prefetch.insert("practitioner".into(), "{{context.userId}}".into());
        if !hook.requires_draft_order() {
            prefetch.insert(
                "medicationRequests".into(),
                "MedicationRequest?subject={{context.patientId}}&_include=MedicationRequest:medication"
                    .into(),
            );
        }

        Self {
            id: format!("rems-{}", hook.as_str()),
            hook,
            title: "REMS Requirement Lookup".into(),
            description: "REMS Requirement Lookup".into(),
            prefetch,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: Vec<ServiceDefinition>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self {
            services: HookType::ALL.into_iter().map(ServiceDefinition::rems).collect(),
        }
    }
}

impl ServiceRegistry {
    pub fn get(&self, id: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.id == id)
    }

    /// Discovery response body.
    pub fn manifest(&self) -> Value {
        json!({ "services": self.services })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_lists_all_hooks() {
        let registry = ServiceRegistry::default();
        let manifest = registry.manifest();
        let services = manifest["services"].as_array().unwrap();
        assert_eq!(services.len(), 4);
        assert_eq!(services[0]["id"], "rems-order-sign");
        assert_eq!(services[0]["hook"], "order-sign");
        assert_eq!(services[0]["prefetch"]["patient"], "Patient/{{context.patientId}}");
    }

    #[test]
    fn test_bundle_hooks_prefetch_orders() {
        let registry = ServiceRegistry::default();
        let view = registry.get("rems-patient-view").unwrap();
        assert!(view.prefetch.contains_key("medicationRequests"));
        let sign = registry.get("rems-order-sign").unwrap();
        assert!(!sign.prefetch.contains_key("medicationRequests"));
        assert!(registry.get("order-sign").is_none());
    }
}
