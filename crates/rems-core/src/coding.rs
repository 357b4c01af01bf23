//! Medication coding extraction.
//!
//! A medication can be identified three ways in an order:
//!
//! - inline `medicationCodeableConcept`
//! - `medicationReference` to a contained `Medication` (`#id`)
//! - `medicationReference` to a `Medication` included in the same bundle
//!   (`Medication/id` or a matching `fullUrl`)
//!
//! When a concept carries several codings the last RxNorm one wins, otherwise
//! the first coding with both `system` and `code`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const RXNORM_SYSTEM: &str = "http://www.nlm.nih.gov/research/umls/rxnorm";
pub const NDC_SYSTEM: &str = "http://hl7.org/fhir/sid/ndc";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MedicationCoding {
    pub system: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl MedicationCoding {
    pub fn new(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            code: code.into(),
            display: None,
        }
    }

    /// Picks the coding to route on from a `CodeableConcept`.
    pub fn from_codeable_concept(concept: &Value) -> Option<Self> {
        let codings: Vec<Self> = concept
            .get("coding")?
            .as_array()?
            .iter()
            .filter_map(Self::from_coding)
            .collect();

        codings
            .iter()
            .rev()
            .find(|c| c.system.ends_with("rxnorm"))
            .or_else(|| codings.first())
            .cloned()
    }

    fn from_coding(coding: &Value) -> Option<Self> {
        let system = coding.get("system")?.as_str()?;
        let code = coding.get("code")?.as_str()?;
        if system.is_empty() || code.is_empty() {
            return None;
        }
        Some(Self {
            system: system.to_string(),
            code: code.to_string(),
            display: coding
                .get("display")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// Coding of a `Medication` or `MedicationRequest` resource.
    pub fn from_resource(resource: &Value) -> Option<Self> {
        Self::from_resource_with(resource, None)
    }

    /// Coding of an order that may reference a `Medication` elsewhere in `bundle`.
    pub fn from_order_in_bundle(order: &Value, bundle: &Value) -> Option<Self> {
        Self::from_resource_with(order, Some(bundle))
    }

    fn from_resource_with(resource: &Value, bundle: Option<&Value>) -> Option<Self> {
        match resource_type(resource)? {
            "Medication" => Self::from_codeable_concept(resource.get("code")?),
            "MedicationRequest" => {
                if let Some(concept) = resource.get("medicationCodeableConcept") {
                    return Self::from_codeable_concept(concept);
                }
                let reference = resource
                    .get("medicationReference")?
                    .get("reference")?
                    .as_str()?;
                let medication = match reference.strip_prefix('#') {
                    Some(local_id) => find_contained(resource, local_id),
                    None => bundle.and_then(|b| find_in_bundle(b, reference)),
                }?;
                if resource_type(medication) != Some("Medication") {
                    return None;
                }
                Self::from_codeable_concept(medication.get("code")?)
            }
            _ => None,
        }
    }
}

fn resource_type(resource: &Value) -> Option<&str> {
    resource.get("resourceType").and_then(Value::as_str)
}

fn find_contained<'a>(resource: &'a Value, local_id: &str) -> Option<&'a Value> {
    resource
        .get("contained")?
        .as_array()?
        .iter()
        .find(|c| c.get("id").and_then(Value::as_str) == Some(local_id))
}

fn find_in_bundle<'a>(bundle: &'a Value, reference: &str) -> Option<&'a Value> {
    bundle_entries(bundle).find_map(|entry| {
        let resource = entry.get("resource")?;
        let full_url_matches = entry
            .get("fullUrl")
            .and_then(Value::as_str)
            .is_some_and(|url| url == reference || url.ends_with(&format!("/{reference}")));
        let id_matches = match (resource_type(resource), resource.get("id").and_then(Value::as_str)) {
            (Some(rt), Some(id)) => reference == format!("{rt}/{id}"),
            _ => false,
        };
        (full_url_matches || id_matches).then_some(resource)
    })
}

fn bundle_entries(bundle: &Value) -> impl Iterator<Item = &Value> {
    bundle
        .get("entry")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// `MedicationRequest` resources in a bundle.
pub fn medication_orders(bundle: &Value) -> Vec<&Value> {
    bundle_entries(bundle)
        .filter_map(|entry| entry.get("resource"))
        .filter(|resource| resource_type(resource) == Some("MedicationRequest"))
        .collect()
}
