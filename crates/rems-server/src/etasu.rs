//! `GuidanceResponse/$rems-etasu`: forwards a compliance check to the
//! administrator of the embedded medication.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
};
use rems_core::{MedicationCoding, WILDCARD_REQUESTER};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::server::AppState;

/// Body returned when no administrator handles the medication.
pub const NO_ETASU_FOUND: &str = "No Etasu Found";

/// Last `medication` parameter holding a `Medication` or `MedicationRequest`.
pub fn medication_parameter(parameters: &Value) -> Option<&Value> {
    parameters
        .get("parameter")?
        .as_array()?
        .iter()
        .filter(|p| p.get("name").and_then(Value::as_str) == Some("medication"))
        .filter_map(|p| p.get("resource"))
        .filter(|r| {
            matches!(
                r.get("resourceType").and_then(Value::as_str),
                Some("Medication" | "MedicationRequest")
            )
        })
        .last()
}

pub async fn rems_etasu(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let parameters: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid Parameters resource: {e}")))?;

    let Some(coding) = medication_parameter(&parameters).and_then(MedicationCoding::from_resource)
    else {
        debug!("No medication coding in ETASU request");
        return Ok(no_etasu_found());
    };

    let record = state
        .resolver
        .resolve(&coding, WILDCARD_REQUESTER)
        .await
        .filter(|r| !r.target_etasu_base.is_empty());
    let Some(record) = record else {
        debug!(code = %coding.code, system = %coding.system, "No ETASU route");
        return Ok(no_etasu_found());
    };

    let response = state
        .forwarder
        .forward(&record.target_etasu_base, body)
        .await?;
    info!(code = %coding.code, url = %record.target_etasu_base, "Relayed ETASU response");
    Ok(([(CONTENT_TYPE, "application/json")], response).into_response())
}

fn no_etasu_found() -> Response {
    Json(NO_ETASU_FOUND).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_medication_parameter_selection() {
        let parameters = json!({
            "resourceType": "Parameters",
            "parameter": [
                { "name": "patient", "resource": { "resourceType": "Patient" } },
                { "name": "medication", "resource": { "resourceType": "Observation" } },
                { "name": "medication", "resource": {
                    "resourceType": "Medication",
                    "code": { "coding": [{ "system": "http://www.nlm.nih.gov/research/umls/rxnorm", "code": "6064" }] }
                }}
            ]
        });
        let medication = medication_parameter(&parameters).unwrap();
        assert_eq!(medication["resourceType"], "Medication");
        assert_eq!(MedicationCoding::from_resource(medication).unwrap().code, "6064");

        assert!(medication_parameter(&json!({"resourceType": "Parameters"})).is_none());
    }
}
