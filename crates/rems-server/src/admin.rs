//! Administrative CRUD over routing records.
//!
//! Every write goes through the connection store, so dispatch always sees
//! the latest record.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use rems_core::RoutingRecord;
use serde_json::Value;
use url::Url;

use crate::directory::RefreshReport;
use crate::error::ApiError;
use crate::server::AppState;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/connections", get(list_connections).post(create_connection))
        .route("/api/connections/refresh", post(refresh_connections))
        .route(
            "/api/connections/{id}",
            get(read_connection)
                .put(update_connection)
                .delete(delete_connection),
        )
}

/// Parses and checks an administrator-supplied record.
fn parse_record(payload: Value) -> Result<RoutingRecord, ApiError> {
    let mut record: RoutingRecord = serde_json::from_value(payload)
        .map_err(|e| ApiError::bad_request(format!("Invalid connection: {e}")))?;
    record.normalize();
    record
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    for (field, value) in [
        ("targetHookBase", &record.target_hook_base),
        ("targetEtasuBase", &record.target_etasu_base),
    ] {
        Url::parse(value)
            .map_err(|e| ApiError::bad_request(format!("{field} is not an absolute URL: {e}")))?;
    }
    Ok(record)
}

async fn list_connections(State(state): State<AppState>) -> Result<Json<Vec<RoutingRecord>>, ApiError> {
    Ok(Json(state.store.list().await?))
}

async fn create_connection(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let record = parse_record(payload)?;
    let created = state.store.create(record).await?;
    tracing::info!(id = %created.id, key = %created.key(), "Connection created");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn read_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RoutingRecord>, ApiError> {
    state
        .store
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Connection not found: {id}")))
}

async fn update_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<RoutingRecord>, ApiError> {
    let record = parse_record(payload)?;
    let updated = state.store.replace(&id, record).await?;
    tracing::info!(id = %updated.id, key = %updated.key(), revision = updated.revision, "Connection replaced");
    Ok(Json(updated))
}

async fn delete_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RoutingRecord>, ApiError> {
    let removed = state.store.delete(&id).await?;
    tracing::info!(id = %removed.id, key = %removed.key(), "Connection deleted");
    Ok(Json(removed))
}

/// Runs directory maintenance now and reports per-record outcomes.
async fn refresh_connections(State(state): State<AppState>) -> Result<Json<RefreshReport>, ApiError> {
    Ok(Json(state.directory.refresh_all().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_record_accepts_legacy_names() {
        let record = parse_record(json!({
            "code": "6064",
            "system": "http://www.nlm.nih.gov/research/umls/rxnorm",
            "to": "http://admin/cds-services/rems-",
            "toEtasu": "http://admin/etasu",
            "from": []
        }))
        .unwrap();
        assert!(record.permits("anyone"));
    }

    #[test]
    fn test_parse_record_rejects_relative_target() {
        let err = parse_record(json!({
            "code": "6064",
            "codingSystem": "http://www.nlm.nih.gov/research/umls/rxnorm",
            "targetHookBase": "/cds-services/rems-",
            "targetEtasuBase": "http://admin/etasu"
        }))
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err = parse_record(json!({ "code": "6064" })).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
