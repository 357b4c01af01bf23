use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use rems_core::{CdsResponse, HookEvent};
use serde_json::Value;
use tracing::{Instrument, debug, error, info};

use super::dispatcher::HookOutcome;
use crate::error::ApiError;
use crate::server::AppState;

/// `GET {discovery}`: the service manifest.
pub async fn discovery(State(state): State<AppState>) -> Json<Value> {
    Json(state.services.manifest())
}

/// `POST {discovery}/{id}`: dispatch one hook event.
///
/// Dispatch runs in its own task so a caller hanging up does not cancel
/// forwards already in flight; their result is simply dropped.
pub async fn handle_hook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let Some(service) = state.services.get(&id) else {
        return ApiError::not_found(format!("Unknown CDS service: {id}")).into_response();
    };

    let event: HookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            info!(service = %id, error = %e, "Malformed hook request");
            return HookOutcome::Cards(CdsResponse::error(format!("Invalid hook request: {e}")))
                .into_response();
        }
    };
    if event.hook != service.hook.as_str() {
        debug!(service = %id, hook = %event.hook, "Hook type differs from service definition");
    }

    let dispatcher = Arc::clone(&state.dispatcher);
    let template = service.prefetch.clone();
    let task = tokio::spawn(
        async move { dispatcher.dispatch(event, &template).await }.in_current_span(),
    );

    match task.await {
        Ok(outcome) => outcome.into_response(),
        Err(e) => {
            error!(service = %id, error = %e, "Hook dispatch task failed");
            HookOutcome::empty().into_response()
        }
    }
}
