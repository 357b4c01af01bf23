//! CDS Hooks surface: service discovery, dispatch and prefetch hydration.

pub mod dispatcher;
pub mod hydrator;
pub mod routes;
pub mod services;

use axum::{
    Router,
    routing::{get, post},
};

pub use dispatcher::{AggregationState, HookDispatcher, HookOutcome, HydrationSettings, SharedDispatcher};
pub use hydrator::{FhirServerFetcher, HydrationError, ResourceFetcher, hydrate, resolve_template};
pub use services::{PrefetchTemplate, ServiceDefinition, ServiceRegistry};

use crate::server::AppState;

/// Discovery and service routes mounted at `discovery_path`.
pub fn hook_routes(discovery_path: &str) -> Router<AppState> {
    let base = discovery_path.trim_end_matches('/');
    Router::new()
        .route(base, get(routes::discovery))
        .route(&format!("{base}/{{id}}"), post(routes::handle_hook))
}
