use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    middleware,
    routing::{get, post},
};
use rems_db_memory::InMemoryConnectionStore;
use rems_storage::DynConnectionStore;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::admin::admin_routes;
use crate::config::AppConfig;
use crate::directory::DirectoryResolver;
use crate::hooks::{HookDispatcher, HydrationSettings, ServiceRegistry, SharedDispatcher, hook_routes};
use crate::proxy::Forwarder;
use crate::resolver::EndpointResolver;
use crate::{etasu, handlers, middleware as app_middleware, seed};

/// Path of the ETASU operation served by the intermediary itself.
pub const ETASU_PATH: &str = "/4_0_0/GuidanceResponse/$rems-etasu";

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: DynConnectionStore,
    pub resolver: EndpointResolver,
    pub dispatcher: SharedDispatcher,
    pub directory: Arc<DirectoryResolver>,
    pub services: Arc<ServiceRegistry>,
    pub forwarder: Forwarder,
}

impl AppState {
    /// Wires resolver, dispatcher and directory maintenance over `store`.
    pub fn new(config: AppConfig, store: DynConnectionStore) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("rems-intermediary/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let resolver = EndpointResolver::new(store.clone());
        let forwarder = Forwarder::new(client.clone(), config.forward_timeout());
        let hydration = config.hydration.enabled.then(|| HydrationSettings {
            client: client.clone(),
            timeout: Duration::from_millis(config.hydration.timeout_ms),
        });
        let dispatcher = Arc::new(HookDispatcher::new(
            resolver.clone(),
            forwarder.clone(),
            hydration,
        ));
        let directory = Arc::new(DirectoryResolver::new(
            store.clone(),
            client,
            config.admin.clone(),
            &config.directory,
        ));

        Ok(Self {
            config: Arc::new(config),
            store,
            resolver,
            dispatcher,
            directory,
            services: Arc::new(ServiceRegistry::default()),
            forwarder,
        })
    }
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;
    let discovery_path = state.config.server.discovery_path.clone();

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(hook_routes(&discovery_path))
        .route(ETASU_PATH, post(etasu::rems_etasu))
        .merge(admin_routes())
        .with_state(state)
        // Middleware stack (order: request id -> cors -> trace -> body limit)
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(app_middleware::request_id))
}

pub struct RemsServer {
    addr: SocketAddr,
    state: AppState,
}

pub struct ServerBuilder {
    config: AppConfig,
    store: Option<DynConnectionStore>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            store: None,
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Uses `store` instead of opening one from `storage.snapshot_path`.
    pub fn with_store(mut self, store: DynConnectionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Opens the connection store and loads the seed routing table.
    pub async fn build(self) -> anyhow::Result<RemsServer> {
        let store: DynConnectionStore = match (self.store, &self.config.storage.snapshot_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(InMemoryConnectionStore::open(path).await?),
            (None, None) => Arc::new(InMemoryConnectionStore::new()),
        };

        let seeded = seed::load_seed(&store, &self.config.admin).await?;
        tracing::info!(seeded, "Seed routing table loaded");

        let addr = self.config.addr();
        let state = AppState::new(self.config, store)?;
        Ok(RemsServer { addr, state })
    }
}

impl RemsServer {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let maintenance = Arc::clone(&self.state.directory)
            .spawn_maintenance(&self.state.config.directory);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        let served = axum::serve(listener, build_app(self.state))
            .with_graceful_shutdown(shutdown_signal())
            .await;

        if let Some(handle) = maintenance {
            handle.abort();
        }
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
