#![allow(dead_code)]

use rems_core::RXNORM_SYSTEM;
use rems_server::{AppConfig, ServerBuilder, build_app};
use rems_storage::DynConnectionStore;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

pub struct TestServer {
    pub base: String,
    pub store: DynConnectionStore,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }
}

/// Config whose default administrator is `admin_base`.
pub fn config_for(admin_base: &str) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.admin.default_base_url = admin_base.to_string();
    cfg.forwarding.timeout_ms = 1_000;
    cfg.hydration.timeout_ms = 1_000;
    cfg
}

/// Builds the full app (seed table included) and serves it on an ephemeral port.
pub async fn start_server(config: AppConfig) -> TestServer {
    let server = ServerBuilder::new()
        .with_config(config)
        .build()
        .await
        .expect("build server");
    start_with_state(server.state().clone()).await
}

pub async fn start_with_state(state: rems_server::AppState) -> TestServer {
    let store = state.store.clone();
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    TestServer {
        base: format!("http://{addr}"),
        store,
        shutdown: Some(tx),
        handle,
    }
}

pub fn medication_request(id: &str, code: &str) -> Value {
    json!({
        "resourceType": "MedicationRequest",
        "id": id,
        "subject": { "reference": "Patient/pat-1" },
        "medicationCodeableConcept": {
            "coding": [{ "system": RXNORM_SYSTEM, "code": code }]
        }
    })
}

pub fn bundle(resources: Vec<Value>) -> Value {
    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "entry": resources
            .into_iter()
            .map(|resource| json!({ "resource": resource }))
            .collect::<Vec<_>>()
    })
}

/// An `order-sign` event for a single RxNorm code.
pub fn order_sign_event(code: &str, fhir_server: &str) -> Value {
    json!({
        "hook": "order-sign",
        "hookInstance": "d1577c69-dfbe-44ad-ba6d-3e05e953b2ea",
        "fhirServer": fhir_server,
        "context": {
            "userId": "Practitioner/pra-1",
            "patientId": "pat-1",
            "draftOrders": bundle(vec![medication_request("mr-1", code)])
        }
    })
}

pub fn patient_view_event(fhir_server: &str, orders: Vec<Value>) -> Value {
    json!({
        "hook": "patient-view",
        "hookInstance": "8b1d6a0e-4c2f-4f55-9d43-7f1f1f5d0a11",
        "fhirServer": fhir_server,
        "context": { "userId": "Practitioner/pra-1", "patientId": "pat-1" },
        "prefetch": {
            "patient": { "resourceType": "Patient", "id": "pat-1" },
            "medicationRequests": bundle(orders)
        }
    })
}

pub fn card(summary: &str) -> Value {
    json!({
        "summary": summary,
        "indicator": "info",
        "source": { "label": "Test REMS Administrator" }
    })
}
