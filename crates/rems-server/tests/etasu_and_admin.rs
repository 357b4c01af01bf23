mod common;

use common::*;
use rems_core::RXNORM_SYSTEM;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ETASU: &str = "/4_0_0/GuidanceResponse/$rems-etasu";

fn etasu_parameters(code: &str) -> Value {
    json!({
        "resourceType": "Parameters",
        "parameter": [
            { "name": "patient", "resource": { "resourceType": "Patient", "id": "pat-1" } },
            { "name": "medication", "resource": {
                "resourceType": "Medication",
                "id": "med-1",
                "code": { "coding": [{ "system": RXNORM_SYSTEM, "code": code }] }
            }}
        ]
    })
}

#[tokio::test]
async fn etasu_relays_administrator_guidance() {
    let admin = MockServer::start().await;
    let guidance = json!({
        "resourceType": "Parameters",
        "parameter": [{ "name": "rems-etasu", "resource": { "resourceType": "GuidanceResponse", "status": "success" } }]
    });
    Mock::given(method("POST"))
        .and(path(ETASU))
        .respond_with(ResponseTemplate::new(200).set_body_json(guidance.clone()))
        .expect(1)
        .mount(&admin)
        .await;

    let server = start_server(config_for(&admin.uri())).await;
    let resp = reqwest::Client::new()
        .post(server.url(ETASU))
        .json(&etasu_parameters("6064"))
        .send()
        .await
        .unwrap();

    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, guidance);

    server.stop().await;
}

#[tokio::test]
async fn etasu_without_route_answers_no_etasu_found() {
    let admin = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&admin)
        .await;

    let server = start_server(config_for(&admin.uri())).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url(ETASU))
        .json(&etasu_parameters("999999"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!("No Etasu Found"));

    let resp = client
        .post(server.url(ETASU))
        .json(&json!({ "resourceType": "Parameters", "parameter": [] }))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!("No Etasu Found"));

    server.stop().await;
}

#[tokio::test]
async fn etasu_downstream_failure_is_bad_gateway() {
    let admin = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ETASU))
        .respond_with(ResponseTemplate::new(500))
        .mount(&admin)
        .await;

    let server = start_server(config_for(&admin.uri())).await;
    let resp = reqwest::Client::new()
        .post(server.url(ETASU))
        .json(&etasu_parameters("6064"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["resourceType"], "OperationOutcome");

    server.stop().await;
}

#[tokio::test]
async fn connection_crud_lifecycle() {
    let server = start_server(config_for("http://localhost:8090")).await;
    let client = reqwest::Client::new();

    // Seed table is visible
    let listed: Vec<Value> = client
        .get(server.url("/api/connections"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 7);

    // Create
    let new_record = json!({
        "code": "1010600",
        "codingSystem": RXNORM_SYSTEM,
        "targetHookBase": "http://rems-admin.example/cds-services/rems-",
        "targetEtasuBase": "http://rems-admin.example/4_0_0/GuidanceResponse/$rems-etasu",
        "allowedRequesters": ["http://ehr.example"]
    });
    let resp = client
        .post(server.url("/api/connections"))
        .json(&new_record)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());
    assert_eq!(created["revision"], 1);

    // Duplicate key
    let resp = client
        .post(server.url("/api/connections"))
        .json(&new_record)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    // Relative target rejected
    let mut invalid = new_record.clone();
    invalid["code"] = json!("2020600");
    invalid["targetHookBase"] = json!("cds-services/rems-");
    let resp = client
        .post(server.url("/api/connections"))
        .json(&invalid)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Read
    let read: Value = client
        .get(server.url(&format!("/api/connections/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(read["code"], "1010600");

    // Replace
    let mut replacement = new_record.clone();
    replacement["targetHookBase"] = json!("http://other-admin.example/cds-services/rems-");
    let resp = client
        .put(server.url(&format!("/api/connections/{id}")))
        .json(&replacement)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let replaced: Value = resp.json().await.unwrap();
    assert_eq!(replaced["id"], id.as_str());
    assert_eq!(replaced["targetHookBase"], "http://other-admin.example/cds-services/rems-");

    // Delete, then everything 404s
    let resp = client
        .delete(server.url(&format!("/api/connections/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    for resp in [
        client.get(server.url(&format!("/api/connections/{id}"))).send().await.unwrap(),
        client.delete(server.url(&format!("/api/connections/{id}"))).send().await.unwrap(),
        client
            .put(server.url(&format!("/api/connections/{id}")))
            .json(&replacement)
            .send()
            .await
            .unwrap(),
    ] {
        assert_eq!(resp.status(), 404);
    }

    server.stop().await;
}
