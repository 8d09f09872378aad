//! HTTP contract of the router, driven in-process with `tower::ServiceExt::oneshot`.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use azure_vnet_provisioner::azure::InMemoryControlPlane;
use azure_vnet_provisioner::{build_router, AppState, ProvisionError};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

async fn app() -> (Arc<InMemoryControlPlane>, Router) {
    let (cp, rec) = common::reconciler().await;
    (cp, build_router(AppState::new(rec)))
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request");

    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

fn create_body() -> Value {
    json!({
        "resourceGroup": "demo-rg",
        "vnetName": "myVNet",
        "location": "eastus",
        "addressPrefix": "10.0.0.0/16",
        "subnets": [{ "name": "subnet1", "addressPrefix": "10.0.1.0/24" }]
    })
}

#[tokio::test]
async fn test_root_and_health() {
    let (_cp, app) = app().await;
    let (status, body) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));

    let (status, body) = call(&app, Method::GET, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_create_and_read() {
    let (_cp, app) = app().await;

    let (status, body) = call(&app, Method::POST, "/vnet/create", Some(create_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "vnet_name": "myVNet", "location": "eastus", "subnets": ["subnet1"] })
    );

    let (status, body) = call(&app, Method::GET, "/vnets/data?vnetName=myVNet", None).await;
    assert_eq!(status, StatusCode::OK);
    let data = body["data"].as_array().expect("data array");
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["resource_group"], "demo-rg");
    assert_eq!(data[0]["address_space"], "10.0.0.0/16");
    assert_eq!(data[0]["status"], "AVAILABLE");
    assert_eq!(
        data[0]["subnets"],
        json!([{ "name": "subnet1", "address_prefix": "10.0.1.0/24" }])
    );

    let (status, body) = call(&app, Method::GET, "/vnets/data", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_read_unknown_network() {
    let (_cp, app) = app().await;
    let (status, body) = call(&app, Method::GET, "/vnets/data?vnetName=ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "message": "VNet not found" }));

    let (status, _) = call(&app, Method::GET, "/vnets/data", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_read_with_broken_storage() {
    let (_cp, rec) = common::reconciler().await;
    rec.mirror().close().await;
    let app = build_router(AppState::new(rec));

    let (status, body) = call(&app, Method::GET, "/vnets/data", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "message": "Internal server error" }));
}

#[tokio::test]
async fn test_delete_flow() {
    let (_cp, app) = app().await;
    call(&app, Method::POST, "/vnet/create", Some(create_body())).await;

    let (status, body) = call(
        &app,
        Method::DELETE,
        "/vnet/subnet/delete",
        Some(json!({ "resourceGroup": "demo-rg", "vnetName": "myVNet", "subnetName": "subnet1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["message"],
        "Subnet 'subnet1' has been successfully deleted from VNet 'myVNet'."
    );

    let (status, body) = call(
        &app,
        Method::DELETE,
        "/vnet/delete",
        Some(json!({ "resourceGroup": "demo-rg", "vnetName": "myVNet" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["message"],
        "VNet 'myVNet' successfully deleted from resource group 'demo-rg'."
    );

    let (status, _) = call(&app, Method::GET, "/vnets/data?vnetName=myVNet", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, body) = call(&app, Method::GET, "/vnets/data", None).await;
    assert_eq!(body["data"][0]["status"], "DELETED");
}

#[tokio::test]
async fn test_provider_error_is_500_with_detail() {
    let (cp, app) = app().await;
    cp.fail_next(ProvisionError::ControlPlaneCallFailed("QuotaExceeded".into()));

    let (status, body) = call(&app, Method::POST, "/vnet/create", Some(create_body())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "detail": "Azure API call failed: QuotaExceeded" }));

    let (status, body) = call(
        &app,
        Method::DELETE,
        "/vnet/delete",
        Some(json!({ "resourceGroup": "other-rg", "vnetName": "myVNet" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        json!({ "detail": "Resource group 'other-rg' or VNet 'myVNet' not found." })
    );
}

#[tokio::test]
async fn test_resync_route() {
    let (_cp, app) = app().await;
    call(&app, Method::POST, "/vnet/create", Some(create_body())).await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/vnet/resync",
        Some(json!({ "resourceGroup": "demo-rg", "vnetName": "myVNet" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subnets"], json!(["subnet1"]));

    let (_, body) = call(&app, Method::GET, "/vnets/data?vnetName=myVNet", None).await;
    assert_eq!(body["data"][0]["status"], "UPDATED");
}
