use super::{ApiError, AppState};
use crate::models::{
    Message, SubnetDeleteRequest, VnetDeleteRequest, VnetRequest, VnetResyncRequest, VnetSummary,
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

pub async fn root() -> impl IntoResponse {
    Json(json!({ "message": "Azure network provisioning API in Action!" }))
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn create_vnet(
    State(state): State<AppState>,
    Json(req): Json<VnetRequest>,
) -> Result<Json<VnetSummary>, ApiError> {
    let summary = state.reconciler.create_or_update_network(&req).await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct VnetQuery {
    #[serde(rename = "vnetName")]
    vnet_name: Option<String>,
}

pub async fn read_vnet_data(State(state): State<AppState>, Query(query): Query<VnetQuery>) -> Response {
    let name = query.vnet_name.as_deref().filter(|n| !n.is_empty());
    match state.mirror.query(name).await {
        Ok(records) if records.is_empty() => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "VNet not found" })),
        )
            .into_response(),
        Ok(records) => Json(json!({ "data": records })).into_response(),
        Err(e) => {
            log::error!("Failed to retrieve VNet data: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "message": "Internal server error" })),
            )
                .into_response()
        }
    }
}

pub async fn delete_subnet(
    State(state): State<AppState>,
    Json(req): Json<SubnetDeleteRequest>,
) -> Result<Json<Message>, ApiError> {
    let message = state
        .reconciler
        .delete_subnet(&req.resource_group, &req.vnet_name, &req.subnet_name)
        .await?;
    Ok(Json(message))
}

pub async fn delete_vnet(
    State(state): State<AppState>,
    Json(req): Json<VnetDeleteRequest>,
) -> Result<Json<Message>, ApiError> {
    let message = state
        .reconciler
        .delete_network(&req.resource_group, &req.vnet_name)
        .await?;
    Ok(Json(message))
}

pub async fn resync_vnet(
    State(state): State<AppState>,
    Json(req): Json<VnetResyncRequest>,
) -> Result<Json<VnetSummary>, ApiError> {
    let summary = state
        .reconciler
        .resync_network(&req.resource_group, &req.vnet_name)
        .await?;
    Ok(Json(summary))
}
