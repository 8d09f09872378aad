//! HTTP surface.
//!
//! Mutating routes go through the [`Reconciler`]; the read route goes straight to
//! the [`Mirror`].

mod error;
mod handlers;

use crate::mirror::Mirror;
use crate::reconciler::Reconciler;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub mirror: Mirror,
}

impl AppState {
    pub fn new(reconciler: Reconciler) -> AppState {
        let mirror = reconciler.mirror().clone();
        AppState {
            reconciler: Arc::new(reconciler),
            mirror,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/vnet/create", post(handlers::create_vnet))
        .route("/vnets/data", get(handlers::read_vnet_data))
        .route("/vnet/subnet/delete", delete(handlers::delete_subnet))
        .route("/vnet/delete", delete(handlers::delete_vnet))
        .route("/vnet/resync", post(handlers::resync_vnet))
        .with_state(state)
}
