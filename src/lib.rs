//! Read-only tabular export of the learn schema (curriculum, students and
//! their logged activity) for researchers.
//!
//! Each entity has a listing route returning every record as CSV, TSV or
//! JSON; `/latest-bundle/` redirects to the prebuilt full archive.

use axum::{routing::get, Router};
use std::{path::Path, sync::Arc};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod auth;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod input;
pub mod models;
pub mod projection;
pub mod render;
pub mod routes;
pub mod store;

use store::ExportStore;

/// Shared by every handler; cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ExportStore>,
    pub latest_bundle_url: Arc<str>,
}

impl AppState {
    pub fn new(store: Arc<dyn ExportStore>, latest_bundle_url: &str) -> Self {
        Self { store, latest_bundle_url: Arc::from(latest_bundle_url) }
    }
}

/// The full application: export routes, health check and HTTP layers.
pub fn app(state: AppState, media_dir: &Path) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(state, media_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)),
        )
}
