use axum::{
    Json, Router,
    http::{HeaderValue, StatusCode, Uri},
    routing::get,
};
use tower_http::cors::{Any, CorsLayer};

use crate::{response::ApiResponse, state::AppState};

pub mod auth;
pub mod cart;
pub mod doc;
pub mod health;
pub mod orders;
pub mod params;
pub mod products;
pub mod wishlist;

// Build the API router without binding state; it will be provided at the top level.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::router())
        .nest("/products", products::router())
        .nest("/orders", orders::route())
        .nest("/cart", cart::router())
        .nest("/wishlist", wishlist::router())
}

/// Full application: `/health`, `/api/*`, `/docs` and the JSON 404 fallback.
/// Tracing and request limits are layered on by the binary.
pub fn build_app(state: AppState) -> Router {
    let cors = cors_layer(state.config.cors_origin.as_deref());
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", create_api_router())
        .merge(doc::scalar_docs())
        .fallback(not_found)
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match origin.and_then(|o| HeaderValue::from_str(o).ok()) {
        Some(origin) => layer.allow_origin(origin),
        None => {
            if origin.is_some() {
                tracing::warn!("CORS_ORIGIN is not a valid header value, allowing any origin");
            }
            layer.allow_origin(Any)
        }
    }
}

async fn not_found(uri: Uri) -> (StatusCode, Json<ApiResponse<serde_json::Value>>) {
    let body = ApiResponse::failure(
        "Route not found",
        Some(serde_json::json!({ "path": uri.path() })),
    );
    (StatusCode::NOT_FOUND, Json(body))
}
