use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::access::AccessGate;

/// Shared state of the status endpoint
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AccessGate>,
    pub started_at: DateTime<Utc>,
}

/// Status endpoint served next to the bot so hosting platforms can probe it
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn root() -> &'static str {
    concat!("Store changes report bot v", env!("CARGO_PKG_VERSION"))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "started_at": state.started_at.to_rfc3339(),
        "registered_users": state.gate.user_count().await,
    }))
}
