// HTTP surface: health check plus mailbox tools
mod error;
mod tools;

pub use error::AppError;
pub use tools::{create_tools_router, ToolsAppState};

use crate::session::{session_middleware, SessionGuard};
use axum::{middleware, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Full application router.
///
/// `/health` skips session resolution; every `/tools` route runs behind it.
pub fn create_router(state: ToolsAppState, guard: Arc<SessionGuard>) -> Router {
    let tools = create_tools_router(state)
        .route_layer(middleware::from_fn_with_state(guard, session_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(tools)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
