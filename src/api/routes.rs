//! REST API routes configuration

use crate::api::handlers::{self, ApiState};
use crate::api::websocket::ws_handler;
use axum::{
    body::Body,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

/// JSON 404 for unknown routes
async fn fallback_handler(uri: axum::http::Uri) -> impl IntoResponse {
    let body = serde_json::json!({ "error": format!("No route for {}", uri.path()) });
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "application/json")],
        Body::from(body.to_string()),
    )
}

/// Create the API router with all routes
pub fn create_router(state: ApiState) -> Router {
    // Configure CORS for browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // WebSocket event stream
        .route("/ws", get(ws_handler))
        // Accounts and guardians
        .route(
            "/api/accounts",
            get(handlers::list_accounts).post(handlers::create_account),
        )
        .route("/api/accounts/{address}", get(handlers::get_account))
        .route(
            "/api/accounts/{address}/guardians",
            post(handlers::add_guardian),
        )
        .route(
            "/api/accounts/{address}/threshold",
            put(handlers::update_threshold),
        )
        .route(
            "/api/accounts/{address}/guardians/{candidate}",
            get(handlers::is_guardian),
        )
        .route(
            "/api/guardians/{address}/accounts",
            get(handlers::guarded_accounts),
        )
        // Anomaly monitor
        .route("/api/patterns", put(handlers::set_pattern))
        .route("/api/patterns/{address}", get(handlers::get_pattern))
        .route("/api/transfers/check", post(handlers::check_transfer))
        // Recovery
        .route("/api/recovery/{address}", get(handlers::get_recovery))
        .route(
            "/api/recovery/{address}/initiate",
            post(handlers::initiate_recovery),
        )
        .route(
            "/api/recovery/{address}/approve",
            post(handlers::approve_recovery),
        )
        .route(
            "/api/recovery/{address}/expire",
            post(handlers::expire_recovery),
        )
        // Event ledger
        .route("/api/events", get(handlers::get_events))
        .fallback(fallback_handler)
        .with_state(state)
        .layer(cors)
}

/// Bind and serve the API until the process is stopped
pub async fn serve(state: ApiState, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("API server listening on http://{}", addr);
    axum::serve(listener, app).await
}
