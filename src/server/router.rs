use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers::{
    chat, config, credentials, documents, health, modes, sessions, ui,
};
use crate::server::ws::handler::ws_handler;
use crate::state::AppState;

/// Builds the application router: the embedded UI, the JSON API, the
/// WebSocket endpoint, CORS and request tracing.
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state);
    Router::new()
        .route("/", get(ui::index))
        .route("/health", get(health::health))
        .route("/api/modes", get(modes::list_modes))
        .route(
            "/api/credentials",
            get(credentials::get_credentials)
                .post(credentials::set_credentials)
                .delete(credentials::clear_credentials),
        )
        .route(
            "/api/config",
            get(config::get_config)
                .post(config::update_config)
                .patch(config::patch_config),
        )
        .route(
            "/api/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route(
            "/api/sessions/:session_id",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route(
            "/api/sessions/:session_id/messages",
            get(sessions::get_session_messages).delete(sessions::clear_session_messages),
        )
        .route("/api/chat", post(chat::post_chat))
        .route(
            "/api/documents",
            post(documents::ingest_document).delete(documents::clear_index),
        )
        .route("/api/documents/stats", get(documents::index_stats))
        .route("/api/documents/:source", delete(documents::delete_document))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(state: &Arc<AppState>) -> CorsLayer {
    let configured = match state.config.load_settings() {
        Ok(settings) => settings.server.cors_allowed_origins,
        Err(err) => {
            tracing::warn!(
                "Failed to load config while building CORS layer: {}; using local defaults",
                err
            );
            Vec::new()
        }
    };
    let origins = allowed_origins(&configured)
        .into_iter()
        .filter_map(|origin| HeaderValue::from_str(&origin).ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE])
}

/// Configured origins, or the local defaults when none are configured.
pub fn allowed_origins(configured: &[String]) -> Vec<String> {
    let origins: Vec<String> = configured
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();

    if origins.is_empty() {
        return default_local_origins();
    }
    origins
}

fn default_local_origins() -> Vec<String> {
    vec![
        "http://localhost".to_string(),
        "http://localhost:8501".to_string(),
        "http://127.0.0.1".to_string(),
        "http://127.0.0.1:8501".to_string(),
    ]
}
