//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{NewMatch, RegistryError};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::MatchType;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/matches", post(create_match_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(state.config.client_origin.as_deref()))
        .with_state(state)
}

/// CORS for the configured origins (comma-separated), or any origin when unset
fn cors_layer(client_origin: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    match client_origin {
        Some(origins) => {
            let allowed: Vec<header::HeaderValue> = origins
                .split(',')
                .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
                .collect();
            cors.allow_origin(allowed)
        }
        None => cors.allow_origin(Any),
    }
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    players_in_matches: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.match_registry.active_matches(),
        players_in_matches: state.match_registry.players_in_matches(),
    })
}

// ============================================================================
// Match endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateMatchRequest {
    /// Generated when omitted
    #[serde(default)]
    match_id: Option<Uuid>,
    player1_id: Uuid,
    player2_id: Uuid,
    #[serde(default)]
    match_type: MatchType,
    #[serde(default)]
    tournament_id: Option<Uuid>,
    #[serde(default)]
    is_final: bool,
}

#[derive(Debug, Serialize)]
struct CreateMatchResponse {
    match_id: Uuid,
    ws_path: String,
}

async fn create_match_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateMatchRequest>,
) -> Result<(StatusCode, Json<CreateMatchResponse>), AppError> {
    let handle = state.match_registry.create_match(NewMatch {
        id: req.match_id.unwrap_or_else(Uuid::new_v4),
        player1: req.player1_id,
        player2: req.player2_id,
        match_type: req.match_type,
        tournament_id: req.tournament_id,
        is_final: req.is_final,
    })?;

    info!(match_id = %handle.id(), "Match created over HTTP");

    Ok((
        StatusCode::CREATED,
        Json(CreateMatchResponse {
            match_id: handle.id(),
            ws_path: format!("/ws?match_id={}", handle.id()),
        }),
    ))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AlreadyExists(_) | RegistryError::PlayerBusy(_) => {
                AppError::Conflict(err.to_string())
            }
            RegistryError::SamePlayer => AppError::BadRequest(err.to_string()),
            RegistryError::NotFound(_) => AppError::NotFound(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;

    fn test_config() -> Config {
        Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "info".to_string(),
            client_origin: None,
            tick_ms: 33,
            match_max_duration: std::time::Duration::from_secs(300),
            start_grace: std::time::Duration::from_secs(20),
            reconnect_grace: std::time::Duration::from_secs(10),
            reconnect_allowance: 3,
            win_score: 5,
        }
    }

    fn create_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/matches")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let router = build_router(AppState::new(test_config()));
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_match_then_conflict() {
        let state = AppState::new(test_config());
        let router = build_router(state.clone());
        let match_id = Uuid::new_v4();
        let body = serde_json::json!({
            "match_id": match_id,
            "player1_id": Uuid::new_v4(),
            "player2_id": Uuid::new_v4(),
        });

        let response = router
            .clone()
            .oneshot(create_request(body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(state.match_registry.get(&match_id).is_some());

        let response = router.oneshot(create_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn websocket_for_unknown_match_is_not_found() {
        let router = build_router(AppState::new(test_config()));
        let uri = format!(
            "/ws?match_id={}&player_id={}",
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn websocket_for_outsider_is_not_found() {
        let state = AppState::new(test_config());
        let handle = state
            .match_registry
            .create_match(NewMatch {
                id: Uuid::new_v4(),
                player1: Uuid::new_v4(),
                player2: Uuid::new_v4(),
                match_type: MatchType::Quick,
                tournament_id: None,
                is_final: false,
            })
            .unwrap();
        let router = build_router(state);

        let uri = format!("/ws?match_id={}&player_id={}", handle.id(), Uuid::new_v4());
        let response = router
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // Known player without upgrade headers
        let uri = format!(
            "/ws?match_id={}&player_id={}",
            handle.id(),
            handle.info.players[0]
        );
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
