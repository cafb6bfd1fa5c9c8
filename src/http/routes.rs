//! HTTP route definitions

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::warn;

use crate::app::AppState;
use crate::game::SessionStatus;
use crate::lobby::SessionSummary;
use crate::progression::{LeaderboardKind, MatchResult, PlayerProgression};
use crate::store::StoreError;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Default and maximum rows for list endpoints
const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/sessions", get(sessions_handler))
        .route("/progression/:player_id", get(progression_handler))
        .route("/progression/:player_id/matches", get(matches_handler))
        .route("/leaderboard", get(leaderboard_handler))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(state.config.client_origin.as_deref()))
        .with_state(state)
}

/// CORS - comma-separated origins in CLIENT_ORIGIN, any origin when unset
fn cors_layer(client_origin: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    match client_origin {
        Some(origins) => {
            let allowed_origins: Vec<header::HeaderValue> = origins
                .split(',')
                .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
                .collect();
            cors.allow_origin(allowed_origins).allow_credentials(true)
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
    active_sessions: usize,
    open_sessions: usize,
    active_players: usize,
    tick_rate_hz: u32,
    store: &'static str,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let sessions = state.director.list_sessions();
    let open_sessions = sessions
        .iter()
        .filter(|s| s.status == SessionStatus::Waiting)
        .count();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_sessions: sessions.len(),
        open_sessions,
        active_players: state.director.registry().total_players(),
        tick_rate_hz: state.config.tick_rate_hz,
        store: state.progression.store().backend(),
    })
}

// ============================================================================
// Lobby endpoints
// ============================================================================

async fn sessions_handler(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.director.list_sessions())
}

// ============================================================================
// Progression endpoints
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LeaderboardQuery {
    by: LeaderboardKind,
    limit: Option<usize>,
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

async fn progression_handler(
    State(state): State<AppState>,
    Path(player_id): Path<String>,
) -> Result<Json<PlayerProgression>, AppError> {
    state
        .progression
        .get(&player_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No progression for player {player_id}")))
}

async fn matches_handler(
    State(state): State<AppState>,
    Path(player_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<MatchResult>>, AppError> {
    let history = state
        .progression
        .history(&player_id, clamp_limit(query.limit))
        .await?;
    Ok(Json(history))
}

async fn leaderboard_handler(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<PlayerProgression>>, AppError> {
    let rows = state
        .progression
        .leaderboard(query.by, clamp_limit(query.limit))
        .await?;
    Ok(Json(rows))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        warn!(error = %e, "Progression store request failed");
        match e {
            StoreError::Unavailable(msg) => AppError::Unavailable(msg),
            StoreError::Conflict => AppError::Internal("Version conflict".to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::game::JoinRequest;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app_state() -> AppState {
        let config = Config::from_lookup(|key| match key {
            "START_COUNTDOWN_SECS" => Some("60".to_string()),
            _ => None,
        })
        .unwrap();
        AppState::new(config)
    }

    async fn get_json(state: &AppState, uri: &str) -> (StatusCode, Value) {
        let response = build_router(state.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_health_reports_sessions() {
        let state = app_state();
        let session_id = state.director.create_or_get_open_session().unwrap();
        state
            .director
            .join(
                session_id,
                JoinRequest {
                    player_id: "a".to_string(),
                    player_name: "A".to_string(),
                    correlation_id: None,
                },
            )
            .await
            .unwrap();

        let (status, body) = get_json(&state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_sessions"], 1);
        assert_eq!(body["open_sessions"], 1);
        assert_eq!(body["active_players"], 1);
        assert_eq!(body["store"], "memory");

        let (_, sessions) = get_json(&state, "/sessions").await;
        assert_eq!(sessions[0]["sessionId"], session_id.to_string());
        assert_eq!(sessions[0]["status"], "WAITING");
    }

    #[tokio::test]
    async fn test_progression_lookup() {
        let state = app_state();
        let (status, _) = get_json(&state, "/progression/nobody").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        state.progression.get_or_create("p1", "Ann").await.unwrap();
        let (status, body) = get_json(&state, "/progression/p1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "Ann");
        assert_eq!(body["level"], 1);

        let (status, body) = get_json(&state, "/progression/p1/matches").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_leaderboard_query() {
        let state = app_state();
        for (id, name) in [("p1", "Ann"), ("p2", "Bob")] {
            state.progression.get_or_create(id, name).await.unwrap();
        }

        let (status, body) = get_json(&state, "/leaderboard?by=level&limit=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["playerId"], "p1");

        let (status, _) = get_json(&state, "/leaderboard?by=speed").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None), DEFAULT_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(10_000)), MAX_LIMIT);
    }
}
