use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use application::PostMessageRequest;
use domain::{DomainError, Message, MessageKind, Participant};

use crate::{error::ApiError, state::AppState};

/// 携带参与者身份的请求头
pub const USER_HEADER: &str = "user";

#[derive(Debug, Deserialize)]
struct JoinPayload {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostMessagePayload {
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    limit: Option<String>,
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/participants", post(join).get(list_participants))
        .route("/messages", post(post_message).get(list_messages))
        .route("/status", post(heartbeat))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 来源列表为空时允许任意来源
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(USER_HEADER)]);

    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

async fn health() -> &'static str {
    "ok"
}

fn user_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
}

async fn join(
    State(state): State<AppState>,
    payload: Result<Json<JoinPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<Participant>), ApiError> {
    let Json(payload) = payload?;
    let participant = state
        .session_service
        .join(payload.name.as_deref().unwrap_or_default())
        .await?;
    Ok((StatusCode::CREATED, Json(participant)))
}

async fn list_participants(
    State(state): State<AppState>,
) -> Result<Json<Vec<Participant>>, ApiError> {
    let participants = state.session_service.list_participants().await?;
    Ok(Json(participants))
}

async fn post_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<PostMessagePayload>, JsonRejection>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let Json(payload) = payload?;
    let kind = payload
        .kind
        .as_deref()
        .ok_or_else(|| DomainError::invalid_argument("type", "is required"))?
        .parse::<MessageKind>()?;

    let request = PostMessageRequest {
        from: user_header(&headers).map(str::to_owned),
        to: payload.to.unwrap_or_default(),
        text: payload.text.unwrap_or_default(),
        kind,
    };
    let message = state.session_service.post_message(request).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    // 空的 limit 视为未提供
    let limit = match query.limit.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
            DomainError::invalid_argument("limit", "must be a positive integer")
        })?),
    };

    let messages = state
        .session_service
        .list_messages(user_header(&headers), limit)
        .await?;
    Ok(Json(messages))
}

async fn heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    state.session_service.heartbeat(user_header(&headers)).await?;
    Ok(StatusCode::OK)
}
