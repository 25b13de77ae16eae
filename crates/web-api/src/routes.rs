use std::path::PathBuf;

use application::MessageDto;
use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::Response,
    routing::{get, put},
    Json, Router,
};
use domain::{MessageId, UserId};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use uuid::Uuid;

use crate::{auth::AuthUser, error::ApiError, state::AppState, ws_connection::WebSocketConnection};

/// 路由层的静态配置
#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub uploads_dir: PathBuf,
    /// 允许携带凭据跨域访问的前端地址
    pub client_origin: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EditPayload {
    text: String,
}

pub fn router(state: AppState, options: RouterOptions) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .route("/messages/{id}", get(get_history).delete(delete_message))
        .route("/edit/{message_id}", put(edit_message))
        .nest_service("/uploads", ServeDir::new(options.uploads_dir))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if let Some(origin) = options.client_origin.as_deref() {
        match origin.parse::<HeaderValue>() {
            Ok(origin) => {
                app = app.layer(
                    CorsLayer::new()
                        .allow_origin(origin)
                        .allow_credentials(true)
                        .allow_methods([Method::GET, Method::PUT, Method::DELETE])
                        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
                );
            }
            Err(err) => {
                tracing::warn!(origin, error = %err, "ignoring invalid client origin");
            }
        }
    }

    app
}

async fn health() -> StatusCode {
    StatusCode::OK
}

// 认证失败在升级前以 401 拒绝，未认证的连接不会进入注册表
async fn websocket_upgrade(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ws: WebSocketUpgrade,
) -> Response {
    tracing::info!(user_id = %principal.user_id, username = %principal.username, "websocket upgrade");
    ws.on_upgrade(move |socket| WebSocketConnection::new(state, principal).run(socket))
}

async fn get_history(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(peer_id): Path<String>,
) -> Result<Json<Vec<MessageDto>>, ApiError> {
    let peer = Uuid::parse_str(&peer_id)
        .map(UserId::from)
        .map_err(|_| ApiError::bad_request(format!("invalid user id: {peer_id}")))?;

    let messages = state.hub.history(&principal, peer).await?;
    Ok(Json(messages.iter().map(MessageDto::from).collect()))
}

async fn edit_message(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(message_id): Path<String>,
    Json(payload): Json<EditPayload>,
) -> Result<Json<MessageDto>, ApiError> {
    let message_id = MessageId::parse(&message_id).map_err(application::ApplicationError::from)?;
    let message = state
        .hub
        .edit_message(&principal, message_id, payload.text)
        .await?;
    Ok(Json(MessageDto::from(&message)))
}

async fn delete_message(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(message_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let message_id = MessageId::parse(&message_id).map_err(application::ApplicationError::from)?;
    state.hub.delete_message(&principal, message_id).await?;
    Ok(Json(json!({ "success": true })))
}
