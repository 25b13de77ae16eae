//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 长连接交给中继中枢，HTTP 端点提供历史、编辑、删除与附件下载。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{extract_token, AuthUser, Claims, JwtService};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::{router, RouterOptions};
pub use state::{AppState, ConnectionSettings};
