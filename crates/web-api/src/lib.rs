//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP 请求委托给应用层的会话服务。

mod error;
mod routes;
mod state;

pub use error::{ApiError, ErrorBody};
pub use routes::{cors_layer, router, USER_HEADER};
pub use state::AppState;
