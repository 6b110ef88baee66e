//! HTTP routes.
//!
//! | Prefix | Module |
//! |--------|--------|
//! | `/health` | [`health`] |
//! | `/api/auth` | [`auth`] |
//! | `/api/users` | [`users`] |
//! | `/api/ask` | [`ask`] |
//! | `/api/admin` | [`admin`] (config, users) and [`knowledge`] |

pub mod admin;
pub mod ask;
pub mod auth;
pub mod health;
pub mod knowledge;
pub mod users;

use axum::extract::rejection::JsonRejection;
use axum::Router;

use crate::error::ApiError;
use crate::server::AppState;

/// The full application router, without middleware layers.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::routes())
        .nest("/api", api_routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::routes())
        .nest("/users", users::routes())
        .merge(ask::routes())
        .nest("/admin", admin::routes())
        .nest("/admin/knowledge", knowledge::routes())
}

/// Render body-parsing failures with the common error envelope.
pub(crate) fn bad_json(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest(rejection.body_text())
}
