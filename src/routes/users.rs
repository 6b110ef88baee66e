use axum::{extract::State, routing::get, Json, Router};

use crate::auth::CurrentUser;
use crate::error::ApiResult;
use crate::models::{User, UserQuestion};
use crate::questions;
use crate::server::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(me))
        .route("/me/history", get(history))
}

async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

async fn history(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Vec<UserQuestion>>> {
    Ok(Json(questions::history(&state.pool, user.id).await?))
}
