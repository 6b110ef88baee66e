//! Admin endpoints: system settings and user management.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use crate::auth::AdminUser;
use crate::error::{ApiError, ApiResult};
use crate::models::{SystemConfigEntry, User};
use crate::server::AppState;
use crate::settings;
use crate::users::{self, validate_email, validate_username, UserUpdate};

use super::bad_json;

#[derive(Deserialize)]
pub struct ConfigUpdate {
    pub key: String,
    pub value: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/config", get(list_config).post(update_config))
        .route("/users", get(list_users))
        .route(
            "/users/{id}",
            get(get_user).patch(update_user).delete(delete_user),
        )
}

async fn list_config(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<Json<Vec<SystemConfigEntry>>> {
    Ok(Json(settings::list(&state.pool).await?))
}

async fn update_config(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    body: Result<Json<ConfigUpdate>, JsonRejection>,
) -> ApiResult<Json<SystemConfigEntry>> {
    let Json(update) = body.map_err(bad_json)?;
    let entry = settings::upsert(&state.pool, &update.key, &update.value).await?;
    info!(admin = %admin.username, key = %entry.key, "system config updated");
    Ok(Json(entry))
}

async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(users::list(&state.pool).await?))
}

async fn get_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<User>> {
    users::get(&state.pool, id)
        .await?
        .map(Json)
        .ok_or_else(user_not_found)
}

async fn update_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
    body: Result<Json<UserUpdate>, JsonRejection>,
) -> ApiResult<Json<User>> {
    let Json(mut changes) = body.map_err(bad_json)?;
    if let Some(username) = changes.username.as_mut() {
        *username = username.trim().to_string();
        validate_username(username)?;
    }
    if let Some(email) = changes.email.as_mut() {
        *email = email.trim().to_string();
        validate_email(email)?;
    }

    let user = users::update(&state.pool, id, &changes)
        .await?
        .ok_or_else(user_not_found)?;
    info!(admin = %admin.username, user_id = id, "user updated");
    Ok(Json(user))
}

async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if !users::delete(&state.pool, id).await? {
        return Err(user_not_found());
    }
    info!(admin = %admin.username, user_id = id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn user_not_found() -> ApiError {
    ApiError::NotFound("User not found".to_string())
}
