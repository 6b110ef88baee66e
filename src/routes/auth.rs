//! Login and self-registration.

use axum::{
    extract::{rejection::FormRejection, rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{authenticate, hash_password};
use crate::error::{ApiError, ApiResult};
use crate::models::User;
use crate::server::AppState;
use crate::users::{self, validate_email, validate_username, NewUser};

use super::bad_json;

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub is_admin: Option<bool>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/register", post(register))
}

async fn login(
    State(state): State<AppState>,
    form: Result<Form<LoginForm>, FormRejection>,
) -> ApiResult<Json<TokenResponse>> {
    let Form(form) = form.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    info!(username = %form.username, "login attempt");

    let user = authenticate(&state.pool, &form.username, &form.password).await?;
    let access_token = state.tokens.issue(&user)?;

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
    }))
}

async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let Json(req) = body.map_err(bad_json)?;

    let username = req.username.trim();
    let email = req.email.trim();
    validate_username(username)?;
    validate_email(email)?;
    if req.password.is_empty() {
        return Err(ApiError::BadRequest("Password must not be empty".to_string()));
    }

    let is_admin = req.is_admin.unwrap_or(false) && state.config.auth.open_admin_registration;
    let hashed_password = hash_password(&req.password)?;
    let user = users::create(
        &state.pool,
        NewUser {
            username,
            email,
            hashed_password: &hashed_password,
            is_admin,
        },
    )
    .await?;

    info!(user_id = user.id, username = %user.username, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}
