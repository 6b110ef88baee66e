//! `POST /api/ask`: forward a question to the agent and log the exchange.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::questions;
use crate::server::AppState;

use super::bad_json;

#[derive(Deserialize)]
pub struct AskRequest {
    pub message: String,
}

#[derive(Serialize)]
pub struct AskResponse {
    pub response: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/ask", post(ask))
}

async fn ask(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> ApiResult<Json<AskResponse>> {
    let Json(req) = body.map_err(bad_json)?;
    let message = req.message.trim();
    if message.is_empty() {
        return Err(ApiError::BadRequest("Message must not be empty".to_string()));
    }

    let agent = state.agent()?;
    match agent.run(message).await {
        Ok(answer) => {
            questions::record(
                &state.pool,
                user.id,
                message,
                Some(&answer),
                Some(agent.name()),
                true,
            )
            .await?;
            info!(user_id = user.id, agent = agent.name(), "agent answered");
            Ok(Json(AskResponse { response: answer }))
        }
        Err(e) => {
            let detail = format!("{:#}", e);
            error!(user_id = user.id, agent = agent.name(), error = %detail, "agent run failed");
            questions::record(&state.pool, user.id, message, None, Some(agent.name()), false)
                .await?;
            Err(ApiError::AgentFailure(detail))
        }
    }
}
