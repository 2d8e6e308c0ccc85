// src/routes/chat.rs
use axum::{Json, extract::State, extract::rejection::JsonRejection};

use crate::{
    error::AppError,
    message::{ChatRequest, ChatResponse},
    state::SharedState,
};

pub async fn method_not_allowed() -> AppError {
    AppError::method_not_allowed()
}

pub async fn chat_handler(
    State(state): State<SharedState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(payload) = payload?;

    let resolution = state.resolver.resolve(&payload.message).await?;

    Ok(Json(ChatResponse {
        reply: resolution.reply,
    }))
}
