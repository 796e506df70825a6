//! Chat assistant endpoint

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use tracing::error;

use crate::chat::{ChatError, ChatRequest};
use crate::error::ApiError;
use crate::state::SharedState;

fn chat_error(err: ChatError) -> ApiError {
    let text = err.to_string();
    match err {
        ChatError::KeyRejected => {
            ApiError::unavailable(text).with_details("The API key needs to be regenerated.")
        }
        ChatError::Upstream { status, message } => ApiError::new(
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            message,
        ),
        ChatError::EmptyReply => ApiError::internal(text),
        ChatError::Timeout => ApiError::new(StatusCode::GATEWAY_TIMEOUT, text),
        ChatError::Request(_) => {
            error!("Chat error: {}", text);
            ApiError::internal(text)
        }
    }
}

/// POST /api/chat - Proxy a farming question to Gemini
pub async fn chat(State(state): State<SharedState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let Some(client) = state.chat.as_ref() else {
        return Err(ApiError::unavailable("Gemini API not configured")
            .with_message("Set GEMINI_API_KEY environment variable"));
    };

    let request: ChatRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::bad_request("Message is required"))?;
    let Some(message) = request.message else {
        return Err(ApiError::bad_request("Message is required"));
    };

    let reply = client
        .chat(&request.history, &message)
        .await
        .map_err(chat_error)?;

    Ok(Json(json!({ "response": reply })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_status_codes() {
        assert_eq!(
            chat_error(ChatError::KeyRejected).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            chat_error(ChatError::Upstream {
                status: 429,
                message: "Quota exceeded".into()
            })
            .status,
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            chat_error(ChatError::EmptyReply).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(chat_error(ChatError::Timeout).status, StatusCode::GATEWAY_TIMEOUT);
    }
}
