use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{State, rejection::JsonRejection},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{error, info};
use uuid::Uuid;

use super::sse::{build_sse_response, data_frame, error_frame};
use crate::AppState;
use crate::error::{RelayError, Result};
use crate::upstream::{AnswerResult, ChatTurn};

// ─────────────────────────────────────────────────────────────────────────────
// Request
// ─────────────────────────────────────────────────────────────────────────────

/// Body of `POST /chat` and `POST /chat/stream`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// User message.
    #[serde(default)]
    pub query: String,
    /// Conversation to continue; absent or blank starts a new one.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// User identifier; the configured default user when absent.
    #[serde(default)]
    pub user: Option<String>,
    /// Extra app input variables.
    #[serde(default)]
    pub inputs: Option<Map<String, Value>>,
}

impl ChatRequest {
    /// Validate into a [`ChatTurn`].
    pub fn into_turn(self, default_user: &str) -> Result<ChatTurn> {
        let user = self.user.unwrap_or_else(|| default_user.to_string());
        Ok(ChatTurn::new(self.query, user)?
            .with_conversation(self.conversation_id)
            .with_inputs(self.inputs.unwrap_or_default()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /chat - Send a message and wait for the whole answer.
pub async fn chat(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<AnswerResult>> {
    let Json(req) = payload?;
    let turn = req.into_turn(&state.config.upstream.default_user)?;

    info!(
        user = %turn.user(),
        conversation_id = ?turn.conversation_id(),
        "Received chat request"
    );

    let answer = state
        .gateway
        .send_blocking(&turn)
        .await
        .inspect_err(|err| error!(error = %err, "Chat error"))?;

    Ok(Json(answer))
}

/// POST /chat/stream - Relay the classified upstream stream as SSE.
///
/// Validation failures answer 422 before any stream starts. Failures after
/// that point end the stream with a single `{"error": ...}` frame.
pub async fn chat_stream(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let turn = match payload
        .map_err(RelayError::from)
        .and_then(|Json(req)| req.into_turn(&state.config.upstream.default_user))
    {
        Ok(turn) => turn,
        Err(err) => return err.into_response(),
    };

    let request_id = Uuid::new_v4().to_string();
    let gateway = Arc::clone(&state.gateway);

    info!(
        name: "stream.started",
        request_id = %request_id,
        user = %turn.user(),
        conversation_id = ?turn.conversation_id(),
        "Streaming chat request"
    );

    let sse_stream = async_stream::stream! {
        let mut forwarded: usize = 0;

        match gateway.stream_message(&turn, &request_id).await {
            Ok(mut frames) => {
                while let Some(item) = frames.next().await {
                    match item {
                        Ok(frame) => {
                            forwarded += 1;
                            yield Ok::<String, std::convert::Infallible>(data_frame(frame.wire()));
                        }
                        Err(err) => {
                            error!(request_id = %request_id, error = %err, "Stream error");
                            yield Ok::<String, std::convert::Infallible>(error_frame(&err.to_string()));
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                error!(request_id = %request_id, error = %err, "Stream error");
                yield Ok::<String, std::convert::Infallible>(error_frame(&err.to_string()));
            }
        }

        info!(
            name: "stream.completed",
            request_id = %request_id,
            forwarded,
            "Stream completed"
        );
    };

    build_sse_response(Body::from_stream(sse_stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_user_applies_when_absent() {
        let req: ChatRequest = serde_json::from_str(r#"{"query": "hi"}"#).unwrap();
        let turn = req.into_turn("default-user").unwrap();
        assert_eq!(turn.user(), "default-user");
        assert!(turn.inputs().is_empty());
    }

    #[test]
    fn test_null_inputs_accepted() {
        let req: ChatRequest =
            serde_json::from_str(r#"{"query": "hi", "user": "u1", "inputs": null}"#).unwrap();
        let turn = req.into_turn("default-user").unwrap();
        assert_eq!(turn.user(), "u1");
    }

    #[test]
    fn test_missing_query_is_validation_error() {
        let req: ChatRequest = serde_json::from_str(r#"{"user": "u1"}"#).unwrap();
        let err = req.into_turn("default-user").unwrap_err();
        assert!(matches!(err, RelayError::Validation(ref msg) if msg == "Query is required"));
    }
}
