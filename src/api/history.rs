use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State, rejection::JsonRejection},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::error;

use crate::AppState;
use crate::error::{RelayError, Result};
use crate::upstream::{ConversationQuery, Feedback, MessageQuery};

const DEFAULT_PAGE_SIZE: u32 = 20;
const DEFAULT_SORT: &str = "-updated_at";

fn default_limit() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_sort() -> String {
    DEFAULT_SORT.to_string()
}

fn default_rating() -> Option<String> {
    Some("like".to_string())
}

/// Query of `GET /conversations`.
#[derive(Debug, Deserialize)]
pub struct ConversationParams {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub last_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_sort")]
    pub sort_by: String,
}

/// Query of `GET /conversations/{id}/messages`.
#[derive(Debug, Deserialize)]
pub struct MessageParams {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub first_id: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Body of `DELETE /conversations/{id}`; may be omitted entirely.
#[derive(Debug, Default, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub user: Option<String>,
}

/// Body of `POST /messages/{id}/feedbacks`.
#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    /// `like`, `dislike`, or `null` to revoke. Defaults to `like`.
    #[serde(default = "default_rating")]
    pub rating: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub content: String,
}

fn user_or_default(user: Option<String>, state: &AppState) -> String {
    user.filter(|user| !user.trim().is_empty())
        .unwrap_or_else(|| state.config.upstream.default_user.clone())
}

fn log_failure(operation: &'static str) -> impl Fn(&RelayError) {
    move |err| error!(operation, error = %err, "Upstream metadata call failed")
}

/// GET /conversations - A user's conversations, newest first by default.
pub async fn list_conversations(
    State(state): State<AppState>,
    Query(params): Query<ConversationParams>,
) -> Result<Json<Value>> {
    let query = ConversationQuery {
        user: user_or_default(params.user, &state),
        last_id: params.last_id.filter(|id| !id.is_empty()),
        limit: params.limit,
        sort_by: params.sort_by,
    };

    state
        .gateway
        .list_conversations(&query)
        .await
        .inspect_err(log_failure("list_conversations"))
        .map(Json)
}

/// GET /conversations/{id}/messages - Message history of one conversation.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(params): Query<MessageParams>,
) -> Result<Json<Value>> {
    let query = MessageQuery {
        conversation_id,
        user: user_or_default(params.user, &state),
        first_id: params.first_id.filter(|id| !id.is_empty()),
        limit: params.limit,
    };

    state
        .gateway
        .list_messages(&query)
        .await
        .inspect_err(log_failure("list_messages"))
        .map(Json)
}

/// DELETE /conversations/{id}
pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>> {
    let request: DeleteRequest = if body.iter().all(u8::is_ascii_whitespace) {
        DeleteRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|_| RelayError::Validation("Invalid JSON payload".into()))?
    };
    let user = user_or_default(request.user, &state);

    state
        .gateway
        .delete_conversation(&conversation_id, &user)
        .await
        .inspect_err(log_failure("delete_conversation"))
        .map(Json)
}

/// POST /messages/{id}/feedbacks - Rate an answer.
pub async fn submit_feedback(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    payload: std::result::Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(req) = payload?;
    let feedback = Feedback {
        rating: req.rating,
        user: user_or_default(req.user, &state),
        content: req.content,
    };

    state
        .gateway
        .submit_feedback(&message_id, &feedback)
        .await
        .inspect_err(log_failure("submit_feedback"))
        .map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_rating_defaults_to_like() {
        let req: FeedbackRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.rating.as_deref(), Some("like"));
        assert_eq!(req.content, "");
    }

    #[test]
    fn test_explicit_null_rating_revokes() {
        let req: FeedbackRequest = serde_json::from_str(r#"{"rating": null}"#).unwrap();
        assert_eq!(req.rating, None);
    }

    #[test]
    fn test_conversation_params_defaults() {
        let params: ConversationParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.limit, 20);
        assert_eq!(params.sort_by, "-updated_at");
    }
}
