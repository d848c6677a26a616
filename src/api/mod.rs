//! HTTP, SSE and socket front ends.
//!
//! Handlers translate transport framing into [`crate::upstream`] calls and
//! back. They hold no state of their own beyond [`crate::AppState`].

pub mod avatar;
pub mod chat;
pub mod health;
pub mod history;
pub mod sse;
pub mod ws;

use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::AppState;

/// Routes mounted under `/api/v1`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chat", post(chat::chat))
        .route("/chat/stream", post(chat::chat_stream))
        .route("/chat/ws", get(ws::chat_ws))
        .route("/conversations", get(history::list_conversations))
        .route(
            "/conversations/{id}",
            delete(history::delete_conversation),
        )
        .route(
            "/conversations/{id}/messages",
            get(history::list_messages),
        )
        .route("/messages/{id}/feedbacks", post(history::submit_feedback))
        .route(
            "/avatar",
            get(avatar::get_avatar).delete(avatar::refresh_avatar),
        )
}
