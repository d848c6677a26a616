use axum::{Json, extract::State, response::Redirect};
use serde_json::{Value, json};

use crate::AppState;

/// GET /avatar - Temporary redirect to the configured picture.
pub async fn get_avatar(State(state): State<AppState>) -> Redirect {
    Redirect::temporary(&state.config.assets.avatar_url)
}

/// DELETE /avatar - Nothing is cached locally, so there is nothing to refresh.
pub async fn refresh_avatar() -> Json<Value> {
    Json(json!({ "message": "Avatar uses redirect mode; no local cache." }))
}
