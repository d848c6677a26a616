//! Dify Relay
//!
//! A backend relay between a browser chat widget and a hosted Dify assistant.
//! It forwards user messages upstream, relays blocking and streaming answers
//! back, and exposes conversation history, feedback, and avatar endpoints.
//!
//! # Architecture
//!
//! - **Server**: Axum HTTP server with SSE and WebSocket streaming
//! - **Upstream**: [`upstream::AssistantGateway`] and its Dify client
//! - **Classifier**: filters the upstream event stream frame by frame
//! - **Normalizer**: renders structured workflow results as text or Markdown
//!
//! # Modules
//!
//! - [`api`]: transport handlers and routes
//! - [`config`]: CLI and layered configuration
//! - [`error`]: error taxonomy and HTTP mapping
//! - [`normalize`]: result rendering
//! - [`upstream`]: gateway trait, Dify client, event classification

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::map_err_ignore)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod api;
pub mod config;
pub mod error;
pub mod normalize;
pub mod server;
pub mod telemetry;
pub mod upstream;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::upstream::AssistantGateway;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Upstream assistant service.
    pub gateway: Arc<dyn AssistantGateway>,
    /// Global configuration.
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(gateway: Arc<dyn AssistantGateway>, config: Arc<AppConfig>) -> Self {
        Self { gateway, config }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .finish()
    }
}
