//! Upstream assistant service gateway.
//!
//! The relay talks to a hosted assistant backend (Dify) through the
//! [`AssistantGateway`] trait. [`DifyClient`] is the production
//! implementation; handlers only ever see the trait object held in
//! [`crate::AppState`].
//!
//! # Overview
//!
//! - [`ChatTurn`]: one inbound user message, validated
//! - [`AnswerResult`]: the shaped answer of a blocking exchange
//! - [`FrameStream`]: classified frames of a streaming exchange
//! - [`classifier`]: per-frame forward/transform/drop decisions
//! - [`outputs`]: workflow result selection and write-back

pub mod classifier;
pub mod client;
pub mod events;
pub mod outputs;

pub use classifier::{EventClassifier, classify_stream};
pub use client::DifyClient;
pub use events::{EventKind, RelayFrame, UpstreamEvent};

use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RelayError, Result};

/// Classified frames of one streaming exchange.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<RelayFrame>> + Send>>;

/// Which upstream API flavor the configured app key belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AppMode {
    /// Workflow app: `POST /workflows/run`, ends with `workflow_finished`.
    #[default]
    Workflow,
    /// Chat app: `POST /chat-messages`, ends with `message_end`.
    Chat,
}

/// Per-call timeouts, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Timeouts {
    /// Total deadline of a blocking message call.
    pub blocking_secs: u64,
    /// Longest silence tolerated on a streaming call.
    pub streaming_secs: u64,
    /// Total deadline of conversation/message/feedback calls.
    pub metadata_secs: u64,
    /// TCP/TLS connect deadline for every call.
    pub connect_secs: u64,
}

impl Timeouts {
    pub fn blocking(&self) -> Duration {
        Duration::from_secs(self.blocking_secs)
    }

    pub fn streaming(&self) -> Duration {
        Duration::from_secs(self.streaming_secs)
    }

    pub fn metadata(&self) -> Duration {
        Duration::from_secs(self.metadata_secs)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            blocking_secs: 60,
            streaming_secs: 120,
            metadata_secs: 30,
            connect_secs: 10,
        }
    }
}

/// Upstream connection settings.
#[derive(Clone, Deserialize)]
pub struct UpstreamSettings {
    /// Base URL of the upstream API, e.g. `https://api.dify.ai/v1`.
    pub api_url: String,
    /// App API key, sent as a bearer token.
    pub api_key: String,
    /// Verify the upstream TLS certificate.
    pub verify_ssl: bool,
    /// Upstream app flavor.
    pub app_mode: AppMode,
    /// Workflow input variable that receives the query text.
    pub input_field: String,
    /// User identifier used when a client does not send one.
    pub default_user: String,
    /// Call timeouts.
    pub timeouts: Timeouts,
}

impl std::fmt::Debug for UpstreamSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSettings")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("verify_ssl", &self.verify_ssl)
            .field("app_mode", &self.app_mode)
            .field("input_field", &self.input_field)
            .field("default_user", &self.default_user)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

/// One validated user message bound for the upstream service.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    query: String,
    user: String,
    conversation_id: Option<String>,
    inputs: Map<String, Value>,
}

impl ChatTurn {
    /// Validate and build a turn. Both `query` and `user` must be non-blank.
    pub fn new(query: impl Into<String>, user: impl Into<String>) -> Result<Self> {
        let query = query.into();
        let user = user.into();
        if query.trim().is_empty() {
            return Err(RelayError::Validation("Query is required".into()));
        }
        if user.trim().is_empty() {
            return Err(RelayError::Validation("User is required".into()));
        }
        Ok(Self {
            query,
            user,
            conversation_id: None,
            inputs: Map::new(),
        })
    }

    /// Continue an existing conversation. Blank ids start a new one.
    #[must_use]
    pub fn with_conversation(mut self, conversation_id: Option<String>) -> Self {
        self.conversation_id = conversation_id.filter(|id| !id.trim().is_empty());
        self
    }

    /// Attach extra app input variables.
    #[must_use]
    pub fn with_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn inputs(&self) -> &Map<String, Value> {
        &self.inputs
    }
}

/// Answer of a blocking exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResult {
    /// Answer text (normalized for workflow apps).
    pub answer: String,
    /// Conversation the answer belongs to; empty for workflow apps.
    pub conversation_id: String,
    /// Upstream message id (workflow run id for workflow apps).
    pub message_id: String,
    /// Creation time, Unix seconds.
    pub created_at: Option<i64>,
}

/// Conversation listing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationQuery {
    pub user: String,
    /// Id of the last conversation of the previous page.
    pub last_id: Option<String>,
    pub limit: u32,
    /// Sort field, `-` prefix for descending.
    pub sort_by: String,
}

/// Message history parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub conversation_id: String,
    pub user: String,
    /// Id of the first message of the current page, for scrolling back.
    pub first_id: Option<String>,
    pub limit: Option<u32>,
}

/// Rating of an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feedback {
    /// `like`, `dislike`, or `None` to revoke.
    pub rating: Option<String>,
    pub user: String,
    pub content: String,
}

/// Calls the relay makes to the upstream assistant service.
///
/// Implementations never retry; a non-2xx answer is
/// [`RelayError::Upstream`], a network failure is [`RelayError::Transport`].
#[async_trait::async_trait]
pub trait AssistantGateway: Send + Sync {
    /// Send a message and wait for the whole answer.
    async fn send_blocking(&self, turn: &ChatTurn) -> Result<AnswerResult>;

    /// Send a message and stream classified frames back.
    ///
    /// Fails before yielding anything when the upstream rejects the call.
    async fn stream_message(&self, turn: &ChatTurn, request_id: &str) -> Result<FrameStream>;

    /// List a user's conversations.
    async fn list_conversations(&self, query: &ConversationQuery) -> Result<Value>;

    /// List the messages of one conversation.
    async fn list_messages(&self, query: &MessageQuery) -> Result<Value>;

    /// Delete a conversation.
    async fn delete_conversation(&self, conversation_id: &str, user: &str) -> Result<Value>;

    /// Rate an answer.
    async fn submit_feedback(&self, message_id: &str, feedback: &Feedback) -> Result<Value>;
}
