//! Dify HTTP client.
//!
//! Implements [`AssistantGateway`] over the Dify app API: workflow runs or
//! chat messages (blocking and streaming), conversation and message listing,
//! conversation deletion, and answer feedback. One client is built at startup
//! and shared by every request.

use std::time::Duration;

use futures::StreamExt;
use reqwest::{Method, RequestBuilder, Response};
use serde_json::{Value, json};
use url::Url;

use super::{
    AnswerResult, AppMode, AssistantGateway, ChatTurn, ConversationQuery, Feedback, FrameStream,
    MessageQuery, UpstreamSettings, classify_stream,
};
use crate::error::{RelayError, Result};

/// `response_mode` of a message call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseMode {
    Blocking,
    Streaming,
}

impl ResponseMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Blocking => "blocking",
            Self::Streaming => "streaming",
        }
    }
}

/// Client for the Dify app API.
#[derive(Clone)]
pub struct DifyClient {
    http: reqwest::Client,
    base: Url,
    settings: UpstreamSettings,
}

impl std::fmt::Debug for DifyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DifyClient")
            .field("settings", &self.settings)
            .finish()
    }
}

impl DifyClient {
    /// Build a client from settings.
    ///
    /// Fails when the base URL is unusable or the HTTP client cannot be built.
    pub fn new(settings: UpstreamSettings) -> Result<Self> {
        let base = Url::parse(settings.api_url.trim_end_matches('/')).map_err(|err| {
            RelayError::Validation(format!("Invalid upstream URL '{}': {err}", settings.api_url))
        })?;
        if base.cannot_be_a_base() {
            return Err(RelayError::Validation(format!(
                "Upstream URL '{}' cannot carry a path",
                settings.api_url
            )));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(settings.timeouts.connect())
            .danger_accept_invalid_certs(!settings.verify_ssl)
            .build()?;

        if !settings.verify_ssl {
            tracing::warn!(api_url = %settings.api_url, "TLS certificate verification is disabled");
        }

        Ok(Self {
            http,
            base,
            settings,
        })
    }

    /// Settings this client was built with.
    pub fn settings(&self) -> &UpstreamSettings {
        &self.settings
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| RelayError::Validation("Upstream URL cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.settings.api_key)
    }

    fn message_endpoint(&self) -> Result<Url> {
        match self.settings.app_mode {
            AppMode::Workflow => self.endpoint(&["workflows", "run"]),
            AppMode::Chat => self.endpoint(&["chat-messages"]),
        }
    }

    fn message_body(&self, turn: &ChatTurn, mode: ResponseMode) -> Value {
        match self.settings.app_mode {
            AppMode::Workflow => {
                let mut inputs = turn.inputs().clone();
                inputs.insert(
                    self.settings.input_field.clone(),
                    Value::String(turn.query().to_string()),
                );
                json!({
                    "inputs": inputs,
                    "response_mode": mode.as_str(),
                    "user": turn.user(),
                })
            }
            AppMode::Chat => {
                let mut body = json!({
                    "inputs": turn.inputs(),
                    "query": turn.query(),
                    "response_mode": mode.as_str(),
                    "user": turn.user(),
                });
                if let Some(id) = turn.conversation_id() {
                    body["conversation_id"] = json!(id);
                }
                body
            }
        }
    }

    async fn execute(&self, builder: RequestBuilder, timeout: Duration) -> Result<Response> {
        let response = builder.timeout(timeout).send().await.map_err(|err| {
            tracing::error!(error = %err, "Failed to call Dify API");
            RelayError::from(err)
        })?;
        ensure_success(response).await
    }
}

/// Turn a non-2xx response into [`RelayError::Upstream`].
async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::error!(status = status.as_u16(), body = %body, "Dify API error");
    Err(RelayError::Upstream {
        status: status.as_u16(),
        body,
    })
}

/// Decode a JSON body; an empty body reads as `null`.
async fn read_json(response: Response) -> Result<Value> {
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|err| RelayError::Parse(err.to_string()))
}

#[async_trait::async_trait]
impl AssistantGateway for DifyClient {
    async fn send_blocking(&self, turn: &ChatTurn) -> Result<AnswerResult> {
        let url = self.message_endpoint()?;
        let body = self.message_body(turn, ResponseMode::Blocking);

        tracing::info!(
            name: "upstream.request",
            mode = ?self.settings.app_mode,
            response_mode = ResponseMode::Blocking.as_str(),
            user = %turn.user(),
            conversation_id = ?turn.conversation_id(),
            "Sending request to Dify"
        );
        tracing::debug!(payload = %body, "Dify request payload");

        let response = self
            .execute(
                self.request(Method::POST, url).json(&body),
                self.settings.timeouts.blocking(),
            )
            .await?;
        let reply = read_json(response).await?;

        Ok(match self.settings.app_mode {
            AppMode::Workflow => AnswerResult::from_workflow_response(reply),
            AppMode::Chat => AnswerResult::from_chat_response(&reply),
        })
    }

    async fn stream_message(&self, turn: &ChatTurn, request_id: &str) -> Result<FrameStream> {
        let url = self.message_endpoint()?;
        let body = self.message_body(turn, ResponseMode::Streaming);
        let idle = self.settings.timeouts.streaming();

        tracing::info!(
            name: "upstream.request",
            request_id = %request_id,
            mode = ?self.settings.app_mode,
            response_mode = ResponseMode::Streaming.as_str(),
            user = %turn.user(),
            conversation_id = ?turn.conversation_id(),
            "Streaming request to Dify"
        );
        tracing::debug!(request_id = %request_id, payload = %body, "Dify request payload");

        let pending = self.request(Method::POST, url).json(&body).send();
        let response = match tokio::time::timeout(idle, pending).await {
            Ok(sent) => sent.map_err(|err| {
                tracing::error!(request_id = %request_id, error = %err, "Failed to stream from Dify API");
                RelayError::from(err)
            })?,
            Err(_) => {
                return Err(RelayError::Transport(format!(
                    "no response within {}s",
                    idle.as_secs()
                )));
            }
        };
        let response = ensure_success(response).await?;

        tracing::info!(
            request_id = %request_id,
            status = response.status().as_u16(),
            "Dify stream opened"
        );

        let bytes = response.bytes_stream();
        let guarded = async_stream::stream! {
            futures::pin_mut!(bytes);
            loop {
                match tokio::time::timeout(idle, bytes.next()).await {
                    Ok(Some(chunk)) => yield chunk.map_err(RelayError::from),
                    Ok(None) => break,
                    Err(_) => {
                        yield Err(RelayError::Transport(format!(
                            "stream idle for {}s",
                            idle.as_secs()
                        )));
                        break;
                    }
                }
            }
        };

        Ok(classify_stream(guarded, request_id))
    }

    async fn list_conversations(&self, query: &ConversationQuery) -> Result<Value> {
        let url = self.endpoint(&["conversations"])?;
        let mut params = vec![
            ("user", query.user.clone()),
            ("limit", query.limit.to_string()),
            ("sort_by", query.sort_by.clone()),
        ];
        if let Some(last_id) = &query.last_id {
            params.push(("last_id", last_id.clone()));
        }

        let response = self
            .execute(
                self.request(Method::GET, url).query(&params),
                self.settings.timeouts.metadata(),
            )
            .await?;
        read_json(response).await
    }

    async fn list_messages(&self, query: &MessageQuery) -> Result<Value> {
        let url = self.endpoint(&["messages"])?;
        let mut params = vec![
            ("conversation_id", query.conversation_id.clone()),
            ("user", query.user.clone()),
        ];
        if let Some(first_id) = &query.first_id {
            params.push(("first_id", first_id.clone()));
        }
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }

        let response = self
            .execute(
                self.request(Method::GET, url).query(&params),
                self.settings.timeouts.metadata(),
            )
            .await?;
        read_json(response).await
    }

    async fn delete_conversation(&self, conversation_id: &str, user: &str) -> Result<Value> {
        let url = self.endpoint(&["conversations", conversation_id])?;
        tracing::info!(conversation_id = %conversation_id, user = %user, "Deleting conversation");

        let response = self
            .execute(
                self.request(Method::DELETE, url).json(&json!({ "user": user })),
                self.settings.timeouts.metadata(),
            )
            .await?;

        // Newer upstream versions answer 204 with no body.
        match read_json(response).await? {
            Value::Null => Ok(json!({ "result": "success" })),
            body => Ok(body),
        }
    }

    async fn submit_feedback(&self, message_id: &str, feedback: &Feedback) -> Result<Value> {
        let url = self.endpoint(&["messages", message_id, "feedbacks"])?;
        tracing::info!(
            message_id = %message_id,
            rating = ?feedback.rating,
            user = %feedback.user,
            "Submitting feedback"
        );

        let response = self
            .execute(
                self.request(Method::POST, url).json(feedback),
                self.settings.timeouts.metadata(),
            )
            .await?;
        read_json(response).await
    }
}
