//! Upstream stream event model.
//!
//! The upstream service tags every streamed payload with an `event` field.
//! The tag set is controlled upstream and grows over time, so it is modeled as
//! a closed enum with an [`EventKind::Unknown`] fallback that is never
//! forwarded.

use serde_json::Value;

/// Tag of an upstream stream event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Answer text delta (chat apps).
    Message,
    /// End of a chat exchange, carries `conversation_id` and usage.
    MessageEnd,
    /// Answer text delta from an agent app.
    AgentMessage,
    /// Text delta emitted by a workflow.
    TextChunk,
    /// File attached to the answer.
    MessageFile,
    /// Workflow run accepted.
    WorkflowStarted,
    /// Workflow run completed, carries the final `outputs`.
    WorkflowFinished,
    /// A workflow node began executing.
    NodeStarted,
    /// A workflow node completed.
    NodeFinished,
    /// Intermediate agent reasoning.
    AgentThought,
    /// Keep-alive.
    Ping,
    /// The upstream failed mid-exchange.
    Error,
    /// Any tag this relay does not know.
    Unknown,
}

/// What the classifier does with an event of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Forward the original frame text unchanged.
    Forward,
    /// Rewrite the payload, then forward it.
    Transform,
    /// Internal progress signal; drop quietly.
    Suppress,
    /// Unrecognized tag; drop and warn.
    Reject,
    /// Terminate the exchange with an error.
    Fail,
}

impl EventKind {
    /// Map a raw `event` tag onto a kind.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "message" => Self::Message,
            "message_end" => Self::MessageEnd,
            "agent_message" => Self::AgentMessage,
            "text_chunk" => Self::TextChunk,
            "message_file" => Self::MessageFile,
            "workflow_started" => Self::WorkflowStarted,
            "workflow_finished" => Self::WorkflowFinished,
            "node_started" => Self::NodeStarted,
            "node_finished" => Self::NodeFinished,
            "agent_thought" => Self::AgentThought,
            "ping" => Self::Ping,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }

    /// Wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::MessageEnd => "message_end",
            Self::AgentMessage => "agent_message",
            Self::TextChunk => "text_chunk",
            Self::MessageFile => "message_file",
            Self::WorkflowStarted => "workflow_started",
            Self::WorkflowFinished => "workflow_finished",
            Self::NodeStarted => "node_started",
            Self::NodeFinished => "node_finished",
            Self::AgentThought => "agent_thought",
            Self::Ping => "ping",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }

    /// How the classifier treats this kind.
    pub fn disposition(self) -> Disposition {
        match self {
            Self::Message
            | Self::MessageEnd
            | Self::AgentMessage
            | Self::TextChunk
            | Self::MessageFile => Disposition::Forward,
            Self::WorkflowFinished => Disposition::Transform,
            Self::WorkflowStarted
            | Self::NodeStarted
            | Self::NodeFinished
            | Self::AgentThought
            | Self::Ping => Disposition::Suppress,
            Self::Error => Disposition::Fail,
            Self::Unknown => Disposition::Reject,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed upstream event.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamEvent {
    /// Event tag.
    pub kind: EventKind,
    /// Full JSON payload, `event` field included.
    pub payload: Value,
}

impl UpstreamEvent {
    /// Parse the JSON text of one `data:` line.
    pub fn parse(data: &str) -> Result<Self, serde_json::Error> {
        let payload: Value = serde_json::from_str(data)?;
        let kind = payload
            .get("event")
            .and_then(Value::as_str)
            .map_or(EventKind::Unknown, EventKind::from_tag);
        Ok(Self { kind, payload })
    }

    /// Raw tag as sent upstream, for logging unknown kinds.
    pub fn tag(&self) -> &str {
        self.payload
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or("<missing>")
    }
}

/// A frame the classifier decided to hand to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayFrame {
    event: UpstreamEvent,
    wire: String,
}

impl RelayFrame {
    /// Forward with the exact text received from upstream.
    pub(crate) fn verbatim(event: UpstreamEvent, wire: &str) -> Self {
        Self {
            event,
            wire: wire.to_string(),
        }
    }

    /// Forward a rewritten payload, re-encoded as JSON.
    pub(crate) fn rewritten(event: UpstreamEvent) -> Self {
        let wire = event.payload.to_string();
        Self { event, wire }
    }

    /// Kind of the forwarded event.
    pub fn kind(&self) -> EventKind {
        self.event.kind
    }

    /// Parsed payload.
    pub fn payload(&self) -> &Value {
        &self.event.payload
    }

    /// JSON text to place after `data: ` on the wire.
    pub fn wire(&self) -> &str {
        &self.wire
    }

    /// Consume the frame, keeping only the payload.
    pub fn into_payload(self) -> Value {
        self.event.payload
    }
}
