//! Persistent socket chat session.
//!
//! A session serves one exchange at a time. Messages that arrive while an
//! exchange is streaming are queued and served afterwards in arrival order.
//! A close frame or dropped connection ends the session at once, aborting any
//! in-flight upstream call.

use std::collections::VecDeque;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::upstream::ChatTurn;

/// One inbound socket message.
#[derive(Debug, Deserialize)]
struct SocketRequest {
    #[serde(default)]
    query: String,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    user: Option<String>,
    /// Older widgets identify the user this way.
    #[serde(default)]
    employee_id: Option<String>,
    #[serde(default)]
    inputs: Option<Map<String, Value>>,
}

impl SocketRequest {
    fn into_turn(self) -> crate::error::Result<ChatTurn> {
        let user = self.user.or(self.employee_id).unwrap_or_default();
        Ok(ChatTurn::new(self.query, user)?
            .with_conversation(self.conversation_id)
            .with_inputs(self.inputs.unwrap_or_default()))
    }
}

/// One outbound socket message.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum SocketReply {
    Chunk { data: Value },
    Error { message: String },
}

impl SocketReply {
    fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// The peer is gone; the session must end.
#[derive(Debug)]
struct Disconnected;

/// GET /chat/ws - Upgrade to a chat session.
pub async fn chat_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, state))
}

async fn run_session(mut socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4();
    info!(name: "socket.opened", session_id = %session_id, "WebSocket connection established");

    let mut pending: VecDeque<String> = VecDeque::new();

    loop {
        let text = match pending.pop_front() {
            Some(text) => text,
            None => match next_text(&mut socket).await {
                Some(text) => text,
                None => break,
            },
        };

        if serve_message(&mut socket, &state, &text, &mut pending)
            .await
            .is_err()
        {
            break;
        }
    }

    info!(
        name: "socket.closed",
        session_id = %session_id,
        dropped = pending.len(),
        "WebSocket connection closed"
    );
}

/// Wait for the next text message; `None` once the peer is gone.
async fn next_text(socket: &mut WebSocket) -> Option<String> {
    while let Some(inbound) = socket.recv().await {
        match inbound {
            Ok(Message::Text(text)) => return Some(text.as_str().to_owned()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(Message::Binary(_)) => debug!("Ignoring binary socket message"),
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
        }
    }
    None
}

/// Handle a message received mid-exchange: queue text, stop on disconnect.
fn absorb(
    inbound: Option<Result<Message, axum::Error>>,
    pending: &mut VecDeque<String>,
) -> Result<(), Disconnected> {
    match inbound {
        Some(Ok(Message::Text(text))) => {
            pending.push_back(text.as_str().to_owned());
            Ok(())
        }
        Some(Ok(Message::Close(_)) | Err(_)) | None => Err(Disconnected),
        Some(Ok(_)) => Ok(()),
    }
}

async fn send_reply(socket: &mut WebSocket, reply: &SocketReply) -> Result<(), Disconnected> {
    let text = serde_json::to_string(reply).map_err(|_| Disconnected)?;
    socket
        .send(Message::Text(text.into()))
        .await
        .map_err(|_| Disconnected)
}

/// Run one exchange. `Err` means the peer disconnected.
async fn serve_message(
    socket: &mut WebSocket,
    state: &AppState,
    text: &str,
    pending: &mut VecDeque<String>,
) -> Result<(), Disconnected> {
    let request: SocketRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "Invalid socket payload");
            return send_reply(socket, &SocketReply::error("Invalid JSON payload")).await;
        }
    };

    let turn = match request.into_turn() {
        Ok(turn) => turn,
        Err(err) => return send_reply(socket, &SocketReply::error(err.to_string())).await,
    };

    let request_id = Uuid::new_v4().to_string();
    info!(
        name: "stream.started",
        request_id = %request_id,
        user = %turn.user(),
        conversation_id = ?turn.conversation_id(),
        "Streaming socket request"
    );

    let open = state.gateway.stream_message(&turn, &request_id);
    tokio::pin!(open);

    let opened = loop {
        tokio::select! {
            opened = &mut open => break opened,
            inbound = socket.recv() => absorb(inbound, pending)?,
        }
    };

    let mut frames = match opened {
        Ok(frames) => frames,
        Err(err) => {
            error!(request_id = %request_id, error = %err, "Error streaming message");
            return send_reply(socket, &SocketReply::error(err.to_string())).await;
        }
    };

    loop {
        tokio::select! {
            next = frames.next() => match next {
                Some(Ok(frame)) => {
                    let reply = SocketReply::Chunk { data: frame.into_payload() };
                    send_reply(socket, &reply).await?;
                }
                Some(Err(err)) => {
                    error!(request_id = %request_id, error = %err, "Error streaming message");
                    send_reply(socket, &SocketReply::error(err.to_string())).await?;
                    break;
                }
                None => break,
            },
            inbound = socket.recv() => {
                if absorb(inbound, pending).is_err() {
                    info!(request_id = %request_id, "Client disconnected mid-stream");
                    return Err(Disconnected);
                }
            }
        }
    }

    info!(name: "stream.completed", request_id = %request_id, "Stream completed");
    Ok(())
}
