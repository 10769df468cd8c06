use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{AppState, config::Config, error::ChatError};

use super::{
    broadcast::{BroadcastCore, JoinOutcome},
    msg::Message,
    session::SessionId,
};

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub(crate) enum ClientEvent {
    Join { nickname: String },
    Send { body: String, kind: String },
    Disconnect,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub(crate) enum ServerEvent<'a> {
    Joined {
        session_id: SessionId,
        room: &'a str,
        nickname: &'a str,
    },
    Message(&'a Message),
    Error {
        code: &'static str,
        message: String,
    },
}

impl ServerEvent<'_> {
    fn error(err: &ChatError) -> ServerEvent<'static> {
        ServerEvent::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[debug_handler(state = AppState)]
pub async fn lobby_ws(
    State(core): State<Arc<BroadcastCore>>,
    State(config): State<Arc<Config>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let room = config.default_room.clone();
    ws.on_upgrade(async move |socket| serve_session(socket, core, room).await)
}

#[debug_handler(state = AppState)]
pub(crate) async fn room_ws(
    Path(room): Path<String>,
    State(core): State<Arc<BroadcastCore>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(async move |socket| serve_session(socket, core, room).await)
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent<'_>) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialize event");
            return Ok(());
        }
    };
    socket.send(WsMessage::Text(json.into())).await
}

/// Drives one connection: deliveries from the room and client events share
/// a single loop, and the session always leaves its room on the way out.
async fn serve_session(mut socket: WebSocket, core: Arc<BroadcastCore>, room: String) {
    let (mut session, mut outbox) = core.open_session();
    let session_id = session.id();
    debug!(%session_id, %room, "connection opened");

    loop {
        tokio::select! {
            delivered = outbox.recv() => {
                let Some(message) = delivered else {
                    info!(%session_id, %room, "removed from room, closing connection");
                    break;
                };
                if send_event(&mut socket, &ServerEvent::Message(message.as_ref())).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                let text = match inbound {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(%session_id, error = %e, "transport error");
                        break;
                    }
                };

                let event = match serde_json::from_str::<ClientEvent>(text.as_str()) {
                    Ok(event) => event,
                    Err(e) => {
                        let err = ChatError::validation("event", e.to_string());
                        if send_event(&mut socket, &ServerEvent::error(&err)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };

                let reply = match event {
                    ClientEvent::Join { nickname } => {
                        match core.handle_join(&mut session, &nickname, &room).await {
                            Ok(JoinOutcome::Joined) => {
                                let (nickname, room) = session.require_joined().unwrap_or_default();
                                send_event(&mut socket, &ServerEvent::Joined { session_id, room, nickname }).await
                            }
                            Ok(JoinOutcome::AlreadyJoined) => Ok(()),
                            Err(e) => {
                                debug!(%session_id, error = %e, "join rejected");
                                send_event(&mut socket, &ServerEvent::error(&e)).await
                            }
                        }
                    }
                    ClientEvent::Send { body, kind } => {
                        match core.handle_send(&session, body, &kind).await {
                            Ok(_) => Ok(()),
                            Err(e) => {
                                debug!(%session_id, error = %e, "send rejected");
                                send_event(&mut socket, &ServerEvent::error(&e)).await
                            }
                        }
                    }
                    ClientEvent::Disconnect => break,
                };
                if reply.is_err() {
                    break;
                }
            }
        }
    }

    core.handle_disconnect(&mut session).await;
    let _ = socket.send(WsMessage::Close(None)).await;
    debug!(%session_id, %room, "connection closed");
}
