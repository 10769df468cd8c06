use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ChatError;

use super::msg::Message;

pub type SessionId = Uuid;
pub type Outbox = mpsc::Sender<Arc<Message>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Joined,
    Disconnected,
}

/// One client's connection state. Owned by the transport task that created
/// it; rooms only ever see a clone of its outbox sender.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    state: SessionState,
    nickname: Option<String>,
    room: Option<String>,
    // held until the room takes over delivery, so the receiver stays open
    outbox: Option<Outbox>,
}

impl Session {
    pub fn new(outbox_capacity: usize) -> (Session, mpsc::Receiver<Arc<Message>>) {
        let (tx, rx) = mpsc::channel(outbox_capacity.max(1));
        let session = Session {
            id: Uuid::now_v7(),
            state: SessionState::Connecting,
            nickname: None,
            room: None,
            outbox: Some(tx),
        };
        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub(crate) fn outbox_for_join(&self) -> Result<Outbox, ChatError> {
        match (self.state, &self.outbox) {
            (SessionState::Connecting, Some(tx)) => Ok(tx.clone()),
            (SessionState::Joined, _) => Err(ChatError::protocol("session already joined")),
            _ => Err(ChatError::protocol("session is disconnected")),
        }
    }

    /// `Connecting -> Joined`. After this the room holds the only outbox
    /// sender, so evicting the member ends the delivery stream.
    pub(crate) fn mark_joined(&mut self, nickname: String, room: String) -> Result<(), ChatError> {
        if self.state != SessionState::Connecting {
            return Err(ChatError::protocol(format!(
                "cannot join from {:?}",
                self.state
            )));
        }
        self.state = SessionState::Joined;
        self.nickname = Some(nickname);
        self.room = Some(room);
        self.outbox = None;
        Ok(())
    }

    pub fn require_joined(&self) -> Result<(&str, &str), ChatError> {
        match (self.state, self.nickname.as_deref(), self.room.as_deref()) {
            (SessionState::Joined, Some(nickname), Some(room)) => Ok((nickname, room)),
            (SessionState::Disconnected, ..) => Err(ChatError::protocol("session is disconnected")),
            _ => Err(ChatError::protocol("join a room before sending")),
        }
    }

    /// Any state `-> Disconnected`. Returns the room to leave, if any.
    pub(crate) fn disconnect(&mut self) -> Option<String> {
        let was_joined = self.state == SessionState::Joined;
        self.state = SessionState::Disconnected;
        self.outbox = None;
        if was_joined { self.room.clone() } else { None }
    }
}
