use std::{collections::HashMap, sync::Arc};

use tokio::sync::{
    RwLock,
    mpsc::{self, error::SendError},
    oneshot,
};
use tracing::{debug, warn};

use crate::{error::ChatError, history::SharedHistory};

use super::{
    broadcast::{BroadcastSettings, Occupancy, RoomCommand, spawn_room},
    msg::{Draft, Message},
    room::{Member, MemberInfo},
    session::SessionId,
};

/// Room id -> room worker.
///
/// No lock is held while a command waits for queue space. Eviction only
/// drops the registry's sender, so a worker still drains whatever was queued
/// before it was forgotten.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, RoomHandle>>,
    settings: Arc<BroadcastSettings>,
    history: Option<SharedHistory>,
}

struct RoomHandle {
    commands: mpsc::Sender<RoomCommand>,
    occupancy: Arc<Occupancy>,
}

impl RoomHandle {
    fn open(id: &str, settings: Arc<BroadcastSettings>, history: Option<SharedHistory>) -> Self {
        let occupancy = Arc::new(Occupancy::default());
        let commands = spawn_room(id, settings, history, Arc::clone(&occupancy));
        Self { commands, occupancy }
    }

    /// Must be called under the registry lock so a sweep sees the join.
    fn claim(&self, joining: bool) -> mpsc::Sender<RoomCommand> {
        if joining {
            self.occupancy.expect_join();
        }
        self.commands.clone()
    }

    fn is_idle(&self) -> bool {
        self.commands.is_closed() || self.occupancy.is_vacant()
    }
}

fn worker_gone(room: &str) -> ChatError {
    ChatError::Transport(format!("room {room} stopped"))
}

impl RoomRegistry {
    pub fn new(settings: Arc<BroadcastSettings>, history: Option<SharedHistory>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            settings,
            history,
        }
    }

    /// Queues `command`, creating the room on first use.
    async fn dispatch(&self, room: &str, command: RoomCommand) -> Result<(), ChatError> {
        let joining = matches!(command, RoomCommand::Join { .. });
        let existing = self.rooms.read().await.get(room).map(|handle| handle.claim(joining));
        let command = match existing {
            Some(tx) => match tx.send(command).await {
                Ok(()) => return Ok(()),
                Err(SendError(command)) => command,
            },
            None => command,
        };

        let tx = {
            let mut rooms = self.rooms.write().await;
            match rooms.get(room) {
                Some(handle) if !handle.commands.is_closed() => handle.claim(joining),
                stale => {
                    if stale.is_some() {
                        warn!(room, "room worker died, reopening");
                    }
                    let handle = RoomHandle::open(room, Arc::clone(&self.settings), self.history.clone());
                    let tx = handle.claim(joining);
                    rooms.insert(room.to_owned(), handle);
                    tx
                }
            }
        };
        tx.send(command).await.map_err(|_| worker_gone(room))
    }

    /// Queues `command` only if the room exists.
    async fn dispatch_existing(&self, room: &str, command: RoomCommand) -> bool {
        let existing = self.rooms.read().await.get(room).map(|handle| handle.claim(false));
        match existing {
            Some(tx) => tx.send(command).await.is_ok(),
            None => false,
        }
    }

    /// Adds `member` to `room`. Returns false if it was already there.
    pub async fn join(&self, room: &str, member: Member) -> Result<bool, ChatError> {
        self.admit(room, member, false).await
    }

    pub(crate) async fn admit(&self, room: &str, member: Member, greet: bool) -> Result<bool, ChatError> {
        let (reply, joined) = oneshot::channel();
        self.dispatch(room, RoomCommand::Join { member, greet, reply }).await?;
        joined.await.map_err(|_| worker_gone(room))
    }

    pub(crate) async fn send(
        &self,
        room: &str,
        session_id: SessionId,
        draft: Draft,
    ) -> Result<Arc<Message>, ChatError> {
        let (reply, accepted) = oneshot::channel();
        if !self.dispatch_existing(room, RoomCommand::Send { session_id, draft, reply }).await {
            return Err(ChatError::protocol("not a member of this room"));
        }
        accepted.await.map_err(|_| worker_gone(room))?
    }

    /// Removes the session. Returns false if it was not a member.
    pub async fn leave(&self, room: &str, session_id: SessionId) -> Result<bool, ChatError> {
        let (reply, left) = oneshot::channel();
        if !self.dispatch_existing(room, RoomCommand::Leave { session_id, reply }).await {
            return Ok(false);
        }
        left.await.map_err(|_| worker_gone(room))
    }

    /// Snapshot taken by the room worker between two events.
    pub async fn members_of(&self, room: &str) -> Vec<MemberInfo> {
        let (reply, members) = oneshot::channel();
        if !self.dispatch_existing(room, RoomCommand::Members { reply }).await {
            return Vec::new();
        }
        members.await.unwrap_or_default()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Forgets every room with no members and no joins in flight.
    ///
    /// Only reads counters the workers publish, so a room that is busy
    /// working through its queue never holds up the sweep.
    pub async fn evict_empty(&self) -> usize {
        let mut rooms = self.rooms.write().await;
        let before = rooms.len();
        rooms.retain(|id, handle| {
            let idle = handle.is_idle();
            if idle {
                debug!(room = %id, "room evicted");
            }
            !idle
        });
        before - rooms.len()
    }
}
