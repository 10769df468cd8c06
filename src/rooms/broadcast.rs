//! Sequencing and fan-out.
//!
//! Every room is owned by one worker task. Joins, sends and leaves for that
//! room reach the worker through a single queue and are handled one at a
//! time, so all members see the same order.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    error::ChatError,
    history::{SharedHistory, with_timeout},
};

use super::{
    msg::{Draft, Message, MessageLimits, new_message, validate_nickname, validate_room},
    registry::RoomRegistry,
    room::{Member, MemberInfo, Room},
    session::{Session, SessionId, SessionState},
};

#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    pub limits: MessageLimits,
    /// Per-session delivery buffer.
    pub outbox_capacity: usize,
    /// Dropped deliveries a member may accumulate before it is removed.
    pub max_dropped: u32,
    pub room_queue_capacity: usize,
    pub backfill_limit: usize,
    pub store_timeout: Duration,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            limits: MessageLimits::default(),
            outbox_capacity: 256,
            max_dropped: 32,
            room_queue_capacity: 1024,
            backfill_limit: 50,
            store_timeout: Duration::from_secs(2),
        }
    }
}

pub(crate) enum RoomCommand {
    Join {
        member: Member,
        /// Backfill history and announce the join.
        greet: bool,
        reply: oneshot::Sender<bool>,
    },
    Send {
        session_id: SessionId,
        draft: Draft,
        reply: oneshot::Sender<Result<Arc<Message>, ChatError>>,
    },
    Leave {
        session_id: SessionId,
        reply: oneshot::Sender<bool>,
    },
    Members {
        reply: oneshot::Sender<Vec<MemberInfo>>,
    },
}

/// Room state the registry can read without a round trip to the worker.
///
/// A join is counted as pending from the moment it is queued until the
/// worker has published the resulting member count, so a room is never seen
/// as vacant while someone is on their way in.
#[derive(Debug, Default)]
pub(crate) struct Occupancy {
    pending_joins: AtomicUsize,
    members: AtomicUsize,
}

impl Occupancy {
    pub(crate) fn expect_join(&self) {
        self.pending_joins.fetch_add(1, Ordering::SeqCst);
    }

    fn join_settled(&self) {
        self.pending_joins.fetch_sub(1, Ordering::SeqCst);
    }

    fn set_members(&self, members: usize) {
        self.members.store(members, Ordering::SeqCst);
    }

    /// Pending joins are read first: the worker publishes members before it
    /// settles a join.
    pub(crate) fn is_vacant(&self) -> bool {
        self.pending_joins.load(Ordering::SeqCst) == 0 && self.members.load(Ordering::SeqCst) == 0
    }
}

/// Starts the worker. It runs until every sender is gone and its queue has
/// drained.
pub(crate) fn spawn_room(
    id: &str,
    settings: Arc<BroadcastSettings>,
    history: Option<SharedHistory>,
    occupancy: Arc<Occupancy>,
) -> mpsc::Sender<RoomCommand> {
    let (tx, commands) = mpsc::channel(settings.room_queue_capacity.max(1));
    let worker = RoomWorker {
        room: Room::new(id),
        settings,
        history,
        commands,
        occupancy,
    };
    tokio::spawn(worker.run());
    tx
}

struct RoomWorker {
    room: Room,
    settings: Arc<BroadcastSettings>,
    history: Option<SharedHistory>,
    commands: mpsc::Receiver<RoomCommand>,
    occupancy: Arc<Occupancy>,
}

impl RoomWorker {
    async fn run(mut self) {
        debug!(room = %self.room.id(), "room opened");

        while let Some(command) = self.commands.recv().await {
            match command {
                RoomCommand::Join { member, greet, reply } => {
                    let joined = self.join(member, greet).await;
                    self.occupancy.set_members(self.room.len());
                    self.occupancy.join_settled();
                    let _ = reply.send(joined);
                }
                RoomCommand::Send { session_id, draft, reply } => {
                    let accepted = self.send(session_id, draft).await;
                    self.occupancy.set_members(self.room.len());
                    let _ = reply.send(accepted);
                }
                RoomCommand::Leave { session_id, reply } => {
                    let left = self.room.leave(session_id).is_some();
                    if left {
                        info!(room = %self.room.id(), %session_id, members = self.room.len(), "member left");
                    }
                    self.occupancy.set_members(self.room.len());
                    let _ = reply.send(left);
                }
                RoomCommand::Members { reply } => {
                    let _ = reply.send(self.room.members());
                }
            }
        }

        debug!(room = %self.room.id(), "room closed");
    }

    async fn join(&mut self, member: Member, greet: bool) -> bool {
        if self.room.contains(member.session_id) {
            return false;
        }
        let session_id = member.session_id;
        let nickname = member.nickname.clone();

        if greet {
            self.backfill(&member).await;
        }
        self.room.join(member);
        info!(room = %self.room.id(), %session_id, %nickname, members = self.room.len(), "member joined");

        if greet {
            let draft = Draft::system(self.room.id(), format!("{nickname} joined the room"));
            let announcement = Arc::new(self.room.stamp(draft));
            self.deliver(&announcement, Some(session_id));
        }
        true
    }

    /// Recent history goes to the joiner only, before it can see live traffic.
    async fn backfill(&self, member: &Member) {
        let Some(history) = &self.history else {
            return;
        };
        let limit = self.settings.backfill_limit.min(self.settings.outbox_capacity);
        if limit == 0 {
            return;
        }

        match with_timeout(self.settings.store_timeout, history.load_recent(self.room.id(), limit)).await {
            Ok(messages) => {
                for message in messages {
                    if member.try_deliver(&Arc::new(message)).is_err() {
                        break;
                    }
                }
            }
            Err(e) => warn!(room = %self.room.id(), error = %e, "history backfill failed"),
        }
    }

    async fn send(&mut self, session_id: SessionId, draft: Draft) -> Result<Arc<Message>, ChatError> {
        if !self.room.contains(session_id) {
            return Err(ChatError::protocol("not a member of this room"));
        }

        let message = Arc::new(self.room.stamp(draft));
        if let Some(history) = &self.history {
            if let Err(e) = with_timeout(self.settings.store_timeout, history.append(&message)).await {
                warn!(room = %self.room.id(), seq = message.seq, error = %e, "history append failed");
            }
        }

        self.deliver(&message, None);
        Ok(message)
    }

    fn deliver(&mut self, message: &Arc<Message>, skip: Option<SessionId>) {
        let report = self.room.fan_out(message, skip, self.settings.max_dropped);
        debug!(
            room = %self.room.id(),
            seq = message.seq,
            delivered = report.delivered,
            dropped = report.dropped,
            "fan-out"
        );
        for session_id in report.evicted {
            info!(room = %self.room.id(), %session_id, members = self.room.len(), "member removed");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    AlreadyJoined,
}

/// Entry point for the transport layer.
pub struct BroadcastCore {
    registry: RoomRegistry,
    settings: Arc<BroadcastSettings>,
    history: Option<SharedHistory>,
}

impl BroadcastCore {
    pub fn new(settings: BroadcastSettings, history: Option<SharedHistory>) -> Self {
        let settings = Arc::new(settings);
        Self {
            registry: RoomRegistry::new(Arc::clone(&settings), history.clone()),
            settings,
            history,
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &BroadcastSettings {
        &self.settings
    }

    pub fn open_session(&self) -> (Session, mpsc::Receiver<Arc<Message>>) {
        Session::new(self.settings.outbox_capacity)
    }

    pub async fn handle_join(
        &self,
        session: &mut Session,
        nickname: &str,
        room: &str,
    ) -> Result<JoinOutcome, ChatError> {
        if session.state() == SessionState::Joined {
            return Ok(JoinOutcome::AlreadyJoined);
        }
        let outbox = session.outbox_for_join()?;
        let nickname = validate_nickname(nickname, &self.settings.limits)?;
        let room = validate_room(room)?;

        let member = Member::new(session.id(), nickname.clone(), outbox);
        if !self.registry.admit(&room, member, true).await? {
            debug!(%room, session_id = %session.id(), "session was already a member");
        }
        session.mark_joined(nickname, room)?;
        Ok(JoinOutcome::Joined)
    }

    pub async fn handle_send(
        &self,
        session: &Session,
        body: String,
        kind: &str,
    ) -> Result<Arc<Message>, ChatError> {
        let (nickname, room) = session.require_joined()?;
        let draft = new_message(nickname, body, kind, room, &self.settings.limits)?;
        self.registry.send(room, session.id(), draft).await
    }

    /// Returns once the room has dropped the session.
    pub async fn handle_disconnect(&self, session: &mut Session) {
        let Some(room) = session.disconnect() else {
            return;
        };
        if let Err(e) = self.registry.leave(&room, session.id()).await {
            warn!(%room, session_id = %session.id(), error = %e, "leave failed");
        }
    }

    pub async fn recent(&self, room: &str, limit: usize) -> Result<Vec<Message>, ChatError> {
        let room = validate_room(room)?;
        let Some(history) = &self.history else {
            return Ok(Vec::new());
        };
        Ok(with_timeout(self.settings.store_timeout, history.load_recent(&room, limit)).await?)
    }
}
