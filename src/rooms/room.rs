use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::{
    msg::{Draft, Message, now_millis},
    session::{Outbox, SessionId},
};

/// The room's view of a joined session.
#[derive(Debug)]
pub struct Member {
    pub session_id: SessionId,
    pub nickname: String,
    outbox: Outbox,
    dropped: u32,
}

impl Member {
    pub fn new(session_id: SessionId, nickname: String, outbox: Outbox) -> Self {
        Self { session_id, nickname, outbox, dropped: 0 }
    }

    pub(crate) fn try_deliver(&self, message: &Arc<Message>) -> Result<(), TrySendError<Arc<Message>>> {
        self.outbox.try_send(Arc::clone(message))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberInfo {
    pub session_id: SessionId,
    pub nickname: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub dropped: usize,
    pub evicted: Vec<SessionId>,
}

/// Membership, sequence and clock of one room.
///
/// Members are kept in join order and never appear twice.
#[derive(Debug)]
pub struct Room {
    id: String,
    members: Vec<Member>,
    seq: u64,
    last_timestamp: i64,
}

impl Room {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            members: Vec::new(),
            seq: 0,
            last_timestamp: i64::MIN,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.members.iter().any(|m| m.session_id == session_id)
    }

    /// Returns false if the session was already a member.
    pub fn join(&mut self, member: Member) -> bool {
        if self.contains(member.session_id) {
            return false;
        }
        self.members.push(member);
        true
    }

    pub fn leave(&mut self, session_id: SessionId) -> Option<Member> {
        let index = self.members.iter().position(|m| m.session_id == session_id)?;
        Some(self.members.remove(index))
    }

    pub fn members(&self) -> Vec<MemberInfo> {
        self.members
            .iter()
            .map(|m| MemberInfo {
                session_id: m.session_id,
                nickname: m.nickname.clone(),
            })
            .collect()
    }

    /// Assigns the next sequence number and a timestamp that never goes
    /// backwards, even if the wall clock does.
    pub fn stamp(&mut self, draft: Draft) -> Message {
        self.seq += 1;
        self.last_timestamp = self.last_timestamp.max(now_millis());
        draft.accept(self.seq, self.last_timestamp)
    }

    /// Non-blocking delivery to every member except `skip`.
    ///
    /// A full outbox loses this message and counts a drop; a member reaching
    /// `max_dropped` drops, or whose outbox is closed, is removed.
    pub fn fan_out(&mut self, message: &Arc<Message>, skip: Option<SessionId>, max_dropped: u32) -> FanOut {
        let mut report = FanOut::default();

        for member in self.members.iter_mut() {
            if Some(member.session_id) == skip {
                continue;
            }
            match member.try_deliver(message) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    member.dropped += 1;
                    report.dropped += 1;
                    if member.dropped >= max_dropped {
                        warn!(room = %self.id, session_id = %member.session_id, drops = member.dropped, "evicting slow member");
                        report.evicted.push(member.session_id);
                    } else {
                        warn!(room = %self.id, session_id = %member.session_id, drops = member.dropped, "outbox full, message dropped");
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(room = %self.id, session_id = %member.session_id, "outbox closed");
                    report.evicted.push(member.session_id);
                }
            }
        }

        if !report.evicted.is_empty() {
            self.members.retain(|m| !report.evicted.contains(&m.session_id));
        }
        report
    }
}
