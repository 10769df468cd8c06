use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use futures_util::future::{self, BoxFuture, FutureExt};

use crate::rooms::msg::Message;

use super::{HistoryStore, StoreError};

/// Keeps the last `capacity` messages of each room in process memory.
pub struct MemoryHistory {
    capacity: usize,
    rooms: Mutex<HashMap<String, VecDeque<Message>>>,
}

impl MemoryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    fn push(&self, message: &Message) -> Result<(), StoreError> {
        if self.capacity == 0 {
            return Ok(());
        }
        let mut rooms = self.rooms.lock().map_err(|_| StoreError::Closed)?;
        let log = rooms.entry(message.room.clone()).or_default();
        if log.len() == self.capacity {
            log.pop_front();
        }
        log.push_back(message.clone());
        Ok(())
    }

    fn recent(&self, room: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        let rooms = self.rooms.lock().map_err(|_| StoreError::Closed)?;
        let Some(log) = rooms.get(room) else {
            return Ok(Vec::new());
        };
        let skip = log.len().saturating_sub(limit);
        Ok(log.iter().skip(skip).cloned().collect())
    }
}

impl HistoryStore for MemoryHistory {
    fn append<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<(), StoreError>> {
        future::ready(self.push(message)).boxed()
    }

    fn load_recent<'a>(
        &'a self,
        room: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<Message>, StoreError>> {
        future::ready(self.recent(room, limit)).boxed()
    }
}
