//! Optional message history.
//!
//! Rooms append every accepted user message and read the most recent ones
//! back when somebody joins. Neither call takes part in live ordering.

mod memory;
mod sqlite;

use std::{sync::Arc, time::Duration};

use futures_util::future::BoxFuture;
use thiserror::Error;
use tracing::info;

pub use memory::MemoryHistory;
pub use sqlite::SqliteHistory;

use crate::{
    config::{Config, HistoryBackend},
    rooms::msg::Message,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("stored message is corrupt: {0}")]
    Corrupt(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("store is closed")]
    Closed,
}

pub trait HistoryStore: Send + Sync {
    fn append<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Up to `limit` most recent messages of `room`, oldest first.
    fn load_recent<'a>(
        &'a self,
        room: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<Message>, StoreError>>;
}

pub type SharedHistory = Arc<dyn HistoryStore>;

/// Opens whatever backend the config asks for.
pub async fn open(config: &Config) -> anyhow::Result<Option<SharedHistory>> {
    let store: Option<SharedHistory> = match &config.history {
        HistoryBackend::None => None,
        HistoryBackend::Memory { capacity } => Some(Arc::new(MemoryHistory::new(*capacity))),
        HistoryBackend::Sqlite { url } => Some(Arc::new(SqliteHistory::connect(url).await?)),
    };
    info!(backend = config.history.name(), "history store ready");
    Ok(store)
}

/// Runs a store call with a deadline.
pub(crate) async fn with_timeout<T>(
    limit: Duration,
    call: BoxFuture<'_, Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}
