pub mod broadcast;
pub mod msg;
pub mod registry;
pub mod room;
pub mod session;
mod recent;
mod ws;

use std::{sync::Arc, time::Duration};

use axum::{Router, routing::get};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::AppState;

pub use broadcast::{BroadcastCore, BroadcastSettings, JoinOutcome};
pub use msg::{Message, MessageKind, MessageLimits};
pub use session::{Session, SessionState};
pub use ws::lobby_ws;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{room}/ws", get(ws::room_ws))
        .route("/{room}/history", get(recent::history))
        .route("/{room}/members", get(recent::members))
}

/// Periodically evicts rooms nobody is in.
pub fn spawn_sweeper(core: Arc<BroadcastCore>, every: Duration) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = core.registry().evict_empty().await;
            if evicted > 0 {
                debug!(evicted, "swept empty rooms");
            }
        }
    }))
}
