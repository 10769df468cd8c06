use std::sync::Arc;

use axum::{Json, debug_handler, extract::State};
use serde::Serialize;

use crate::{AppState, config::Config, rooms::BroadcastCore};

#[derive(Serialize)]
pub struct Status {
    name: &'static str,
    version: &'static str,
    default_room: String,
    rooms: usize,
}

#[debug_handler(state = AppState)]
pub async fn index(
    State(core): State<Arc<BroadcastCore>>,
    State(config): State<Arc<Config>>,
) -> Json<Status> {
    Json(Status {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        default_room: config.default_room.clone(),
        rooms: core.registry().room_count().await,
    })
}
