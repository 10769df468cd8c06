use std::sync::Arc;

use axum::{
    Json, debug_handler,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use crate::{AppResult, AppState};

use super::{broadcast::BroadcastCore, msg::Message, room::MemberInfo};

const MAX_PAGE: usize = 500;

#[derive(Deserialize)]
pub(crate) struct HistoryQuery {
    limit: Option<usize>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn history(
    Path(room): Path<String>,
    Query(HistoryQuery { limit }): Query<HistoryQuery>,
    State(core): State<Arc<BroadcastCore>>,
) -> AppResult<Json<Vec<Message>>> {
    let limit = limit.unwrap_or(core.settings().backfill_limit).min(MAX_PAGE);
    Ok(Json(core.recent(&room, limit).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn members(
    Path(room): Path<String>,
    State(core): State<Arc<BroadcastCore>>,
) -> Json<Vec<MemberInfo>> {
    Json(core.registry().members_of(&room).await)
}
