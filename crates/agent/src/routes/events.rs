//! Room Event Routes

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use event_bus::RealtimeEvent;
use serde::Deserialize;

use super::lectures::ListResponse;
use crate::{AppError, AppState};

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    /// Maximum number of events, newest kept
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn recent(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RecentQuery>,
) -> Result<Json<ListResponse<RealtimeEvent>>, AppError> {
    let bus = state.bus.as_ref().ok_or(AppError::BusDisabled)?;
    let mut events = bus.recent();
    if events.len() > params.limit {
        events.drain(..events.len() - params.limit);
    }
    Ok(Json(ListResponse::new(events)))
}
