//! Outbox maintenance endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::MessageId;

use super::parse_uuid;
use crate::AppState;
use crate::error::ApiError;

/// POST /outbox/:id/replay — make a message eligible for dispatch again.
///
/// Inbox-gated consumers that already processed the message skip the
/// redelivery.
#[tracing::instrument(skip(state))]
pub async fn replay(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let message_id = MessageId::from_uuid(parse_uuid(&id)?);
    state.outbox.replay(message_id).await?;
    tracing::info!(%message_id, "Outbox message scheduled for replay");

    Ok(StatusCode::NO_CONTENT)
}
