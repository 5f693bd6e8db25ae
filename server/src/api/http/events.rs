//! Provisioning notifications and the lab change feed

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::domain::types::ProvisionEvent;
use crate::{AppState, Result};

use super::lab::LabResponse;

/// Accept a provisioning outcome pushed by the backend
pub async fn receive_provision_event(
    State(state): State<AppState>,
    Json(event): Json<ProvisionEvent>,
) -> Result<Json<LabResponse>> {
    let id = event.lab_id();
    let lab = state.store.apply_event(event).await.map_err(|e| {
        warn!("Rejected pushed provisioning event for lab {}: {}", id, e);
        e
    })?;
    Ok(Json(lab.into()))
}

/// Stream lab changes as server-sent events
pub async fn lab_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.store.subscribe()).filter_map(|update| async move {
        match update {
            Ok(update) => match Event::default().event("lab").json_data(&update) {
                Ok(event) => Some(Ok(event)),
                Err(e) => {
                    warn!("Failed to encode lab update: {}", e);
                    None
                }
            },
            // Slow consumer; the next update carries the full lab anyway
            Err(e) => {
                warn!("Lab event stream lagged: {}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
