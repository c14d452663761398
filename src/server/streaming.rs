// Collection sync over Server-Sent Events
// - Access is checked before the stream opens (plain JSON error otherwise)
// - One `data:` frame per SyncEvent, ending with complete or error
// - The sync runs in its own task and finishes even if the client disconnects

use axum::{
    Extension, Router,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::post,
};
use futures::Stream;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use super::AppState;
use crate::auth::Identity;
use crate::error::AppResult;
use crate::library::SyncEvent;

const SYNC_CHANNEL_CAPACITY: usize = 32;

pub fn sync_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/collections/{id}/sync", post(sync_collection))
}

async fn sync_collection(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(id): Path<String>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    state.library.check_syncable(&caller, &id)?;

    let (tx, rx) = mpsc::channel::<SyncEvent>(SYNC_CHANNEL_CAPACITY);
    let library = state.library.clone();
    tokio::spawn(async move {
        if let Err(e) = library.sync_collection(&caller, &id, tx.clone()).await {
            log::warn!("Sync of collection {} failed: {}", id, e);
            let _ = tx.send(SyncEvent::Error { error: e.to_string() }).await;
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| Event::default().json_data(event));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
