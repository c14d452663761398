// Recently used playlists per user

use super::Library;
use crate::auth::Identity;
use crate::db::{Database, PlaylistMemory, PlaylistMemoryUpdate};
use crate::error::{AppError, AppResult};
use crate::spotify::PlaylistMeta;

const DEFAULT_RECENT: u32 = 10;
const MAX_RECENT: u32 = 50;

/// Record that a user looked at or imported a playlist. Best effort.
pub(crate) fn remember_playlist(db: &Database, user_uid: &str, meta: &PlaylistMeta, url: &str) {
    let update = PlaylistMemoryUpdate {
        playlist_id: &meta.id,
        playlist_url: url,
        name: &meta.name,
        owner: &meta.owner,
        track_count: meta.track_count,
        image_url: meta.image_url.as_deref(),
    };
    if let Err(e) = db.remember_playlist(user_uid, &update) {
        log::warn!("Failed to remember playlist {}: {}", meta.id, e);
    }
}

impl Library {
    pub fn recent_playlists(&self, caller: &Identity, limit: Option<u32>) -> AppResult<Vec<PlaylistMemory>> {
        let limit = limit.unwrap_or(DEFAULT_RECENT).clamp(1, MAX_RECENT);
        self.with_db(|db| Ok(db.get_recent_playlists(&caller.uid, limit)?))
    }

    pub fn forget_playlist(&self, caller: &Identity, playlist_id: &str) -> AppResult<()> {
        let removed = self.with_db(|db| Ok(db.forget_playlist(&caller.uid, playlist_id)?))?;
        if removed {
            Ok(())
        } else {
            Err(AppError::NotFound("Playlist not found in history".to_string()))
        }
    }
}
