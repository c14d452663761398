// Library service layer
//
// Every operation the HTTP API exposes lives here: permission checks,
// playlist reconciliation, lazy lyrics/BPM backfill and audit bookkeeping.
// Handlers stay thin and only translate between HTTP and these calls.

mod access;
mod audit;
mod collections;
mod memory;
mod playlists;
mod prefetch;
mod reconcile;
mod songs;
mod spotify_auth;
mod users;

pub use access::AccessLevel;
pub use audit::truncate_audit_value;
pub use collections::{CollectionSummary, CollectionUpdate, SharedCollection};
pub use playlists::{ImportResult, PlaylistPreview, PreviewTrack, SyncEvent, TrackStatus};
pub use prefetch::PrefetchStats;
pub use reconcile::{reconcile, ReconcileOptions, ReconcileStats};
pub use songs::SongSort;
pub use spotify_auth::{SpotifyAccessToken, SpotifyStatus};
pub use users::UserProfile;

use std::sync::{Arc, Mutex};

use crate::bpm::BpmSource;
use crate::config::PrefetchConfig;
use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::lyrics::LyricsSource;
use crate::spotify::oauth::SpotifyAuthApi;
use crate::spotify::SpotifyApi;

/// External services the library talks to
pub struct Services {
    pub spotify: Arc<dyn SpotifyApi>,
    pub spotify_auth: Arc<dyn SpotifyAuthApi>,
    pub lyrics: Arc<dyn LyricsSource>,
    pub bpm: Arc<dyn BpmSource>,
}

/// Shared handle to the database and external services. Cheap to clone;
/// background prefetch tasks hold their own clone.
#[derive(Clone)]
pub struct Library {
    db: Arc<Mutex<Database>>,
    spotify: Arc<dyn SpotifyApi>,
    spotify_auth: Arc<dyn SpotifyAuthApi>,
    lyrics: Arc<dyn LyricsSource>,
    bpm: Arc<dyn BpmSource>,
    prefetch: PrefetchConfig,
}

impl Library {
    pub fn new(db: Database, services: Services, prefetch: PrefetchConfig) -> Self {
        Library {
            db: Arc::new(Mutex::new(db)),
            spotify: services.spotify,
            spotify_auth: services.spotify_auth,
            lyrics: services.lyrics,
            bpm: services.bpm,
            prefetch,
        }
    }

    /// Run a closure against the database. The lock is released before
    /// returning, so callers never hold it across an await.
    pub(crate) fn with_db<T>(
        &self,
        f: impl FnOnce(&Database) -> Result<T, AppError>,
    ) -> AppResult<T> {
        let db = self
            .db
            .lock()
            .map_err(|_| AppError::Internal("database lock poisoned".to_string()))?;
        f(&db)
    }
}
