// Linked playlists - import, sync, unlink, reorder and import preview

use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

use super::audit::audit_entry;
use super::memory::remember_playlist;
use super::reconcile::{reconcile, ReconcileOptions, ReconcileStats};
use super::{AccessLevel, Library};
use crate::auth::Identity;
use crate::db::{now, Collection, LinkedPlaylist, Song};
use crate::error::{AppError, AppResult};
use crate::spotify::{extract_playlist_id, PlaylistMeta, PlaylistTrack};

#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub playlist: LinkedPlaylist,
    pub stats: ReconcileStats,
}

/// Progress of a collection sync, streamed to the client as it happens
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    Progress {
        current: usize,
        total: usize,
        playlist_name: String,
    },
    PlaylistError {
        playlist_id: String,
        error: String,
    },
    Complete {
        stats: ReconcileStats,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    New,
    Existing,
    /// Already in the collection with customized lyrics or notes
    Conflict,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewTrack {
    #[serde(flatten)]
    pub track: PlaylistTrack,
    pub status: TrackStatus,
    pub song_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaylistPreview {
    pub playlist: PlaylistMeta,
    pub tracks: Vec<PreviewTrack>,
    pub new_count: usize,
    pub existing_count: usize,
    pub conflict_count: usize,
}

fn parse_playlist_url(url: &str) -> AppResult<String> {
    extract_playlist_id(url)
        .ok_or_else(|| AppError::BadRequest("Invalid Spotify playlist URL".to_string()))
}

/// Insert or refresh a playlist's entry in the collection's linked list
fn link_playlist(collection: &mut Collection, meta: &PlaylistMeta, synced_at: &str) -> LinkedPlaylist {
    match collection.playlist_index(&meta.id) {
        Some(idx) => {
            let entry = &mut collection.linked_playlists[idx];
            entry.name = meta.name.clone();
            entry.owner = meta.owner.clone();
            entry.url = meta.url.clone();
            entry.image_url = meta.image_url.clone();
            entry.track_count = meta.track_count;
            entry.last_synced_at = Some(synced_at.to_string());
            entry.clone()
        }
        None => {
            let entry = LinkedPlaylist {
                playlist_id: meta.id.clone(),
                name: meta.name.clone(),
                owner: meta.owner.clone(),
                url: meta.url.clone(),
                image_url: meta.image_url.clone(),
                track_count: meta.track_count,
                linked_at: synced_at.to_string(),
                last_synced_at: Some(synced_at.to_string()),
            };
            collection.linked_playlists.push(entry.clone());
            entry
        }
    }
}

fn track_status(song: Option<&Song>) -> TrackStatus {
    match song {
        None => TrackStatus::New,
        Some(s) if s.is_customized || !s.notes.trim().is_empty() => TrackStatus::Conflict,
        Some(_) => TrackStatus::Existing,
    }
}

async fn send(progress: &mpsc::Sender<SyncEvent>, event: SyncEvent) {
    // A closed channel means the client went away; the sync still finishes
    let _ = progress.send(event).await;
}

impl Library {
    async fn fetch_playlist(&self, playlist_id: &str) -> AppResult<(PlaylistMeta, Vec<PlaylistTrack>)> {
        let meta = self.spotify.playlist(playlist_id).await.map_err(|e| {
            log::warn!("Failed to fetch playlist {}: {}", playlist_id, e);
            AppError::from(e)
        })?;
        let tracks = self.spotify.playlist_tracks(playlist_id).await.map_err(|e| {
            log::warn!("Failed to fetch tracks of playlist {}: {}", playlist_id, e);
            AppError::from(e)
        })?;
        Ok((meta, tracks))
    }

    /// Link a Spotify playlist to a collection and import its tracks
    pub async fn import_playlist(
        &self,
        caller: &Identity,
        collection_id: &str,
        url: &str,
        force_refresh: bool,
    ) -> AppResult<ImportResult> {
        let playlist_id = parse_playlist_url(url)?;
        self.collection_for(caller, collection_id, AccessLevel::Owner)?;
        let (meta, tracks) = self.fetch_playlist(&playlist_id).await?;

        let (linked, stats, collection_name) = self.with_db(|db| {
            // Re-read: the collection may have changed while Spotify was fetched
            let mut collection = db
                .get_collection(collection_id)?
                .ok_or_else(|| AppError::NotFound("Collection not found".to_string()))?;
            let linked = link_playlist(&mut collection, &meta, &now());
            db.update_collection(&collection)?;
            let fetched = [(playlist_id.clone(), tracks)];
            let stats = reconcile(db, &collection, &fetched, ReconcileOptions { force_refresh })?;
            remember_playlist(db, &caller.uid, &meta, url);
            Ok((linked, stats, collection.name))
        })?;

        let mut entry = audit_entry(caller, "import_playlist", "collection", collection_id);
        entry.resource_name = Some(collection_name);
        entry.collection_id = Some(collection_id.to_string());
        entry.metadata = Some(json!({
            "playlist_id": playlist_id,
            "playlist_name": meta.name,
            "force_refresh": force_refresh,
            "stats": stats,
        }));
        self.record(entry);

        self.schedule_prefetch(collection_id);
        Ok(ImportResult {
            playlist: linked,
            stats,
        })
    }

    /// Owner access and at least one linked playlist; checked before a sync
    /// stream is opened so the client gets a plain error response
    pub fn check_syncable(&self, caller: &Identity, collection_id: &str) -> AppResult<Collection> {
        let (collection, _) = self.collection_for(caller, collection_id, AccessLevel::Owner)?;
        if collection.linked_playlists.is_empty() {
            return Err(AppError::BadRequest(
                "This collection has no linked playlists".to_string(),
            ));
        }
        Ok(collection)
    }

    /// Re-fetch every linked playlist and reconcile. A playlist that fails to
    /// fetch is reported and left out, so its songs keep their membership.
    pub async fn sync_collection(
        &self,
        caller: &Identity,
        collection_id: &str,
        progress: mpsc::Sender<SyncEvent>,
    ) -> AppResult<ReconcileStats> {
        let collection = self.check_syncable(caller, collection_id)?;

        let total = collection.linked_playlists.len();
        let mut fetched: Vec<(String, Vec<PlaylistTrack>)> = Vec::new();
        let mut metas: Vec<PlaylistMeta> = Vec::new();
        let mut failed: Vec<String> = Vec::new();

        for (i, linked) in collection.linked_playlists.iter().enumerate() {
            send(
                &progress,
                SyncEvent::Progress {
                    current: i + 1,
                    total,
                    playlist_name: linked.name.clone(),
                },
            )
            .await;

            match self.fetch_playlist(&linked.playlist_id).await {
                Ok((meta, tracks)) => {
                    fetched.push((linked.playlist_id.clone(), tracks));
                    metas.push(meta);
                }
                Err(e) => {
                    failed.push(linked.playlist_id.clone());
                    send(
                        &progress,
                        SyncEvent::PlaylistError {
                            playlist_id: linked.playlist_id.clone(),
                            error: e.to_string(),
                        },
                    )
                    .await;
                }
            }
        }

        let stats = self.with_db(|db| {
            let mut current = db
                .get_collection(collection_id)?
                .ok_or_else(|| AppError::NotFound("Collection not found".to_string()))?;
            let synced_at = now();
            for meta in &metas {
                // Unlinked while the sync was running
                if current.playlist_index(&meta.id).is_some() {
                    link_playlist(&mut current, meta, &synced_at);
                }
            }
            fetched.retain(|(pid, _)| current.playlist_index(pid).is_some());
            db.update_collection(&current)?;
            Ok(reconcile(db, &current, &fetched, ReconcileOptions::default())?)
        })?;

        let mut entry = audit_entry(caller, "sync_collection", "collection", collection_id);
        entry.resource_name = Some(collection.name.clone());
        entry.collection_id = Some(collection_id.to_string());
        entry.metadata = Some(json!({
            "playlists_synced": fetched.len(),
            "playlists_failed": failed,
            "stats": stats,
        }));
        self.record(entry);

        self.schedule_prefetch(collection_id);
        send(&progress, SyncEvent::Complete { stats: stats.clone() }).await;
        Ok(stats)
    }

    /// Remove a playlist from a collection. Returns how many songs were orphaned.
    pub fn unlink_playlist(&self, caller: &Identity, collection_id: &str, playlist_id: &str) -> AppResult<usize> {
        self.collection_for(caller, collection_id, AccessLevel::Owner)?;

        let (orphaned, removed, name) = self.with_db(|db| {
            let mut collection = db
                .get_collection(collection_id)?
                .ok_or_else(|| AppError::NotFound("Collection not found".to_string()))?;
            let idx = collection.playlist_index(playlist_id).ok_or_else(|| {
                AppError::NotFound("Playlist is not linked to this collection".to_string())
            })?;
            let removed = collection.linked_playlists.remove(idx);
            db.update_collection(&collection)?;

            let ts = now();
            let mut orphaned = 0;
            let mut changed = Vec::new();
            for mut song in db.get_songs_for_collection(collection_id)? {
                let before = song.source_playlist_ids.len();
                song.source_playlist_ids.retain(|p| p != playlist_id);
                if song.source_playlist_ids.len() == before {
                    continue;
                }
                song.playlist_positions.remove(playlist_id);
                if song.source_playlist_ids.is_empty() && !song.is_orphaned {
                    song.is_orphaned = true;
                    song.orphaned_at = Some(ts.clone());
                    orphaned += 1;
                }
                song.updated_at = ts.clone();
                changed.push(song);
            }
            db.save_song_batch(&[], &changed, false)?;
            Ok((orphaned, removed, collection.name))
        })?;

        let mut entry = audit_entry(caller, "unlink_playlist", "collection", collection_id);
        entry.resource_name = Some(name);
        entry.collection_id = Some(collection_id.to_string());
        entry.metadata = Some(json!({
            "playlist_id": playlist_id,
            "playlist_name": removed.name,
            "songs_orphaned": orphaned,
        }));
        self.record(entry);
        Ok(orphaned)
    }

    /// Set the display order of linked playlists; `ordered_ids` must list each exactly once
    pub fn reorder_playlists(
        &self,
        caller: &Identity,
        collection_id: &str,
        ordered_ids: &[String],
    ) -> AppResult<Vec<LinkedPlaylist>> {
        let (collection, _) = self.modify_collection(
            caller,
            collection_id,
            AccessLevel::Owner,
            |collection, _| {
                let current: HashSet<&str> = collection
                    .linked_playlists
                    .iter()
                    .map(|p| p.playlist_id.as_str())
                    .collect();
                let requested: HashSet<&str> = ordered_ids.iter().map(String::as_str).collect();
                if ordered_ids.len() != collection.linked_playlists.len()
                    || requested.len() != ordered_ids.len()
                    || requested != current
                {
                    return Err(AppError::BadRequest(
                        "Playlist order must contain each linked playlist exactly once".to_string(),
                    ));
                }

                let mut by_id: HashMap<String, LinkedPlaylist> = collection
                    .linked_playlists
                    .drain(..)
                    .map(|p| (p.playlist_id.clone(), p))
                    .collect();
                collection.linked_playlists = ordered_ids
                    .iter()
                    .filter_map(|id| by_id.remove(id))
                    .collect();
                Ok(())
            },
        )?;

        let mut entry = audit_entry(caller, "reorder_playlists", "collection", collection_id);
        entry.resource_name = Some(collection.name.clone());
        entry.collection_id = Some(collection_id.to_string());
        entry.metadata = Some(json!({ "order": ordered_ids }));
        self.record(entry);
        Ok(collection.linked_playlists)
    }

    /// What importing a playlist would do, without changing anything but
    /// the caller's playlist history
    pub async fn playlist_preview(
        &self,
        caller: &Identity,
        url: &str,
        collection_id: Option<&str>,
    ) -> AppResult<PlaylistPreview> {
        let playlist_id = parse_playlist_url(url)?;
        if let Some(id) = collection_id {
            self.collection_for(caller, id, AccessLevel::Viewer)?;
        }
        let (meta, tracks) = self.fetch_playlist(&playlist_id).await?;

        let existing: HashMap<String, Song> = self.with_db(|db| {
            remember_playlist(db, &caller.uid, &meta, url);
            let songs = match collection_id {
                Some(id) => db.get_songs_for_collection(id)?,
                None => Vec::new(),
            };
            Ok(songs
                .into_iter()
                .map(|s| (s.spotify_track_id.clone(), s))
                .collect())
        })?;

        let tracks: Vec<PreviewTrack> = tracks
            .into_iter()
            .map(|track| {
                let song = existing.get(&track.track_id);
                PreviewTrack {
                    status: track_status(song),
                    song_id: song.map(|s| s.id.clone()),
                    track,
                }
            })
            .collect();
        let count = |status: TrackStatus| tracks.iter().filter(|t| t.status == status).count();

        Ok(PlaylistPreview {
            new_count: count(TrackStatus::New),
            existing_count: count(TrackStatus::Existing),
            conflict_count: count(TrackStatus::Conflict),
            playlist: meta,
            tracks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    const PL1: &str = "https://open.spotify.com/playlist/pl1?si=abc";

    fn owner_with_collection(h: &Harness) -> (Identity, String) {
        let owner = identity("owner");
        let c = h.library.create_collection(&owner, "Gig", None, true).unwrap();
        (owner, c.id)
    }

    #[tokio::test]
    async fn test_import_twice_creates_no_duplicates() {
        let h = harness();
        let (owner, cid) = owner_with_collection(&h);
        h.spotify.set("pl1", tracks(&["a", "b", "c"]));

        let first = h.library.import_playlist(&owner, &cid, PL1, false).await.unwrap();
        assert_eq!(first.stats.created, 3);
        assert_eq!(first.playlist.playlist_id, "pl1");

        let second = h.library.import_playlist(&owner, &cid, PL1, false).await.unwrap();
        assert_eq!(second.stats.created, 0);

        let collection = h.library.get_collection(&owner, &cid).unwrap();
        assert_eq!(collection.song_count, 3);
        assert_eq!(collection.collection.linked_playlists.len(), 1);
        assert!(collection.collection.linked_playlists[0].last_synced_at.is_some());

        let recent = h.library.recent_playlists(&owner, None).unwrap();
        assert_eq!(recent[0].access_count, 2);
    }

    #[tokio::test]
    async fn test_import_requires_owner_and_valid_url() {
        let h = harness();
        let (_, cid) = owner_with_collection(&h);
        h.spotify.set("pl1", tracks(&["a"]));

        let err = h
            .library
            .import_playlist(&identity("stranger"), &cid, PL1, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = h
            .library
            .import_playlist(&identity("owner"), &cid, "not a url!", false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_spotify_failure_is_upstream_error() {
        let h = harness();
        let (owner, cid) = owner_with_collection(&h);
        let err = h.library.import_playlist(&owner, &cid, PL1, false).await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_sync_orphans_and_restores() {
        let h = harness();
        let (owner, cid) = owner_with_collection(&h);
        h.spotify.set("pl1", tracks(&["a", "b"]));
        h.library.import_playlist(&owner, &cid, PL1, false).await.unwrap();

        h.spotify.set("pl1", tracks(&["a"]));
        let (tx, mut rx) = mpsc::channel(16);
        let stats = h.library.sync_collection(&owner, &cid, tx).await.unwrap();
        assert_eq!(stats.orphaned, 1);

        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        assert_eq!(
            events[0],
            SyncEvent::Progress {
                current: 1,
                total: 1,
                playlist_name: "Playlist pl1".into()
            }
        );
        assert!(matches!(events.last(), Some(SyncEvent::Complete { .. })));

        h.spotify.set("pl1", tracks(&["b", "a"]));
        let (tx, _rx) = mpsc::channel(16);
        let stats = h.library.sync_collection(&owner, &cid, tx).await.unwrap();
        assert_eq!(stats.restored, 1);
    }

    #[tokio::test]
    async fn test_sync_skips_failed_playlists() {
        let h = harness();
        let (owner, cid) = owner_with_collection(&h);
        h.spotify.set("pl1", tracks(&["a"]));
        h.spotify.set("pl2", tracks(&["b"]));
        h.library.import_playlist(&owner, &cid, PL1, false).await.unwrap();
        h.library.import_playlist(&owner, &cid, "pl2", false).await.unwrap();

        h.spotify.fail("pl2");
        let (tx, mut rx) = mpsc::channel(16);
        let stats = h.library.sync_collection(&owner, &cid, tx).await.unwrap();
        assert_eq!(stats.orphaned, 0);

        let mut saw_error = false;
        while let Some(e) = rx.recv().await {
            if let SyncEvent::PlaylistError { playlist_id, .. } = e {
                assert_eq!(playlist_id, "pl2");
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_unlink_orphans_single_source_songs() {
        let h = harness();
        let (owner, cid) = owner_with_collection(&h);
        h.spotify.set("pl1", tracks(&["a", "shared"]));
        h.spotify.set("pl2", tracks(&["shared"]));
        h.library.import_playlist(&owner, &cid, "pl1", false).await.unwrap();
        h.library.import_playlist(&owner, &cid, "pl2", false).await.unwrap();

        let orphaned = h.library.unlink_playlist(&owner, &cid, "pl1").unwrap();
        assert_eq!(orphaned, 1);

        let songs = h.library.list_songs(&owner, &cid, Default::default()).unwrap();
        let a = songs.iter().find(|s| s.spotify_track_id == "a").unwrap();
        assert!(a.is_orphaned);
        let shared = songs.iter().find(|s| s.spotify_track_id == "shared").unwrap();
        assert!(!shared.is_orphaned);
        assert_eq!(shared.source_playlist_ids, vec!["pl2"]);

        assert!(matches!(
            h.library.unlink_playlist(&owner, &cid, "pl1"),
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reorder_must_be_permutation() {
        let h = harness();
        let (owner, cid) = owner_with_collection(&h);
        h.spotify.set("pl1", tracks(&["a"]));
        h.spotify.set("pl2", tracks(&["b"]));
        h.library.import_playlist(&owner, &cid, "pl1", false).await.unwrap();
        h.library.import_playlist(&owner, &cid, "pl2", false).await.unwrap();

        let ids = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        for bad in [ids(&["pl1"]), ids(&["pl1", "pl1"]), ids(&["pl1", "pl3"])] {
            assert!(matches!(
                h.library.reorder_playlists(&owner, &cid, &bad),
                Err(AppError::BadRequest(_))
            ));
        }

        let order = h.library.reorder_playlists(&owner, &cid, &ids(&["pl2", "pl1"])).unwrap();
        assert_eq!(order[0].playlist_id, "pl2");

        let songs = h.library.list_songs(&owner, &cid, Default::default()).unwrap();
        assert_eq!(songs[0].spotify_track_id, "b");
    }

    #[tokio::test]
    async fn test_preview_statuses() {
        let h = harness();
        let (owner, cid) = owner_with_collection(&h);
        h.spotify.set("pl1", tracks(&["a", "b"]));
        h.library.import_playlist(&owner, &cid, "pl1", false).await.unwrap();
        h.library
            .update_notes(&owner, &Song::make_id(&cid, "b"), "key change")
            .unwrap();

        h.spotify.set("pl9", tracks(&["a", "b", "c"]));
        let preview = h
            .library
            .playlist_preview(&owner, "spotify:playlist:pl9", Some(&cid))
            .await
            .unwrap();
        let statuses: Vec<_> = preview.tracks.iter().map(|t| t.status).collect();
        assert_eq!(
            statuses,
            vec![TrackStatus::Existing, TrackStatus::Conflict, TrackStatus::New]
        );
        assert_eq!(preview.new_count, 1);
        assert_eq!(preview.conflict_count, 1);

        // Without a collection everything is new
        let preview = h
            .library
            .playlist_preview(&owner, "pl9", None)
            .await
            .unwrap();
        assert_eq!(preview.new_count, 3);
    }

    #[test]
    fn test_sync_event_wire_format() {
        let event = SyncEvent::PlaylistError {
            playlist_id: "p".into(),
            error: "boom".into(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "playlist_error", "playlist_id": "p", "error": "boom"})
        );
    }
}
