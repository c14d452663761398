// Playlist to song reconciliation
//
// Songs are keyed by (collection, Spotify track). Fetched playlists decide
// membership; playlists that were not fetched keep whatever membership they
// had. A song left with no source playlist is orphaned, never deleted.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::db::{now, Bpm, Collection, Database, Song};
use crate::spotify::PlaylistTrack;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    /// Mark non-customized songs for a fresh lyrics/BPM lookup
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub total_tracks: usize,
    pub created: usize,
    pub updated: usize,
    pub restored: usize,
    pub orphaned: usize,
}

fn new_song(collection_id: &str, playlist_id: &str, track: &PlaylistTrack, ts: &str) -> Song {
    Song {
        id: Song::make_id(collection_id, &track.track_id),
        collection_id: collection_id.to_string(),
        spotify_track_id: track.track_id.clone(),
        spotify_uri: track.uri.clone(),
        spotify_url: track.url.clone(),
        title: track.title.clone(),
        artist: track.artist.clone(),
        album: track.album.clone(),
        year: track.year.clone(),
        album_art_url: track.album_art_url.clone(),
        duration_ms: track.duration_ms,
        lyrics: String::new(),
        lyrics_numbered: String::new(),
        lyrics_fetched: false,
        lyrics_fetch_error: None,
        lyrics_fetched_at: None,
        is_customized: false,
        bpm: Bpm::NotAvailable,
        bpm_manual: false,
        notes: String::new(),
        source_playlist_ids: vec![playlist_id.to_string()],
        playlist_positions: BTreeMap::from([(playlist_id.to_string(), track.position)]),
        is_orphaned: false,
        orphaned_at: None,
        created_at: ts.to_string(),
        updated_at: ts.to_string(),
    }
}

/// Catalogue fields only; lyrics, notes and BPM stay as they are
fn apply_catalogue(song: &mut Song, track: &PlaylistTrack) {
    song.spotify_uri = track.uri.clone();
    song.spotify_url = track.url.clone();
    song.title = track.title.clone();
    song.artist = track.artist.clone();
    song.album = track.album.clone();
    song.year = track.year.clone();
    song.album_art_url = track.album_art_url.clone();
    song.duration_ms = track.duration_ms;
}

fn add_source(song: &mut Song, playlist_id: &str, position: u32) {
    if !song.source_playlist_ids.iter().any(|p| p == playlist_id) {
        song.source_playlist_ids.push(playlist_id.to_string());
    }
    song.playlist_positions.insert(playlist_id.to_string(), position);
}

/// Bring the songs of `collection` in line with freshly fetched playlists.
/// All writes happen in one transaction.
pub fn reconcile(
    db: &Database,
    collection: &Collection,
    fetched: &[(String, Vec<PlaylistTrack>)],
    options: ReconcileOptions,
) -> rusqlite::Result<ReconcileStats> {
    let ts = now();
    let mut stats = ReconcileStats::default();

    let mut existing: HashMap<String, Song> = db
        .get_songs_for_collection(&collection.id)?
        .into_iter()
        .map(|s| (s.spotify_track_id.clone(), s))
        .collect();
    let mut touched: HashSet<String> = HashSet::new();
    let mut created: Vec<Song> = Vec::new();
    let mut created_index: HashMap<String, usize> = HashMap::new();
    let mut membership: HashMap<&str, HashSet<&str>> = HashMap::new();

    for (playlist_id, tracks) in fetched {
        let members = membership.entry(playlist_id.as_str()).or_default();
        for track in tracks {
            // Duplicate entries keep the first position
            if !members.insert(track.track_id.as_str()) {
                continue;
            }
            stats.total_tracks += 1;

            if let Some(song) = existing.get_mut(&track.track_id) {
                apply_catalogue(song, track);
                add_source(song, playlist_id, track.position);
                if song.is_orphaned {
                    song.is_orphaned = false;
                    song.orphaned_at = None;
                    stats.restored += 1;
                }
                if touched.insert(track.track_id.clone()) {
                    stats.updated += 1;
                }
            } else if let Some(&idx) = created_index.get(&track.track_id) {
                add_source(&mut created[idx], playlist_id, track.position);
            } else {
                created_index.insert(track.track_id.clone(), created.len());
                created.push(new_song(&collection.id, playlist_id, track, &ts));
                stats.created += 1;
            }
        }
    }

    // Drop memberships that the fetched playlists no longer confirm
    let mut changed: Vec<Song> = Vec::new();
    for (track_id, mut song) in existing {
        let mut dirty = touched.contains(&track_id);

        let before = song.source_playlist_ids.len();
        song.source_playlist_ids.retain(|pid| {
            membership
                .get(pid.as_str())
                .map_or(true, |members| members.contains(track_id.as_str()))
        });
        if song.source_playlist_ids.len() != before {
            let sources = song.source_playlist_ids.clone();
            song.playlist_positions.retain(|pid, _| sources.contains(pid));
            dirty = true;
        }

        if song.source_playlist_ids.is_empty() && !song.is_orphaned {
            song.is_orphaned = true;
            song.orphaned_at = Some(ts.clone());
            stats.orphaned += 1;
            dirty = true;
        }

        if options.force_refresh && touched.contains(&track_id) && !song.is_customized {
            song.lyrics_fetched = false;
            if !song.bpm_manual {
                song.bpm = Bpm::NotAvailable;
            }
            dirty = true;
        }

        if dirty {
            song.updated_at = ts.clone();
            changed.push(song);
        }
    }

    db.save_song_batch(&created, &changed, options.force_refresh)?;

    log::info!(
        "Reconciled collection {}: {} tracks, {} created, {} updated, {} restored, {} orphaned",
        collection.id,
        stats.total_tracks,
        stats.created,
        stats.updated,
        stats.restored,
        stats.orphaned
    );
    Ok(stats)
}
