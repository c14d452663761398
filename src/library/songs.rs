// Song operations - listing, practice notes, lyrics and BPM

use serde_json::{json, Value};
use std::str::FromStr;

use super::audit::audit_entry;
use super::{AccessLevel, Library};
use crate::auth::Identity;
use crate::db::{Bpm, Collection, LyricsUpdate, Song, UNPOSITIONED};
use crate::error::{AppError, AppResult};
use crate::lyrics::number_lyrics;

const MAX_BPM: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SongSort {
    /// Linked playlist order, then position within the playlist
    #[default]
    Playlist,
    Title,
    Artist,
}

impl FromStr for SongSort {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "playlist" => Ok(SongSort::Playlist),
            "title" => Ok(SongSort::Title),
            "artist" => Ok(SongSort::Artist),
            other => Err(AppError::BadRequest(format!("Invalid sort mode: {}", other))),
        }
    }
}

/// (linked playlist index, position) of the earliest source playlist
fn playlist_order(song: &Song, collection: &Collection) -> (usize, u32) {
    song.source_playlist_ids
        .iter()
        .filter_map(|pid| {
            collection
                .playlist_index(pid)
                .map(|idx| (idx, song.position_in(pid)))
        })
        .min()
        .unwrap_or((UNPOSITIONED as usize, UNPOSITIONED))
}

pub(crate) fn sort_songs(songs: &mut [Song], collection: &Collection, sort: SongSort) {
    match sort {
        SongSort::Playlist => songs.sort_by_cached_key(|s| playlist_order(s, collection)),
        SongSort::Title => songs.sort_by_cached_key(|s| s.title.to_lowercase()),
        SongSort::Artist => {
            songs.sort_by_cached_key(|s| (s.artist.to_lowercase(), s.title.to_lowercase()))
        }
    }
}

/// Manual BPM input: a sentinel string or a number in (0, 300]
pub(crate) fn parse_bpm_input(value: &Value) -> AppResult<Bpm> {
    let invalid = || AppError::BadRequest("BPM must be a number between 1 and 300, \"N/A\" or \"NOT_FOUND\"".to_string());
    let number = match value {
        Value::String(s) if s.trim() == "N/A" => return Ok(Bpm::NotAvailable),
        Value::String(s) if s.trim() == "NOT_FOUND" => return Ok(Bpm::NotFound),
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| invalid())?,
        Value::Number(n) => n.as_f64().ok_or_else(invalid)?,
        _ => return Err(invalid()),
    };
    if !number.is_finite() || number <= 0.0 || number > MAX_BPM {
        return Err(invalid());
    }
    let rounded = number.round();
    if rounded < 1.0 {
        return Err(invalid());
    }
    Ok(Bpm::Tempo(rounded as u16))
}

impl Library {
    pub fn list_songs(&self, caller: &Identity, collection_id: &str, sort: SongSort) -> AppResult<Vec<Song>> {
        let (collection, _) = self.collection_for(caller, collection_id, AccessLevel::Viewer)?;
        let mut songs = self.with_db(|db| Ok(db.get_songs_for_collection(collection_id)?))?;
        sort_songs(&mut songs, &collection, sort);
        Ok(songs)
    }

    /// Read a song, fetching its lyrics on first view
    pub async fn get_song(&self, caller: &Identity, song_id: &str) -> AppResult<Song> {
        let (song, _, _) = self.song_for(caller, song_id, AccessLevel::Viewer)?;
        if !song.lyrics_fetched && !song.is_customized {
            return self.fetch_and_store_lyrics(&song, false, false).await;
        }
        Ok(song)
    }

    /// Look up lyrics and store them. Customized songs are skipped unless
    /// `force_customized`, already fetched songs unless `force`. Returns the
    /// song as stored afterwards.
    pub(crate) async fn fetch_and_store_lyrics(
        &self,
        song: &Song,
        force: bool,
        force_customized: bool,
    ) -> AppResult<Song> {
        if (song.is_customized && !force_customized) || (song.lyrics_fetched && !force) {
            return Ok(song.clone());
        }

        let outcome = self.lyrics.fetch_lyrics(&song.title, &song.artist).await;
        if let Some(error) = outcome.error {
            log::warn!("No lyrics for song {} ({}): {}", song.id, song.title, error);
        }
        let update = LyricsUpdate {
            lyrics: outcome.lyrics,
            lyrics_numbered: outcome.lyrics_numbered,
            lyrics_fetch_error: outcome.error.map(|e| e.code().to_string()),
            is_customized: false,
        };

        self.with_db(|db| {
            let Some(current) = db.get_song(&song.id)? else {
                return Err(AppError::NotFound("Song not found".to_string()));
            };
            // Edited while the lookup was in flight
            if current.is_customized && !force_customized {
                return Ok(current);
            }
            db.set_song_lyrics(&song.id, &update)?;
            db.get_song(&song.id)?
                .ok_or_else(|| AppError::NotFound("Song not found".to_string()))
        })
    }

    /// Look up and store the tempo. Unless `force`, songs that already have a
    /// tempo, a not-found answer or a manual value are left alone.
    pub(crate) async fn fetch_and_store_bpm(&self, song: &Song, force: bool) -> AppResult<Song> {
        let settled = song.bpm_manual || song.bpm != Bpm::NotAvailable;
        if settled && !force {
            return Ok(song.clone());
        }

        let bpm = self.bpm.lookup_bpm(&song.title, &song.artist).await;
        self.with_db(|db| {
            let Some(current) = db.get_song(&song.id)? else {
                return Err(AppError::NotFound("Song not found".to_string()));
            };
            // Set by hand or by another lookup while this one was in flight
            if !force && (current.bpm_manual || current.bpm != Bpm::NotAvailable) {
                return Ok(current);
            }
            db.set_song_bpm(&song.id, bpm, false)?;
            db.get_song(&song.id)?
                .ok_or_else(|| AppError::NotFound("Song not found".to_string()))
        })
    }

    pub fn update_notes(&self, caller: &Identity, song_id: &str, notes: &str) -> AppResult<Song> {
        let (song, collection, _) = self.song_for(caller, song_id, AccessLevel::Collaborator)?;
        let updated = self.with_db(|db| {
            db.set_song_notes(song_id, notes)?;
            db.get_song(song_id)?
                .ok_or_else(|| AppError::NotFound("Song not found".to_string()))
        })?;

        let mut entry = audit_entry(caller, "update_notes", "song", song_id);
        entry.resource_name = Some(song.title.clone());
        entry.collection_id = Some(collection.id);
        entry.changes = Some(json!({ "notes": { "old": song.notes, "new": notes } }));
        self.record(entry);
        Ok(updated)
    }

    /// Replace lyrics by hand. The song is then protected from automatic refresh.
    pub fn update_lyrics(&self, caller: &Identity, song_id: &str, lyrics: &str) -> AppResult<Song> {
        let (song, collection, _) = self.song_for(caller, song_id, AccessLevel::Collaborator)?;
        let update = LyricsUpdate {
            lyrics: lyrics.to_string(),
            lyrics_numbered: number_lyrics(lyrics),
            lyrics_fetch_error: None,
            is_customized: true,
        };
        let updated = self.with_db(|db| {
            db.set_song_lyrics(song_id, &update)?;
            db.get_song(song_id)?
                .ok_or_else(|| AppError::NotFound("Song not found".to_string()))
        })?;

        let mut entry = audit_entry(caller, "update_lyrics", "song", song_id);
        entry.resource_name = Some(song.title.clone());
        entry.collection_id = Some(collection.id);
        entry.changes = Some(json!({ "lyrics": { "old": song.lyrics, "new": lyrics } }));
        self.record(entry);
        Ok(updated)
    }

    /// Fetch lyrics again. Customized lyrics need `force_customized`, which
    /// only the owner may use.
    pub async fn refresh_lyrics(
        &self,
        caller: &Identity,
        song_id: &str,
        force_customized: bool,
    ) -> AppResult<Song> {
        let (song, collection, level) = self.song_for(caller, song_id, AccessLevel::Collaborator)?;
        if song.is_customized && !force_customized {
            return Err(AppError::ConfirmationRequired(
                "This song has customized lyrics. Refreshing will overwrite them.".to_string(),
            ));
        }
        if force_customized && !level.is_owner() {
            return Err(AppError::Forbidden(
                "Only the collection owner can overwrite customized lyrics".to_string(),
            ));
        }

        let updated = self.fetch_and_store_lyrics(&song, true, force_customized).await?;

        let mut entry = audit_entry(caller, "refresh_lyrics", "song", song_id);
        entry.resource_name = Some(song.title.clone());
        entry.collection_id = Some(collection.id);
        entry.metadata = Some(json!({
            "force_customized": force_customized,
            "was_customized": song.is_customized,
            "error": updated.lyrics_fetch_error,
        }));
        self.record(entry);
        Ok(updated)
    }

    pub async fn fetch_bpm(&self, caller: &Identity, song_id: &str) -> AppResult<Song> {
        let (song, _, _) = self.song_for(caller, song_id, AccessLevel::Collaborator)?;
        self.fetch_and_store_bpm(&song, true).await
    }

    pub fn set_bpm(&self, caller: &Identity, song_id: &str, value: &Value) -> AppResult<Song> {
        let bpm = parse_bpm_input(value)?;
        let (song, collection, _) = self.song_for(caller, song_id, AccessLevel::Collaborator)?;
        let updated = self.with_db(|db| {
            db.set_song_bpm(song_id, bpm, true)?;
            db.get_song(song_id)?
                .ok_or_else(|| AppError::NotFound("Song not found".to_string()))
        })?;

        let mut entry = audit_entry(caller, "set_bpm", "song", song_id);
        entry.resource_name = Some(song.title.clone());
        entry.collection_id = Some(collection.id);
        entry.changes = Some(json!({ "bpm": { "old": song.bpm, "new": bpm } }));
        self.record(entry);
        Ok(updated)
    }

    pub fn delete_song(&self, caller: &Identity, song_id: &str) -> AppResult<()> {
        let (song, collection, _) = self.song_for(caller, song_id, AccessLevel::Owner)?;
        self.with_db(|db| Ok(db.delete_song(song_id)?))?;

        let mut entry = audit_entry(caller, "delete_song", "song", song_id);
        entry.resource_name = Some(song.title.clone());
        entry.collection_id = Some(collection.id);
        entry.metadata = Some(json!({ "artist": song.artist, "was_orphaned": song.is_orphaned }));
        self.record(entry);
        Ok(())
    }

    /// Delete every orphaned song of a collection
    pub fn purge_orphans(&self, caller: &Identity, collection_id: &str) -> AppResult<usize> {
        let (collection, _) = self.collection_for(caller, collection_id, AccessLevel::Owner)?;
        let deleted = self.with_db(|db| Ok(db.delete_orphaned_songs(collection_id)?))?;

        let mut entry = audit_entry(caller, "purge_orphans", "collection", collection_id);
        entry.resource_name = Some(collection.name);
        entry.collection_id = Some(collection_id.to_string());
        entry.metadata = Some(json!({ "deleted_count": deleted }));
        self.record(entry);
        Ok(deleted)
    }
}
