// Song queries

use rusqlite::{params, Connection, OptionalExtension, Result, Row};

use super::{json_column, now, to_json, Bpm, Database, LyricsUpdate, Song};

const SONG_COLUMNS: &str = "id, collection_id, spotify_track_id, spotify_uri, spotify_url,
    title, artist, album, year, album_art_url, duration_ms,
    lyrics, lyrics_numbered, lyrics_fetched, lyrics_fetch_error, lyrics_fetched_at,
    is_customized, bpm, bpm_manual, notes, source_playlist_ids, playlist_positions,
    is_orphaned, orphaned_at, created_at, updated_at";

fn song_from_row(row: &Row) -> Result<Song> {
    let bpm: String = row.get(17)?;
    Ok(Song {
        id: row.get(0)?,
        collection_id: row.get(1)?,
        spotify_track_id: row.get(2)?,
        spotify_uri: row.get(3)?,
        spotify_url: row.get(4)?,
        title: row.get(5)?,
        artist: row.get(6)?,
        album: row.get(7)?,
        year: row.get(8)?,
        album_art_url: row.get(9)?,
        duration_ms: row.get(10)?,
        lyrics: row.get(11)?,
        lyrics_numbered: row.get(12)?,
        lyrics_fetched: row.get(13)?,
        lyrics_fetch_error: row.get(14)?,
        lyrics_fetched_at: row.get(15)?,
        is_customized: row.get(16)?,
        // Unparseable values are treated as "not looked up yet"
        bpm: bpm.parse().unwrap_or_default(),
        bpm_manual: row.get(18)?,
        notes: row.get(19)?,
        source_playlist_ids: json_column(row, 20)?,
        playlist_positions: json_column(row, 21)?,
        is_orphaned: row.get(22)?,
        orphaned_at: row.get(23)?,
        created_at: row.get(24)?,
        updated_at: row.get(25)?,
    })
}

fn insert_song_on(conn: &Connection, song: &Song) -> Result<()> {
    conn.execute(
        "INSERT INTO songs (
            id, collection_id, spotify_track_id, spotify_uri, spotify_url,
            title, artist, album, year, album_art_url, duration_ms,
            lyrics, lyrics_numbered, lyrics_fetched, lyrics_fetch_error, lyrics_fetched_at,
            is_customized, bpm, bpm_manual, notes, source_playlist_ids, playlist_positions,
            is_orphaned, orphaned_at, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            song.id,
            song.collection_id,
            song.spotify_track_id,
            song.spotify_uri,
            song.spotify_url,
            song.title,
            song.artist,
            song.album,
            song.year,
            song.album_art_url,
            song.duration_ms,
            song.lyrics,
            song.lyrics_numbered,
            song.lyrics_fetched,
            song.lyrics_fetch_error,
            song.lyrics_fetched_at,
            song.is_customized,
            song.bpm.to_string(),
            song.bpm_manual,
            song.notes,
            to_json(&song.source_playlist_ids)?,
            to_json(&song.playlist_positions)?,
            song.is_orphaned,
            song.orphaned_at,
            song.created_at,
            song.updated_at,
        ],
    )?;
    Ok(())
}

/// Write back the playlist-derived fields of a song. User-edited fields
/// (lyrics, notes, BPM) are only written when `with_user_fields` is set.
fn update_song_on(conn: &Connection, song: &Song, with_user_fields: bool) -> Result<()> {
    conn.execute(
        "UPDATE songs SET
            spotify_uri = ?, spotify_url = ?, title = ?, artist = ?, album = ?,
            year = ?, album_art_url = ?, duration_ms = ?,
            source_playlist_ids = ?, playlist_positions = ?,
            is_orphaned = ?, orphaned_at = ?, updated_at = ?
         WHERE id = ?",
        params![
            song.spotify_uri,
            song.spotify_url,
            song.title,
            song.artist,
            song.album,
            song.year,
            song.album_art_url,
            song.duration_ms,
            to_json(&song.source_playlist_ids)?,
            to_json(&song.playlist_positions)?,
            song.is_orphaned,
            song.orphaned_at,
            song.updated_at,
            song.id,
        ],
    )?;

    if with_user_fields {
        conn.execute(
            "UPDATE songs SET
                lyrics = ?, lyrics_numbered = ?, lyrics_fetched = ?, lyrics_fetch_error = ?,
                lyrics_fetched_at = ?, is_customized = ?, bpm = ?, bpm_manual = ?, notes = ?
             WHERE id = ?",
            params![
                song.lyrics,
                song.lyrics_numbered,
                song.lyrics_fetched,
                song.lyrics_fetch_error,
                song.lyrics_fetched_at,
                song.is_customized,
                song.bpm.to_string(),
                song.bpm_manual,
                song.notes,
                song.id,
            ],
        )?;
    }
    Ok(())
}

impl Database {
    /// Insert a new song
    pub fn insert_song(&self, song: &Song) -> Result<()> {
        insert_song_on(&self.conn, song)
    }

    /// Read a song by id. Returns None if it doesn't exist.
    pub fn get_song(&self, id: &str) -> Result<Option<Song>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM songs WHERE id = ?", SONG_COLUMNS),
                [id],
                song_from_row,
            )
            .optional()
    }

    /// All songs of a collection, in insertion order
    pub fn get_songs_for_collection(&self, collection_id: &str) -> Result<Vec<Song>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM songs WHERE collection_id = ? ORDER BY rowid",
            SONG_COLUMNS
        ))?;
        let songs = stmt.query_map([collection_id], song_from_row)?;
        songs.collect()
    }

    /// Total and orphaned song counts for a collection
    pub fn count_songs(&self, collection_id: &str) -> Result<(i64, i64)> {
        self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(is_orphaned), 0) FROM songs WHERE collection_id = ?",
            [collection_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
    }

    /// Apply a batch of new and changed songs in one transaction.
    /// Updates only touch playlist-derived fields unless `with_user_fields` is set.
    pub fn save_song_batch(
        &self,
        inserts: &[Song],
        updates: &[Song],
        with_user_fields: bool,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for song in inserts {
            insert_song_on(&tx, song)?;
        }
        for song in updates {
            update_song_on(&tx, song, with_user_fields)?;
        }
        tx.commit()
    }

    /// Update practice notes
    pub fn set_song_notes(&self, id: &str, notes: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE songs SET notes = ?, updated_at = ? WHERE id = ?",
            params![notes, now(), id],
        )?;
        Ok(())
    }

    /// Store lyrics after a fetch or a manual edit; marks them fetched
    pub fn set_song_lyrics(&self, id: &str, update: &LyricsUpdate) -> Result<()> {
        let ts = now();
        self.conn.execute(
            "UPDATE songs SET
                lyrics = ?, lyrics_numbered = ?, lyrics_fetched = 1, lyrics_fetch_error = ?,
                lyrics_fetched_at = ?, is_customized = ?, updated_at = ?
             WHERE id = ?",
            params![
                update.lyrics,
                update.lyrics_numbered,
                update.lyrics_fetch_error,
                ts,
                update.is_customized,
                ts,
                id
            ],
        )?;
        Ok(())
    }

    /// Store a BPM value; `manual` marks it as user-entered
    pub fn set_song_bpm(&self, id: &str, bpm: Bpm, manual: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE songs SET bpm = ?, bpm_manual = ?, updated_at = ? WHERE id = ?",
            params![bpm.to_string(), manual, now(), id],
        )?;
        Ok(())
    }

    /// Delete a song
    pub fn delete_song(&self, id: &str) -> Result<bool> {
        let n = self.conn.execute("DELETE FROM songs WHERE id = ?", [id])?;
        Ok(n > 0)
    }

    /// Delete every orphaned song in a collection. Returns the number removed.
    pub fn delete_orphaned_songs(&self, collection_id: &str) -> Result<usize> {
        self.conn.execute(
            "DELETE FROM songs WHERE collection_id = ? AND is_orphaned = 1",
            [collection_id],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_insert_and_get_song() {
        let db = test_db();
        let song = test_song("c1", "t1");
        db.insert_song(&song).unwrap();

        let retrieved = db.get_song(&song.id).unwrap().expect("song should exist");
        assert_eq!(retrieved, song);
        assert_eq!(retrieved.id, "c1__t1");
    }

    #[test]
    fn test_get_missing_song() {
        let db = test_db();
        assert_eq!(db.get_song("nope").unwrap(), None);
    }

    #[test]
    fn test_unique_track_per_collection() {
        let db = test_db();
        let song = test_song("c1", "t1");
        db.insert_song(&song).unwrap();

        // Same track under a different id in the same collection must still be rejected
        let mut dup = test_song("c1", "t1");
        dup.id = "other-id".to_string();
        assert!(db.insert_song(&dup).is_err(), "Duplicate (collection, track) should fail");

        // Same track in another collection is fine
        db.insert_song(&test_song("c2", "t1")).unwrap();
    }

    #[test]
    fn test_songs_for_collection_and_counts() {
        let db = test_db();
        db.insert_song(&test_song("c1", "t1")).unwrap();
        let mut orphan = test_song("c1", "t2");
        orphan.is_orphaned = true;
        db.insert_song(&orphan).unwrap();
        db.insert_song(&test_song("c2", "t3")).unwrap();

        let songs = db.get_songs_for_collection("c1").unwrap();
        assert_eq!(songs.len(), 2);
        assert_eq!(db.count_songs("c1").unwrap(), (2, 1));
        assert_eq!(db.count_songs("empty").unwrap(), (0, 0));
    }

    #[test]
    fn test_batch_update_preserves_user_fields() {
        let db = test_db();
        let song = test_song("c1", "t1");
        db.insert_song(&song).unwrap();
        db.set_song_notes(&song.id, "Watch the bridge").unwrap();
        db.set_song_bpm(&song.id, Bpm::Tempo(140), true).unwrap();

        let mut changed = song.clone();
        changed.title = "Renamed upstream".to_string();
        changed.notes = String::new();
        changed.bpm = Bpm::NotAvailable;
        changed.source_playlist_ids = vec!["pl1".into(), "pl2".into()];
        changed.playlist_positions = BTreeMap::from([("pl1".into(), 0), ("pl2".into(), 4)]);
        db.save_song_batch(&[], &[changed], false).unwrap();

        let stored = db.get_song(&song.id).unwrap().unwrap();
        assert_eq!(stored.title, "Renamed upstream");
        assert_eq!(stored.notes, "Watch the bridge");
        assert_eq!(stored.bpm, Bpm::Tempo(140));
        assert!(stored.bpm_manual);
        assert_eq!(stored.position_in("pl2"), 4);
    }

    #[test]
    fn test_batch_is_atomic() {
        let db = test_db();
        db.insert_song(&test_song("c1", "t1")).unwrap();

        // Second insert collides, so the first must roll back too
        let result = db.save_song_batch(&[test_song("c1", "t2"), test_song("c1", "t1")], &[], false);
        assert!(result.is_err());
        assert!(db.get_song("c1__t2").unwrap().is_none());
    }

    #[test]
    fn test_set_song_lyrics() {
        let db = test_db();
        let song = test_song("c1", "t1");
        db.insert_song(&song).unwrap();

        db.set_song_lyrics(
            &song.id,
            &LyricsUpdate {
                lyrics: "la la".into(),
                lyrics_numbered: "  1  la la".into(),
                lyrics_fetch_error: None,
                is_customized: true,
            },
        )
        .unwrap();

        let stored = db.get_song(&song.id).unwrap().unwrap();
        assert!(stored.lyrics_fetched);
        assert!(stored.is_customized);
        assert!(stored.lyrics_fetched_at.is_some());
        assert_eq!(stored.lyrics_numbered, "  1  la la");
    }

    #[test]
    fn test_delete_orphaned_songs() {
        let db = test_db();
        db.insert_song(&test_song("c1", "t1")).unwrap();
        let mut orphan = test_song("c1", "t2");
        orphan.is_orphaned = true;
        db.insert_song(&orphan).unwrap();

        assert_eq!(db.delete_orphaned_songs("c1").unwrap(), 1);
        assert!(db.get_song("c1__t1").unwrap().is_some());
        assert!(db.get_song("c1__t2").unwrap().is_none());
    }

    #[test]
    fn test_delete_song() {
        let db = test_db();
        db.insert_song(&test_song("c1", "t1")).unwrap();
        assert!(db.delete_song("c1__t1").unwrap());
        assert!(!db.delete_song("c1__t1").unwrap());
    }
}
