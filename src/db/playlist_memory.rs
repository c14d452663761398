// Playlist memory - per-user cache of recently used Spotify playlists

use rusqlite::{params, Result};
use serde::Serialize;

use super::{now, Database};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistMemory {
    pub playlist_id: String,
    pub playlist_url: String,
    pub name: String,
    pub owner: String,
    pub track_count: u32,
    pub image_url: Option<String>,
    pub access_count: u32,
    pub first_accessed_at: String,
    pub last_accessed_at: String,
}

/// Metadata refreshed on every access
#[derive(Debug, Clone)]
pub struct PlaylistMemoryUpdate<'a> {
    pub playlist_id: &'a str,
    pub playlist_url: &'a str,
    pub name: &'a str,
    pub owner: &'a str,
    pub track_count: u32,
    pub image_url: Option<&'a str>,
}

impl Database {
    /// Record an access to a playlist: refresh metadata, bump the counter
    pub fn remember_playlist(&self, user_uid: &str, update: &PlaylistMemoryUpdate) -> Result<()> {
        let ts = now();
        self.conn.execute(
            "INSERT INTO playlist_memory (
                user_uid, playlist_id, playlist_url, name, owner, track_count, image_url,
                access_count, first_accessed_at, last_accessed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)
            ON CONFLICT(user_uid, playlist_id) DO UPDATE SET
                playlist_url = excluded.playlist_url,
                name = excluded.name,
                owner = excluded.owner,
                track_count = excluded.track_count,
                image_url = excluded.image_url,
                access_count = playlist_memory.access_count + 1,
                last_accessed_at = excluded.last_accessed_at",
            params![
                user_uid,
                update.playlist_id,
                update.playlist_url,
                update.name,
                update.owner,
                update.track_count,
                update.image_url,
                ts,
            ],
        )?;
        Ok(())
    }

    /// Most recently accessed playlists of a user
    pub fn get_recent_playlists(&self, user_uid: &str, limit: u32) -> Result<Vec<PlaylistMemory>> {
        let mut stmt = self.conn.prepare(
            "SELECT playlist_id, playlist_url, name, owner, track_count, image_url,
                    access_count, first_accessed_at, last_accessed_at
             FROM playlist_memory WHERE user_uid = ?
             ORDER BY last_accessed_at DESC, rowid DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![user_uid, limit], |row| {
            Ok(PlaylistMemory {
                playlist_id: row.get(0)?,
                playlist_url: row.get(1)?,
                name: row.get(2)?,
                owner: row.get(3)?,
                track_count: row.get(4)?,
                image_url: row.get(5)?,
                access_count: row.get(6)?,
                first_accessed_at: row.get(7)?,
                last_accessed_at: row.get(8)?,
            })
        })?;
        rows.collect()
    }

    /// Forget a playlist. Returns false if it wasn't remembered.
    pub fn forget_playlist(&self, user_uid: &str, playlist_id: &str) -> Result<bool> {
        let n = self.conn.execute(
            "DELETE FROM playlist_memory WHERE user_uid = ? AND playlist_id = ?",
            params![user_uid, playlist_id],
        )?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn update<'a>(id: &'a str, name: &'a str) -> PlaylistMemoryUpdate<'a> {
        PlaylistMemoryUpdate {
            playlist_id: id,
            playlist_url: "https://open.spotify.com/playlist/x",
            name,
            owner: "dj",
            track_count: 20,
            image_url: None,
        }
    }

    #[test]
    fn test_remember_counts_accesses() {
        let db = test_db();
        db.remember_playlist("u1", &update("pl1", "Old name")).unwrap();
        db.remember_playlist("u1", &update("pl1", "New name")).unwrap();

        let recent = db.get_recent_playlists("u1", 10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].access_count, 2);
        assert_eq!(recent[0].name, "New name");
    }

    #[test]
    fn test_memory_is_per_user() {
        let db = test_db();
        db.remember_playlist("u1", &update("pl1", "Shared")).unwrap();
        db.remember_playlist("u1", &update("pl1", "Shared")).unwrap();
        db.remember_playlist("u2", &update("pl1", "Shared")).unwrap();

        let u2 = db.get_recent_playlists("u2", 10).unwrap();
        assert_eq!(u2[0].access_count, 1);
    }

    #[test]
    fn test_recent_order_and_limit() {
        let db = test_db();
        for id in ["a", "b", "c", "a"] {
            db.remember_playlist("u1", &update(id, id)).unwrap();
            // Timestamps have millisecond resolution
            std::thread::sleep(std::time::Duration::from_millis(3));
        }

        let recent = db.get_recent_playlists("u1", 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].playlist_id, "a");
    }

    #[test]
    fn test_forget_playlist() {
        let db = test_db();
        db.remember_playlist("u1", &update("pl1", "A")).unwrap();
        assert!(db.forget_playlist("u1", "pl1").unwrap());
        assert!(!db.forget_playlist("u1", "pl1").unwrap());
        assert!(db.get_recent_playlists("u1", 10).unwrap().is_empty());
    }
}
