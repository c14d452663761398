// Database layer - SQLite connection, migrations, shared row types

mod audit;
mod collections;
mod playlist_memory;
mod songs;
mod users;

pub use audit::{AuditEntry, AuditFilter, NewAuditEntry};
pub use playlist_memory::{PlaylistMemory, PlaylistMemoryUpdate};
pub use users::{OAuthState, SpotifyProfile, SpotifyToken, User};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Result, Row};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Position assigned to songs that have no source playlist, so they sort last
pub const UNPOSITIONED: u32 = 999_999;

/// Tempo of a song, or why there isn't one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bpm {
    Tempo(u16),
    /// Not looked up yet, or the lookup service was unavailable
    #[default]
    NotAvailable,
    /// The lookup service answered but had no tempo for the song
    NotFound,
}

impl Bpm {
    pub fn is_tempo(&self) -> bool {
        matches!(self, Bpm::Tempo(_))
    }
}

impl fmt::Display for Bpm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bpm::Tempo(n) => write!(f, "{}", n),
            Bpm::NotAvailable => f.write_str("N/A"),
            Bpm::NotFound => f.write_str("NOT_FOUND"),
        }
    }
}

impl FromStr for Bpm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "N/A" | "" => Ok(Bpm::NotAvailable),
            "NOT_FOUND" => Ok(Bpm::NotFound),
            other => other
                .parse::<u16>()
                .map(Bpm::Tempo)
                .map_err(|_| format!("invalid BPM value: {}", other)),
        }
    }
}

impl Serialize for Bpm {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Bpm::Tempo(n) => serializer.serialize_u16(*n),
            Bpm::NotAvailable => serializer.serialize_str("N/A"),
            Bpm::NotFound => serializer.serialize_str("NOT_FOUND"),
        }
    }
}

/// A song in a collection. Identity is (collection_id, spotify_track_id).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Song {
    pub id: String,
    pub collection_id: String,
    pub spotify_track_id: String,
    pub spotify_uri: Option<String>,
    pub spotify_url: Option<String>,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub year: Option<String>,
    pub album_art_url: Option<String>,
    pub duration_ms: Option<i64>,
    pub lyrics: String,
    pub lyrics_numbered: String,
    pub lyrics_fetched: bool,
    pub lyrics_fetch_error: Option<String>,
    pub lyrics_fetched_at: Option<String>,
    pub is_customized: bool,
    pub bpm: Bpm,
    pub bpm_manual: bool,
    pub notes: String,
    pub source_playlist_ids: Vec<String>,
    pub playlist_positions: BTreeMap<String, u32>,
    pub is_orphaned: bool,
    pub orphaned_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Song {
    /// Deterministic song id for a track within a collection
    pub fn make_id(collection_id: &str, spotify_track_id: &str) -> String {
        format!("{}__{}", collection_id, spotify_track_id)
    }

    /// Position of the song within one of its source playlists
    pub fn position_in(&self, playlist_id: &str) -> u32 {
        self.playlist_positions
            .get(playlist_id)
            .copied()
            .unwrap_or(UNPOSITIONED)
    }
}

/// Lyric fields written together after a fetch or a manual edit
#[derive(Debug, Clone, PartialEq)]
pub struct LyricsUpdate {
    pub lyrics: String,
    pub lyrics_numbered: String,
    pub lyrics_fetch_error: Option<String>,
    pub is_customized: bool,
}

/// Spotify playlist linked to a collection, stored on the collection row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedPlaylist {
    pub playlist_id: String,
    pub name: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub track_count: u32,
    pub linked_at: String,
    #[serde(default)]
    pub last_synced_at: Option<String>,
}

/// Pending request from a user who wants to collaborate on a shared collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationRequest {
    pub user_uid: String,
    pub user_email: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub message: String,
    pub requested_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collection {
    pub id: String,
    pub owner_uid: String,
    pub owner_email: String,
    pub name: String,
    pub description: String,
    pub is_personal: bool,
    pub is_shared: bool,
    pub collaborators: Vec<String>,
    pub collaboration_requests: Vec<CollaborationRequest>,
    pub linked_playlists: Vec<LinkedPlaylist>,
    pub created_at: String,
    pub updated_at: String,
}

impl Collection {
    pub fn is_collaborator(&self, email: &str) -> bool {
        self.collaborators
            .iter()
            .any(|c| c.eq_ignore_ascii_case(email))
    }

    /// Index of a playlist in the collection's linked order
    pub fn playlist_index(&self, playlist_id: &str) -> Option<usize> {
        self.linked_playlists
            .iter()
            .position(|p| p.playlist_id == playlist_id)
    }
}

/// Current UTC time in the format every timestamp column uses
pub fn now() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Read a JSON text column into a typed value
fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Read an optional JSON text column
fn json_column_opt<T: DeserializeOwned>(row: &Row, idx: usize) -> Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        serde_json::from_str(&t).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create a new database connection
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        Ok(Database { conn })
    }

    /// Create an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Database { conn })
    }

    /// Run migrations to set up the database schema
    pub fn run_migrations(&self) -> Result<()> {
        let migration_001 = include_str!("migrations/001_init.sql");
        self.conn.execute_batch(migration_001)?;

        // Migration 002: orphan timestamp on songs
        // Column check keeps this idempotent on databases created before it existed
        let has_orphaned_at: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('songs') WHERE name = 'orphaned_at'",
            [],
            |row| row.get(0),
        )?;

        if !has_orphaned_at {
            let migration_002 = include_str!("migrations/002_song_orphaned_at.sql");
            self.conn.execute_batch(migration_002)?;
        }

        Ok(())
    }
}
