// Spotify Web API client (app-level, client credentials)
//
// Used for:
// - Playlist metadata and the full track listing of a playlist
// - Track preview URLs
// User-level OAuth lives in `oauth`.

pub mod oauth;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::SpotifyConfig;
use crate::error::ClientError;

const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const SPOTIFY_API_URL: &str = "https://api.spotify.com/v1";
const PAGE_SIZE: u32 = 100;
/// Refresh the app token this long before Spotify says it expires
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

static PLAYLIST_URL_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"playlist[/:]([a-zA-Z0-9]+)").unwrap());
static BARE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9]+$").unwrap());

/// Pull a playlist id out of a share URL, a `spotify:playlist:` URI or a bare id
pub fn extract_playlist_id(input: &str) -> Option<String> {
    let input = input.trim();
    if let Some(caps) = PLAYLIST_URL_ID.captures(input) {
        return Some(caps[1].to_string());
    }
    if BARE_ID.is_match(input) {
        return Some(input.to_string());
    }
    None
}

/// Spotify ids are base62
pub fn is_spotify_id(input: &str) -> bool {
    BARE_ID.is_match(input)
}

/// Playlist metadata without tracks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistMeta {
    pub id: String,
    pub name: String,
    pub description: String,
    pub owner: String,
    pub image_url: Option<String>,
    pub track_count: u32,
    pub url: String,
}

/// One playable track of a playlist, flattened for song creation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistTrack {
    pub track_id: String,
    pub uri: Option<String>,
    pub url: Option<String>,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub year: Option<String>,
    pub album_art_url: Option<String>,
    pub duration_ms: Option<i64>,
    /// Index of the item in the playlist
    pub position: u32,
}

#[async_trait]
pub trait SpotifyApi: Send + Sync {
    async fn playlist(&self, playlist_id: &str) -> Result<PlaylistMeta, ClientError>;

    /// Every playable track of the playlist, across all pages
    async fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<PlaylistTrack>, ClientError>;

    /// 30-second preview URL of a track, when Spotify has one
    async fn track_preview(&self, track_id: &str) -> Result<Option<String>, ClientError>;
}

// ---- Wire types ----

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Default, Deserialize)]
struct Image {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Owner {
    display_name: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrackTotal {
    total: u32,
}

#[derive(Debug, Deserialize)]
struct PlaylistObject {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    owner: Option<Owner>,
    #[serde(default)]
    images: Option<Vec<Image>>,
    tracks: Option<TrackTotal>,
    #[serde(default)]
    external_urls: ExternalUrls,
}

#[derive(Debug, Deserialize)]
struct Artist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Album {
    name: Option<String>,
    release_date: Option<String>,
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct TrackObject {
    id: Option<String>,
    name: String,
    uri: Option<String>,
    duration_ms: Option<i64>,
    #[serde(default)]
    artists: Vec<Artist>,
    album: Option<Album>,
    #[serde(default)]
    external_urls: ExternalUrls,
    preview_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<TrackObject>,
}

#[derive(Debug, Deserialize)]
struct TracksPage {
    items: Vec<PlaylistItem>,
    next: Option<String>,
}

impl From<PlaylistObject> for PlaylistMeta {
    fn from(p: PlaylistObject) -> Self {
        let owner = p
            .owner
            .and_then(|o| o.display_name.or(o.id))
            .unwrap_or_default();
        let image_url = p
            .images
            .and_then(|imgs| imgs.into_iter().next())
            .map(|i| i.url);
        let url = p
            .external_urls
            .spotify
            .unwrap_or_else(|| format!("https://open.spotify.com/playlist/{}", p.id));
        PlaylistMeta {
            id: p.id,
            name: p.name,
            description: p.description.unwrap_or_default(),
            owner,
            image_url,
            track_count: p.tracks.map(|t| t.total).unwrap_or(0),
            url,
        }
    }
}

impl TrackObject {
    /// Flatten into a playlist track. Local files and removed tracks have no id and are skipped.
    fn into_playlist_track(self, position: u32) -> Option<PlaylistTrack> {
        let track_id = self.id.filter(|id| !id.is_empty())?;
        let artist = self
            .artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let (album, year, album_art_url) = match self.album {
            Some(album) => (
                album.name,
                album
                    .release_date
                    .and_then(|d| d.get(..4).map(str::to_string)),
                // Spotify lists images largest first
                album.images.into_iter().next().map(|i| i.url),
            ),
            None => (None, None, None),
        };
        Some(PlaylistTrack {
            track_id,
            uri: self.uri,
            url: self.external_urls.spotify,
            title: self.name,
            artist,
            album,
            year,
            album_art_url,
            duration_ms: self.duration_ms,
            position,
        })
    }
}

/// Flatten one page of playlist items, numbering positions from `offset`
fn tracks_from_page(page: TracksPage, offset: u32) -> (Vec<PlaylistTrack>, Option<String>) {
    let tracks = page
        .items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| {
            item.track
                .and_then(|t| t.into_playlist_track(offset + i as u32))
        })
        .collect();
    (tracks, page.next)
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

pub struct SpotifyClient {
    client_id: Option<String>,
    client_secret: Option<String>,
    client: Client,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyClient {
    pub fn new(config: &SpotifyConfig) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            client,
            token: Mutex::new(None),
        })
    }

    /// App access token via the client-credentials grant, cached until shortly before expiry
    async fn app_token(&self) -> Result<String, ClientError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        let (Some(id), Some(secret)) = (&self.client_id, &self.client_secret) else {
            return Err(ClientError::NotConfigured("Spotify client credentials"));
        };

        let response = self
            .client
            .post(SPOTIFY_TOKEN_URL)
            .basic_auth(id, Some(secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let body: TokenResponse = read_json(response).await?;

        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(TOKEN_MARGIN);
        *cached = Some(CachedToken {
            access_token: body.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(body.access_token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ClientError> {
        let token = self.app_token().await?;
        let response = self.client.get(url).bearer_auth(token).send().await?;
        read_json(response).await
    }
}

/// Deserialize a successful response, or turn the status and body into an error
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::Status {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json()
        .await
        .map_err(|e| ClientError::Parse(e.to_string()))
}

#[async_trait]
impl SpotifyApi for SpotifyClient {
    async fn playlist(&self, playlist_id: &str) -> Result<PlaylistMeta, ClientError> {
        let url = format!(
            "{}/playlists/{}?fields=id,name,description,owner,images,tracks.total,external_urls",
            SPOTIFY_API_URL, playlist_id
        );
        let playlist: PlaylistObject = self.get_json(&url).await?;
        Ok(playlist.into())
    }

    async fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<PlaylistTrack>, ClientError> {
        let mut tracks = Vec::new();
        let mut offset = 0u32;
        let mut next = Some(format!(
            "{}/playlists/{}/tracks?limit={}&offset=0",
            SPOTIFY_API_URL, playlist_id, PAGE_SIZE
        ));

        while let Some(url) = next {
            let page: TracksPage = self.get_json(&url).await?;
            let count = page.items.len() as u32;
            let (page_tracks, page_next) = tracks_from_page(page, offset);
            tracks.extend(page_tracks);
            offset += count;
            next = page_next;
        }

        log::debug!(
            "Fetched {} tracks from playlist {}",
            tracks.len(),
            playlist_id
        );
        Ok(tracks)
    }

    async fn track_preview(&self, track_id: &str) -> Result<Option<String>, ClientError> {
        let url = format!("{}/tracks/{}", SPOTIFY_API_URL, track_id);
        let track: TrackObject = self.get_json(&url).await?;
        Ok(track.preview_url)
    }
}
