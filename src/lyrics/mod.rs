// Lyrics acquisition - Genius search, page scraping, cleanup and line numbering
//
// Lookups never fail outright: every failure becomes placeholder text plus an
// error code, so a song always has something to show.

mod genius;
mod scrape;
mod text;

pub use genius::GeniusClient;
pub use scrape::extract_lyrics_html;
pub use text::{clean_lyrics, number_lyrics};

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// Why a lookup produced placeholder text instead of lyrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LyricsError {
    NotConfigured,
    NotFound,
    ScrapeFailed,
}

impl LyricsError {
    pub fn code(&self) -> &'static str {
        match self {
            LyricsError::NotConfigured => "NOT_CONFIGURED",
            LyricsError::NotFound => "NOT_FOUND",
            LyricsError::ScrapeFailed => "SCRAPE_FAILED",
        }
    }
}

impl fmt::Display for LyricsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LyricsOutcome {
    pub lyrics: String,
    pub lyrics_numbered: String,
    pub error: Option<LyricsError>,
}

impl LyricsOutcome {
    pub fn found(lyrics: String) -> Self {
        let lyrics_numbered = number_lyrics(&lyrics);
        LyricsOutcome {
            lyrics,
            lyrics_numbered,
            error: None,
        }
    }

    pub fn failed(error: LyricsError, title: &str, artist: &str) -> Self {
        let placeholder = match error {
            LyricsError::NotFound => format!("Lyrics not found for {} by {}", title, artist),
            LyricsError::NotConfigured | LyricsError::ScrapeFailed => {
                format!("Could not retrieve lyrics for {} by {}", title, artist)
            }
        };
        LyricsOutcome {
            lyrics: placeholder.clone(),
            lyrics_numbered: placeholder,
            error: Some(error),
        }
    }
}

#[async_trait]
pub trait LyricsSource: Send + Sync {
    async fn fetch_lyrics(&self, title: &str, artist: &str) -> LyricsOutcome;
}
