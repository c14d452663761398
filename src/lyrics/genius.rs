// Genius client - song search via the API, lyrics scraped from the song page

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::Deserialize;
use std::time::Duration;

use super::{clean_lyrics, extract_lyrics_html, LyricsError, LyricsOutcome, LyricsSource};
use crate::config::{GeniusConfig, ScraperConfig};
use crate::error::ClientError;
use crate::spotify::read_json;

const GENIUS_SEARCH_URL: &str = "https://api.genius.com/search";
const SCRAPER_API_URL: &str = "http://api.scraperapi.com";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
const DIRECT_PAGE_TIMEOUT: Duration = Duration::from_secs(10);
const PROXY_PAGE_TIMEOUT: Duration = Duration::from_secs(30);

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    response: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    result: HitResult,
}

#[derive(Debug, Deserialize)]
struct HitResult {
    url: String,
}

/// Search text: title then artist, unquoted
fn search_query(title: &str, artist: &str) -> String {
    format!("{} {}", title.trim(), artist.trim())
}

fn first_hit_url(response: SearchResponse) -> Option<String> {
    response.response.hits.into_iter().next().map(|h| h.result.url)
}

/// Failure inside a single lookup, before it becomes a placeholder
#[derive(Debug)]
enum LookupFailure {
    NoMatch,
    Search(ClientError),
    Page(ClientError),
    NoContainer,
    Empty,
}

impl LookupFailure {
    fn code(&self) -> LyricsError {
        match self {
            LookupFailure::NoMatch | LookupFailure::Empty => LyricsError::NotFound,
            LookupFailure::Search(_) | LookupFailure::Page(_) | LookupFailure::NoContainer => {
                LyricsError::ScrapeFailed
            }
        }
    }
}

pub struct GeniusClient {
    access_token: Option<String>,
    scraper_api_key: Option<String>,
    client: Client,
}

impl GeniusClient {
    pub fn new(genius: &GeniusConfig, scraper: &ScraperConfig) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            access_token: genius.access_token.clone(),
            scraper_api_key: scraper.api_key.clone(),
            client,
        })
    }

    async fn search(&self, token: &str, title: &str, artist: &str) -> Result<Option<String>, ClientError> {
        let query = search_query(title, artist);
        let response = self
            .client
            .get(GENIUS_SEARCH_URL)
            .query(&[("q", query.as_str())])
            .bearer_auth(token)
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await?;
        let body: SearchResponse = read_json(response).await?;
        Ok(first_hit_url(body))
    }

    /// Song page HTML, through the scraping proxy when one is configured
    async fn fetch_page(&self, url: &str) -> Result<String, ClientError> {
        let request = match &self.scraper_api_key {
            Some(key) => self
                .client
                .get(SCRAPER_API_URL)
                .query(&[("api_key", key.as_str()), ("url", url), ("render", "false")])
                .timeout(PROXY_PAGE_TIMEOUT),
            None => self
                .client
                .get(url)
                .header(header::USER_AGENT, BROWSER_USER_AGENT)
                .header(
                    header::ACCEPT,
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                )
                .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
                .timeout(DIRECT_PAGE_TIMEOUT),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: format!("song page request failed for {}", url),
            });
        }
        Ok(response.text().await?)
    }

    async fn lookup(&self, token: &str, title: &str, artist: &str) -> Result<String, LookupFailure> {
        let url = self
            .search(token, title, artist)
            .await
            .map_err(LookupFailure::Search)?
            .ok_or(LookupFailure::NoMatch)?;

        let html = self.fetch_page(&url).await.map_err(LookupFailure::Page)?;
        let raw = extract_lyrics_html(&html).ok_or(LookupFailure::NoContainer)?;

        let cleaned = clean_lyrics(&raw);
        if cleaned.is_empty() {
            return Err(LookupFailure::Empty);
        }
        Ok(cleaned)
    }
}

#[async_trait]
impl LyricsSource for GeniusClient {
    async fn fetch_lyrics(&self, title: &str, artist: &str) -> LyricsOutcome {
        let Some(token) = self.access_token.as_deref() else {
            log::warn!("Genius access token not configured, skipping lyrics for '{}'", title);
            return LyricsOutcome::failed(LyricsError::NotConfigured, title, artist);
        };

        match self.lookup(token, title, artist).await {
            Ok(lyrics) => LyricsOutcome::found(lyrics),
            Err(failure) => {
                log::warn!(
                    "Lyrics lookup failed for '{}' by '{}': {:?}",
                    title,
                    artist,
                    failure
                );
                LyricsOutcome::failed(failure.code(), title, artist)
            }
        }
    }
}
