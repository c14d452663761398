// Tempo lookup via the GetSongBPM API

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::config::GetSongBpmConfig;
use crate::db::Bpm;
use crate::error::ClientError;
use crate::spotify::read_json;

const GETSONGBPM_SEARCH_URL: &str = "https://api.getsong.co/search/";

/// Looks up the tempo of a song. Never fails: problems become `Bpm::NotAvailable`.
#[async_trait]
pub trait BpmSource: Send + Sync {
    async fn lookup_bpm(&self, title: &str, artist: &str) -> Bpm;
}

/// `search` is a list of songs on success and an error object when nothing matched
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    search: Value,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    tempo: Value,
    #[serde(default)]
    artist: Value,
}

impl SearchResult {
    fn artist_name(&self) -> String {
        self.artist
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_lowercase()
    }

    /// Tempo is usually a numeric string ("120"), occasionally a number
    fn tempo(&self) -> Option<u16> {
        let raw = match &self.tempo {
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            Value::Number(n) => n.as_f64()?,
            _ => return None,
        };
        let rounded = raw.round();
        if rounded >= 1.0 && rounded <= u16::MAX as f64 {
            Some(rounded as u16)
        } else {
            None
        }
    }
}

fn search_results(response: SearchResponse) -> Vec<SearchResult> {
    match response.search {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    }
}

/// Pick a tempo from search results: the first artist match with a usable
/// tempo, else the first result's tempo
fn select_bpm(results: &[SearchResult], artist: &str) -> Bpm {
    let wanted = artist.to_lowercase();
    let matched = results.iter().find_map(|r| {
        let name = r.artist_name();
        if name.contains(&wanted) || wanted.contains(&name) {
            r.tempo()
        } else {
            None
        }
    });

    match matched.or_else(|| results.first().and_then(SearchResult::tempo)) {
        Some(tempo) => Bpm::Tempo(tempo),
        None => Bpm::NotFound,
    }
}

pub struct GetSongBpmClient {
    api_key: Option<String>,
    client: Client,
}

impl GetSongBpmClient {
    pub fn new(config: &GetSongBpmConfig) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            api_key: config.api_key.clone(),
            client,
        })
    }

    async fn search(&self, api_key: &str, title: &str) -> Result<Vec<SearchResult>, ClientError> {
        let response = self
            .client
            .get(GETSONGBPM_SEARCH_URL)
            .query(&[("api_key", api_key), ("type", "song"), ("lookup", title)])
            .send()
            .await?;
        let body: SearchResponse = read_json(response).await?;
        Ok(search_results(body))
    }
}

#[async_trait]
impl BpmSource for GetSongBpmClient {
    async fn lookup_bpm(&self, title: &str, artist: &str) -> Bpm {
        let Some(api_key) = self.api_key.as_deref() else {
            log::warn!("GetSongBPM API key not configured");
            return Bpm::NotAvailable;
        };

        match self.search(api_key, title).await {
            Ok(results) => {
                let bpm = select_bpm(&results, artist);
                match bpm {
                    Bpm::Tempo(n) => log::info!("Found BPM for '{}' by '{}': {}", title, artist, n),
                    _ => log::warn!("No BPM found for '{}' by '{}'", title, artist),
                }
                bpm
            }
            Err(e) => {
                log::error!("BPM lookup failed for '{}' by '{}': {}", title, artist, e);
                Bpm::NotAvailable
            }
        }
    }
}
